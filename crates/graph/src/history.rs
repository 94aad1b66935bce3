//! [`HistoryEngine`]: lowest-common-ancestor search, three-way commit merge, fast-forward
//! detection, and bounded history traversal (`spec.md` §4.3 "Commit history").
//!
//! The engine maintains no separate graph structure; it traverses `parents` edges on demand,
//! grounded on `dag::ops::DagAlgorithm::gca_all`/`common_ancestors` default implementations
//! (`eden/scm/lib/dag/src/ops.rs`, `eden/scm/lib/dag/src/default_impl.rs`), which likewise compute
//! ancestor sets by walking edges rather than consulting a precomputed index.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use strata_hash::Hash;
use strata_objects::Commit;
use strata_objects::CommitStore;
use strata_objects::Conflict;
use strata_objects::Contents;
use strata_objects::ContentsStore;
use strata_objects::Metadata;
use strata_objects::NodeStore;
use strata_objects::Task;
use strata_store::Error as StoreError;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A traversal bound was hit before the operation could complete, per `spec.md` §7 ("returned as
/// values, not errors"). Kept as a plain data variant so callers can match on it distinctly from
/// a genuine I/O or merge failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraversalBound {
    MaxDepthReached,
    TooManyLcas,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("backend I/O error: {0}")]
    Store(#[from] StoreError),

    #[error("referenced commit {0} is not present in the commit store")]
    MissingCommit(Hash),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error("traversal bound exceeded: {0:?}")]
    Bounded(TraversalBound),

    #[error("operation aborted by caller")]
    Aborted,
}

/// The commit-DAG handle: a [`CommitStore`] plus the [`NodeStore`]/[`ContentsStore`] needed to
/// actually merge the trees two commits point at. One engine is built per `(Metadata, Contents)`
/// type pair the embedding application uses, the same way `strata::Repository` assembles one
/// `CommitStore` per repository.
pub struct HistoryEngine<M: Metadata, C: Contents> {
    commits: CommitStore,
    nodes: NodeStore<M>,
    contents: ContentsStore<C>,
}

impl<M: Metadata, C: Contents> Clone for HistoryEngine<M, C> {
    fn clone(&self) -> Self {
        HistoryEngine {
            commits: self.commits.clone(),
            nodes: self.nodes.clone(),
            contents: self.contents.clone(),
        }
    }
}

impl<M: Metadata, C: Contents> HistoryEngine<M, C> {
    pub fn new(commits: CommitStore, nodes: NodeStore<M>, contents: ContentsStore<C>) -> Self {
        HistoryEngine { commits, nodes, contents }
    }

    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    async fn load(&self, h: Hash) -> Result<Commit, HistoryError> {
        self.commits.find(&h).await?.ok_or(HistoryError::MissingCommit(h))
    }

    /// `is_ancestor(ancestor, descendant)`: walks `descendant`'s parents backward looking for
    /// `ancestor`. Used directly by [`Self::is_fast_forward`] and as the dominance test inside
    /// [`Self::lcas`].
    #[instrument(skip(self))]
    pub async fn is_ancestor(&self, ancestor: Hash, descendant: Hash) -> Result<bool, HistoryError> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(descendant);
        visited.insert(descendant);
        while let Some(h) = queue.pop_front() {
            if h == ancestor {
                return Ok(true);
            }
            let commit = self.load(h).await?;
            for parent in commit.parents {
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(false)
    }

    /// `fast_forward(h)` "succeeds ... iff the current head is a (strict) ancestor of `h`"
    /// (`spec.md` §4.3). This is the pure predicate; advancing the branch pointer is the facade's
    /// job (it owns the branch-name lock and the `test_and_set`).
    pub async fn is_fast_forward(&self, current_head: Hash, candidate: Hash) -> Result<bool, HistoryError> {
        if current_head == candidate {
            return Ok(false);
        }
        self.is_ancestor(current_head, candidate).await
    }

    /// Every commit reachable backward from `heads` (inclusive) that has `h` as an ancestor.
    /// The engine keeps no forward index, so "descendants of `h`" only has an answer relative to
    /// a known set of heads to search from — the same constraint `dag::ops::DagAlgorithm::heads`
    /// default implementations work under, computing descendants by walking ancestor edges from
    /// the frontier rather than consulting a precomputed child index. `h` itself is included,
    /// matching `is_ancestor`'s reflexive convention.
    #[instrument(skip(self, heads, cancel))]
    pub async fn descendants(
        &self,
        h: Hash,
        heads: &HashSet<Hash>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HashSet<Hash>, HistoryError> {
        let reachable = self.history(heads, &HashSet::new(), None, cancel).await?;
        let mut result = HashSet::new();
        for candidate in reachable {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(HistoryError::Aborted);
            }
            if self.is_ancestor(h, candidate).await? {
                result.insert(candidate);
            }
        }
        Ok(result)
    }

    /// All ancestors of `start` (including `start`), keyed by BFS depth. Aborts with
    /// `MaxDepthReached` the instant exploring further would exceed `max_depth`, rather than
    /// silently truncating the result.
    async fn ancestors_with_depth(
        &self,
        start: Hash,
        max_depth: Option<u64>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HashMap<Hash, u64>, HistoryError> {
        let mut visited = HashMap::new();
        let mut queue = VecDeque::new();
        visited.insert(start, 0u64);
        queue.push_back((start, 0u64));

        while let Some((h, depth)) = queue.pop_front() {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(HistoryError::Aborted);
            }
            let commit = self.load(h).await?;
            for parent in commit.parents {
                let next_depth = depth + 1;
                if let Some(max) = max_depth {
                    if next_depth > max {
                        return Err(HistoryError::Bounded(TraversalBound::MaxDepthReached));
                    }
                }
                if !visited.contains_key(&parent) {
                    visited.insert(parent, next_depth);
                    queue.push_back((parent, next_depth));
                }
            }
        }
        Ok(visited)
    }

    /// Lowest common ancestors of `c1`/`c2` (`spec.md` §4.3): BFS from both sides to find every
    /// common ancestor, then keep only those with no common-ancestor descendant (i.e. no other
    /// common ancestor lies strictly between it and `c1`/`c2`). `cancel`, if given, is checked
    /// during both BFS walks and the dominance filter — the three phases an LCA search over a
    /// deep history can spend real wall-clock time in (§5 cancellation).
    #[instrument(skip(self, cancel))]
    pub async fn lcas(
        &self,
        c1: Hash,
        c2: Hash,
        max_depth: Option<u64>,
        max_count: Option<usize>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Hash>, HistoryError> {
        if c1 == c2 {
            return Ok(vec![c1]);
        }

        let ancestors_1 = self.ancestors_with_depth(c1, max_depth, cancel).await?;
        let ancestors_2 = self.ancestors_with_depth(c2, max_depth, cancel).await?;
        let common: Vec<Hash> = ancestors_1.keys().filter(|h| ancestors_2.contains_key(h)).copied().collect();

        let mut lowest = Vec::new();
        'candidate: for &x in &common {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(HistoryError::Aborted);
            }
            for &y in &common {
                if x == y {
                    continue;
                }
                // `y` is a closer (lower) common ancestor than `x` when `x` is one of `y`'s
                // ancestors, i.e. `y` descends from `x`.
                if self.is_ancestor(x, y).await? {
                    continue 'candidate;
                }
            }
            lowest.push(x);
        }

        if let Some(limit) = max_count {
            if lowest.len() > limit {
                return Err(HistoryError::Bounded(TraversalBound::TooManyLcas));
            }
        }
        Ok(lowest)
    }

    /// Reduces a set of lowest common ancestors to a single virtual ancestor node, per the §9
    /// design note ("reduce them to a single virtual ancestor by pairwise three-way merging").
    /// Two ancestors have no common base of their own (both are *lowest*, so neither descends
    /// from the other), so each pairwise reduction step merges with no ancestor (`old = None`),
    /// the same "unrelated histories" case `NodeStore::merge` already handles for a fresh root.
    async fn reduce_ancestor_node(&self, lcas: &[Hash]) -> Result<Option<Hash>, HistoryError> {
        let mut iter = lcas.iter();
        let first = match iter.next() {
            None => return Ok(None),
            Some(h) => self.load(*h).await?.node,
        };
        let mut acc = first;
        for &h in iter {
            let node = self.load(h).await?.node;
            acc = self
                .nodes
                .merge(&self.contents, None, Some(acc), Some(node))
                .await?
                .expect("merging two present node hashes always yields a node");
        }
        Ok(Some(acc))
    }

    /// Three-way commit merge (`spec.md` §4.3): compute `lcas(a, b)`, reduce them to a single
    /// virtual ancestor, merge `a`'s and `b`'s trees against it, and emit a new commit with
    /// parents `[a; b]` (the "into" branch first, per the §9 design note — never normalised) and
    /// `task` attached verbatim.
    #[instrument(skip(self, task, cancel))]
    pub async fn merge_commits(
        &self,
        task: Task,
        a: Hash,
        b: Hash,
        max_depth: Option<u64>,
        max_lcas: Option<usize>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Hash, HistoryError> {
        let lcas = self.lcas(a, b, max_depth, max_lcas, cancel).await?;
        let ancestor_node = self.reduce_ancestor_node(&lcas).await?;

        let commit_a = self.load(a).await?;
        let commit_b = self.load(b).await?;

        let merged_node = self
            .nodes
            .merge(&self.contents, ancestor_node, Some(commit_a.node), Some(commit_b.node))
            .await?
            .expect("merging two present node hashes always yields a node");

        let commit = Commit { node: merged_node, parents: vec![a, b], task };
        let hash = self
            .commits
            .add(commit)
            .await
            .map_err(|e| HistoryError::Conflict(Conflict::new(format!("failed to persist merge commit: {e}"))))?;
        Ok(hash)
    }

    /// The commit-DAG reachable from `max` (every branch head by convention), truncated at
    /// `depth` levels and at any commit in `min` (`spec.md` §4.3 "Closure / history slice").
    /// `cancel`, if given, is checked once per visited commit.
    #[instrument(skip(self, max, min, cancel))]
    pub async fn history(
        &self,
        max: &HashSet<Hash>,
        min: &HashSet<Hash>,
        depth: Option<u64>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HashSet<Hash>, HistoryError> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<(Hash, u64)> = max.iter().map(|h| (*h, 0)).collect();

        while let Some((h, d)) = queue.pop_front() {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(HistoryError::Aborted);
            }
            if !visited.insert(h) {
                continue;
            }
            if min.contains(&h) {
                continue;
            }
            if let Some(max_depth) = depth {
                if d >= max_depth {
                    continue;
                }
            }
            let commit = self.load(h).await?;
            for parent in commit.parents {
                if !visited.contains(&parent) {
                    queue.push_back((parent, d + 1));
                }
            }
        }
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_hash::Path;
    use strata_objects::Entry;
    use strata_store::MemStore;

    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct NoMetadata;

    impl Metadata for NoMetadata {
        fn merge3(_old: &Self, _a: &Self, _b: &Self) -> Result<Self, Conflict> {
            Ok(NoMetadata)
        }
    }

    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Text(String);

    #[async_trait::async_trait]
    impl Contents for Text {
        fn print(&self) -> String {
            self.0.clone()
        }
        fn parse(s: &str) -> Result<Self, strata_objects::ParseError> {
            Ok(Text(s.to_string()))
        }
        async fn merge3(
            _old: &mut strata_objects::Lazy<Self>,
            a: Option<&Self>,
            b: Option<&Self>,
        ) -> Result<Option<Self>, Conflict> {
            match (a, b) {
                (Some(a), Some(b)) if a == b => Ok(Some(a.clone())),
                (Some(_), Some(_)) => Err(Conflict::new("both sides changed")),
                (Some(a), None) => Ok(Some(a.clone())),
                (None, Some(b)) => Ok(Some(b.clone())),
                (None, None) => Ok(None),
            }
        }
    }

    fn engine() -> HistoryEngine<NoMetadata, Text> {
        HistoryEngine::new(
            CommitStore::new(Arc::new(MemStore::new())),
            NodeStore::new(Arc::new(MemStore::new())),
            ContentsStore::new(Arc::new(MemStore::new())),
        )
    }

    fn task(msg: &str) -> Task {
        Task { date: 0, owner: "tester".into(), uid: 0, messages: vec![msg.to_string()] }
    }

    async fn commit_with_parents(
        engine: &HistoryEngine<NoMetadata, Text>,
        node: Hash,
        parents: Vec<Hash>,
    ) -> Hash {
        engine.commits().add(Commit { node, parents, task: task("c") }).await.unwrap()
    }

    #[tokio::test]
    async fn lcas_of_a_commit_with_itself_is_itself() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        assert_eq!(e.lcas(c0, c0, None, None, None).await.unwrap(), vec![c0]);
    }

    #[tokio::test]
    async fn disjoint_histories_have_no_lca() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c1 = commit_with_parents(&e, root, vec![]).await;
        let other_root = e.nodes.update(root, Path::single("x"), Entry::Contents(
            e.contents.add(Text("x".into())).await.unwrap(), NoMetadata
        )).await.unwrap();
        let c2 = commit_with_parents(&e, other_root, vec![]).await;
        assert_ne!(c1, c2);
        assert_eq!(e.lcas(c1, c2, None, None, None).await.unwrap(), Vec::<Hash>::new());
    }

    #[tokio::test]
    async fn linear_history_lca_is_the_fork_point() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        let c1 = commit_with_parents(&e, root, vec![c0]).await;
        let c2 = commit_with_parents(&e, root, vec![c1]).await;
        let c3_node = e.nodes.update(root, Path::single("branch"), Entry::Contents(
            e.contents.add(Text("b".into())).await.unwrap(), NoMetadata
        )).await.unwrap();
        let c3 = commit_with_parents(&e, c3_node, vec![c1]).await;

        let lcas = e.lcas(c2, c3, None, None, None).await.unwrap();
        assert_eq!(lcas, vec![c1]);
    }

    #[tokio::test]
    async fn fast_forward_holds_iff_current_is_a_strict_ancestor() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        let c1 = commit_with_parents(&e, root, vec![c0]).await;

        assert!(e.is_fast_forward(c0, c1).await.unwrap());
        assert!(!e.is_fast_forward(c1, c0).await.unwrap());
        assert!(!e.is_fast_forward(c0, c0).await.unwrap());
    }

    #[tokio::test]
    async fn descendants_of_a_commit_are_exactly_the_fast_forward_candidates() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        let c1 = commit_with_parents(&e, root, vec![c0]).await;
        let c2 = commit_with_parents(&e, root, vec![c1]).await;
        let other = commit_with_parents(&e, root, vec![]).await;

        let heads = HashSet::from([c2, other]);
        let descendants = e.descendants(c0, &heads, None).await.unwrap();
        assert_eq!(descendants, HashSet::from([c0, c1, c2]));

        for d in &descendants {
            if *d != c0 {
                assert!(e.is_fast_forward(c0, *d).await.unwrap());
            }
        }
        assert!(!descendants.contains(&other));
    }

    #[tokio::test]
    async fn merge_commits_combines_disjoint_trees_and_orders_parents_into_then_from() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let base = commit_with_parents(&e, root, vec![]).await;

        let x = e.contents.add(Text("1".into())).await.unwrap();
        let master_node = e.nodes.update(root, Path::single("x"), Entry::Contents(x, NoMetadata)).await.unwrap();
        let master = commit_with_parents(&e, master_node, vec![base]).await;

        let y = e.contents.add(Text("2".into())).await.unwrap();
        let dev_node = e.nodes.update(root, Path::single("y"), Entry::Contents(y, NoMetadata)).await.unwrap();
        let dev = commit_with_parents(&e, dev_node, vec![base]).await;

        let merged = e.merge_commits(task("merge"), dev, master, None, None, None).await.unwrap();
        let merged_commit = e.commits().find(&merged).await.unwrap().unwrap();
        assert_eq!(merged_commit.parents, vec![dev, master]);

        let entries = e.nodes.list(merged_commit.node).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn max_depth_reached_is_returned_as_a_bound_not_an_error_path() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        let c1 = commit_with_parents(&e, root, vec![c0]).await;
        let c2 = commit_with_parents(&e, root, vec![c1]).await;

        let err = e.lcas(c2, c0, Some(1), None, None).await.unwrap_err();
        assert!(matches!(err, HistoryError::Bounded(TraversalBound::MaxDepthReached)));
    }

    #[tokio::test]
    async fn history_is_truncated_at_min_and_depth() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        let c1 = commit_with_parents(&e, root, vec![c0]).await;
        let c2 = commit_with_parents(&e, root, vec![c1]).await;

        let max = HashSet::from([c2]);
        let full = e.history(&max, &HashSet::new(), None, None).await.unwrap();
        assert_eq!(full, HashSet::from([c0, c1, c2]));

        let bounded_by_min = e.history(&max, &HashSet::from([c1]), None, None).await.unwrap();
        assert_eq!(bounded_by_min, HashSet::from([c1, c2]));

        let bounded_by_depth = e.history(&max, &HashSet::new(), Some(1), None).await.unwrap();
        assert_eq!(bounded_by_depth, HashSet::from([c1, c2]));
    }

    #[tokio::test]
    async fn a_cancelled_token_aborts_history_before_it_walks_anything() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;

        let token = CancellationToken::new();
        token.cancel();
        let err = e.history(&HashSet::from([c0]), &HashSet::new(), None, Some(&token)).await.unwrap_err();
        assert!(matches!(err, HistoryError::Aborted));
    }

    #[tokio::test]
    async fn a_cancelled_token_aborts_lcas() {
        let e = engine();
        let root = e.nodes.empty().await.unwrap();
        let c0 = commit_with_parents(&e, root, vec![]).await;
        let c1 = commit_with_parents(&e, root, vec![c0]).await;

        let token = CancellationToken::new();
        token.cancel();
        let err = e.lcas(c0, c1, None, None, Some(&token)).await.unwrap_err();
        assert!(matches!(err, HistoryError::Aborted));
    }
}
