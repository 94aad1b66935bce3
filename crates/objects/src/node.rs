//! [`Node`], [`Entry`], the [`Metadata`] capability, and [`NodeStore`]: the L2 node layer and its
//! per-step merge lift (§4.3's "node merge is the per-step lift of child merges").

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use strata_hash::Hash;
use strata_hash::Path;
use strata_hash::Step;
use strata_store::AppendOnlyStore;
use strata_store::Error as StoreError;
use tokio_util::sync::CancellationToken;

use crate::conflict::Conflict;
use crate::contents::Contents;
use crate::contents::ContentsStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The per-entry attribute stored at the *parent*'s entry, not at the child, so a rename
/// preserves it. Has a default (used when an ancestor entry did not exist) and its own merge.
pub trait Metadata:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Default + PartialEq + Send + Sync + 'static
{
    fn merge3(old: &Self, a: &Self, b: &Self) -> Result<Self, Conflict>;
}

/// A child entry of a [`Node`]: either another node (a subtree) or contents with its metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Entry<M> {
    Node(Hash),
    Contents(Hash, M),
}

/// An immutable mapping from [`Step`] to [`Entry`]. Entries are kept in a `BTreeMap`, which both
/// enforces uniqueness of steps within a node and gives the canonical sorted order the node's own
/// hash is derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node<M> {
    entries: BTreeMap<Step, Entry<M>>,
}

impl<M: Clone + PartialEq> Node<M> {
    pub fn empty() -> Self {
        Node { entries: BTreeMap::new() }
    }

    pub fn from_entries(entries: BTreeMap<Step, Entry<M>>) -> Self {
        Node { entries }
    }

    pub fn entries(&self) -> &BTreeMap<Step, Entry<M>> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, step: &Step) -> Option<&Entry<M>> {
        self.entries.get(step)
    }

    fn with_entry(&self, step: Step, entry: Entry<M>) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(step, entry);
        Node { entries }
    }

    fn without_entry(&self, step: &Step) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(step);
        Node { entries }
    }
}

impl<M: Clone + PartialEq> Default for Node<M> {
    fn default() -> Self {
        Node::empty()
    }
}

/// Errors from node-graph operations. Distinct from [`Conflict`]: these are structural/I-O
/// failures, not merge outcomes (though [`NodeStore::merge`] converts them into one at its
/// boundary, since a merge that cannot even read its inputs is itself a conflict).
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node store I/O error: {0}")]
    Store(#[from] StoreError),

    #[error("referenced node {0} is not present in the store")]
    MissingNode(Hash),

    #[error("the root node cannot itself be contents")]
    EmptyPathContents,

    #[error("operation aborted by caller")]
    Aborted,
}

fn to_conflict(e: NodeError) -> Conflict {
    Conflict::new(e.to_string())
}

/// The repository-scoped node-DAG handle (§4.3 "Node graph"): construction (`empty`, `v`),
/// single-level reads (`list`), path walks (`find`), copy-on-write writes (`update`, `remove`),
/// reachability (`closure`), and the per-step merge lift.
pub struct NodeStore<M: Metadata> {
    inner: Arc<dyn AppendOnlyStore<Hash, Node<M>>>,
}

impl<M: Metadata> Clone for NodeStore<M> {
    fn clone(&self) -> Self {
        NodeStore { inner: self.inner.clone() }
    }
}

impl<M: Metadata> NodeStore<M> {
    pub fn new(inner: Arc<dyn AppendOnlyStore<Hash, Node<M>>>) -> Self {
        NodeStore { inner }
    }

    pub async fn empty(&self) -> Result<Hash, StoreError> {
        self.inner.add(Node::empty()).await
    }

    pub async fn v(&self, entries: BTreeMap<Step, Entry<M>>) -> Result<Hash, StoreError> {
        self.inner.add(Node::from_entries(entries)).await
    }

    pub async fn list(&self, n: Hash) -> Result<Vec<(Step, Entry<M>)>, NodeError> {
        let node = self.load(n).await?;
        Ok(node.entries().iter().map(|(s, e)| (s.clone(), e.clone())).collect())
    }

    /// Walks `path` from `n`. The empty path yields `Some(Entry::Node(n))`: it addresses the
    /// tree itself, not a value. Finding contents before the path is exhausted is `None`.
    pub async fn find(&self, n: Hash, path: &Path) -> Result<Option<Entry<M>>, NodeError> {
        let mut current = n;
        let mut remaining = path.clone();
        loop {
            match remaining.split_first() {
                None => return Ok(Some(Entry::Node(current))),
                Some((step, rest)) => {
                    let node = self.load(current).await?;
                    match node.get(step) {
                        None => return Ok(None),
                        Some(Entry::Contents(hash, metadata)) => {
                            return if rest.is_empty() {
                                Ok(Some(Entry::Contents(*hash, metadata.clone())))
                            } else {
                                Ok(None)
                            };
                        }
                        Some(Entry::Node(child)) => {
                            current = *child;
                            remaining = rest;
                        }
                    }
                }
            }
        }
    }

    /// Copy-on-write write of `entry` at `path`, re-hashing every ancestor on the path back to
    /// the root. Missing intermediate nodes are created as empty and then populated.
    pub fn update(
        &self,
        n: Hash,
        path: Path,
        entry: Entry<M>,
    ) -> BoxFuture<'_, Result<Hash, NodeError>> {
        Box::pin(async move {
            let (step, rest) = match path.split_first() {
                None => {
                    return match entry {
                        Entry::Node(h) => Ok(h),
                        Entry::Contents(..) => Err(NodeError::EmptyPathContents),
                    };
                }
                Some((step, rest)) => (step.clone(), rest),
            };

            let node = self.load(n).await?;
            let new_child_entry = if rest.is_empty() {
                entry
            } else {
                let child_base = match node.get(&step) {
                    Some(Entry::Node(h)) => *h,
                    _ => self.empty().await?,
                };
                Entry::Node(self.update(child_base, rest, entry).await?)
            };

            let new_node = node.with_entry(step, new_child_entry);
            self.inner.add(new_node).await.map_err(NodeError::Store)
        })
    }

    /// Removes `path`. A path that does not resolve to anything is a no-op, returning `n`
    /// unchanged.
    pub fn remove(&self, n: Hash, path: Path) -> BoxFuture<'_, Result<Hash, NodeError>> {
        Box::pin(async move {
            let (step, rest) = match path.split_first() {
                None => return Ok(n),
                Some((step, rest)) => (step.clone(), rest),
            };

            let node = self.load(n).await?;
            match node.get(&step) {
                None => Ok(n),
                Some(Entry::Contents(..)) if !rest.is_empty() => Ok(n),
                Some(Entry::Contents(..)) => {
                    let new_node = node.without_entry(&step);
                    self.inner.add(new_node).await.map_err(NodeError::Store)
                }
                Some(Entry::Node(_)) if rest.is_empty() => {
                    let new_node = node.without_entry(&step);
                    self.inner.add(new_node).await.map_err(NodeError::Store)
                }
                Some(Entry::Node(child)) => {
                    let child = *child;
                    let new_child = self.remove(child, rest).await?;
                    let new_node = node.with_entry(step, Entry::Node(new_child));
                    self.inner.add(new_node).await.map_err(NodeError::Store)
                }
            }
        })
    }

    /// Nodes reachable from any node in `max`, excluding any strict subtree of a node in `min`.
    /// Both endpoints are included: a node in `min` is part of the closure, its children are not
    /// explored. `cancel`, if given, is checked once per visited node (§5's "every operation
    /// accepts an implicit cancellation signal" — a node-DAG closure is one of the few operations
    /// in this crate that can genuinely run long).
    pub async fn closure(
        &self,
        min: &HashSet<Hash>,
        max: &HashSet<Hash>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HashSet<Hash>, NodeError> {
        let mut visited = HashSet::new();
        let mut frontier: Vec<Hash> = max.iter().cloned().collect();

        while let Some(h) = frontier.pop() {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(NodeError::Aborted);
            }
            if !visited.insert(h) {
                continue;
            }
            if min.contains(&h) {
                continue;
            }
            let node = self.load(h).await?;
            for entry in node.entries().values() {
                if let Entry::Node(child) = entry {
                    if !visited.contains(child) {
                        frontier.push(*child);
                    }
                }
            }
        }

        Ok(visited)
    }

    /// The per-step lift of child merges over `option<node>`: identical to the generic
    /// three-way shortcut rules used throughout this crate (`a==b` ⇒ `a`; one side unchanged
    /// from `old` ⇒ the other side), falling through to a real per-step merge only when both
    /// sides genuinely diverge.
    pub fn merge<'a, C: Contents>(
        &'a self,
        contents: &'a ContentsStore<C>,
        old: Option<Hash>,
        a: Option<Hash>,
        b: Option<Hash>,
    ) -> BoxFuture<'a, Result<Option<Hash>, Conflict>> {
        Box::pin(async move {
            if a == b {
                return Ok(a);
            }
            if old == a {
                return Ok(b);
            }
            if old == b {
                return Ok(a);
            }

            let old_node = self.load_optional(old).await.map_err(to_conflict)?;
            let a_node = self.load_optional(a).await.map_err(to_conflict)?;
            let b_node = self.load_optional(b).await.map_err(to_conflict)?;

            let mut steps: BTreeSet<Step> = BTreeSet::new();
            for node in [&old_node, &a_node, &b_node].into_iter().flatten() {
                steps.extend(node.entries().keys().cloned());
            }

            let mut merged_entries = BTreeMap::new();
            for step in steps {
                let old_entry = old_node.as_ref().and_then(|n| n.get(&step).cloned());
                let a_entry = a_node.as_ref().and_then(|n| n.get(&step).cloned());
                let b_entry = b_node.as_ref().and_then(|n| n.get(&step).cloned());

                match self.merge_entry(contents, old_entry, a_entry, b_entry).await {
                    Ok(Some(entry)) => {
                        merged_entries.insert(step, entry);
                    }
                    Ok(None) => {}
                    Err(conflict) => return Err(conflict.at(step)),
                }
            }

            let merged_node = Node::from_entries(merged_entries);
            let hash = self
                .inner
                .add(merged_node)
                .await
                .map_err(|e| Conflict::new(format!("failed to persist merged node: {e}")))?;
            Ok(Some(hash))
        })
    }

    async fn merge_entry<C: Contents>(
        &self,
        contents: &ContentsStore<C>,
        old: Option<Entry<M>>,
        a: Option<Entry<M>>,
        b: Option<Entry<M>>,
    ) -> Result<Option<Entry<M>>, Conflict> {
        if a == b {
            return Ok(a);
        }
        if old == a {
            return Ok(b);
        }
        if old == b {
            return Ok(a);
        }

        match (a, b) {
            (Some(Entry::Contents(a_hash, a_meta)), Some(Entry::Contents(b_hash, b_meta))) => {
                let (old_contents, old_meta) = match &old {
                    Some(Entry::Contents(h, m)) => (Some(*h), m.clone()),
                    _ => (None, M::default()),
                };
                let merged_meta = M::merge3(&old_meta, &a_meta, &b_meta)?;
                let merged_hash = contents.merge(old_contents, Some(a_hash), Some(b_hash)).await?;
                Ok(merged_hash.map(|h| Entry::Contents(h, merged_meta)))
            }
            (Some(Entry::Node(a_hash)), Some(Entry::Node(b_hash))) => {
                let old_node = match &old {
                    Some(Entry::Node(h)) => Some(*h),
                    _ => None,
                };
                let merged = self.merge(contents, old_node, Some(a_hash), Some(b_hash)).await?;
                Ok(merged.map(Entry::Node))
            }
            (Some(Entry::Contents(..)), Some(Entry::Node(_)))
            | (Some(Entry::Node(_)), Some(Entry::Contents(..))) => {
                Err(Conflict::new("one branch holds contents where the other holds a node"))
            }
            (None, Some(_)) | (Some(_), None) => {
                Err(Conflict::new("deleted on one branch but modified on the other"))
            }
            (None, None) => unreachable!("a == b already handled when both sides are absent"),
        }
    }

    async fn load(&self, n: Hash) -> Result<Node<M>, NodeError> {
        self.inner.find(&n).await?.ok_or(NodeError::MissingNode(n))
    }

    async fn load_optional(&self, n: Option<Hash>) -> Result<Option<Node<M>>, NodeError> {
        match n {
            None => Ok(None),
            Some(h) => Ok(Some(self.load(h).await?)),
        }
    }
}
