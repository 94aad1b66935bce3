//! [`Task`], [`Commit`], and [`CommitStore`]: the commit layer, which lifts node-level merge to
//! commit-level and attaches a caller-supplied [`Task`] as the result's provenance.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use strata_hash::Hash;
use strata_store::AppendOnlyStore;
use strata_store::Error as StoreError;
use tracing::instrument;

use crate::conflict::Conflict;
use crate::contents::Contents;
use crate::contents::ContentsStore;
use crate::node::Metadata;
use crate::node::NodeStore;

/// The provenance record attached to a commit: `(date, owner, uid, messages)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub date: i64,
    pub owner: String,
    pub uid: i64,
    pub messages: Vec<String>,
}

/// An immutable `(node_hash, parents, task)` tuple. `parents` preserves order; the first parent
/// plays the privileged "main parent" role in traversal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub node: Hash,
    pub parents: Vec<Hash>,
    pub task: Task,
}

/// Lifts node-level merge to commit-level: resolves `old`/`a`/`b` to their root node hashes,
/// merges those via [`NodeStore::merge`], and wraps a successful result in a new commit with
/// parents `[a; b]` and the caller's `task` attached verbatim (not blended with either parent's
/// task).
pub struct CommitStore {
    inner: Arc<dyn AppendOnlyStore<Hash, Commit>>,
}

impl Clone for CommitStore {
    fn clone(&self) -> Self {
        CommitStore { inner: self.inner.clone() }
    }
}

impl CommitStore {
    pub fn new(inner: Arc<dyn AppendOnlyStore<Hash, Commit>>) -> Self {
        CommitStore { inner }
    }

    pub async fn add(&self, commit: Commit) -> Result<Hash, StoreError> {
        self.inner.add(commit).await
    }

    pub async fn find(&self, key: &Hash) -> Result<Option<Commit>, StoreError> {
        self.inner.find(key).await
    }

    /// `merge(task): option<commit-key> -> merge-combinator`, specialised to commits.
    pub async fn merge<M: Metadata, C: Contents>(
        &self,
        nodes: &NodeStore<M>,
        contents: &ContentsStore<C>,
        task: Task,
        old: Option<Hash>,
        a: Option<Hash>,
        b: Option<Hash>,
    ) -> Result<Option<Hash>, Conflict> {
        let old_commit = self.resolve(old).await?;
        let a_commit = self.resolve(a).await?;
        let b_commit = self.resolve(b).await?;

        let old_node = old_commit.as_ref().map(|c| c.node);
        let a_node = a_commit.as_ref().map(|c| c.node);
        let b_node = b_commit.as_ref().map(|c| c.node);

        let merged_node = match nodes.merge(contents, old_node, a_node, b_node).await? {
            Some(n) => n,
            None => return Ok(None),
        };

        let parents: Vec<Hash> = [a, b].into_iter().flatten().collect();
        let commit = Commit { node: merged_node, parents, task };
        let hash = self
            .inner
            .add(commit)
            .await
            .map_err(|e| Conflict::new(format!("failed to persist merge commit: {e}")))?;
        Ok(Some(hash))
    }

    async fn resolve(&self, key: Option<Hash>) -> Result<Option<Commit>, Conflict> {
        match key {
            None => Ok(None),
            Some(key) => self
                .inner
                .find(&key)
                .await
                .map_err(|e| Conflict::new(format!("failed to read commit {key}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_store::MemStore;

    use super::*;
    use crate::contents::tests_support::PlainText;
    use crate::node::Entry;
    use crate::node::NodeStore;
    use strata_hash::Path;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct NoMetadata;

    impl Metadata for NoMetadata {
        fn merge3(_old: &Self, _a: &Self, _b: &Self) -> Result<Self, Conflict> {
            Ok(NoMetadata)
        }
    }

    fn task(message: &str) -> Task {
        Task { date: 0, owner: "tester".into(), uid: 0, messages: vec![message.to_string()] }
    }

    #[tokio::test]
    async fn merge_attaches_the_supplied_task_and_both_parents() {
        let commits = CommitStore::new(Arc::new(MemStore::new()));
        let nodes: NodeStore<NoMetadata> = NodeStore::new(Arc::new(MemStore::new()));
        let contents = ContentsStore::<PlainText>::new(Arc::new(MemStore::new()));

        let leaf = contents.add(PlainText("1".into())).await.unwrap();
        let root = nodes.empty().await.unwrap();
        let tree_a = nodes.update(root, Path::single("x"), Entry::Contents(leaf, NoMetadata)).await.unwrap();

        let leaf_b = contents.add(PlainText("2".into())).await.unwrap();
        let tree_b = nodes.update(root, Path::single("y"), Entry::Contents(leaf_b, NoMetadata)).await.unwrap();

        let commit_a = commits
            .add(Commit { node: tree_a, parents: vec![], task: task("a") })
            .await
            .unwrap();
        let commit_b = commits
            .add(Commit { node: tree_b, parents: vec![], task: task("b") })
            .await
            .unwrap();

        let merged = commits
            .merge(&nodes, &contents, task("merge"), None, Some(commit_a), Some(commit_b))
            .await
            .unwrap()
            .unwrap();

        let merged_commit = commits.find(&merged).await.unwrap().unwrap();
        assert_eq!(merged_commit.parents, vec![commit_a, commit_b]);
        assert_eq!(merged_commit.task.messages, vec!["merge".to_string()]);
    }
}
