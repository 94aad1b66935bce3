//! [`Repository`]: the facade assembling the four typed object stores, the history engine, the
//! watch state, and the branch-name lock manager into the single handle an embedding application
//! opens once — it exclusively owns handles to all four typed stores and to the watch state.
//! Plays the role `blobrepo::BlobRepo` plays assembling
//! `blobstore`/`bookmarks`/`changesets`/`filenodes`, collapsed from `#[facet::container]` field
//! injection to plain constructor wiring since `strata` has four stores, not forty.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use strata_graph::HistoryEngine;
use strata_hash::Hash;
use strata_objects::BranchName;
use strata_objects::BranchStore;
use strata_objects::Commit;
use strata_objects::CommitStore;
use strata_objects::Contents;
use strata_objects::ContentsStore;
use strata_objects::Metadata;
use strata_objects::Node;
use strata_objects::NodeStore;
use strata_objects::Task;
use strata_store::MemStore;
use strata_watch::LockManager;
use strata_watch::WatchState;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::Config;
use crate::config::MAX_HISTORY_DEPTH;
use crate::config::MAX_LCAS;
use crate::error::Error;
use crate::slice::Slice;
use crate::store_handle::StoreHandle;

/// The repository-scoped state every [`StoreHandle`] borrows: the four typed object stores, the
/// history engine built over them, the branch store's [`WatchState`], and the per-branch
/// [`LockManager`] a commit takes around its `test_and_set`.
///
/// Cheap to clone: every field is `Arc`-backed (directly, or — for the typed stores — one layer
/// of `Arc` down inside their own `Clone` impls), the same "handle is a cheap view" shape
/// [`StoreHandle`] carries one level up.
pub struct Repository<C: Contents, M: Metadata> {
    pub(crate) contents: ContentsStore<C>,
    pub(crate) nodes: NodeStore<M>,
    pub(crate) commits: CommitStore,
    pub(crate) branches: BranchStore,
    pub(crate) history: HistoryEngine<M, C>,
    pub(crate) watch: Arc<WatchState<BranchName, Hash>>,
    pub(crate) locks: Arc<LockManager<BranchName>>,
    pub(crate) config: Config,
}

impl<C: Contents, M: Metadata> Clone for Repository<C, M> {
    fn clone(&self) -> Self {
        Repository {
            contents: self.contents.clone(),
            nodes: self.nodes.clone(),
            commits: self.commits.clone(),
            branches: self.branches.clone(),
            history: self.history.clone(),
            watch: self.watch.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Contents, M: Metadata> Repository<C, M> {
    /// Opens a fresh, in-memory-backed repository and seeds the distinguished `master` branch
    /// (a default name that always exists) pointing at a brand-new empty-tree commit, so "every
    /// branch value is a commit hash present in the commit store" holds from the very first
    /// observable state.
    #[instrument(skip(config))]
    pub async fn open(config: Config) -> Result<Self, Error> {
        let contents = ContentsStore::new(Arc::new(MemStore::new()));
        let nodes = NodeStore::new(Arc::new(MemStore::new()));
        let commits = CommitStore::new(Arc::new(MemStore::new()));
        let branches: BranchStore = Arc::new(MemStore::new());
        let history = HistoryEngine::new(commits.clone(), nodes.clone(), contents.clone());

        let root = nodes.empty().await?;
        let initial_task = Task {
            date: 0,
            owner: "strata".to_string(),
            uid: 0,
            messages: vec!["initial commit".to_string()],
        };
        let initial_commit = commits.add(Commit { node: root, parents: vec![], task: initial_task }).await?;
        branches.set(BranchName::master(), initial_commit).await?;

        Ok(Repository {
            contents,
            nodes,
            commits,
            branches,
            history,
            watch: Arc::new(WatchState::new()),
            locks: Arc::new(LockManager::new()),
            config,
        })
    }

    /// Closes the repository. A no-op for the in-memory backend: there is nothing to flush that
    /// every mutating operation hasn't already persisted. Kept as an explicit call so an
    /// on-disk/networked backend can implement a real one without changing caller code.
    pub async fn close(self) -> Result<(), Error> {
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn max_depth(&self) -> Option<u64> {
        self.config.get(MAX_HISTORY_DEPTH)
    }

    fn max_lcas(&self) -> Option<usize> {
        self.config.get(MAX_LCAS)
    }

    pub(crate) async fn merge_commits(
        &self,
        task: Task,
        a: Hash,
        b: Hash,
        cancel: Option<&CancellationToken>,
    ) -> Result<Hash, Error> {
        Ok(self.history.merge_commits(task, a, b, self.max_depth(), self.max_lcas(), cancel).await?)
    }

    pub(crate) async fn lcas(&self, c1: Hash, c2: Hash, cancel: Option<&CancellationToken>) -> Result<Vec<Hash>, Error> {
        Ok(self.history.lcas(c1, c2, self.max_depth(), self.max_lcas(), cancel).await?)
    }

    /// Opens a handle bound to `master`.
    pub fn master(&self) -> StoreHandle<C, M> {
        StoreHandle::of_branch(self.clone(), BranchName::master())
    }

    /// Opens a handle bound to a named branch, whether or not it currently exists (its `head()`
    /// is simply `None` until a `set` on the handle creates it).
    pub fn of_branch(&self, name: BranchName) -> StoreHandle<C, M> {
        StoreHandle::of_branch(self.clone(), name)
    }

    /// Opens a handle detached at a specific commit: writes through it never move a branch
    /// pointer.
    pub fn of_commit(&self, commit: Hash) -> StoreHandle<C, M> {
        StoreHandle::of_commit(self.clone(), commit)
    }

    /// Opens a fresh detached handle with no commit and an empty staging tree: the starting point
    /// for building up a tree before it has ever been committed anywhere.
    pub fn empty(&self) -> StoreHandle<C, M> {
        StoreHandle::detached(self.clone(), None)
    }

    /// Every distinct commit hash currently pointed at by some branch.
    pub async fn heads(&self) -> Result<Vec<Hash>, Error> {
        let names = self.branches.list().await?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in names {
            if let Some(head) = self.branches.find(&name).await? {
                if seen.insert(head) {
                    out.push(head);
                }
            }
        }
        Ok(out)
    }

    /// Every branch name.
    pub async fn branches(&self) -> Result<Vec<BranchName>, Error> {
        Ok(self.branches.list().await?)
    }

    /// Looks up the task attached to a commit: a pure lookup, `None` rather than an error for a
    /// commit that isn't present — this is not a `get`/`get_head` call.
    pub async fn task_of_commit(&self, commit: Hash) -> Result<Option<Task>, Error> {
        Ok(self.commits.find(&commit).await?.map(|c| c.task))
    }

    /// Forks `src` into a brand-new branch `dst` pointed at the same commit. Fails if `dst`
    /// already exists, mirroring `test_and_set`'s `test=None`
    /// ("must not exist") semantics rather than silently overwriting another branch.
    pub async fn clone_branch(&self, src: &BranchName, dst: BranchName) -> Result<StoreHandle<C, M>, Error> {
        let guard = self.locks.lock_for(&dst);
        let _permit = guard.lock().await;

        let head = self
            .branches
            .find(src)
            .await?
            .ok_or_else(|| Error::BranchNotFound(src.clone()))?;

        let applied = self.branches.test_and_set(dst.clone(), None, Some(head)).await?;
        if !applied {
            return Err(Error::BranchAlreadyExists(dst));
        }
        self.watch.notify(dst.clone(), Some(head));
        Ok(self.of_branch(dst))
    }

    /// Installs a global handler watching every branch's head for changes. Prefer
    /// [`StoreHandle::watch`] when only one branch matters — its dispatch is more direct.
    pub fn watch(
        &self,
        init: Option<HashMap<BranchName, Hash>>,
        handler: strata_watch::Handler<strata_watch::Event<BranchName, Hash>>,
    ) -> strata_watch::HandlerId {
        self.watch.watch(init, handler)
    }

    pub async fn unwatch(&self, id: strata_watch::HandlerId) {
        self.watch.unwatch(id).await
    }

    /// Exports every object reachable from `max` (every branch head, by default) down to `min`
    /// and `depth` into a transferable [`Slice`]. `full=true` additionally walks the node-DAG
    /// down to its leaves rather than stopping at whichever nodes the commit closure alone would
    /// surface — in practice the commit closure already pulls in every commit whose *root* node
    /// is needed, so `full` controls whether the node/contents closure beneath those roots is
    /// included too.
    #[instrument(skip(self, min, max, cancel))]
    pub async fn export(
        &self,
        depth: Option<u64>,
        min: Option<HashSet<Hash>>,
        max: Option<HashSet<Hash>>,
        full: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Slice<C, M>, Error> {
        let max = match max {
            Some(max) => max,
            None => self.heads().await?.into_iter().collect(),
        };
        let min = min.unwrap_or_default();

        let commit_hashes = self.history.history(&max, &min, depth, cancel).await?;

        let mut slice = Slice::empty();
        let mut node_roots = HashSet::new();
        for hash in &commit_hashes {
            let commit = self.commits.find(hash).await?.ok_or(Error::InvalidArgument(format!("commit {hash} vanished mid-export")))?;
            node_roots.insert(commit.node);
            slice.commits.insert(*hash, commit);
        }

        if full {
            let node_closure = self.nodes.closure(&HashSet::new(), &node_roots, cancel).await?;
            for node_hash in node_closure {
                let entries = self.nodes.list(node_hash).await?;
                for (_, entry) in &entries {
                    if let strata_objects::Entry::Contents(content_hash, _) = entry {
                        if let Some(value) = self.contents.find(content_hash).await? {
                            slice.contents.insert(*content_hash, value);
                        }
                    }
                }
                slice.nodes.insert(node_hash, Node::from_entries(entries.into_iter().collect()));
            }
        } else {
            for root in node_roots {
                slice.nodes.insert(
                    root,
                    Node::from_entries(self.nodes.list(root).await?.into_iter().collect()),
                );
            }
        }

        Ok(slice)
    }

    /// Imports a [`Slice`]: verifies content-addressing for every object before inserting
    /// anything, so a corrupt slice fails atomically rather than partially poisoning the store.
    #[instrument(skip(self, slice))]
    pub async fn import(&self, slice: Slice<C, M>) -> Result<(), Error> {
        use strata_hash::Codec;

        for (hash, value) in &slice.contents {
            if value.content_hash() != *hash {
                return Err(Error::InvalidArgument(format!("contents slice entry {hash} does not hash to its own key")));
            }
        }
        for (hash, node) in &slice.nodes {
            if node.content_hash() != *hash {
                return Err(Error::InvalidArgument(format!("node slice entry {hash} does not hash to its own key")));
            }
        }
        for (hash, commit) in &slice.commits {
            if commit.content_hash() != *hash {
                return Err(Error::InvalidArgument(format!("commit slice entry {hash} does not hash to its own key")));
            }
        }

        for (_, value) in slice.contents {
            self.contents.add(value).await?;
        }
        for (_, node) in slice.nodes {
            self.nodes.v(node.entries().clone()).await?;
        }
        for (_, commit) in slice.commits {
            self.commits.add(commit).await?;
        }
        Ok(())
    }
}
