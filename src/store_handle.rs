//! [`StoreHandle`]: a cheap view over a repository plus a current position (branch name or
//! detached commit hash). Owns an in-memory staging [`Tree`] (`strata-tree`) that lazily
//! materialises against whatever commit the handle is currently positioned at, and flushes it
//! fresh on every commit-producing write.

use std::collections::HashSet;

use strata_hash::Hash;
use strata_hash::Path;
use strata_objects::BranchName;
use strata_objects::Commit;
use strata_objects::Contents;
use strata_objects::Metadata;
use strata_objects::Task;
use strata_tree::DiffEntry;
use strata_tree::Found;
use strata_tree::ListEntry;
use strata_tree::Tree;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::Error;
use crate::repository::Repository;

/// What a handle is currently bound to: a named branch (writes advance that branch's head) or a
/// detached position (writes only ever move the handle itself).
#[derive(Clone, Debug)]
enum Position {
    Branch(BranchName),
    /// `None` is the position `Repository::empty()` starts a handle at: no commit has been made
    /// through it yet, so `head()` is `None` and the staging tree starts life as [`Tree::Empty`].
    Detached(Option<Hash>),
}

/// A cheap, owned view over a [`Repository`] at a particular position, carrying its own staging
/// [`Tree`]. Reads materialise the tree lazily; writes mutate only the tree until a
/// `set`/`remove`/`set_tree`/`merge_into` call flushes it into a new commit.
pub struct StoreHandle<C: Contents, M: Metadata> {
    repo: Repository<C, M>,
    position: Position,
    /// `None` until the first read or write forces it open against `head()`.
    tree: Option<Tree<C, M>>,
}

/// What a resolved path addresses: a subtree or a contents leaf. Thinner than
/// [`strata_tree::Found`] — collapses the value away — for callers that only need to branch on
/// shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Node,
    Contents,
}

impl<C: Contents, M: Metadata> StoreHandle<C, M> {
    pub(crate) fn of_branch(repo: Repository<C, M>, name: BranchName) -> Self {
        StoreHandle { repo, position: Position::Branch(name), tree: None }
    }

    pub(crate) fn of_commit(repo: Repository<C, M>, commit: Hash) -> Self {
        StoreHandle { repo, position: Position::Detached(Some(commit)), tree: None }
    }

    pub(crate) fn detached(repo: Repository<C, M>, commit: Option<Hash>) -> Self {
        StoreHandle { repo, position: Position::Detached(commit), tree: None }
    }

    /// The branch this handle is bound to, if any.
    pub fn branch(&self) -> Option<&BranchName> {
        match &self.position {
            Position::Branch(name) => Some(name),
            Position::Detached(_) => None,
        }
    }

    /// `get_head`'s pure-read sibling: `None` rather than invalid-argument when there's no commit
    /// yet (an unborn branch, or a handle opened via `Repository::empty()`).
    pub async fn head(&self) -> Result<Option<Hash>, Error> {
        match &self.position {
            Position::Branch(name) => Ok(self.repo.branches.find(name).await?),
            Position::Detached(commit) => Ok(*commit),
        }
    }

    /// The commit this handle is positioned at, erroring if there isn't one yet: `get`/`get_head`
    /// convert a missing value to invalid-argument rather than returning `None`.
    pub async fn get_head(&self) -> Result<Hash, Error> {
        self.head().await?.ok_or_else(|| {
            Error::InvalidArgument(match &self.position {
                Position::Branch(name) => format!("branch {name} has no commits yet"),
                Position::Detached(_) => "handle has no commit yet".to_string(),
            })
        })
    }

    /// Loads the staging tree on first use, rooted at `head()`'s node (or [`Tree::Empty`] if
    /// there is none yet).
    async fn ensure_tree(&mut self) -> Result<&mut Tree<C, M>, Error> {
        if self.tree.is_none() {
            let tree = match self.head().await? {
                Some(commit) => {
                    let commit = self
                        .repo
                        .commits
                        .find(&commit)
                        .await?
                        .ok_or_else(|| Error::InvalidArgument(format!("commit {commit} is missing from the commit store")))?;
                    Tree::of_hash(commit.node)
                }
                None => Tree::empty(),
            };
            self.tree = Some(tree);
        }
        Ok(self.tree.as_mut().expect("just populated"))
    }

    /// The staged, uncommitted changes in this handle's tree relative to the commit it's
    /// positioned at — empty once a `set`/`remove` has just been flushed by `commit()`, non-empty
    /// if reads/writes have buffered edits not yet turned into a commit. Since this facade
    /// flushes on every write, `status` is mostly of interest between a raw tree mutation and the
    /// `commit()` call that follows it; it's still exposed alongside the read family.
    pub async fn status(&mut self) -> Result<Vec<DiffEntry<C, M>>, Error> {
        let base = match self.head().await? {
            Some(commit) => {
                let commit = self
                    .repo
                    .commits
                    .find(&commit)
                    .await?
                    .ok_or_else(|| Error::InvalidArgument(format!("commit {commit} is missing from the commit store")))?;
                Tree::of_hash(commit.node)
            }
            None => Tree::empty(),
        };
        let mut base = base;
        let tree = self.ensure_tree().await?;
        Ok(strata_tree::diff(&self.repo.nodes, &self.repo.contents, &mut base, tree).await?)
    }

    /// Whether `path` resolves to a subtree or a contents leaf, `None` if it doesn't resolve at
    /// all.
    pub async fn kind(&mut self, path: Path) -> Result<Option<ObjectKind>, Error> {
        match self.find(path).await? {
            None => Ok(None),
            Some(Found::Node) => Ok(Some(ObjectKind::Node)),
            Some(Found::Contents(..)) => Ok(Some(ObjectKind::Contents)),
        }
    }

    /// Lists the immediate children of the subtree at `path`, `None` if `path` doesn't resolve.
    pub async fn list(&mut self, path: Path) -> Result<Option<Vec<(strata_hash::Step, ListEntry<M>)>>, Error> {
        let nodes = self.repo.nodes.clone();
        let tree = self.ensure_tree().await?;
        Ok(tree.list(&nodes, path).await?)
    }

    /// Whether `path` resolves to anything at all.
    pub async fn mem(&mut self, path: Path) -> Result<bool, Error> {
        Ok(self.find(path).await?.is_some())
    }

    /// The raw, `Option`-returning read — never errors on absence.
    pub async fn find(&mut self, path: Path) -> Result<Option<Found<C, M>>, Error> {
        let nodes = self.repo.nodes.clone();
        let contents = self.repo.contents.clone();
        let tree = self.ensure_tree().await?;
        Ok(tree.find(&nodes, &contents, path).await?)
    }

    /// `find`, converting a miss or a node-shaped result into invalid-argument: the `get`/
    /// `get_head` family never returns `None`.
    pub async fn get(&mut self, path: Path) -> Result<C, Error> {
        let (value, _metadata) = self.getv(path).await?;
        Ok(value)
    }

    /// Like [`Self::get`] but also returns the path's metadata.
    pub async fn getv(&mut self, path: Path) -> Result<(C, M), Error> {
        match self.find(path.clone()).await? {
            Some(Found::Contents(value, metadata)) => Ok((value, metadata)),
            Some(Found::Node) => Err(Error::InvalidArgument(format!("{path} addresses a subtree, not contents"))),
            None => Err(Error::InvalidArgument(format!("{path} does not exist"))),
        }
    }

    /// Writes `value` at `path` in the staging tree, flushes, and commits. `path` cannot be the
    /// root: a tree's root is always a node, never a contents leaf.
    #[instrument(skip(self, task, value, metadata))]
    pub async fn set(
        &mut self,
        task: Task,
        parents: Option<Vec<Hash>>,
        path: Path,
        metadata: Option<M>,
        value: C,
    ) -> Result<Hash, Error> {
        if path.is_root() {
            return Err(Error::InvalidArgument("the root path cannot hold contents".to_string()));
        }
        let nodes = self.repo.nodes.clone();
        let tree = self.ensure_tree().await?;
        tree.addv(&nodes, path, value, metadata.unwrap_or_default()).await?;
        self.commit(task, parents).await
    }

    /// Removes `path` from the staging tree — a no-op if it's already absent, per
    /// `NodeStore::remove` — that still produces a commit, the same way an empty `git commit
    /// --allow-empty` would.
    #[instrument(skip(self, task))]
    pub async fn remove(&mut self, task: Task, parents: Option<Vec<Hash>>, path: Path) -> Result<Hash, Error> {
        let nodes = self.repo.nodes.clone();
        let tree = self.ensure_tree().await?;
        tree.remove(&nodes, path).await?;
        self.commit(task, parents).await
    }

    /// Replaces the entire staging tree wholesale (e.g. after [`crate::slice`] import, or a bulk
    /// `ConcreteTree` rebuild via `strata_tree::of_concrete`) and commits it.
    #[instrument(skip(self, task, tree))]
    pub async fn set_tree(&mut self, task: Task, parents: Option<Vec<Hash>>, tree: Tree<C, M>) -> Result<Hash, Error> {
        self.tree = Some(tree);
        self.commit(task, parents).await
    }

    /// Flushes the staging tree, builds a commit with the explicit `parents` (or this handle's
    /// current head as the sole parent, or no parents if this is the first commit through the
    /// handle), and — if the handle is attached to a branch — advances that branch's head under
    /// its per-name lock, re-reading the branch's current value inside the lock so the CAS test
    /// always matches what's actually there: a commit that advances a branch takes the
    /// branch-name lock for the duration of the `test_and_set`.
    async fn commit(&mut self, task: Task, parents: Option<Vec<Hash>>) -> Result<Hash, Error> {
        let current_head = self.head().await?;
        let node = self.ensure_tree().await?.flush(&self.repo.nodes, &self.repo.contents).await?;
        let parents = parents.unwrap_or_else(|| current_head.into_iter().collect());
        let commit_hash = self.repo.commits.add(Commit { node, parents, task }).await?;
        self.apply_new_commit(commit_hash, current_head).await?;
        Ok(commit_hash)
    }

    /// Moves this handle onto `new_commit`. For a branch-attached handle this is a guarded CAS
    /// against `expected_current`, followed by a watch notification; for a detached handle it's
    /// just updating `self.position`.
    async fn apply_new_commit(&mut self, new_commit: Hash, expected_current: Option<Hash>) -> Result<(), Error> {
        match &self.position {
            Position::Branch(name) => {
                let guard = self.repo.locks.lock_for(name);
                let _permit = guard.lock().await;
                let applied = self.repo.branches.test_and_set(name.clone(), expected_current, Some(new_commit)).await?;
                if !applied {
                    return Err(Error::ConcurrentUpdate);
                }
                self.repo.watch.notify(name.clone(), Some(new_commit));
            }
            Position::Detached(_) => {
                self.position = Position::Detached(Some(new_commit));
            }
        }
        self.tree = None;
        Ok(())
    }

    /// Advances this handle's branch to `candidate` without a merge commit, iff the current head
    /// is a strict ancestor of `candidate`. Returns whether the fast-forward applied; `false`
    /// (not an error) if it wasn't possible, the same "returns `false`, not an exception" shape
    /// `test_and_set` uses for a failed CAS.
    pub async fn fast_forward(&mut self, candidate: Hash) -> Result<bool, Error> {
        let current_head = self.get_head().await?;
        if !self.repo.history.is_fast_forward(current_head, candidate).await? {
            return Ok(false);
        }
        self.apply_new_commit(candidate, Some(current_head)).await?;
        Ok(true)
    }

    /// Three-way merges `source` into this handle's current commit (the "into" branch — parents
    /// of the result are `[self; source]`, never normalised) and advances this handle onto the
    /// result.
    #[instrument(skip(self, task, cancel))]
    pub async fn merge_into(&mut self, source: Hash, task: Task, cancel: Option<&CancellationToken>) -> Result<Hash, Error> {
        let target_head = self.get_head().await?;
        let merged = self.repo.merge_commits(task, target_head, source, cancel).await?;
        self.apply_new_commit(merged, Some(target_head)).await?;
        Ok(merged)
    }

    /// Resolves `source`'s current head and merges it in.
    pub async fn merge_with_branch(
        &mut self,
        source: &BranchName,
        task: Task,
        cancel: Option<&CancellationToken>,
    ) -> Result<Hash, Error> {
        let source_head = self
            .repo
            .branches
            .find(source)
            .await?
            .ok_or_else(|| Error::BranchNotFound(source.clone()))?;
        self.merge_into(source_head, task, cancel).await
    }

    /// Merges a specific commit in directly, without resolving it through a branch name first.
    pub async fn merge_with_commit(&mut self, source: Hash, task: Task, cancel: Option<&CancellationToken>) -> Result<Hash, Error> {
        self.merge_into(source, task, cancel).await
    }

    /// Lowest common ancestors with `other`, resolved against this handle's current commit.
    pub async fn lcas(&self, other: Hash, cancel: Option<&CancellationToken>) -> Result<Vec<Hash>, Error> {
        let head = self.get_head().await?;
        self.repo.lcas(head, other, cancel).await
    }

    /// As [`Self::lcas`] but resolving the other side from a branch name.
    pub async fn lcas_with_branch(&self, other: &BranchName, cancel: Option<&CancellationToken>) -> Result<Vec<Hash>, Error> {
        let other_head = self
            .repo
            .branches
            .find(other)
            .await?
            .ok_or_else(|| Error::BranchNotFound(other.clone()))?;
        self.lcas(other_head, cancel).await
    }

    /// The commit-DAG reachable from this handle's current commit (or `max`, if given — letting
    /// a caller compute history from a set of heads other than "just this handle").
    pub async fn history(
        &self,
        depth: Option<u64>,
        min: Option<HashSet<Hash>>,
        max: Option<HashSet<Hash>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HashSet<Hash>, Error> {
        let max = match max {
            Some(max) => max,
            None => HashSet::from([self.get_head().await?]),
        };
        Ok(self.repo.history.history(&max, &min.unwrap_or_default(), depth, cancel).await?)
    }

    /// Installs a handler watching this handle's branch for head changes. Errors for a detached
    /// handle: there is no branch-keyed mutation stream to subscribe to.
    pub fn watch(&self, handler: strata_watch::Handler<strata_watch::Diff<Hash>>) -> Result<strata_watch::HandlerId, Error> {
        let name = self.branch().cloned().ok_or_else(|| {
            Error::InvalidArgument("a detached handle has no branch to watch".to_string())
        })?;
        let init = None;
        Ok(self.repo.watch.watch_key(name, init, handler))
    }

    pub async fn unwatch(&self, id: strata_watch::HandlerId) {
        self.repo.watch.unwatch(id).await
    }
}
