//! Remote sync: out of scope as a wire protocol — a remote is treated as an external collaborator
//! whose interface is specified here, not its transport — but the core still ships the [`Remote`]
//! trait contract plus a generic, dependency-free fallback, [`SliceRemote`], implemented purely
//! in terms of [`Repository::export`]/[`Repository::import`].
//!
//! `SliceRemote` has no network transport; it connects two in-process [`Repository`] handles
//! through a registry keyed by an opaque `uri` string, the same role a local Mercurial
//! `peer`/`bundle` pair plays for `sapling-edenapi`'s tests before any real HTTP transport is
//! involved.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use strata_hash::Hash;
use strata_objects::BranchName;
use strata_objects::Contents;
use strata_objects::Metadata;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::repository::Repository;

/// `fetch(uri, depth?, branch) -> head|no-head|error`, `push(uri, depth?, branch) -> ok|error`.
/// `fetch` returns `Ok(None)` for "no-head" (the remote branch doesn't exist) rather than an
/// error — absence is not an error here, same as everywhere else in this crate.
#[async_trait]
pub trait Remote<C: Contents, M: Metadata>: Send + Sync {
    async fn fetch(&self, uri: &str, depth: Option<u64>, branch: &BranchName) -> Result<Option<Hash>, Error>;
    async fn push(&self, uri: &str, depth: Option<u64>, branch: &BranchName) -> Result<(), Error>;
}

/// The generic slice-based fallback. `local` is the repository `fetch`/`push` act on; `peers` is
/// an in-process registry of other [`Repository`] handles, addressed by whatever string the
/// caller chooses to call a `uri` — a real deployment would replace this registry lookup with an
/// actual wire client and leave the export/import plumbing untouched.
pub struct SliceRemote<C: Contents, M: Metadata> {
    local: Repository<C, M>,
    peers: Arc<Mutex<HashMap<String, Repository<C, M>>>>,
}

impl<C: Contents, M: Metadata> SliceRemote<C, M> {
    pub fn new(local: Repository<C, M>) -> Self {
        SliceRemote { local, peers: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Registers `repo` under `uri` so subsequent `fetch`/`push` calls naming that `uri` resolve
    /// to it.
    pub async fn register_peer(&self, uri: impl Into<String>, repo: Repository<C, M>) {
        self.peers.lock().await.insert(uri.into(), repo);
    }

    async fn peer(&self, uri: &str) -> Result<Repository<C, M>, Error> {
        self.peers
            .lock()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("no peer registered for remote uri {uri:?}")))
    }
}

#[async_trait]
impl<C: Contents, M: Metadata> Remote<C, M> for SliceRemote<C, M> {
    /// Exports `branch`'s full reachable history from the peer and imports it locally. Returns the
    /// peer's head so the caller can decide how to reconcile it (fast-forward, three-way merge,
    /// or leave it for later) — `fetch` never itself moves a local branch pointer.
    async fn fetch(&self, uri: &str, depth: Option<u64>, branch: &BranchName) -> Result<Option<Hash>, Error> {
        let peer = self.peer(uri).await?;
        let peer_head = match peer.branches.find(branch).await? {
            Some(h) => h,
            None => return Ok(None),
        };

        let slice = peer.export(depth, None, Some(HashSet::from([peer_head])), true, None).await?;
        self.local.import(slice).await?;
        Ok(Some(peer_head))
    }

    /// Exports the local branch's full reachable history and imports it into the peer, then
    /// advances the peer's branch to the local head. Fails with [`Error::ConcurrentUpdate`] if
    /// the peer's branch moved between the export and the advance.
    async fn push(&self, uri: &str, depth: Option<u64>, branch: &BranchName) -> Result<(), Error> {
        let local_head = self
            .local
            .branches
            .find(branch)
            .await?
            .ok_or_else(|| Error::BranchNotFound(branch.clone()))?;

        let peer = self.peer(uri).await?;
        let slice = self.local.export(depth, None, Some(HashSet::from([local_head])), true, None).await?;

        let peer_current = peer.branches.find(branch).await?;
        peer.import(slice).await?;
        let applied = peer.branches.test_and_set(branch.clone(), peer_current, Some(local_head)).await?;
        if !applied {
            return Err(Error::ConcurrentUpdate);
        }
        Ok(())
    }
}
