//! `strata`: an embeddable, branch-consistent, content-addressed, mergeable object store —
//! Git-like snapshots, branches, three-way merges, lowest-common-ancestor computation, and
//! history DAG traversal, exposed as a library rather than a command-line tool.
//!
//! This crate is the facade: it assembles `strata-hash`, `strata-store`, `strata-objects`,
//! `strata-graph`, `strata-tree`, `strata-merge`, and `strata-watch` into [`Repository`] and
//! [`StoreHandle`], the two types an embedding application actually touches, the same assembly
//! role `blobrepo::BlobRepo` plays over `blobstore`/`bookmarks`/`changesets`.
//!
//! ```text
//! strata-hash -> strata-store -> strata-objects -> { strata-graph, strata-tree }
//!             -> { strata-merge, strata-watch } -> strata (this crate)
//! ```

mod config;
mod error;
mod remote;
mod repository;
mod slice;
mod store_handle;

pub use crate::config::Config;
pub use crate::config::FromConfigValue;
pub use crate::error::Error;
pub use crate::remote::Remote;
pub use crate::remote::SliceRemote;
pub use crate::repository::Repository;
pub use crate::slice::Slice;
pub use crate::store_handle::ObjectKind;
pub use crate::store_handle::StoreHandle;

// Re-exported so an embedding application can implement `Contents`/`Metadata` and construct
// `Task`/`BranchName` values without adding `strata-objects` as a direct dependency.
pub use strata_hash::Codec;
pub use strata_hash::Hash;
pub use strata_hash::Path;
pub use strata_hash::Step;
pub use strata_objects::BranchName;
pub use strata_objects::Conflict;
pub use strata_objects::Contents;
pub use strata_objects::Lazy;
pub use strata_objects::Metadata;
pub use strata_objects::ParseError;
pub use strata_objects::Task;
pub use strata_graph::TraversalBound;
pub use strata_tree::ConcreteTree;
pub use strata_tree::DiffEntry;
pub use strata_tree::DiffType;
pub use strata_tree::Found;
pub use strata_tree::ListEntry;
pub use strata_tree::Tree;
pub use strata_watch::Diff;
pub use strata_watch::Event;
pub use strata_watch::HandlerId;

#[cfg(test)]
mod tests {
    //! End-to-end scenarios, numbered for reference.

    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde::Serialize;
    use strata_merge::Merge3;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Text(String);

    #[async_trait]
    impl Contents for Text {
        fn print(&self) -> String {
            self.0.clone()
        }

        fn parse(s: &str) -> Result<Self, ParseError> {
            Ok(Text(s.to_string()))
        }

        async fn merge3(_old: &mut Lazy<Self>, a: Option<&Self>, b: Option<&Self>) -> Result<Option<Self>, Conflict> {
            match (a, b) {
                (Some(a), Some(b)) if a == b => Ok(Some(a.clone())),
                (Some(_), Some(_)) => Err(Conflict::new("both sides changed")),
                (Some(a), None) => Ok(Some(a.clone())),
                (None, Some(b)) => Ok(Some(b.clone())),
                (None, None) => Ok(None),
            }
        }
    }

    /// A merge-by-sum counter used for scenario 4, delegating to `strata-merge`'s `counter()`
    /// combinator instead of reimplementing the arithmetic.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Counter(i64);

    #[async_trait]
    impl Contents for Counter {
        fn print(&self) -> String {
            self.0.to_string()
        }

        fn parse(s: &str) -> Result<Self, ParseError> {
            s.parse().map(Counter).map_err(|e| ParseError(e.to_string()))
        }

        async fn merge3(old: &mut Lazy<Self>, a: Option<&Self>, b: Option<&Self>) -> Result<Option<Self>, Conflict> {
            let old_value = old.get().await?.map(|c| c.0);
            let a = a.map(|c| c.0);
            let b = b.map(|c| c.0);
            let mut old_i64 = Lazy::ready(Ok(old_value));
            let merged = strata_merge::counter::<i64>().merge3(&mut old_i64, a.as_ref(), b.as_ref()).await?;
            Ok(merged.map(Counter))
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct NoMetadata;

    impl Metadata for NoMetadata {
        fn merge3(_old: &Self, _a: &Self, _b: &Self) -> Result<Self, Conflict> {
            Ok(NoMetadata)
        }
    }

    fn task(message: &str) -> Task {
        Task { date: 0, owner: "tester".to_string(), uid: 0, messages: vec![message.to_string()] }
    }

    async fn repo<C: Contents, M: Metadata>() -> Repository<C, M> {
        Repository::open(Config::new()).await.unwrap()
    }

    /// 1. Write and read back.
    #[tokio::test]
    async fn write_and_read_back() {
        let repo: Repository<Text, NoMetadata> = repo().await;
        let mut master = repo.master();

        master
            .set(task("write"), None, Path::root().join("a").join("b"), None, Text("hi".to_string()))
            .await
            .unwrap();

        let value = master.get(Path::root().join("a").join("b")).await.unwrap();
        assert_eq!(value, Text("hi".to_string()));

        let listing = master.list(Path::root()).await.unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0.as_str(), "a");
        assert!(matches!(listing[0].1, ListEntry::Node));
    }

    /// 2. Clone and diverge.
    #[tokio::test]
    async fn clone_and_diverge_merges_disjoint_writes() {
        let repo: Repository<Text, NoMetadata> = repo().await;

        let mut dev = repo.clone_branch(&BranchName::master(), BranchName::new("dev").unwrap()).await.unwrap();
        let mut master = repo.master();

        master.set(task("x"), None, Path::single("x"), None, Text("1".to_string())).await.unwrap();
        dev.set(task("y"), None, Path::single("y"), None, Text("2".to_string())).await.unwrap();

        dev.merge_with_branch(&BranchName::master(), task("merge"), None).await.unwrap();

        assert_eq!(dev.get(Path::single("x")).await.unwrap(), Text("1".to_string()));
        assert_eq!(dev.get(Path::single("y")).await.unwrap(), Text("2".to_string()));
    }

    /// 3. Conflict.
    #[tokio::test]
    async fn conflicting_writes_to_the_same_path_fail_the_merge() {
        let repo: Repository<Text, NoMetadata> = repo().await;

        let mut dev = repo.clone_branch(&BranchName::master(), BranchName::new("dev").unwrap()).await.unwrap();
        let mut master = repo.master();

        master.set(task("master"), None, Path::single("k"), None, Text("from master".to_string())).await.unwrap();
        dev.set(task("dev"), None, Path::single("k"), None, Text("from dev".to_string())).await.unwrap();

        let err = dev.merge_with_branch(&BranchName::master(), task("merge"), None).await.unwrap_err();
        assert!(err.to_string().contains("/k"));
    }

    /// 4. Counter merge.
    #[tokio::test]
    async fn counter_merge_sums_both_deltas_over_the_ancestor() {
        let repo: Repository<Counter, NoMetadata> = repo().await;
        let mut master = repo.master();
        master.set(task("base"), None, Path::single("n"), None, Counter(5)).await.unwrap();

        let mut dev = repo.clone_branch(&BranchName::master(), BranchName::new("dev").unwrap()).await.unwrap();
        master.set(task("master"), None, Path::single("n"), None, Counter(7)).await.unwrap();
        dev.set(task("dev"), None, Path::single("n"), None, Counter(4)).await.unwrap();

        dev.merge_with_branch(&BranchName::master(), task("merge"), None).await.unwrap();
        assert_eq!(dev.get(Path::single("n")).await.unwrap(), Counter(6));
    }

    /// 5. LCA.
    #[tokio::test]
    async fn lca_of_a_fork_is_the_fork_point() {
        let repo: Repository<Text, NoMetadata> = repo().await;
        let mut master = repo.master();
        let c1 = master.set(task("c1"), None, Path::single("a"), None, Text("1".to_string())).await.unwrap();

        let mut feature = repo.clone_branch(&BranchName::master(), BranchName::new("feature").unwrap()).await.unwrap();
        let c2 = master.set(task("c2"), None, Path::single("a"), None, Text("2".to_string())).await.unwrap();
        let c3 = feature.set(task("c3"), None, Path::single("b"), None, Text("3".to_string())).await.unwrap();

        let lcas = master.lcas(c3, None).await.unwrap();
        assert_eq!(lcas, vec![c1]);
        let _ = c2;
    }

    #[tokio::test]
    async fn a_cancelled_token_aborts_lcas_before_it_walks_anything() {
        let repo: Repository<Text, NoMetadata> = repo().await;
        let mut master = repo.master();
        let c1 = master.set(task("c1"), None, Path::single("a"), None, Text("1".to_string())).await.unwrap();
        let c2 = master.set(task("c2"), None, Path::single("b"), None, Text("2".to_string())).await.unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let err = master.lcas(c1, Some(&token)).await.unwrap_err();
        assert!(err.is_aborted());
        let _ = c2;
    }

    /// 6. Watch delivery.
    #[tokio::test]
    async fn watch_delivers_added_then_updated_without_overlap() {
        let repo: Repository<Text, NoMetadata> = repo().await;
        let mut master = repo.master();

        let log: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let log_for_handler = log.clone();
        let handler: strata_watch::Handler<strata_watch::Diff<Hash>> = Arc::new(move |diff: strata_watch::Diff<Hash>| {
            let log = log_for_handler.clone();
            Box::pin(async move {
                log.lock().unwrap().push(match diff {
                    strata_watch::Diff::Added(_) => "added".to_string(),
                    strata_watch::Diff::Removed(_) => "removed".to_string(),
                    strata_watch::Diff::Updated(..) => "updated".to_string(),
                });
                Ok(())
            })
        });
        let id = master.watch(handler).unwrap();

        master.set(task("v1"), None, Path::single("p"), None, Text("v1".to_string())).await.unwrap();
        master.set(task("v2"), None, Path::single("p"), None, Text("v2".to_string())).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        master.unwatch(id).await;

        assert_eq!(log.lock().unwrap().as_slice(), ["added".to_string(), "updated".to_string()]);
    }

    #[tokio::test]
    async fn fast_forward_advances_without_a_merge_commit() {
        let repo: Repository<Text, NoMetadata> = repo().await;
        let mut master = repo.master();
        let c1 = master.set(task("c1"), None, Path::single("a"), None, Text("1".to_string())).await.unwrap();

        let mut feature = repo.of_commit(c1);
        let c2 = feature.set(task("c2"), None, Path::single("b"), None, Text("2".to_string())).await.unwrap();

        assert!(master.fast_forward(c2).await.unwrap());
        assert_eq!(master.get_head().await.unwrap(), c2);
    }

    #[tokio::test]
    async fn export_then_import_round_trips_into_a_fresh_repository() {
        let source: Repository<Text, NoMetadata> = repo().await;
        let mut master = source.master();
        master.set(task("c1"), None, Path::single("a"), None, Text("1".to_string())).await.unwrap();

        let heads = source.heads().await.unwrap();
        let slice = source.export(None, None, Some(heads.into_iter().collect()), true, None).await.unwrap();

        let destination: Repository<Text, NoMetadata> = repo().await;
        destination.import(slice).await.unwrap();

        let commit = source.master().get_head().await.unwrap();
        assert_eq!(destination.task_of_commit(commit).await.unwrap().unwrap().messages, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn remote_push_then_fetch_syncs_branches_via_slice_export_import() {
        let origin: Repository<Text, NoMetadata> = repo().await;
        let mirror: Repository<Text, NoMetadata> = repo().await;

        let mut origin_master = origin.master();
        origin_master.set(task("c1"), None, Path::single("a"), None, Text("1".to_string())).await.unwrap();

        let remote = SliceRemote::new(origin.clone());
        remote.register_peer("mirror", mirror.clone()).await;
        remote.push("mirror", None, &BranchName::master()).await.unwrap();

        let mirror_master = mirror.master();
        assert_eq!(mirror_master.get(Path::single("a")).await.unwrap(), Text("1".to_string()));
    }
}
