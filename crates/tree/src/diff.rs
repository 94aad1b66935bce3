//! Leaf-only tree diffing, grounded in `manifest::diff`
//! (`eden/scm/lib/manifest/src/lib.rs`'s `DiffEntry`/`DiffType`): walks two trees in lockstep,
//! short-circuiting on equal hashes, and reports only contents leaves that were added, removed,
//! or changed. `a` plays `self` (the "old" side); `b` plays `other` (the "new"
//! side) — `Removed` names a leaf present in `a` and gone from `b`, `Added` the reverse.

use std::collections::BTreeSet;

use strata_hash::Path;
use strata_objects::Contents;
use strata_objects::ContentsStore;
use strata_objects::Metadata;
use strata_objects::NodeStore;

use crate::Kind;
use crate::Tree;
use crate::TreeError;

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Whether a leaf was added, removed, or changed between the two trees being compared.
#[derive(Clone, Debug)]
pub enum DiffType<C: Contents, M: Metadata> {
    Added(C, M),
    Removed(C, M),
    Updated((C, M), (C, M)),
}

#[derive(Clone, Debug)]
pub struct DiffEntry<C: Contents, M: Metadata> {
    pub path: Path,
    pub diff: DiffType<C, M>,
}

/// Diffs `a` against `b`, collecting leaf-level differences under their full paths.
#[tracing::instrument(skip(nodes, contents, a, b))]
pub async fn diff<C: Contents, M: Metadata>(
    nodes: &NodeStore<M>,
    contents: &ContentsStore<C>,
    a: &mut Tree<C, M>,
    b: &mut Tree<C, M>,
) -> Result<Vec<DiffEntry<C, M>>, TreeError> {
    let mut out = Vec::new();
    diff_at(nodes, contents, a, b, Path::root(), &mut out).await?;
    Ok(out)
}

fn diff_at<'a, C: Contents, M: Metadata>(
    nodes: &'a NodeStore<M>,
    contents: &'a ContentsStore<C>,
    a: &'a mut Tree<C, M>,
    b: &'a mut Tree<C, M>,
    path: Path,
    out: &'a mut Vec<DiffEntry<C, M>>,
) -> BoxFuture<'a, Result<(), TreeError>> {
    Box::pin(async move {
        if let (Some(ha), Some(hb)) = (a.quick_hash(), b.quick_hash()) {
            if ha == hb {
                return Ok(());
            }
        }

        match (a.kind(), b.kind()) {
            (Kind::Contents, Kind::Contents) => {
                let (ah, av, am) = a.materialize_contents(contents).await?;
                let (bh, bv, bm) = b.materialize_contents(contents).await?;
                if ah != bh || am != bm {
                    out.push(DiffEntry { path, diff: DiffType::Updated((av, am), (bv, bm)) });
                }
            }
            (Kind::Contents, Kind::Node) => {
                emit_all(nodes, contents, a, path.clone(), out, true).await?;
                emit_all(nodes, contents, b, path, out, false).await?;
            }
            (Kind::Node, Kind::Contents) => {
                emit_all(nodes, contents, a, path.clone(), out, true).await?;
                emit_all(nodes, contents, b, path, out, false).await?;
            }
            (Kind::Node, Kind::Node) => {
                a.ensure_buffer(nodes).await?;
                b.ensure_buffer(nodes).await?;

                let steps: BTreeSet<strata_hash::Step> = {
                    let a_buf = match a {
                        Tree::Node(crate::NodeBody::Buffer(m)) => m,
                        _ => unreachable!("materialised above"),
                    };
                    let b_buf = match b {
                        Tree::Node(crate::NodeBody::Buffer(m)) => m,
                        _ => unreachable!("materialised above"),
                    };
                    a_buf.keys().chain(b_buf.keys()).cloned().collect()
                };

                for step in steps {
                    let child_path = path.join(step.clone());
                    let a_has = {
                        let a_buf = match a {
                            Tree::Node(crate::NodeBody::Buffer(m)) => m,
                            _ => unreachable!("materialised above"),
                        };
                        a_buf.contains_key(&step)
                    };
                    let b_has = {
                        let b_buf = match b {
                            Tree::Node(crate::NodeBody::Buffer(m)) => m,
                            _ => unreachable!("materialised above"),
                        };
                        b_buf.contains_key(&step)
                    };

                    match (a_has, b_has) {
                        (true, true) => {
                            let a_child = {
                                let a_buf = match a {
                                    Tree::Node(crate::NodeBody::Buffer(m)) => m,
                                    _ => unreachable!("materialised above"),
                                };
                                a_buf.get_mut(&step).expect("checked above")
                            };
                            let b_child = {
                                let b_buf = match b {
                                    Tree::Node(crate::NodeBody::Buffer(m)) => m,
                                    _ => unreachable!("materialised above"),
                                };
                                b_buf.get_mut(&step).expect("checked above")
                            };
                            diff_at(nodes, contents, a_child, b_child, child_path, out).await?;
                        }
                        (true, false) => {
                            let a_buf = match a {
                                Tree::Node(crate::NodeBody::Buffer(m)) => m,
                                _ => unreachable!("materialised above"),
                            };
                            let a_child = a_buf.get_mut(&step).expect("checked above");
                            emit_all(nodes, contents, a_child, child_path, out, true).await?;
                        }
                        (false, true) => {
                            let b_buf = match b {
                                Tree::Node(crate::NodeBody::Buffer(m)) => m,
                                _ => unreachable!("materialised above"),
                            };
                            let b_child = b_buf.get_mut(&step).expect("checked above");
                            emit_all(nodes, contents, b_child, child_path, out, false).await?;
                        }
                        (false, false) => unreachable!("step came from one of the two buffers"),
                    }
                }
            }
        }

        Ok(())
    })
}

/// Recursively reports every leaf beneath `tree` as wholly added or wholly removed — used both
/// for a one-sided subtree (present on only one side) and for a node-vs-contents kind mismatch,
/// which is treated as a full removal of one shape followed by a full addition of the other.
fn emit_all<'a, C: Contents, M: Metadata>(
    nodes: &'a NodeStore<M>,
    contents: &'a ContentsStore<C>,
    tree: &'a mut Tree<C, M>,
    path: Path,
    out: &'a mut Vec<DiffEntry<C, M>>,
    as_removed: bool,
) -> BoxFuture<'a, Result<(), TreeError>> {
    Box::pin(async move {
        match tree.kind() {
            Kind::Contents => {
                let (_hash, value, metadata) = tree.materialize_contents(contents).await?;
                let diff = if as_removed { DiffType::Removed(value, metadata) } else { DiffType::Added(value, metadata) };
                out.push(DiffEntry { path, diff });
            }
            Kind::Node => {
                tree.ensure_buffer(nodes).await?;
                let buffer = match tree {
                    Tree::Node(crate::NodeBody::Buffer(b)) => b,
                    _ => unreachable!("materialised above"),
                };
                for (step, child) in buffer.iter_mut() {
                    let child_path = path.join(step.clone());
                    emit_all(nodes, contents, child, child_path, out, as_removed).await?;
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_hash::Path;
    use strata_objects::Conflict;
    use strata_objects::Lazy;
    use strata_objects::ParseError;
    use strata_store::MemStore;

    use super::*;

    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Text(String);

    #[async_trait::async_trait]
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

    #[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct NoMetadata;

    impl Metadata for NoMetadata {
        fn merge3(_old: &Self, _a: &Self, _b: &Self) -> Result<Self, Conflict> {
            Ok(NoMetadata)
        }
    }

    fn stores() -> (NodeStore<NoMetadata>, ContentsStore<Text>) {
        (NodeStore::new(Arc::new(MemStore::new())), ContentsStore::new(Arc::new(MemStore::new())))
    }

    #[tokio::test]
    async fn identical_trees_have_no_diff() {
        let (nodes, contents) = stores();
        let mut a = Tree::empty();
        a.addv(&nodes, Path::single("x"), Text("v".into()), NoMetadata).await.unwrap();
        let mut b = a.clone();
        let entries = diff(&nodes, &contents, &mut a, &mut b).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn added_and_removed_leaves_are_reported() {
        let (nodes, contents) = stores();
        let mut a = Tree::empty();
        a.addv(&nodes, Path::single("gone"), Text("old".into()), NoMetadata).await.unwrap();
        let mut b = Tree::empty();
        b.addv(&nodes, Path::single("new"), Text("new".into()), NoMetadata).await.unwrap();

        let mut entries = diff(&nodes, &contents, &mut a, &mut b).await.unwrap();
        entries.sort_by_key(|e| e.path.to_string());
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].diff, DiffType::Removed(..)));
        assert!(matches!(entries[1].diff, DiffType::Added(..)));
    }

    #[tokio::test]
    async fn changed_leaf_is_reported_as_updated() {
        let (nodes, contents) = stores();
        let mut a = Tree::empty();
        a.addv(&nodes, Path::single("x"), Text("old".into()), NoMetadata).await.unwrap();
        let mut b = Tree::empty();
        b.addv(&nodes, Path::single("x"), Text("new".into()), NoMetadata).await.unwrap();

        let entries = diff(&nodes, &contents, &mut a, &mut b).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].diff, DiffType::Updated(..)));
    }
}
