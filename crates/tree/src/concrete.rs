//! Total (de)materialisation to and from a plain in-memory tree, used by `Slice` export/import
//! where the whole tree must be walked regardless of what is already buffered.

use std::collections::BTreeMap;

use strata_hash::Step;
use strata_objects::Contents;
use strata_objects::ContentsStore;
use strata_objects::Metadata;
use strata_objects::NodeStore;

use crate::ContentsBody;
use crate::Kind;
use crate::NodeBody;
use crate::Tree;
use crate::TreeError;

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A fully materialised tree: every node expanded, every leaf value read. No hash pointers, no
/// laziness — the inverse of [`Tree`]'s staged representation.
#[derive(Clone, Debug)]
pub enum ConcreteTree<C: Contents, M: Metadata> {
    Node(BTreeMap<Step, ConcreteTree<C, M>>),
    Contents(C, M),
}

/// Recursively reads `tree` in full, caching values back into it as it goes (the same lazy
/// buffering every other `Tree` operation performs — `to_concrete` does not bypass it, it just
/// forces all of it at once).
pub fn to_concrete<'a, C: Contents, M: Metadata>(
    nodes: &'a NodeStore<M>,
    contents: &'a ContentsStore<C>,
    tree: &'a mut Tree<C, M>,
) -> BoxFuture<'a, Result<ConcreteTree<C, M>, TreeError>> {
    Box::pin(async move {
        match tree.kind() {
            Kind::Contents => {
                let (_hash, value, metadata) = tree.materialize_contents(contents).await?;
                Ok(ConcreteTree::Contents(value, metadata))
            }
            Kind::Node => {
                tree.ensure_buffer(nodes).await?;
                let buffer = match tree {
                    Tree::Node(NodeBody::Buffer(b)) => b,
                    _ => unreachable!("materialised above"),
                };
                let mut out = BTreeMap::new();
                for (step, child) in buffer.iter_mut() {
                    out.insert(step.clone(), to_concrete(nodes, contents, child).await?);
                }
                Ok(ConcreteTree::Node(out))
            }
        }
    })
}

/// Builds a staging [`Tree`] from a [`ConcreteTree`] with no I/O: every leaf starts as an
/// in-memory value, every node as an in-memory buffer, ready for a later [`Tree::flush`].
pub fn of_concrete<C: Contents, M: Metadata>(concrete: ConcreteTree<C, M>) -> Tree<C, M> {
    match concrete {
        ConcreteTree::Contents(value, metadata) => Tree::Contents(ContentsBody::Value(value), metadata),
        ConcreteTree::Node(entries) => {
            let buffer = entries.into_iter().map(|(step, child)| (step, of_concrete(child))).collect();
            Tree::Node(NodeBody::Buffer(buffer))
        }
    }
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
    async fn to_concrete_then_of_concrete_round_trips_after_a_flush() {
        let (nodes, contents) = stores();
        let mut tree = Tree::empty();
        tree.addv(&nodes, Path::root().join("a").join("b"), Text("hi".into()), NoMetadata).await.unwrap();
        let original_hash = tree.flush(&nodes, &contents).await.unwrap();

        let concrete = to_concrete(&nodes, &contents, &mut tree).await.unwrap();
        let mut rebuilt = of_concrete(concrete);
        let rebuilt_hash = rebuilt.flush(&nodes, &contents).await.unwrap();

        assert_eq!(original_hash, rebuilt_hash);
    }
}
