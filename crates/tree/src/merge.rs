//! Tree-level three-way merge. Rather than re-implementing the per-step combinator lift a
//! second time, a tree merge flushes all three operands to node hashes and delegates straight to
//! [`strata_objects::NodeStore::merge`] — the same reuse-over-reimplementation `TreeManifest::merge`
//! favors, deferring to `Manifest::diff`/`finalize` rather than walking three link trees by hand.

use strata_objects::Conflict;
use strata_objects::Contents;
use strata_objects::ContentsStore;
use strata_objects::Metadata;
use strata_objects::NodeStore;

use crate::Tree;

/// Three-way merges `old`/`a`/`b`, flushing each to the node store first. Empty on either side is
/// treated as absent — applied uniformly to all three operands here, not only `old`, so a merge
/// against a tree that was never populated behaves exactly like a merge against a deleted
/// subtree.
#[tracing::instrument(skip(nodes, contents, old, a, b))]
pub async fn merge3<C: Contents, M: Metadata>(
    nodes: &NodeStore<M>,
    contents: &ContentsStore<C>,
    old: &mut Tree<C, M>,
    a: &mut Tree<C, M>,
    b: &mut Tree<C, M>,
) -> Result<Tree<C, M>, Conflict> {
    let old_hash = hash_or_absent(old, nodes, contents).await?;
    let a_hash = hash_or_absent(a, nodes, contents).await?;
    let b_hash = hash_or_absent(b, nodes, contents).await?;

    let merged = nodes.merge(contents, old_hash, a_hash, b_hash).await?;
    Ok(match merged {
        Some(h) => Tree::of_hash(h),
        None => Tree::empty(),
    })
}

async fn hash_or_absent<C: Contents, M: Metadata>(
    tree: &mut Tree<C, M>,
    nodes: &NodeStore<M>,
    contents: &ContentsStore<C>,
) -> Result<Option<strata_hash::Hash>, Conflict> {
    match tree {
        Tree::Empty => Ok(None),
        _ => {
            let h = tree.flush(nodes, contents).await.map_err(|e| Conflict::new(e.to_string()))?;
            Ok(Some(h))
        }
    }
}
