//! The L4 tree staging layer: [`Tree`], an in-memory, lazily-materialised partial mirror of a
//! commit's tree that coalesces reads and writes before a deferred [`Tree::flush`] into the
//! node/contents stores.
//!
//! Modeled directly on `sapling-manifest`'s `TreeManifest`
//! (`eden/scm/lib/manifest-tree/src/lib.rs`, generalized to `strata`'s generic `Path`/`Contents`/
//! `Metadata` rather than file-path-keyed `FileMetadata`): a tree node starts out as a bare hash
//! pointer and is progressively replaced with an in-memory "buffer" of children as reads and
//! writes touch it, exactly as `TreeManifest`'s `Link::Durable`/`Link::Ephemeral` distinction
//! works there.

mod concrete;
mod diff;
mod merge;

use std::collections::BTreeMap;

use strata_hash::Hash;
use strata_hash::Path;
use strata_hash::Step;
use strata_objects::Contents;
use strata_objects::Entry;
use strata_objects::Metadata;
use strata_objects::NodeStore;
use strata_store::Error as StoreError;

pub use crate::concrete::of_concrete;
pub use crate::concrete::to_concrete;
pub use crate::concrete::ConcreteTree;
pub use crate::diff::diff;
pub use crate::diff::DiffEntry;
pub use crate::diff::DiffType;
pub use crate::merge::merge3;

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("node store error: {0}")]
    Node(#[from] strata_objects::NodeError),

    #[error("backend I/O error: {0}")]
    Store(#[from] StoreError),

    #[error("contents {0} are missing from the contents store")]
    MissingContents(Hash),

    #[error("the root of a tree cannot itself be contents")]
    EmptyPathContents,

    #[error("path descends through a contents leaf as though it were a node")]
    NotANode,

    #[error("path addresses a node where contents were expected")]
    NotContents,
}

/// What a path resolved to: the tree itself (the empty path addresses the tree, not a value) or
/// a contents leaf.
#[derive(Clone, Debug)]
pub enum Found<C: Contents, M: Metadata> {
    Node,
    Contents(C, M),
}

/// One immediate child as reported by [`Tree::list`]: either a subtree or a contents leaf's
/// metadata (the value itself is not fetched, mirroring `NodeStore::list`).
#[derive(Clone, Debug)]
pub enum ListEntry<M: Metadata> {
    Node,
    Contents(M),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Node,
    Contents,
}

/// The unmaterialised body of a node-shaped tree: a hash pointer into the node store, or a
/// buffer of pending children.
#[derive(Clone, Debug)]
pub enum NodeBody<C: Contents, M: Metadata> {
    Hash(Hash),
    Buffer(BTreeMap<Step, Tree<C, M>>),
}

/// The unmaterialised body of a contents-shaped tree leaf: a hash pointer into the contents
/// store, or the value itself once read or written.
#[derive(Clone, Debug)]
pub enum ContentsBody<C: Contents> {
    Hash(Hash),
    Value(C),
}

/// A tree is one of: empty, a node (hash-only or a materialised buffer), or contents (value plus
/// metadata). Generalized one notch further than that literal shape so that contents leaves are
/// lazy too (hash-only until actually read) — a materialised buffer's entries are themselves
/// hash-only, and that has to be true of contents entries, not only node entries, or a `list()`
/// one level into a large tree would force-read every leaf's value. See `DESIGN.md` for this as a
/// recorded open-question resolution.
#[derive(Clone, Debug)]
pub enum Tree<C: Contents, M: Metadata> {
    Empty,
    Node(NodeBody<C, M>),
    Contents(ContentsBody<C>, M),
}

impl<C: Contents, M: Metadata> Tree<C, M> {
    /// A brand-new, empty staging tree — e.g. the starting point for a fresh repository's root.
    pub fn empty() -> Self {
        Tree::Empty
    }

    /// A tree rooted at an already-persisted node, read lazily from here on — the usual starting
    /// point for a staging tree opened against an existing commit.
    pub fn of_hash(hash: Hash) -> Self {
        Tree::Node(NodeBody::Hash(hash))
    }

    /// The root hash, if this tree is already fully flushed. A pure read: `None` does not imply
    /// the tree is dirty, only that it has pending, unflushed structure (or is a bare contents
    /// leaf, which has no "root hash" of its own as a node).
    pub fn hash(&self) -> Option<Hash> {
        match self {
            Tree::Node(NodeBody::Hash(h)) => Some(*h),
            _ => None,
        }
    }

    pub(crate) fn quick_hash(&self) -> Option<Hash> {
        match self {
            Tree::Node(NodeBody::Hash(h)) => Some(*h),
            Tree::Contents(ContentsBody::Hash(h), _) => Some(*h),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> Kind {
        match self {
            Tree::Contents(..) => Kind::Contents,
            Tree::Empty | Tree::Node(_) => Kind::Node,
        }
    }

    /// Materialises one level: if this is a bare hash, fetches that node's entries (as hash-only
    /// children) from `nodes` and installs them as a buffer. A pure read if already a buffer.
    pub(crate) fn ensure_buffer<'a>(
        &'a mut self,
        nodes: &'a NodeStore<M>,
    ) -> BoxFuture<'a, Result<&'a mut BTreeMap<Step, Tree<C, M>>, TreeError>> {
        Box::pin(async move {
            if let Tree::Empty = self {
                *self = Tree::Node(NodeBody::Buffer(BTreeMap::new()));
            }
            let body = match self {
                Tree::Node(body) => body,
                Tree::Contents(..) => return Err(TreeError::NotANode),
                Tree::Empty => unreachable!("materialised above"),
            };
            if let NodeBody::Hash(h) = body {
                let entries = nodes.list(*h).await?;
                let buffer = entries
                    .into_iter()
                    .map(|(step, entry)| {
                        let child = match entry {
                            Entry::Node(child_hash) => Tree::Node(NodeBody::Hash(child_hash)),
                            Entry::Contents(child_hash, metadata) => {
                                Tree::Contents(ContentsBody::Hash(child_hash), metadata)
                            }
                        };
                        (step, child)
                    })
                    .collect();
                *body = NodeBody::Buffer(buffer);
            }
            match body {
                NodeBody::Buffer(buffer) => Ok(buffer),
                NodeBody::Hash(_) => unreachable!("materialised above"),
            }
        })
    }

    /// Materialises a contents leaf's value (reading it from `contents` if only a hash is held
    /// yet) and returns `(content_hash, value, metadata)`. `content_hash` is compared by callers
    /// instead of `value` directly, since [`Contents`] does not require `PartialEq`.
    pub(crate) async fn materialize_contents(
        &mut self,
        contents: &strata_objects::ContentsStore<C>,
    ) -> Result<(Hash, C, M), TreeError> {
        match self {
            Tree::Contents(body, metadata) => {
                let (hash, value) = match body {
                    ContentsBody::Hash(h) => {
                        let v = contents.find(h).await?.ok_or(TreeError::MissingContents(*h))?;
                        (*h, v)
                    }
                    ContentsBody::Value(v) => {
                        use strata_hash::Codec;
                        (v.content_hash(), v.clone())
                    }
                };
                *body = ContentsBody::Value(value.clone());
                Ok((hash, value, metadata.clone()))
            }
            Tree::Empty | Tree::Node(_) => Err(TreeError::NotContents),
        }
    }

    /// Walks `path`, materialising buffers lazily one level at a time. The empty path always
    /// resolves to [`Found::Node`] (the tree itself), never a contents leaf.
    pub fn find<'a>(
        &'a mut self,
        nodes: &'a NodeStore<M>,
        contents: &'a strata_objects::ContentsStore<C>,
        path: Path,
    ) -> BoxFuture<'a, Result<Option<Found<C, M>>, TreeError>> {
        Box::pin(async move {
            match path.split_first() {
                None => match self {
                    Tree::Contents(..) => Err(TreeError::EmptyPathContents),
                    Tree::Empty | Tree::Node(_) => Ok(Some(Found::Node)),
                },
                Some((step, rest)) => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    match buffer.get_mut(step) {
                        None => Ok(None),
                        Some(child) if rest.is_empty() => match child {
                            Tree::Contents(..) => {
                                let (_hash, value, metadata) = child.materialize_contents(contents).await?;
                                Ok(Some(Found::Contents(value, metadata)))
                            }
                            Tree::Empty | Tree::Node(_) => Ok(Some(Found::Node)),
                        },
                        Some(child) => child.find(nodes, contents, rest).await,
                    }
                }
            }
        })
    }

    /// Lists the immediate children at `path`: `None` if the path does not resolve, or resolves
    /// to a contents leaf (which has no children to list).
    pub fn list<'a>(
        &'a mut self,
        nodes: &'a NodeStore<M>,
        path: Path,
    ) -> BoxFuture<'a, Result<Option<Vec<(Step, ListEntry<M>)>>, TreeError>> {
        Box::pin(async move {
            match path.split_first() {
                None => match self {
                    Tree::Contents(..) => Ok(None),
                    Tree::Empty | Tree::Node(_) => {
                        let buffer = self.ensure_buffer(nodes).await?;
                        Ok(Some(
                            buffer
                                .iter()
                                .map(|(step, child)| {
                                    let entry = match child {
                                        Tree::Contents(_, m) => ListEntry::Contents(m.clone()),
                                        Tree::Empty | Tree::Node(_) => ListEntry::Node,
                                    };
                                    (step.clone(), entry)
                                })
                                .collect(),
                        ))
                    }
                },
                Some((step, rest)) => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    match buffer.get_mut(step) {
                        None => Ok(None),
                        Some(child) => child.list(nodes, rest).await,
                    }
                }
            }
        })
    }

    /// Sets a contents leaf at `path`. The root (empty path) cannot be contents (invariant 5).
    pub fn addv<'a>(
        &'a mut self,
        nodes: &'a NodeStore<M>,
        path: Path,
        value: C,
        metadata: M,
    ) -> BoxFuture<'a, Result<(), TreeError>> {
        Box::pin(async move {
            match path.split_first() {
                None => Err(TreeError::EmptyPathContents),
                Some((step, rest)) if rest.is_empty() => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    buffer.insert(step.clone(), Tree::Contents(ContentsBody::Value(value), metadata));
                    Ok(())
                }
                Some((step, rest)) => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    let child = buffer.entry(step.clone()).or_insert(Tree::Empty);
                    child.addv(nodes, rest, value, metadata).await
                }
            }
        })
    }

    /// Grafts an entire subtree at `path`. The empty path replaces the tree's own root.
    pub fn add<'a>(&'a mut self, nodes: &'a NodeStore<M>, path: Path, subtree: Tree<C, M>) -> BoxFuture<'a, Result<(), TreeError>> {
        Box::pin(async move {
            match path.split_first() {
                None => {
                    *self = subtree;
                    Ok(())
                }
                Some((step, rest)) if rest.is_empty() => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    buffer.insert(step.clone(), subtree);
                    Ok(())
                }
                Some((step, rest)) => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    let child = buffer.entry(step.clone()).or_insert(Tree::Empty);
                    child.add(nodes, rest, subtree).await
                }
            }
        })
    }

    /// Removes whatever is at `path`. A no-op if nothing resolves there, mirroring
    /// `NodeStore::remove`. Removing the root (empty path) clears the tree to [`Tree::Empty`].
    pub fn remove<'a>(&'a mut self, nodes: &'a NodeStore<M>, path: Path) -> BoxFuture<'a, Result<(), TreeError>> {
        Box::pin(async move {
            match path.split_first() {
                None => {
                    *self = Tree::Empty;
                    Ok(())
                }
                Some((step, rest)) if rest.is_empty() => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    buffer.remove(step);
                    Ok(())
                }
                Some((step, rest)) => {
                    let buffer = self.ensure_buffer(nodes).await?;
                    match buffer.get_mut(step) {
                        None => Ok(()),
                        Some(child) => child.remove(nodes, rest).await,
                    }
                }
            }
        })
    }

    /// Bottom-up post-order flush: materialises every pending child, inserts contents before the
    /// node entries that reference them, and replaces each buffer with the
    /// resulting hash. `flush(flush(t)) == flush(t)`: once `self` is `Node(Hash(_))`, a second
    /// call is a pure read with no I/O.
    pub fn flush<'a>(
        &'a mut self,
        nodes: &'a NodeStore<M>,
        contents: &'a strata_objects::ContentsStore<C>,
    ) -> BoxFuture<'a, Result<Hash, TreeError>> {
        Box::pin(async move {
            match self {
                Tree::Empty => {
                    let h = nodes.empty().await?;
                    *self = Tree::Node(NodeBody::Hash(h));
                    Ok(h)
                }
                Tree::Node(NodeBody::Hash(h)) => Ok(*h),
                Tree::Contents(..) => Err(TreeError::EmptyPathContents),
                Tree::Node(NodeBody::Buffer(buffer)) => {
                    let mut entries = BTreeMap::new();
                    for (step, child) in buffer.iter_mut() {
                        match child {
                            Tree::Contents(body, metadata) => {
                                let hash = match body {
                                    ContentsBody::Hash(h) => *h,
                                    ContentsBody::Value(v) => {
                                        let h = contents.add(v.clone()).await?;
                                        *body = ContentsBody::Hash(h);
                                        h
                                    }
                                };
                                entries.insert(step.clone(), Entry::Contents(hash, metadata.clone()));
                            }
                            Tree::Empty | Tree::Node(_) => {
                                let h = child.flush(nodes, contents).await?;
                                entries.insert(step.clone(), Entry::Node(h));
                            }
                        }
                    }
                    let h = nodes.v(entries).await?;
                    *self = Tree::Node(NodeBody::Hash(h));
                    Ok(h)
                }
            }
        })
    }
}
