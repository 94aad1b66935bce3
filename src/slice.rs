//! [`Slice`]: an export/import bundle of `(hash, value)` sets over contents, nodes, and commits —
//! self-verifying, since every key is recoverable as `H(encode)` of its value
//! ([`Repository::import`](crate::Repository::import) checks exactly that).

use std::collections::HashMap;

use strata_hash::Hash;
use strata_objects::Commit;
use strata_objects::Contents;
use strata_objects::Metadata;
use strata_objects::Node;

/// A content-addressed bundle of everything reachable from some set of commits, keyed by hash at
/// every layer. Produced by [`Repository::export`](crate::Repository::export), consumed by
/// [`Repository::import`](crate::Repository::import).
pub struct Slice<C: Contents, M: Metadata> {
    pub contents: HashMap<Hash, C>,
    pub nodes: HashMap<Hash, Node<M>>,
    pub commits: HashMap<Hash, Commit>,
}

impl<C: Contents, M: Metadata> Slice<C, M> {
    pub fn empty() -> Self {
        Slice { contents: HashMap::new(), nodes: HashMap::new(), commits: HashMap::new() }
    }
}
