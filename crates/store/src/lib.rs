//! The L1 backend kernel (`spec.md` §4.1): three primitive store shapes, deliberately minimal so
//! that many physical backends — in-memory, on-disk, remote — can implement them.
//!
//! Every method is `async` because `spec.md` §5 models each one as a suspension point: "any one
//! operation may suspend at a backend read or write; other operations may interleave during the
//! suspension." The in-memory backend in [`mem`] suspends nowhere in practice, but the trait
//! shape is what lets a future on-disk or networked backend slot in without touching L2+.

mod errors;
mod mem;

use async_trait::async_trait;

pub use crate::errors::Error;
pub use crate::mem::MemStore;

/// A key/value lookup surface. Lookups are idempotent; absence is not an error (`spec.md` §4.1).
#[async_trait]
pub trait ReadOnlyStore<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn mem(&self, key: &K) -> Result<bool, Error>;
    async fn find(&self, key: &K) -> Result<Option<V>, Error>;
}

/// A content-addressed store: `add` computes the key as a hash of the value and is idempotent
/// (`add(v); add(v)` yields the same key without duplicating storage).
#[async_trait]
pub trait AppendOnlyStore<K, V>: ReadOnlyStore<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn add(&self, value: V) -> Result<K, Error>;
}

/// Certifies that an additional key `src` resolves to the same logical value as a pre-existing
/// key `dst`. Used when a value has more than one valid hashing/representation and both need to
/// resolve identically (`spec.md` §4.1).
#[async_trait]
pub trait LinkStore<K, V>: ReadOnlyStore<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn add_link(&self, src: K, dst: K) -> Result<(), Error>;
}

/// A mutable keyed store with atomic compare-and-swap and enumeration. All write operations are
/// linearisable against concurrent writers to the same store (`spec.md` §4.1, §5).
#[async_trait]
pub trait ReadWriteStore<K, V>: ReadOnlyStore<K, V>
where
    K: Send + Sync,
    V: Send + Sync + PartialEq,
{
    async fn set(&self, key: K, value: V) -> Result<(), Error>;

    /// Atomic compare-and-swap. `test = None` means "key must not currently exist"; `set = None`
    /// means "remove the key". Returns whether the swap applied.
    async fn test_and_set(&self, key: K, test: Option<V>, set: Option<V>) -> Result<bool, Error>;

    async fn remove(&self, key: K) -> Result<(), Error>;

    async fn list(&self) -> Result<Vec<K>, Error>;
}
