use std::collections::HashMap;
use std::hash::Hash as StdHash;

use async_trait::async_trait;
use strata_hash::Codec;
use strata_hash::Hash;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::instrument;

use crate::errors::Error;
use crate::AppendOnlyStore;
use crate::LinkStore;
use crate::ReadOnlyStore;
use crate::ReadWriteStore;

/// An in-memory backend for every L1 trait, playing the role `MemDag`/`MemCommits` play against
/// `sapling-dag`/`sapling-commits`: the default backend, and the vehicle for every unit test in
/// this workspace. A real deployment would swap this for an on-disk or networked backend without
/// any L2+ code changing, since those layers only see the trait objects.
pub struct MemStore<K, V> {
    values: RwLock<HashMap<K, V>>,
    /// Alias keys installed by [`LinkStore::add_link`], redirecting `src` to `dst`.
    links: RwLock<HashMap<K, K>>,
}

impl<K, V> MemStore<K, V>
where
    K: Eq + StdHash + Clone,
{
    pub fn new() -> Self {
        MemStore {
            values: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(&self, key: &K) -> K {
        let links = self.links.read().await;
        let mut current = key.clone();
        // Links are certified to point at a pre-existing value, never at another alias, so one
        // hop suffices; we still loop defensively in case a future backend chains them.
        while let Some(next) = links.get(&current) {
            if *next == current {
                break;
            }
            current = next.clone();
        }
        current
    }
}

impl<K, V> Default for MemStore<K, V>
where
    K: Eq + StdHash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> ReadOnlyStore<K, V> for MemStore<K, V>
where
    K: Eq + StdHash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn mem(&self, key: &K) -> Result<bool, Error> {
        let key = self.resolve(key).await;
        Ok(self.values.read().await.contains_key(&key))
    }

    async fn find(&self, key: &K) -> Result<Option<V>, Error> {
        let key = self.resolve(key).await;
        Ok(self.values.read().await.get(&key).cloned())
    }
}

#[async_trait]
impl<K, V> ReadWriteStore<K, V> for MemStore<K, V>
where
    K: Eq + StdHash + Clone + Send + Sync,
    V: Clone + Send + Sync + PartialEq,
{
    #[instrument(skip(self, value))]
    async fn set(&self, key: K, value: V) -> Result<(), Error> {
        let key = self.resolve(&key).await;
        self.values.write().await.insert(key, value);
        Ok(())
    }

    #[instrument(skip(self, test, set))]
    async fn test_and_set(&self, key: K, test: Option<V>, set: Option<V>) -> Result<bool, Error> {
        let key = self.resolve(&key).await;
        let mut values = self.values.write().await;
        let current = values.get(&key).cloned();
        if current != test {
            debug!("test_and_set: current state does not match expected test value");
            return Ok(false);
        }
        match set {
            Some(value) => {
                values.insert(key, value);
            }
            None => {
                values.remove(&key);
            }
        }
        Ok(true)
    }

    async fn remove(&self, key: K) -> Result<(), Error> {
        let key = self.resolve(&key).await;
        self.values.write().await.remove(&key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<K>, Error> {
        Ok(self.values.read().await.keys().cloned().collect())
    }
}

#[async_trait]
impl<K, V> LinkStore<K, V> for MemStore<K, V>
where
    K: Eq + StdHash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn add_link(&self, src: K, dst: K) -> Result<(), Error> {
        if !self.values.read().await.contains_key(&dst) {
            return Err(Error::LinkTargetNotFound(
                "link destination must already resolve to a value".to_string(),
            ));
        }
        self.links.write().await.insert(src, dst);
        Ok(())
    }
}

/// `add` is only meaningful when the key space is the content-addressed [`Hash`] space: the key
/// is derived from the value, not supplied by the caller.
#[async_trait]
impl<V> AppendOnlyStore<Hash, V> for MemStore<Hash, V>
where
    V: Codec + Clone + Send + Sync,
{
    #[instrument(skip(self, value))]
    async fn add(&self, value: V) -> Result<Hash, Error> {
        let key = value.content_hash();
        let mut values = self.values.write().await;
        values.entry(key).or_insert(value);
        Ok(key)
    }
}
