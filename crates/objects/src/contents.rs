//! The [`Contents`] capability trait and [`ContentsStore`], the L2 wrapper that lifts a
//! user-defined value's three-way merge into the hash-keyed combinator the node store composes
//! with ("reads contents for `old`, `a`, `b` from the store, invokes the user's value-level
//! merge, and writes the result back").

use std::sync::Arc;

use async_trait::async_trait;
use strata_hash::Codec;
use strata_hash::Hash;
use strata_store::AppendOnlyStore;
use strata_store::Error as StoreError;
use tracing::instrument;

use crate::conflict::Conflict;
use crate::conflict::Lazy;

/// A value-level parse failure. Distinct from [`Conflict`]: `print`/`parse` is a diagnostic
/// round-trip, not a merge outcome.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse contents: {0}")]
pub struct ParseError(pub String);

/// The opaque, user-defined payload stored at the leaves of a tree. Three capabilities are
/// required: a deterministic byte codec (inherited from [`Codec`]), a `print`/`parse` diagnostic
/// round-trip, and a three-way merge over `Option<Self>` with a lazy ancestor promise — `None`
/// on either side of the merge encodes absence.
#[async_trait]
pub trait Contents: Codec + Clone + Send + Sync + 'static {
    fn print(&self) -> String;

    fn parse(s: &str) -> Result<Self, ParseError>;

    /// `old` is lazy: a combinator that never needs the ancestor (`ours`, `theirs`) need not
    /// force the read behind it.
    async fn merge3(
        old: &mut Lazy<Self>,
        a: Option<&Self>,
        b: Option<&Self>,
    ) -> Result<Option<Self>, Conflict>;
}

/// Lifts [`Contents::merge3`] from values to hashes. Wraps the backend's append-only store
/// directly over `C` (not a raw byte buffer) since `C: Codec` already fixes the encoding — the
/// key a backend derives for a given value is exactly `H(encode(value))`.
pub struct ContentsStore<C: Contents> {
    inner: Arc<dyn AppendOnlyStore<Hash, C>>,
}

impl<C: Contents> Clone for ContentsStore<C> {
    fn clone(&self) -> Self {
        ContentsStore { inner: self.inner.clone() }
    }
}

impl<C: Contents> ContentsStore<C> {
    pub fn new(inner: Arc<dyn AppendOnlyStore<Hash, C>>) -> Self {
        ContentsStore { inner }
    }

    pub async fn add(&self, value: C) -> Result<Hash, StoreError> {
        self.inner.add(value).await
    }

    pub async fn find(&self, key: &Hash) -> Result<Option<C>, StoreError> {
        self.inner.find(key).await
    }

    /// `merge(t): Option<key> -> merge-combinator`, specialised to the contents level: reads
    /// `old`/`a`/`b` (when present), runs the value-level merge, and persists the result.
    #[instrument(skip(self))]
    pub async fn merge(
        &self,
        old: Option<Hash>,
        a: Option<Hash>,
        b: Option<Hash>,
    ) -> Result<Option<Hash>, Conflict> {
        if a == b {
            return Ok(a);
        }
        if old == a {
            return Ok(b);
        }
        if old == b {
            return Ok(a);
        }

        let a_value = self.resolve(a).await?;
        let b_value = self.resolve(b).await?;

        let inner = self.inner.clone();
        let mut old_thunk: Lazy<C> = Lazy::new(async move {
            match old {
                None => Ok(None),
                Some(key) => inner
                    .find(&key)
                    .await
                    .map_err(|e| Conflict::new(format!("failed to read ancestor contents: {e}"))),
            }
        });

        let merged = C::merge3(&mut old_thunk, a_value.as_ref(), b_value.as_ref()).await?;
        match merged {
            None => Ok(None),
            Some(value) => {
                let key = self
                    .inner
                    .add(value)
                    .await
                    .map_err(|e| Conflict::new(format!("failed to persist merged contents: {e}")))?;
                Ok(Some(key))
            }
        }
    }

    async fn resolve(&self, key: Option<Hash>) -> Result<Option<C>, Conflict> {
        match key {
            None => Ok(None),
            Some(key) => self
                .inner
                .find(&key)
                .await
                .map_err(|e| Conflict::new(format!("failed to read contents {key}: {e}"))),
        }
    }
}

/// A minimal [`Contents`] implementation shared by this crate's own tests and by sibling
/// modules' tests (`node`, `commit`) that need some concrete `C: Contents` to exercise merge
/// lifting without depending on a real application payload type.
#[cfg(test)]
pub(crate) mod tests_support {
    use async_trait::async_trait;

    use super::Conflict;
    use super::Contents;
    use super::Lazy;
    use super::ParseError;

    #[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub(crate) struct PlainText(pub String);

    #[async_trait]
    impl Contents for PlainText {
        fn print(&self) -> String {
            self.0.clone()
        }

        fn parse(s: &str) -> Result<Self, ParseError> {
            Ok(PlainText(s.to_string()))
        }

        async fn merge3(
            _old: &mut Lazy<Self>,
            a: Option<&Self>,
            b: Option<&Self>,
        ) -> Result<Option<Self>, Conflict> {
            match (a, b) {
                (Some(a), Some(b)) if a == b => Ok(Some(a.clone())),
                (Some(_), Some(_)) => Err(Conflict::new("both sides changed")),
                (Some(a), None) => Ok(Some(a.clone())),
                (None, Some(b)) => Ok(Some(b.clone())),
                (None, None) => Ok(None),
            }
        }
    }
}
