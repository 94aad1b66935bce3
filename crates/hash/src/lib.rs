//! Content-addressing primitives shared by every layer of `strata`: the fixed-width [`Hash`]
//! digest, the [`Step`]/[`Path`] address types, and the canonical [`Codec`] used to derive a
//! `Hash` from a value.
//!
//! These map to `spec.md` §3 ("Hash", "Step", "Path") and are the lowest layer in the crate's
//! dependency graph: every other `strata-*` crate depends on this one and nothing else at this
//! layer.

mod path;

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::Blake2b;
use blake2::Digest;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

pub use crate::path::Path;
pub use crate::path::Step;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte BLAKE2b-256 digest: the content-addressed key for every persisted contents/node/
/// commit object. `spec.md` invariant 1 requires `key == H(serialise(object))`; this type is
/// that `H`'s codomain.
///
/// Plays the role of `mononoke_types::ContentId`/`ChangesetId`, collapsed to a single type since
/// `strata` does not distinguish hash spaces per object kind (the typed stores in `strata-objects`
/// provide that separation instead).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hashes already-encoded bytes directly. Exposed so a `Slice` import can re-derive and
    /// verify a key without decoding and re-encoding the value it names.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid hash hex string: {0}")]
pub struct ParseHashError(String);

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::LEN * 2 {
            return Err(ParseHashError(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in out.iter_mut().enumerate() {
            let byte_str = s.get(i * 2..i * 2 + 2).ok_or_else(|| ParseHashError(s.to_string()))?;
            *chunk = u8::from_str_radix(byte_str, 16).map_err(|_| ParseHashError(s.to_string()))?;
        }
        Ok(Hash(out))
    }
}

/// Errors arising from [`Codec::decode`]. Encoding a well-formed Rust value never fails in
/// practice (bincode only rejects unsupported shapes, none of which `strata` constructs), so
/// only the decode side is surfaced to callers.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode value: {0}")]
pub struct CodecError(String);

/// The deterministic byte codec `spec.md` §3 requires of every persisted value: "equal
/// byte-serialisations yield equal hashes" and, across process restarts, `H(encode(x)) ==
/// H(encode(x))`.
///
/// Blanket-implemented below for any `Serialize + DeserializeOwned` type via a fixed `bincode`
/// configuration, the same role `sapling-mincode` plays for tree/commit objects elsewhere —
/// `strata` uses `bincode` instead since `sapling-mincode` is not a published crate.
pub trait Codec: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;

    /// The content-addressed key for this value: `H(encode(self))`.
    fn content_hash(&self) -> Hash {
        Hash::of_bytes(&self.encode())
    }
}

impl<T> Codec for T
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self) -> Vec<u8> {
        // bincode's default options are fixed-width integers, little-endian, no padding: a pure
        // function of the value being serialized.
        bincode::serialize(self).expect("serialization of an in-memory value cannot fail")
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_hash_equal() {
        let a = Hash::of_bytes(b"hello");
        let b = Hash::of_bytes(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_hash_different() {
        assert_ne!(Hash::of_bytes(b"hello"), Hash::of_bytes(b"world"));
    }

    #[test]
    fn hash_round_trips_through_display_and_from_str() {
        let h = Hash::of_bytes(b"round trip me");
        let text = h.to_string();
        let parsed: Hash = text.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn codec_round_trip_law() {
        let v: Vec<i64> = vec![1, 2, 3, -4];
        let encoded = v.encode();
        let decoded = Vec::<i64>::decode(&encoded).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn codec_hash_is_deterministic() {
        let v = String::from("deterministic");
        assert_eq!(v.content_hash(), v.clone().content_hash());
    }

    quickcheck::quickcheck! {
        fn prop_decode_encode_is_identity(v: Vec<i32>) -> bool {
            Vec::<i32>::decode(&v.encode()).unwrap() == v
        }
    }
}
