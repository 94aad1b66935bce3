//! [`BranchName`] and [`BranchStore`]. Per §4.2, the branch store needs no wrapper of its own —
//! it is L1's `ReadWriteStore` used directly, keyed by name rather than by hash.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use strata_hash::Hash;
use strata_store::ReadWriteStore;

/// The distinguished branch name every repository starts with.
pub const MASTER: &str = "master";

#[derive(Debug, thiserror::Error)]
#[error("invalid branch name {0:?}: must be non-empty and contain only letters, digits, '-', '_', '.', '/'")]
pub struct InvalidBranchName(String);

/// A validated branch name: non-empty, alphanumerics plus `- _ . /`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidBranchName> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
        if valid {
            Ok(BranchName(name))
        } else {
            Err(InvalidBranchName(name))
        }
    }

    pub fn master() -> Self {
        BranchName(MASTER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A branch store is exactly L1's read-write store, keyed by validated name.
pub type BranchStore = Arc<dyn ReadWriteStore<BranchName, Hash>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_rejected() {
        assert!(BranchName::new("").is_err());
    }

    #[test]
    fn punctuation_outside_the_allowed_set_is_rejected() {
        assert!(BranchName::new("feature branch").is_err());
        assert!(BranchName::new("feature@work").is_err());
    }

    #[test]
    fn hyphen_underscore_dot_and_slash_are_allowed() {
        assert!(BranchName::new("release/1.0.0_rc-1").is_ok());
    }

    #[test]
    fn master_constant_round_trips() {
        assert_eq!(BranchName::master().as_str(), MASTER);
    }
}
