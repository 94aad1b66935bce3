//! [`Config`]: a typed key/value bag of backend options (`SPEC_FULL.md` §6), grounded on
//! `sapling-config`'s [`FromConfigValue`] trait (`eden/scm/lib/config/model/src/convert.rs`) —
//! generalized here to a small built-in key registry rather than a config-file-format parser,
//! which stays out of scope.

use std::collections::HashMap;

/// Parses a raw config string into a typed value. Implemented for the handful of primitive types
/// `strata`'s own built-in keys need; an embedding application can implement it for its own
/// key types too.
pub trait FromConfigValue: Sized {
    fn from_config_value(raw: &str) -> Option<Self>;
}

impl FromConfigValue for String {
    fn from_config_value(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

impl FromConfigValue for bool {
    fn from_config_value(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromConfigValue for u64 {
    fn from_config_value(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromConfigValue for usize {
    fn from_config_value(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

/// The storage backend identifier. Only `"mem"` is built in.
pub const BACKEND: &str = "backend";
/// Cap on BFS depth for `lcas()`/`history()`. An empty default means unbounded.
pub const MAX_HISTORY_DEPTH: &str = "max_history_depth";
/// Cap on the number of lowest common ancestors `lcas()` may return before reporting
/// `too-many-lcas`. An empty default means unbounded.
pub const MAX_LCAS: &str = "max_lcas";

struct KeyInfo {
    key: &'static str,
    default: &'static str,
    doc: &'static str,
}

const BUILTIN_KEYS: &[KeyInfo] = &[
    KeyInfo { key: BACKEND, default: "mem", doc: "storage backend identifier; only \"mem\" is built in" },
    KeyInfo {
        key: MAX_HISTORY_DEPTH,
        default: "",
        doc: "cap on BFS depth for lcas()/history(); unset means unbounded",
    },
    KeyInfo {
        key: MAX_LCAS,
        default: "",
        doc: "cap on the number of lowest common ancestors lcas() may return before reporting too-many-lcas",
    },
];

/// A typed key/value bag of backend options. Values are stored as raw strings and parsed on
/// read via [`FromConfigValue`], the same split `sapling-config` makes between "what's on disk"
/// and "what a caller wants typed".
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Config { values: HashMap::new() }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parses `key`'s value via `T::from_config_value`, falling back to the key's built-in
    /// default (if it is a recognized key) when unset. `None` if the key is absent and either
    /// unrecognized or its default fails to parse as `T` (e.g. the empty default of
    /// [`MAX_HISTORY_DEPTH`]/[`MAX_LCAS`], which deliberately means "unbounded" for numeric `T`).
    pub fn get<T: FromConfigValue>(&self, key: &str) -> Option<T> {
        if let Some(raw) = self.values.get(key) {
            return T::from_config_value(raw);
        }
        BUILTIN_KEYS.iter().find(|k| k.key == key).and_then(|k| T::from_config_value(k.default))
    }

    pub fn get_or<T: FromConfigValue>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// The one-line documentation string for a recognized built-in key.
    pub fn doc(key: &str) -> Option<&'static str> {
        BUILTIN_KEYS.iter().find(|k| k.key == key).map(|k| k.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_backend_falls_back_to_mem() {
        let config = Config::new();
        assert_eq!(config.get::<String>(BACKEND), Some("mem".to_string()));
    }

    #[test]
    fn unset_max_history_depth_is_none_not_zero() {
        let config = Config::new();
        assert_eq!(config.get::<u64>(MAX_HISTORY_DEPTH), None);
    }

    #[test]
    fn explicit_value_overrides_the_default() {
        let mut config = Config::new();
        config.set(MAX_LCAS, "4");
        assert_eq!(config.get::<usize>(MAX_LCAS), Some(4));
    }

    #[test]
    fn get_or_falls_back_for_unrecognized_keys() {
        let config = Config::new();
        assert_eq!(config.get_or::<u64>("not_a_real_key", 7), 7);
    }

    #[test]
    fn every_builtin_key_has_documentation() {
        assert!(Config::doc(BACKEND).is_some());
        assert!(Config::doc(MAX_HISTORY_DEPTH).is_some());
        assert!(Config::doc(MAX_LCAS).is_some());
    }
}
