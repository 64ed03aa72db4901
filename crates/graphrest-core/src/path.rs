//! Canonical request paths
//!
//! A [`CanonicalPath`] is the only cache and dedup key the loaders know about.
//! Two argument mappings with the same contents produce the same path
//! regardless of key order.

use crate::query;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `base?query` with a deterministic query component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalPath {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for CanonicalPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Merge `args` into the query of `path`.
///
/// Without arguments the path is returned untouched. Otherwise the existing
/// query is parsed, arguments override it key by key, and the result is
/// re-serialized in sorted order. An empty query leaves no trailing `?`.
pub fn build_path(path: &str, args: Option<&Map<String, Value>>) -> CanonicalPath {
    let Some(args) = args else {
        return CanonicalPath::from(path);
    };

    let (base, existing) = match path.split_once('?') {
        Some((base, existing)) => (base, query::parse(existing)),
        None => (path, Vec::new()),
    };

    let merged = query::merge(existing, args);
    let encoded = query::stringify(&merged);
    if encoded.is_empty() {
        CanonicalPath::from(base)
    } else {
        CanonicalPath(format!("{base}?{encoded}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_no_args_returns_path_unchanged() {
        assert_eq!(build_path("/x?b=1&a=2", None).as_str(), "/x?b=1&a=2");
    }

    #[test]
    fn test_args_are_sorted() {
        let path = build_path("/x", Some(&args(json!({"b": 2, "a": 1}))));
        assert_eq!(path.as_str(), "/x?a=1&b=2");
    }

    #[test]
    fn test_args_override_existing_query() {
        let path = build_path("/users?limit=10&sort=name", Some(&args(json!({"limit": 25}))));
        assert_eq!(path.as_str(), "/users?limit=25&sort=name");
    }

    #[test]
    fn test_empty_serialization_drops_question_mark() {
        assert_eq!(build_path("/x?", Some(&Map::new())).as_str(), "/x");
        assert_eq!(build_path("/x", Some(&args(json!({"a": null})))).as_str(), "/x");
    }

    #[test]
    fn test_existing_query_is_canonicalized_when_args_given() {
        let path = build_path("/x?b=1&a=2", Some(&Map::new()));
        assert_eq!(path.as_str(), "/x?a=2&b=1");
    }

    proptest! {
        #[test]
        fn prop_canonical_path_ignores_argument_order(
            entries in prop::collection::btree_map("[a-z]{1,6}", "[a-zA-Z0-9 ]{0,8}", 0..8)
        ) {
            let mut forward = Vec::new();
            let mut backward = Vec::new();
            for (key, value) in &entries {
                forward.push((key.clone(), value.clone()));
            }
            for (key, value) in entries.iter().rev() {
                backward.push((key.clone(), value.clone()));
            }

            // Encode both orders into the existing query so insertion order matters.
            let forward_path = format!("/x?{}", pairs_unsorted(&forward));
            let backward_path = format!("/x?{}", pairs_unsorted(&backward));

            let a = build_path(&forward_path, Some(&Map::new()));
            let b = build_path(&backward_path, Some(&Map::new()));
            prop_assert_eq!(a, b);
        }
    }

    fn pairs_unsorted(pairs: &[(String, String)]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}
