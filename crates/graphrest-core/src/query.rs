//! Query-string codec
//!
//! Arguments travel as ordered `(key, value)` pairs. Keeping them flat makes
//! merging and serialization deterministic: [`stringify`] sorts by key, so two
//! argument mappings with the same contents always encode to the same string
//! no matter how they were assembled.
//!
//! Flattening rules for JSON arguments:
//!
//! | value | pairs |
//! |---|---|
//! | `"a"` | `key=a` |
//! | `3`, `true` | `key=3`, `key=true` |
//! | `null` | (omitted) |
//! | `[1, 2]` | `key=1&key=2` |
//! | `{"state": "open"}` | `key[state]=open` |

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Ordered list of decoded query pairs.
pub type QueryPairs = Vec<(String, String)>;

/// Decode an `application/x-www-form-urlencoded` query (without the leading `?`).
pub fn parse(query: &str) -> QueryPairs {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Flatten a JSON argument mapping into query pairs.
pub fn flatten(args: &Map<String, Value>) -> QueryPairs {
    let mut pairs = Vec::new();
    for (key, value) in args {
        flatten_value(key, value, &mut pairs);
    }
    pairs
}

fn flatten_value(key: &str, value: &Value, out: &mut QueryPairs) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push((key.to_string(), s.clone())),
        Value::Bool(_) | Value::Number(_) => out.push((key.to_string(), value.to_string())),
        Value::Array(items) => {
            for item in items {
                flatten_value(key, item, out);
            }
        }
        Value::Object(fields) => {
            for (name, field) in fields {
                flatten_value(&format!("{key}[{name}]"), field, out);
            }
        }
    }
}

/// Encode pairs, sorted by key. The sort is stable so repeated keys keep
/// their relative order.
pub fn stringify(pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in sorted {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// The top-level argument name a pair belongs to (`filter[state]` → `filter`).
pub fn root_name(key: &str) -> &str {
    key.find('[').map_or(key, |idx| &key[..idx])
}

/// Merge `args` over `existing`. Every existing pair whose root name is an
/// argument key is dropped, including keys whose new value is `null`.
pub fn merge(mut existing: QueryPairs, args: &Map<String, Value>) -> QueryPairs {
    existing.retain(|(key, _)| !args.contains_key(root_name(key)));
    existing.extend(flatten(args));
    existing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_decodes_pairs_in_order() {
        let pairs = parse("b=2&a=hello%20world&b=3");
        assert_eq!(
            pairs,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "hello world".to_string()),
                ("b".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_flatten_scalars_arrays_and_objects() {
        let pairs = flatten(&map(json!({
            "active": true,
            "ids": [1, 2],
            "filter": {"state": "open"},
            "missing": null,
            "name": "x",
        })));

        assert!(pairs.contains(&("active".into(), "true".into())));
        assert!(pairs.contains(&("ids".into(), "1".into())));
        assert!(pairs.contains(&("ids".into(), "2".into())));
        assert!(pairs.contains(&("filter[state]".into(), "open".into())));
        assert!(pairs.contains(&("name".into(), "x".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "missing"));
    }

    #[test]
    fn test_stringify_sorts_but_keeps_repeated_key_order() {
        let pairs = vec![
            ("z".to_string(), "1".to_string()),
            ("ids".to_string(), "9".to_string()),
            ("a".to_string(), "x y".to_string()),
            ("ids".to_string(), "3".to_string()),
        ];
        assert_eq!(stringify(&pairs), "a=x+y&ids=9&ids=3&z=1");
    }

    #[test]
    fn test_root_name() {
        assert_eq!(root_name("filter[state]"), "filter");
        assert_eq!(root_name("plain"), "plain");
    }

    #[test]
    fn test_merge_replaces_whole_argument() {
        let existing = parse("filter[state]=open&filter[owner]=me&page=2");
        let merged = merge(existing, &map(json!({"filter": {"state": "closed"}})));
        assert_eq!(stringify(&merged), "filter%5Bstate%5D=closed&page=2");
    }

    #[test]
    fn test_merge_null_removes_existing_key() {
        let merged = merge(parse("a=1&b=2"), &map(json!({"a": null})));
        assert_eq!(stringify(&merged), "b=2");
    }
}
