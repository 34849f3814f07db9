//! Structural comparison of configuration trees.
//!
//! The differ answers "does the current state already satisfy the desired state?". Both trees
//! are normalised before comparing: only the desired tree's top-level keys are kept, strings are
//! trimmed and lists are sorted by the canonical serialisation of their elements, so lists are
//! compared as sets. Order-significant lists lose their order in the process.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// Top-level keys a comparison is scoped to.
pub type ReferenceKeys = BTreeSet<String>;

/// Human readable before/after rendering of a change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Normalised current state.
    pub before: String,
    /// Normalised desired state, or an empty object when deleting.
    pub after: String,
}

/// Returns the top-level keys of `desired`, empty when it is not a map.
pub fn reference_keys(desired: &Value) -> ReferenceKeys {
    desired
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Normalises `tree`, keeping only `keys` at the top level.
///
/// Nested maps keep all of their keys. Missing reference keys are simply absent from the output.
pub fn normalize(tree: &Value, keys: &ReferenceKeys) -> Value {
    match tree {
        Value::Object(map) => Value::Object(
            keys.iter()
                .filter_map(|key| map.get(key).map(|v| (key.clone(), normalize_value(v))))
                .collect(),
        ),
        other => normalize_value(other),
    }
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(normalize_value).collect();
            items.sort_by_cached_key(canonical);
            Value::Array(items)
        }
        Value::Object(map) => {
            // rebuilt in key order so serialisation is sorted even with `preserve_order`
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), normalize_value(&map[key])))
                    .collect::<Map<String, Value>>(),
            )
        }
        other => other.clone(),
    }
}

/// Compact serialisation of an already normalised value.
fn canonical(value: &Value) -> String {
    value.to_string()
}

fn pretty(value: &Value) -> String {
    format!("{value:#}\n")
}

/// True when `current` does not already satisfy `desired` on `keys`.
pub fn needs_update(desired: &Value, current: &Value, keys: &ReferenceKeys) -> bool {
    normalize(desired, keys) != normalize(current, keys)
}

/// Renders both normalised trees for reporting.
///
/// With `is_deletion` the `after` side is always the empty object.
pub fn diff(desired: &Value, current: &Value, keys: &ReferenceKeys, is_deletion: bool) -> Diff {
    let after = if is_deletion {
        pretty(&Value::Object(Map::new()))
    } else {
        pretty(&normalize(desired, keys))
    };

    Diff {
        before: pretty(&normalize(current, keys)),
        after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> ReferenceKeys {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_trees_need_no_update() {
        let trees = [
            json!({}),
            json!({"alias": "web", "tags": ["b", "a"], "nested": {"x": [3, 1, {"k": " v "}]}}),
            json!({"enabled": true, "count": 4, "ratio": 0.5, "none": null}),
            json!(["loose", "list"]),
        ];

        for tree in &trees {
            for key_set in [keys(&[]), reference_keys(tree), keys(&["alias", "absent"])] {
                assert!(!needs_update(tree, tree, &key_set), "{tree} vs itself");
            }
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let tree = json!({
            "name": "  host01 ",
            "labels": [{"b": " 2 "}, {"a": 1}],
            "groups": [["z", "y"], ["x"]],
            "ignored": "not a reference key",
        });
        let key_set = keys(&["name", "labels", "groups"]);

        let once = normalize(&tree, &key_set);
        assert_eq!(normalize(&once, &key_set), once);
        assert!(once.get("ignored").is_none());
    }

    #[test]
    fn list_order_is_ignored() {
        assert!(!needs_update(
            &json!({"tags": ["a", "b"]}),
            &json!({"tags": ["b", "a"]}),
            &keys(&["tags"]),
        ));
    }

    #[test]
    fn nested_list_order_is_ignored() {
        let desired = json!({"rules": [{"hosts": ["h1", "h2"], "id": 1}, {"id": 2}]});
        let current = json!({"rules": [{"id": 2}, {"id": 1, "hosts": ["h2", "h1"]}]});
        assert!(!needs_update(&desired, &current, &keys(&["rules"])));
    }

    #[test]
    fn extra_current_keys_are_ignored() {
        assert!(!needs_update(
            &json!({"a": 1}),
            &json!({"a": 1, "b": 999}),
            &keys(&["a"]),
        ));
    }

    #[test]
    fn nested_maps_are_compared_whole() {
        let desired = json!({"attributes": {"alias": "web"}});
        let current = json!({"attributes": {"alias": "web", "ipaddress": "10.0.0.1"}});
        assert!(needs_update(&desired, &current, &keys(&["attributes"])));
    }

    #[test]
    fn strings_are_trimmed() {
        assert!(!needs_update(
            &json!({"name": "x"}),
            &json!({"name": " x "}),
            &keys(&["name"]),
        ));
    }

    #[test]
    fn value_changes_are_detected() {
        let key_set = keys(&["alias", "tags"]);
        assert!(needs_update(
            &json!({"alias": "web", "tags": ["a"]}),
            &json!({"alias": "db", "tags": ["a"]}),
            &key_set,
        ));
        assert!(needs_update(
            &json!({"alias": "web", "tags": ["a", "b"]}),
            &json!({"alias": "web", "tags": ["a"]}),
            &key_set,
        ));
        assert!(needs_update(
            &json!({"alias": "web"}),
            &json!({}),
            &keys(&["alias"]),
        ));
    }

    #[test]
    fn diff_renders_sorted_normalised_trees() {
        let desired = json!({"tags": ["b", "a"], "alias": " web "});
        let current = json!({"alias": "db", "tags": ["a"], "site": "central"});

        let rendered = diff(&desired, &current, &reference_keys(&desired), false);

        assert_eq!(
            rendered.after,
            "{\n  \"alias\": \"web\",\n  \"tags\": [\n    \"a\",\n    \"b\"\n  ]\n}\n"
        );
        assert_eq!(
            rendered.before,
            "{\n  \"alias\": \"db\",\n  \"tags\": [\n    \"a\"\n  ]\n}\n"
        );
    }

    #[test]
    fn deletion_diff_is_empty_object() {
        let current = json!({"alias": "web"});
        for desired in [json!({}), json!({"alias": "web"}), json!({"anything": [1, 2]})] {
            let rendered = diff(&desired, &current, &keys(&["alias"]), true);
            assert_eq!(rendered.after, "{}\n");
            assert_eq!(rendered.before, "{\n  \"alias\": \"web\"\n}\n");
        }
    }

    #[test]
    fn reference_keys_of_non_map_are_empty() {
        assert!(reference_keys(&json!(["a"])).is_empty());
        assert_eq!(reference_keys(&json!({"a": 1, "b": 2})), keys(&["a", "b"]));
    }
}
