//! Recursive JSON merge used for agent settings, entity metadata,
//! component data and task metadata.

use serde_json::{Map, Value};

/// Merge `partial` into `stored`.
///
/// - an explicit `null` deletes the key, at any depth
/// - two objects merge recursively
/// - anything else (arrays, scalars, type changes) replaces the stored value
/// - keys absent from `partial` are untouched
///
/// A non-object `partial` replaces `stored` wholesale.
pub fn merge_json(stored: &Value, partial: &Value) -> Value {
    match (stored, partial) {
        (Value::Object(base), Value::Object(patch)) => Value::Object(merge_objects(base, patch)),
        (_, Value::Object(patch)) => Value::Object(merge_objects(&Map::new(), patch)),
        (_, other) => other.clone(),
    }
}

fn merge_objects(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, incoming) in patch {
        match incoming {
            Value::Null => {
                merged.remove(key);
            }
            Value::Object(_) => {
                let current = merged.get(key).cloned().unwrap_or(Value::Null);
                merged.insert(key.clone(), merge_json(&current, incoming));
            }
            other => {
                merged.insert(key.clone(), other.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_deletes_nested_secret() {
        let stored = json!({"a": 1, "secrets": {"x": 1, "y": 2}});
        let partial = json!({"secrets": {"x": null}, "b": 2});
        assert_eq!(
            merge_json(&stored, &partial),
            json!({"a": 1, "b": 2, "secrets": {"y": 2}})
        );
    }

    #[test]
    fn test_arrays_replace_wholesale() {
        let stored = json!({"model": {"stop": ["a", "b"], "temp": 0.2}});
        let partial = json!({"model": {"stop": ["c"]}});
        assert_eq!(
            merge_json(&stored, &partial),
            json!({"model": {"stop": ["c"], "temp": 0.2}})
        );
    }

    #[test]
    fn test_null_inside_new_object_is_dropped() {
        let stored = json!({"a": 1});
        let partial = json!({"voice": {"model": "x", "speed": null}});
        assert_eq!(
            merge_json(&stored, &partial),
            json!({"a": 1, "voice": {"model": "x"}})
        );
    }

    #[test]
    fn test_object_replaces_scalar() {
        let stored = json!({"a": 5});
        let partial = json!({"a": {"nested": true}});
        assert_eq!(merge_json(&stored, &partial), json!({"a": {"nested": true}}));
    }

    #[test]
    fn test_empty_partial_is_identity() {
        let stored = json!({"a": 1, "secrets": {"k": "v"}});
        assert_eq!(merge_json(&stored, &json!({})), stored);
    }

    #[test]
    fn test_deleting_missing_key_is_noop() {
        let stored = json!({"a": 1});
        assert_eq!(merge_json(&stored, &json!({"zzz": null})), stored);
    }
}
