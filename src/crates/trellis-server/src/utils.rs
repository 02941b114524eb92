//! JSON helpers shared by the stores and the config merge

use serde_json::{Map, Value};

/// Containment check: every key/value in `filter` must appear in `target`,
/// recursing into nested objects. Arrays and scalars compare by equality.
pub fn json_contains(target: &Value, filter: &Value) -> bool {
    match (target, filter) {
        (Value::Object(target_map), Value::Object(filter_map)) => {
            filter_map.iter().all(|(key, expected)| {
                target_map
                    .get(key)
                    .is_some_and(|actual| json_contains(actual, expected))
            })
        }
        (actual, expected) => actual == expected,
    }
}

/// Containment check over two JSON object maps.
pub fn map_contains(target: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| {
        target
            .get(key)
            .is_some_and(|actual| json_contains(actual, expected))
    })
}

/// Deep-merge `overlay` into `base`: nested objects merge recursively,
/// anything else in `overlay` replaces the value in `base`.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Shallow-merge `overlay` into `base`: top-level keys replace wholesale.
pub fn shallow_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_json_contains_subset() {
        let target = json!({"a": 1, "b": {"c": 2, "d": 3}});
        assert!(json_contains(&target, &json!({"a": 1})));
        assert!(json_contains(&target, &json!({"b": {"c": 2}})));
        assert!(!json_contains(&target, &json!({"b": {"c": 5}})));
        assert!(!json_contains(&target, &json!({"missing": 1})));
    }

    #[test]
    fn test_json_contains_scalar_and_array() {
        assert!(json_contains(&json!([1, 2]), &json!([1, 2])));
        assert!(!json_contains(&json!([1, 2]), &json!([1])));
        assert!(json_contains(&json!("x"), &json!("x")));
    }

    #[test]
    fn test_deep_merge_nested() {
        let mut base = obj(json!({"a": {"x": 1, "y": 2}, "b": 1}));
        let overlay = obj(json!({"a": {"y": 9, "z": 3}, "c": 4}));
        deep_merge(&mut base, &overlay);
        assert_eq!(
            Value::Object(base),
            json!({"a": {"x": 1, "y": 9, "z": 3}, "b": 1, "c": 4})
        );
    }

    #[test]
    fn test_shallow_merge_replaces_objects() {
        let mut base = obj(json!({"a": {"x": 1}}));
        let overlay = obj(json!({"a": {"y": 2}}));
        shallow_merge(&mut base, &overlay);
        assert_eq!(Value::Object(base), json!({"a": {"y": 2}}));
    }
}
