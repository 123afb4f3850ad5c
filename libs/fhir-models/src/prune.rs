//! Null pruning
//!
//! FHIR JSON omits absent values instead of writing `null`. [`remove_null`] drops
//! `null`, empty arrays and empty objects at every depth, including inside arrays.

use serde_json::{Map, Value};

/// Prune `value`; returns `None` when nothing is left.
pub fn remove_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            let kept: Vec<Value> = items.into_iter().filter_map(remove_null).collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| remove_null(value).map(|value| (key, value)))
                .collect();
            (!kept.is_empty()).then_some(Value::Object(kept))
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn removes_nested_empties() {
        let pruned = remove_null(json!({
            "id": "1",
            "active": false,
            "count": 0,
            "comment": "",
            "note": null,
            "name": [],
            "meta": {"tag": [null, {}], "versionId": null},
            "identifier": [{"value": null}, {"value": "x"}]
        }));
        assert_eq!(
            pruned,
            Some(json!({
                "id": "1",
                "active": false,
                "count": 0,
                "comment": "",
                "identifier": [{"value": "x"}]
            }))
        );
    }

    #[test]
    fn fully_empty_input_vanishes() {
        assert_eq!(remove_null(json!({"a": {"b": [null]}})), None);
        assert_eq!(remove_null(Value::Null), None);
        assert_eq!(remove_null(json!("text")), Some(json!("text")));
    }

    #[test]
    fn keeps_key_order() {
        let pruned = remove_null(json!({"z": 1, "gone": null, "a": 2})).unwrap();
        let keys: Vec<&String> = pruned.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a"]);
    }
}
