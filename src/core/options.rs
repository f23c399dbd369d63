//! Option objects and the options-merge algorithm.

use serde_json::{Map, Value};

/// A JSON object, the shape of every option set.
pub type JsonObject = Map<String, Value>;

/// Merge `override_options` on top of `base`.
///
/// Top-level keys from the override win. When both sides hold a plain object
/// under the same key, the two objects are merged one level deep: nested
/// objects inside them are replaced wholesale by the override's value.
pub fn merge_options(base: &JsonObject, override_options: Option<&JsonObject>) -> JsonObject {
    let Some(override_options) = override_options else {
        return base.clone();
    };

    let mut merged = base.clone();
    for (key, value) in override_options {
        let value = match (base.get(key), value) {
            (Some(Value::Object(base_obj)), Value::Object(override_obj)) => {
                let mut nested = base_obj.clone();
                for (k, v) in override_obj {
                    nested.insert(k.clone(), v.clone());
                }
                Value::Object(nested)
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), value);
    }

    merged
}

/// Borrow a JSON value as an object, or return an empty one.
pub(crate) fn as_object(value: &Value) -> JsonObject {
    match value {
        Value::Object(obj) => obj.clone(),
        _ => JsonObject::new(),
    }
}
