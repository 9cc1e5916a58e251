use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Types that can be requested as OpenAI strict structured output.
///
/// Strict mode wants every object closed (`additionalProperties: false`),
/// every property listed in `required` (nullable ones included), and no
/// `$ref` indirection, so the generated schema is rewritten accordingly.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn openai_schema() -> Value {
        let root = schema_for!(Self);
        let mut value = serde_json::to_value(root).unwrap_or_default();

        let definitions = match &mut value {
            Value::Object(map) => {
                map.remove("$schema");
                map.remove("definitions")
            }
            _ => None,
        };

        if let Some(Value::Object(defs)) = definitions {
            resolve_refs(&mut value, &defs, 0);
        }
        close_objects(&mut value);

        value
    }

    fn output_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

const MAX_REF_DEPTH: usize = 32;

fn resolve_refs(value: &mut Value, defs: &Map<String, Value>, depth: usize) {
    if depth > MAX_REF_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| defs.get(name))
                .cloned();
            if let Some(def) = target {
                *value = def;
                resolve_refs(value, defs, depth + 1);
                return;
            }

            let single_all_of = match map.get("allOf") {
                Some(Value::Array(items)) if items.len() == 1 => Some(items[0].clone()),
                _ => None,
            };
            if let Some(inner) = single_all_of {
                *value = inner;
                resolve_refs(value, defs, depth + 1);
                return;
            }

            for v in map.values_mut() {
                resolve_refs(v, defs, depth);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_refs(item, defs, depth);
            }
        }
        _ => {}
    }
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".into(), Value::Bool(false));
                let keys: Vec<Value> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                map.insert("required".into(), Value::Array(keys));
            }
            for v in map.values_mut() {
                close_objects(v);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}
