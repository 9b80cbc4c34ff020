//! JSON-schema builders for capability inputs.

use serde_json::{json, Map, Value};

use crate::capability::CapabilityDefinition;

pub fn string_schema(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

pub fn number_schema(description: &str) -> Value {
    json!({"type": "number", "description": description})
}

pub fn array_schema(items: Value, description: &str) -> Value {
    json!({"type": "array", "items": items, "description": description})
}

/// Object schema from `(name, schema)` pairs and the list of required names.
pub fn object_schema(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let props: Map<String, Value> = properties
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

/// Checks that an input schema is an object schema whose `required`
/// entries all name declared properties.
pub fn validate_definition(def: &CapabilityDefinition) -> Result<(), String> {
    let schema = def
        .input_schema
        .as_object()
        .ok_or_else(|| format!("{}: input schema must be an object", def.name))?;

    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {}
        other => {
            return Err(format!(
                "{}: input schema type must be \"object\", got {:?}",
                def.name, other
            ))
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(required) = schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| format!("{}: \"required\" must be an array", def.name))?;
        for field in required {
            let Some(field) = field.as_str() else {
                return Err(format!("{}: \"required\" entries must be strings", def.name));
            };
            if !properties.is_some_and(|p| p.contains_key(field)) {
                return Err(format!(
                    "{}: required field \"{field}\" is not declared in properties",
                    def.name
                ));
            }
        }
    }
    Ok(())
}
