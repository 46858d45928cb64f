//! Small builders for tool parameter schemas.
//!
//! Tool schemas are plain data: root `type: "object"` with `properties`
//! and `required`. These helpers keep the per-tool declarations short and
//! uniform.

use serde_json::{Value, json};

/// Builds an object schema from property pairs and required names.
#[must_use]
pub fn object(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let props: serde_json::Map<String, Value> = properties
        .iter()
        .map(|(name, schema)| ((*name).to_string(), schema.clone()))
        .collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    })
}

/// A string property.
#[must_use]
pub fn string(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

/// An integer property with a minimum of zero.
#[must_use]
pub fn integer(description: &str) -> Value {
    json!({"type": "integer", "minimum": 0, "description": description})
}

/// A boolean property.
#[must_use]
pub fn boolean(description: &str) -> Value {
    json!({"type": "boolean", "description": description})
}

/// An array-of-strings property.
#[must_use]
pub fn string_array(description: &str) -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": description,
    })
}

/// A string property constrained to an enumeration.
#[must_use]
pub fn string_enum(description: &str, values: &[&str]) -> Value {
    json!({"type": "string", "enum": values, "description": description})
}
