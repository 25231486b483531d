//! Argument validation against a tool's declared JSON Schema.
//!
//! Schemas are compiled once when the tool is registered. A schema that does
//! not compile rejects every call, so a broken tool never sees arguments.
//! Top-level `null` fields count as absent, the way models send optional
//! arguments they chose not to fill.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

pub struct ArgumentSchema {
    compiled: Result<JSONSchema, String>,
}

impl ArgumentSchema {
    pub fn compile(schema: &Value) -> Self {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| format!("tool schema does not compile: {}", e));
        Self { compiled }
    }

    pub fn is_valid_schema(&self) -> bool {
        self.compiled.is_ok()
    }

    /// Validate `args`. The error lists every violation with its path.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let schema = self.compiled.as_ref().map_err(Clone::clone)?;
        let args = without_nulls(args);
        let result = schema.validate(&args);
        if let Err(errors) = result {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(messages.join("; "));
        }
        Ok(())
    }
}

/// Compile and validate in one go.
pub fn validate(schema: &Value, args: &Value) -> Result<(), String> {
    ArgumentSchema::compile(schema).validate(args)
}

fn without_nulls(args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "mode": { "type": "string", "enum": ["fast", "slow"] },
                "limit": { "type": "integer" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        assert!(validate(&schema(), &json!({"path": "a", "mode": "fast", "limit": 3})).is_ok());
        assert!(validate(&schema(), &json!({"path": "a", "mode": null})).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate(&schema(), &json!({"mode": "fast"})).unwrap_err();
        assert!(err.contains("path"), "{}", err);
        assert!(validate(&schema(), &json!({"path": null})).is_err());
    }

    #[test]
    fn rejects_wrong_nested_types() {
        let err = validate(&schema(), &json!({"path": "a", "tags": ["x", 2]})).unwrap_err();
        assert!(err.starts_with("/tags/1"), "{}", err);
        assert!(validate(&schema(), &json!({"path": "a", "limit": 1.5})).is_err());
    }

    #[test]
    fn rejects_enum_and_unknown_fields() {
        assert!(validate(&schema(), &json!({"path": "a", "mode": "medium"})).is_err());
        assert!(validate(&schema(), &json!({"path": "a", "extra": true})).is_err());
    }

    #[test]
    fn enforces_bounds_patterns_and_combinators() {
        let schema = ArgumentSchema::compile(&json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer", "minimum": 1 },
                "name": { "type": "string", "pattern": "^[a-z]+$", "minLength": 3 },
                "target": { "oneOf": [{ "type": "string" }, { "type": "integer" }] }
            }
        }));
        assert!(schema
            .validate(&json!({"count": 2, "name": "abc", "target": 7}))
            .is_ok());

        let err = schema
            .validate(&json!({"count": -5, "name": "X!", "target": [1, 2]}))
            .unwrap_err();
        assert!(err.contains("/count"), "{}", err);
        assert!(err.contains("/name"), "{}", err);
        assert!(err.contains("/target"), "{}", err);

        assert!(schema.validate(&json!({"name": "ab"})).is_err());
        assert!(schema.validate(&json!({"count": 0})).is_err());
    }

    #[test]
    fn broken_schema_rejects_every_call() {
        let broken = ArgumentSchema::compile(&json!({"type": "uuid"}));
        assert!(!broken.is_valid_schema());
        assert!(broken.validate(&json!("x")).is_err());
        assert!(validate(&json!({"minimum": "one"}), &json!(3)).is_err());
        assert!(validate(&json!({}), &json!({"anything": 1})).is_ok());
    }
}
