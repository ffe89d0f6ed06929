//! Plugin Configuration Schemas
//!
//! A pragmatic subset of JSON schema used to validate per-plugin
//! configuration: typed fields with optional defaults, enumerated values,
//! and numeric bounds. A manifest declares its schema once; the sandbox
//! validates every config read/write against it and falls back to the
//! declared default for unset keys.

use crate::error::{PluginError, PluginResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared configuration schema for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    /// Field schemas keyed by config key, in declaration order.
    pub fields: IndexMap<String, ConfigFieldSchema>,
}

/// Schema for a single configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFieldSchema {
    /// Expected JSON type of the value.
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    /// Default returned when the key is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values, if the field is an enumeration.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Minimum value for numeric fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Maximum value for numeric fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

/// Configuration field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ConfigFieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ConfigFieldType::String => value.is_string(),
            ConfigFieldType::Integer => value.is_i64() || value.is_u64(),
            ConfigFieldType::Number => value.is_number(),
            ConfigFieldType::Boolean => value.is_boolean(),
            ConfigFieldType::Array => value.is_array(),
            ConfigFieldType::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ConfigFieldType::String => "string",
            ConfigFieldType::Integer => "integer",
            ConfigFieldType::Number => "number",
            ConfigFieldType::Boolean => "boolean",
            ConfigFieldType::Array => "array",
            ConfigFieldType::Object => "object",
        }
    }
}

impl ConfigSchema {
    /// Parse a schema from a manifest's `config_schema` JSON object.
    ///
    /// Accepts either a JSON-schema-style object with a `properties` map or
    /// the field map directly.
    pub fn from_json(value: &Value) -> PluginResult<Self> {
        let fields_value = value.get("properties").unwrap_or(value);
        let map = fields_value
            .as_object()
            .ok_or_else(|| PluginError::ManifestValidation {
                reason: "config_schema must be a JSON object".to_string(),
            })?;

        let mut fields = IndexMap::new();
        for (key, field_value) in map {
            let field: ConfigFieldSchema = serde_json::from_value(field_value.clone())
                .map_err(|e| PluginError::ManifestValidation {
                    reason: format!("config_schema field '{}': {}", key, e),
                })?;
            // A declared default has to satisfy its own field schema.
            if let Some(ref default) = field.default {
                field.check_value(key, default)?;
            }
            fields.insert(key.clone(), field);
        }

        Ok(ConfigSchema { fields })
    }

    /// Validate a value for `key` against the declared schema.
    ///
    /// Keys that the schema does not declare are rejected.
    pub fn validate(&self, key: &str, value: &Value) -> PluginResult<()> {
        let field = self
            .fields
            .get(key)
            .ok_or_else(|| PluginError::ConfigValidation {
                key: key.to_string(),
                reason: "key is not declared in the config schema".to_string(),
            })?;
        field.check_value(key, value)
    }

    /// Typed default for `key`, if the schema declares one.
    pub fn default_for(&self, key: &str) -> Option<Value> {
        self.fields.get(key).and_then(|f| f.default.clone())
    }

    /// Whether the schema declares `key` at all.
    pub fn declares(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}

impl ConfigFieldSchema {
    fn check_value(&self, key: &str, value: &Value) -> PluginResult<()> {
        if !self.field_type.matches(value) {
            return Err(PluginError::ConfigValidation {
                key: key.to_string(),
                reason: format!("expected {}, got {}", self.field_type.name(), json_type(value)),
            });
        }

        if let Some(ref allowed) = self.allowed {
            if !allowed.contains(value) {
                return Err(PluginError::ConfigValidation {
                    key: key.to_string(),
                    reason: format!("{} is not one of the allowed values", value),
                });
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.minimum {
                if number < min {
                    return Err(PluginError::ConfigValidation {
                        key: key.to_string(),
                        reason: format!("{} is below the minimum {}", number, min),
                    });
                }
            }
            if let Some(max) = self.maximum {
                if number > max {
                    return Err(PluginError::ConfigValidation {
                        key: key.to_string(),
                        reason: format!("{} is above the maximum {}", number, max),
                    });
                }
            }
        }

        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> ConfigSchema {
        ConfigSchema::from_json(&json!({
            "properties": {
                "mode": {"type": "string", "default": "fast", "enum": ["fast", "safe"]},
                "retries": {"type": "integer", "default": 3, "minimum": 0, "maximum": 10},
                "verbose": {"type": "boolean"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_schema_parses_properties_map() {
        let schema = sample_schema();
        assert_eq!(schema.fields.len(), 3);
        assert!(schema.declares("mode"));
        assert_eq!(schema.default_for("retries"), Some(json!(3)));
        assert_eq!(schema.default_for("verbose"), None);
    }

    #[test]
    fn test_bare_field_map_accepted() {
        let schema = ConfigSchema::from_json(&json!({
            "level": {"type": "string"}
        }))
        .unwrap();
        assert!(schema.declares("level"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let schema = sample_schema();
        let err = schema.validate("retries", &json!("three")).unwrap_err();
        assert!(matches!(err, PluginError::ConfigValidation { .. }));
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_enum_membership_enforced() {
        let schema = sample_schema();
        assert!(schema.validate("mode", &json!("safe")).is_ok());
        assert!(schema.validate("mode", &json!("reckless")).is_err());
    }

    #[test]
    fn test_numeric_bounds_enforced() {
        let schema = sample_schema();
        assert!(schema.validate("retries", &json!(10)).is_ok());
        assert!(schema.validate("retries", &json!(11)).is_err());
        assert!(schema.validate("retries", &json!(-1)).is_err());
    }

    #[test]
    fn test_undeclared_key_rejected() {
        let schema = sample_schema();
        assert!(schema.validate("nonsense", &json!(1)).is_err());
    }

    #[test]
    fn test_default_must_satisfy_own_schema() {
        let result = ConfigSchema::from_json(&json!({
            "mode": {"type": "string", "default": 7}
        }));
        assert!(matches!(
            result,
            Err(PluginError::ManifestValidation { .. })
        ));
    }
}
