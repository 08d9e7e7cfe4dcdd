// Tool input schemas as data, and the validator that applies them

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// JSON value types a property may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
        }
    }

    /// Check whether a JSON value is of this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => true,
                Value::Number(n) => n.as_f64().is_some_and(|f| f.fract() == 0.0),
                _ => false,
            },
            ValueType::Boolean => value.is_boolean(),
            ValueType::Object => value.is_object(),
            ValueType::Array => value.is_array(),
        }
    }
}

/// Schema of a single argument property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertySchema {
    pub fn new(value_type: ValueType, description: &str) -> Self {
        Self {
            value_type,
            description: Some(description.to_string()),
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            allowed: None,
            default: None,
        }
    }

    pub fn string(description: &str) -> Self {
        Self::new(ValueType::String, description)
    }

    pub fn integer(description: &str) -> Self {
        Self::new(ValueType::Integer, description)
    }

    pub fn number(description: &str) -> Self {
        Self::new(ValueType::Number, description)
    }

    pub fn boolean(description: &str) -> Self {
        Self::new(ValueType::Boolean, description)
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn one_of(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Check a present value against type, bounds and enum, in that order
    fn check_value(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        self.check_type(field, value)?;
        self.check_bounds(field, value)?;
        self.check_enum(field, value)
    }

    fn check_type(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        if !self.value_type.matches(value) {
            return Err(ValidationError::new(
                field,
                format!("must be of type {}", self.value_type.as_str()),
            ));
        }
        Ok(())
    }

    /// Numeric range and string length
    fn check_bounds(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(ValidationError::new(field, format!("must be >= {}", min)));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(ValidationError::new(field, format!("must be <= {}", max)));
                }
            }
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(ValidationError::new(
                        field,
                        format!("must be at least {} characters", min),
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(ValidationError::new(
                        field,
                        format!("must be at most {} characters", max),
                    ));
                }
            }
        }

        Ok(())
    }

    fn check_enum(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(ValidationError::new(field, "must be one of the allowed values"));
            }
        }

        Ok(())
    }
}

/// Object schema describing a tool's accepted arguments.
///
/// Serializes as a JSON Schema object so it can be returned verbatim from
/// `list_tools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default = "default_additional_properties")]
    pub additional_properties: bool,
}

fn default_additional_properties() -> bool {
    true
}

impl InputSchema {
    /// Object schema with no properties that rejects unknown arguments
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }

    pub fn property(mut self, name: &str, schema: PropertySchema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn required_property(mut self, name: &str, schema: PropertySchema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self.required.push(name.to_string());
        self
    }

    pub fn allow_additional(mut self) -> Self {
        self.additional_properties = true;
        self
    }

    /// Verify the schema is self-consistent
    pub fn check(&self) -> Result<(), SchemaError> {
        if self.schema_type != "object" {
            return Err(SchemaError::NotObject(self.schema_type.clone()));
        }

        for name in &self.required {
            if !self.properties.contains_key(name) {
                return Err(SchemaError::RequiredNotDeclared(name.clone()));
            }
        }

        for (name, prop) in &self.properties {
            if let (Some(min), Some(max)) = (prop.minimum, prop.maximum) {
                if min > max {
                    return Err(SchemaError::InvalidBounds(name.clone()));
                }
            }
            if let (Some(min), Some(max)) = (prop.min_length, prop.max_length) {
                if min > max {
                    return Err(SchemaError::InvalidBounds(name.clone()));
                }
            }
            if let Some(allowed) = &prop.allowed {
                if allowed.is_empty() || allowed.iter().any(|v| !prop.value_type.matches(v)) {
                    return Err(SchemaError::InvalidEnum(name.clone()));
                }
            }
            if let Some(default) = &prop.default {
                prop.check_value(name, default)
                    .map_err(|_| SchemaError::InvalidDefault(name.clone()))?;
            }
        }

        Ok(())
    }

    /// Validate arguments and return them with defaults filled in.
    ///
    /// Checks run in phases: required, unknown, types, bounds, enums. Stops at
    /// the first violation.
    pub fn validate(&self, mut arguments: Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        for name in &self.required {
            if !arguments.contains_key(name) {
                return Err(ValidationError::new(name, "is required"));
            }
        }

        if !self.additional_properties {
            if let Some(unknown) = arguments.keys().find(|k| !self.properties.contains_key(*k)) {
                return Err(ValidationError::new(unknown, "is not recognized"));
            }
        }

        // Every property's type is checked before any bound or enum
        let phases: [fn(&PropertySchema, &str, &Value) -> Result<(), ValidationError>; 3] = [
            PropertySchema::check_type,
            PropertySchema::check_bounds,
            PropertySchema::check_enum,
        ];
        for phase in phases {
            for (name, prop) in &self.properties {
                if let Some(value) = arguments.get(name) {
                    phase(prop, name.as_str(), value)?;
                }
            }
        }

        for (name, prop) in &self.properties {
            if let Some(default) = &prop.default {
                if !arguments.contains_key(name) {
                    arguments.insert(name.clone(), default.clone());
                }
            }
        }

        Ok(arguments)
    }
}

/// First violation found while validating arguments
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A descriptor whose schema contradicts itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema type must be \"object\", got \"{0}\"")]
    NotObject(String),

    #[error("required property '{0}' is not declared")]
    RequiredNotDeclared(String),

    #[error("property '{0}' has a lower bound above its upper bound")]
    InvalidBounds(String),

    #[error("property '{0}' has an empty or mistyped enum")]
    InvalidEnum(String),

    #[error("default for property '{0}' violates its own constraints")]
    InvalidDefault(String),
}
