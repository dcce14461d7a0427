// 📐 Shape Layer - Schema Validation
// Validates incoming records and finished tools against the field registry

use crate::attributes::{AttributeRegistry, AttributeType, ValidationRule};
use crate::entities::Tool;
use crate::normalizer::is_slug;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>, context: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

const RECORD: &str = "Record";
const TOOL: &str = "Tool";

// ============================================================================
// SCHEMA VALIDATOR
// ============================================================================

pub struct SchemaValidator {
    registry: AttributeRegistry,
    patterns: HashMap<String, Regex>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        let registry = AttributeRegistry::new();

        let mut patterns = HashMap::new();
        for attr in registry.list_all() {
            for rule in &attr.validation_rules {
                if let ValidationRule::Pattern(pattern) = rule {
                    match Regex::new(pattern) {
                        Ok(re) => {
                            patterns.insert(pattern.clone(), re);
                        }
                        Err(e) => {
                            tracing::warn!(field = %attr.name, "Skipping invalid pattern: {}", e);
                        }
                    }
                }
            }
        }

        SchemaValidator { registry, patterns }
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    /// Check that every key of an incoming record is a known field and that
    /// its value has the right JSON shape for that field.
    pub fn validate_record(&self, record: &Map<String, Value>) -> ValidationResult {
        let mut errors = Vec::new();

        for (key, value) in record {
            let Some(attr) = self.registry.get(key) else {
                errors.push(ValidationError::new(key, "Unknown field", RECORD));
                continue;
            };

            let shape_ok = match attr.type_ {
                AttributeType::String | AttributeType::Text => {
                    value.is_string() || (value.is_null() && !attr.is_required())
                }
                AttributeType::Boolean => value.is_boolean(),
                AttributeType::DateTime => value.is_string(),
                AttributeType::StringList => match value {
                    Value::Null => true,
                    Value::Array(items) => items.iter().all(Value::is_string),
                    _ => false,
                },
                AttributeType::ObjectList => match value {
                    Value::Null => true,
                    Value::Array(items) => items.iter().all(is_url_alternate),
                    _ => false,
                },
            };

            if !shape_ok {
                errors.push(ValidationError::new(
                    key,
                    format!("Expected {}, got {}", describe(&attr.type_), json_kind(value)),
                    RECORD,
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate a finished tool against every declared field constraint.
    pub fn validate_tool(&self, tool: &Tool) -> ValidationResult {
        let mut errors = Vec::new();

        let snapshot = match tool.snapshot() {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(vec![ValidationError::new("record", "Tool is not serializable", TOOL)]);
            }
        };

        if !is_slug(&tool.name) {
            errors.push(ValidationError::new(
                "name",
                format!("'{}' is not a valid slug", tool.name),
                TOOL,
            ));
        }

        for attr in self.registry.list_all() {
            let value = snapshot.get(&attr.name).unwrap_or(&Value::Null);
            let text = value.as_str();

            for rule in &attr.validation_rules {
                match rule {
                    ValidationRule::Required | ValidationRule::NonEmpty => {
                        if text.map_or(true, |s| s.trim().is_empty()) {
                            errors.push(ValidationError::new(&attr.name, "Required field is empty", TOOL));
                        }
                    }
                    ValidationRule::MaxLength(max) => {
                        if let Some(s) = text {
                            let len = s.chars().count();
                            if len > *max {
                                errors.push(ValidationError::new(
                                    &attr.name,
                                    format!("Ensure this field has no more than {} characters (it has {})", max, len),
                                    TOOL,
                                ));
                            }
                        }
                    }
                    ValidationRule::Pattern(pattern) => {
                        if let (Some(s), Some(re)) = (text, self.patterns.get(pattern)) {
                            if !re.is_match(s) {
                                errors.push(ValidationError::new(
                                    &attr.name,
                                    format!("'{}' does not match {}", s, pattern),
                                    TOOL,
                                ));
                            }
                        }
                    }
                    ValidationRule::Choice(choices) => {
                        if let Some(s) = text {
                            if !choices.iter().any(|c| c == s) {
                                errors.push(ValidationError::new(
                                    &attr.name,
                                    format!("'{}' is not a valid choice", s),
                                    TOOL,
                                ));
                            }
                        }
                    }
                    ValidationRule::ArrayOrScalar | ValidationRule::ReadOnly => {}
                }
            }
        }

        // Required + NonEmpty both fire on an empty required field; report it once
        errors.dedup_by(|a, b| a.field == b.field && a.message == b.message);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn is_url_alternate(value: &Value) -> bool {
    value.as_object().map_or(false, |obj| {
        obj.len() == 2
            && obj.get("url").map_or(false, Value::is_string)
            && obj.get("language").map_or(false, Value::is_string)
    })
}

fn describe(type_: &AttributeType) -> &'static str {
    match type_ {
        AttributeType::String | AttributeType::Text => "a string",
        AttributeType::Boolean => "a boolean",
        AttributeType::StringList => "a list of strings",
        AttributeType::ObjectList => "a list of {url, language} objects",
        AttributeType::DateTime => "a timestamp string",
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
