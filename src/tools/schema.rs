//! Input and output validation against a tool's declared interface.
//!
//! Inputs and outputs are objects keyed by the declared field keys.
//! Undeclared keys are stripped, absent optional inputs take their
//! `defaultValue`, and the first mismatch is reported as
//! `"<path>: <message>"`.

use crate::tools::definition::{InputSpec, OutputSpec, ValueType, VersionEntry};
use serde_json::{Map, Value};
use std::fmt;

/// What went wrong at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// A required field is missing
    Required,
    /// A value has the wrong JSON type
    Expected {
        /// Declared type
        expected: String,
        /// Observed type
        received: &'static str,
    },
}

/// First schema mismatch found in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    path: Vec<String>,
    issue: Issue,
}

impl SchemaViolation {
    fn new(path: Vec<String>, issue: Issue) -> Self {
        Self { path, issue }
    }

    /// Dotted path of the offending value; empty for the payload itself.
    #[must_use]
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// The mismatch.
    #[must_use]
    pub fn issue(&self) -> &Issue {
        &self.issue
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match &self.issue {
            Issue::Required => "Required".to_string(),
            Issue::Expected { expected, received } => {
                format!("Expected {expected}, received {received}")
            }
        };
        if self.path.is_empty() {
            f.write_str(&message)
        } else {
            write!(f, "{}: {}", self.path(), message)
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// JSON type name of `value` as reported in violations.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn element_type(value_type: ValueType) -> Option<ValueType> {
    match value_type {
        ValueType::ArrayString => Some(ValueType::String),
        ValueType::ArrayNumber => Some(ValueType::Number),
        ValueType::ArrayBoolean => Some(ValueType::Boolean),
        ValueType::ArrayObject => Some(ValueType::Object),
        _ => None,
    }
}

fn check_value(value_type: ValueType, value: &Value, path: &[String]) -> Result<(), SchemaViolation> {
    let mismatch = || {
        SchemaViolation::new(
            path.to_vec(),
            Issue::Expected {
                expected: value_type.to_string(),
                received: type_name(value),
            },
        )
    };

    match value_type {
        ValueType::Any => Ok(()),
        ValueType::String if value.is_string() => Ok(()),
        ValueType::Number if value.is_number() => Ok(()),
        ValueType::Boolean if value.is_boolean() => Ok(()),
        ValueType::Object if value.is_object() => Ok(()),
        array_type => {
            let (Some(inner), Some(items)) = (element_type(array_type), value.as_array()) else {
                return Err(mismatch());
            };
            for (index, item) in items.iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(index.to_string());
                check_value(inner, item, &item_path)?;
            }
            Ok(())
        }
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, SchemaViolation> {
    payload.as_object().ok_or_else(|| {
        SchemaViolation::new(
            Vec::new(),
            Issue::Expected {
                expected: "object".to_string(),
                received: type_name(payload),
            },
        )
    })
}

/// Field contract shared by inputs and outputs.
trait FieldSpec {
    fn key(&self) -> &str;
    fn value_type(&self) -> ValueType;
    fn required(&self) -> bool;
    fn default_value(&self) -> Option<&Value> {
        None
    }
}

impl FieldSpec for InputSpec {
    fn key(&self) -> &str {
        &self.key
    }
    fn value_type(&self) -> ValueType {
        self.value_type
    }
    fn required(&self) -> bool {
        self.required
    }
    fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }
}

impl FieldSpec for OutputSpec {
    fn key(&self) -> &str {
        &self.key
    }
    fn value_type(&self) -> ValueType {
        self.value_type
    }
    fn required(&self) -> bool {
        self.required
    }
}

fn validate_fields<F: FieldSpec>(fields: &[F], payload: &Value) -> Result<Value, SchemaViolation> {
    let object = as_object(payload)?;
    let mut parsed = Map::with_capacity(fields.len());

    for field in fields {
        let path = vec![field.key().to_string()];
        // Null on an optional field counts as absent.
        let value = object
            .get(field.key())
            .filter(|v| field.required() || !v.is_null());
        match (value, field.default_value()) {
            (Some(value), _) => {
                check_value(field.value_type(), value, &path)?;
                parsed.insert(field.key().to_string(), value.clone());
            }
            (None, _) if field.required() => {
                return Err(SchemaViolation::new(path, Issue::Required));
            }
            (None, Some(default)) => {
                parsed.insert(field.key().to_string(), default.clone());
            }
            (None, None) => {}
        }
    }

    Ok(Value::Object(parsed))
}

/// Validates raw inputs, returning the normalized input object.
///
/// # Errors
///
/// Returns the first violation, in declaration order.
pub fn validate_input(version: &VersionEntry, input: &Value) -> Result<Value, SchemaViolation> {
    let empty = Value::Object(Map::new());
    let input = if input.is_null() { &empty } else { input };
    validate_fields(&version.inputs, input)
}

/// Validates a handler's output.
///
/// A version declaring no outputs accepts any value unchanged.
///
/// # Errors
///
/// Returns the first violation, in declaration order.
pub fn validate_output(version: &VersionEntry, output: &Value) -> Result<Value, SchemaViolation> {
    if version.outputs.is_empty() {
        return Ok(output.clone());
    }
    validate_fields(&version.outputs, output)
}
