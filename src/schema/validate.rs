// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Value validation and coercion.
//!
//! [`validate`] checks a JSON value against a [`Schema`] and returns a
//! [`Validation`] carrying the (possibly coerced) value, errors, and
//! coercion warnings. It never panics and never returns `Err`; callers that
//! want error propagation use [`validate_or_fail`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{Schema, SchemaType};

/// Error codes attached to individual validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    RequiredField,
    TypeError,
    MinLength,
    MaxLength,
    PatternMismatch,
    EnumMismatch,
    MinValue,
    MaxValue,
    InvalidSchema,
    ValidationError,
}

impl ValidationCode {
    /// Stable wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiredField => "REQUIRED_FIELD",
            Self::TypeError => "TYPE_ERROR",
            Self::MinLength => "MIN_LENGTH",
            Self::MaxLength => "MAX_LENGTH",
            Self::PatternMismatch => "PATTERN_MISMATCH",
            Self::EnumMismatch => "ENUM_MISMATCH",
            Self::MinValue => "MIN_VALUE",
            Self::MaxValue => "MAX_VALUE",
            Self::InvalidSchema => "INVALID_SCHEMA",
            Self::ValidationError => "VALIDATION_ERROR",
        }
    }
}

/// A single validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    /// Path to the offending value, e.g. `$.items[2].name`.
    pub path: String,
    /// Human-readable description.
    pub message: String,
    /// Machine-readable code.
    pub code: ValidationCode,
    /// The offending value, when it is cheap to carry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ValidationError {
    fn new(path: &str, code: ValidationCode, message: impl Into<String>, value: Option<&Value>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            code,
            value: value.cloned(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.code.as_str(), self.path, self.message)
    }
}

/// A coercion that was applied in non-strict mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

/// Options controlling validation behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// In strict mode, coercions and unexpected object properties are errors.
    pub strict: bool,
}

impl ValidationOptions {
    /// Strict validation: no coercions, no extra properties.
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

/// Result of validating a value against a schema.
#[derive(Debug, Clone)]
pub struct Validation {
    /// The validated value, with coercions and defaults applied.
    pub value: Value,
    /// Validation errors; empty means the value is acceptable.
    pub errors: Vec<ValidationError>,
    /// Coercions applied in non-strict mode.
    pub warnings: Vec<ValidationWarning>,
}

impl Validation {
    /// Check whether validation succeeded.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a `Result`, discarding warnings.
    pub fn into_result(self) -> Result<Value, SchemaViolation> {
        if self.errors.is_empty() {
            Ok(self.value)
        } else {
            Err(SchemaViolation { errors: self.errors })
        }
    }
}

/// Error carrying the full list of validation failures.
#[derive(Debug, Clone, Error)]
#[error("validation failed with {} error(s): {}", errors.len(), summarize(errors))]
pub struct SchemaViolation {
    pub errors: Vec<ValidationError>,
}

impl SchemaViolation {
    /// Stable error code for the taxonomy.
    pub fn code(&self) -> &'static str {
        "VALIDATION_FAILED"
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .take(3)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a value against a schema.
pub fn validate(value: &Value, schema: &Schema, options: ValidationOptions) -> Validation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let coerced = validate_node(value.clone(), schema, "$", options, &mut errors, &mut warnings);
    Validation {
        value: coerced,
        errors,
        warnings,
    }
}

/// Validate and return the coerced value, or the full error list.
pub fn validate_or_fail(
    value: &Value,
    schema: &Schema,
    options: ValidationOptions,
) -> Result<Value, SchemaViolation> {
    validate(value, schema, options).into_result()
}

fn validate_node(
    value: Value,
    schema: &Schema,
    path: &str,
    options: ValidationOptions,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    // Shallow unions: first alternative that validates cleanly wins.
    if let Some(ref alternatives) = schema.one_of {
        for alt in alternatives {
            let mut alt_errors = Vec::new();
            let mut alt_warnings = Vec::new();
            let coerced = validate_node(
                value.clone(),
                alt,
                path,
                options,
                &mut alt_errors,
                &mut alt_warnings,
            );
            if alt_errors.is_empty() {
                warnings.extend(alt_warnings);
                return coerced;
            }
        }
        errors.push(ValidationError::new(
            path,
            ValidationCode::ValidationError,
            "value does not match any oneOf alternative",
            Some(&value),
        ));
        return value;
    }

    let value = match schema.schema_type {
        Some(SchemaType::Object) => validate_object(value, schema, path, options, errors, warnings),
        Some(SchemaType::Array) => validate_array(value, schema, path, options, errors, warnings),
        Some(SchemaType::String) => validate_string(value, schema, path, errors),
        Some(SchemaType::Number) => validate_number(value, schema, path, options, errors, warnings),
        Some(SchemaType::Boolean) => validate_boolean(value, path, options, errors, warnings),
        Some(SchemaType::Null) => {
            if !value.is_null() {
                errors.push(ValidationError::new(
                    path,
                    ValidationCode::TypeError,
                    "expected null",
                    Some(&value),
                ));
            }
            value
        }
        // Untyped schema node: accept any shape.
        None => value,
    };

    if let Some(ref allowed) = schema.enum_values {
        if !allowed.contains(&value) {
            errors.push(ValidationError::new(
                path,
                ValidationCode::EnumMismatch,
                format!("value is not one of the {} allowed values", allowed.len()),
                Some(&value),
            ));
        }
    }

    value
}

fn validate_object(
    value: Value,
    schema: &Schema,
    path: &str,
    options: ValidationOptions,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    let value = match value {
        Value::Object(_) => value,
        Value::String(ref s) if !options.strict => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => {
                warnings.push(ValidationWarning {
                    path: path.to_string(),
                    message: "coerced JSON string to object".to_string(),
                });
                parsed
            }
            _ => {
                errors.push(ValidationError::new(
                    path,
                    ValidationCode::TypeError,
                    "expected object",
                    Some(&value),
                ));
                return value;
            }
        },
        other => {
            errors.push(ValidationError::new(
                path,
                ValidationCode::TypeError,
                "expected object",
                Some(&other),
            ));
            return other;
        }
    };

    let mut map = match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    };

    let empty = std::collections::BTreeMap::new();
    let properties = schema.properties.as_ref().unwrap_or(&empty);
    let required: &[String] = schema.required.as_deref().unwrap_or(&[]);

    for name in required {
        if !map.contains_key(name) {
            errors.push(ValidationError::new(
                &format!("{path}.{name}"),
                ValidationCode::RequiredField,
                format!("missing required field '{name}'"),
                None,
            ));
        }
    }

    for (name, sub) in properties {
        let sub_path = format!("{path}.{name}");
        match map.remove(name) {
            Some(present) => {
                let coerced = validate_node(present, sub, &sub_path, options, errors, warnings);
                map.insert(name.clone(), coerced);
            }
            None => {
                // Missing optional field with a default: fill it in.
                if let Some(ref default) = sub.default_value {
                    if !required.contains(name) {
                        map.insert(name.clone(), default.clone());
                    }
                }
            }
        }
    }

    if options.strict {
        for name in map.keys() {
            if !properties.contains_key(name) {
                errors.push(ValidationError::new(
                    &format!("{path}.{name}"),
                    ValidationCode::ValidationError,
                    format!("unexpected property '{name}'"),
                    None,
                ));
            }
        }
    }

    Value::Object(map)
}

fn validate_array(
    value: Value,
    schema: &Schema,
    path: &str,
    options: ValidationOptions,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    let value = match value {
        Value::Array(_) => value,
        Value::String(ref s) if !options.strict => {
            // Prefer JSON parsing; fall back to wrapping the scalar.
            match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) => {
                    warnings.push(ValidationWarning {
                        path: path.to_string(),
                        message: "coerced JSON string to array".to_string(),
                    });
                    parsed
                }
                _ => {
                    warnings.push(ValidationWarning {
                        path: path.to_string(),
                        message: "wrapped scalar into single-element array".to_string(),
                    });
                    Value::Array(vec![value])
                }
            }
        }
        Value::Object(_) => {
            errors.push(ValidationError::new(
                path,
                ValidationCode::TypeError,
                "expected array",
                Some(&value),
            ));
            return value;
        }
        scalar if !options.strict => {
            warnings.push(ValidationWarning {
                path: path.to_string(),
                message: "wrapped scalar into single-element array".to_string(),
            });
            Value::Array(vec![scalar])
        }
        other => {
            errors.push(ValidationError::new(
                path,
                ValidationCode::TypeError,
                "expected array",
                Some(&other),
            ));
            return other;
        }
    };

    let items = match value {
        Value::Array(items) => items,
        _ => unreachable!(),
    };

    let coerced = match schema.items {
        Some(ref item_schema) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                validate_node(
                    item,
                    item_schema,
                    &format!("{path}[{i}]"),
                    options,
                    errors,
                    warnings,
                )
            })
            .collect(),
        None => items,
    };

    Value::Array(coerced)
}

fn validate_string(
    value: Value,
    schema: &Schema,
    path: &str,
    errors: &mut Vec<ValidationError>,
) -> Value {
    let s = match value {
        Value::String(ref s) => s.clone(),
        other => {
            errors.push(ValidationError::new(
                path,
                ValidationCode::TypeError,
                "expected string",
                Some(&other),
            ));
            return other;
        }
    };

    let length = s.chars().count();
    if let Some(min) = schema.min_length {
        if length < min {
            errors.push(ValidationError::new(
                path,
                ValidationCode::MinLength,
                format!("length {length} is below minimum {min}"),
                Some(&value),
            ));
        }
    }
    if let Some(max) = schema.max_length {
        if length > max {
            errors.push(ValidationError::new(
                path,
                ValidationCode::MaxLength,
                format!("length {length} exceeds maximum {max}"),
                Some(&value),
            ));
        }
    }

    if let Some(ref pattern) = schema.pattern {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&s) {
                    errors.push(ValidationError::new(
                        path,
                        ValidationCode::PatternMismatch,
                        format!("value does not match pattern {pattern}"),
                        Some(&value),
                    ));
                }
            }
            Err(_) => {
                errors.push(ValidationError::new(
                    path,
                    ValidationCode::InvalidSchema,
                    format!("schema pattern is not a valid regex: {pattern}"),
                    None,
                ));
            }
        }
    }

    value
}

fn validate_number(
    value: Value,
    schema: &Schema,
    path: &str,
    options: ValidationOptions,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    let (value, number) = match value {
        Value::Number(ref n) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            (value, f)
        }
        Value::String(ref s) if !options.strict => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => {
                warnings.push(ValidationWarning {
                    path: path.to_string(),
                    message: format!("coerced string \"{s}\" to number"),
                });
                let coerced = serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                (coerced, f)
            }
            _ => {
                errors.push(ValidationError::new(
                    path,
                    ValidationCode::TypeError,
                    "expected number",
                    Some(&value),
                ));
                return value;
            }
        },
        other => {
            errors.push(ValidationError::new(
                path,
                ValidationCode::TypeError,
                "expected number",
                Some(&other),
            ));
            return other;
        }
    };

    if let Some(min) = schema.minimum {
        if number < min {
            errors.push(ValidationError::new(
                path,
                ValidationCode::MinValue,
                format!("{number} is below minimum {min}"),
                Some(&value),
            ));
        }
    }
    if let Some(max) = schema.maximum {
        if number > max {
            errors.push(ValidationError::new(
                path,
                ValidationCode::MaxValue,
                format!("{number} exceeds maximum {max}"),
                Some(&value),
            ));
        }
    }

    value
}

fn validate_boolean(
    value: Value,
    path: &str,
    options: ValidationOptions,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    match value {
        Value::Bool(_) => value,
        Value::String(ref s) if !options.strict => {
            let lowered = s.trim().to_lowercase();
            let coerced = match lowered.as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            };
            match coerced {
                Some(b) => {
                    warnings.push(ValidationWarning {
                        path: path.to_string(),
                        message: format!("coerced string \"{s}\" to boolean"),
                    });
                    Value::Bool(b)
                }
                None => {
                    errors.push(ValidationError::new(
                        path,
                        ValidationCode::TypeError,
                        "expected boolean",
                        Some(&value),
                    ));
                    value
                }
            }
        }
        other => {
            errors.push(ValidationError::new(
                path,
                ValidationCode::TypeError,
                "expected boolean",
                Some(&other),
            ));
            other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Schema {
        Schema::object()
            .with_property("query", Schema::string().with_length(Some(1), Some(100)))
            .with_property("limit", Schema::number().with_range(Some(1.0), Some(50.0)))
            .with_property("fuzzy", Schema::boolean().with_default(json!(false)))
            .with_required(["query"])
    }

    #[test]
    fn test_valid_object() {
        let result = validate(
            &json!({"query": "rust", "limit": 10}),
            &search_schema(),
            ValidationOptions::default(),
        );
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
        // Default fills in for missing optional field.
        assert_eq!(result.value["fuzzy"], json!(false));
    }

    #[test]
    fn test_missing_required() {
        let result = validate(&json!({}), &search_schema(), ValidationOptions::default());
        assert!(!result.is_ok());
        assert_eq!(result.errors[0].code, ValidationCode::RequiredField);
        assert_eq!(result.errors[0].path, "$.query");
    }

    #[test]
    fn test_string_to_number_coercion() {
        let result = validate(
            &json!({"query": "rust", "limit": "25"}),
            &search_schema(),
            ValidationOptions::default(),
        );
        assert!(result.is_ok());
        assert_eq!(result.value["limit"], json!(25.0));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_string_to_number_rejects_nonfinite() {
        let result = validate(
            &json!("not a number"),
            &Schema::number(),
            ValidationOptions::default(),
        );
        assert!(!result.is_ok());
        assert_eq!(result.errors[0].code, ValidationCode::TypeError);
    }

    #[test]
    fn test_string_to_boolean_coercion() {
        for (input, expected) in [("YES", true), ("off", false), ("1", true), ("No", false)] {
            let result = validate(
                &json!(input),
                &Schema::boolean(),
                ValidationOptions::default(),
            );
            assert!(result.is_ok(), "input {input:?}");
            assert_eq!(result.value, json!(expected));
            assert_eq!(result.warnings.len(), 1);
        }
    }

    #[test]
    fn test_scalar_to_array_coercion() {
        let result = validate(
            &json!(5),
            &Schema::array(Schema::number()),
            ValidationOptions::default(),
        );
        assert!(result.is_ok());
        assert_eq!(result.value, json!([5]));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_json_string_to_array_coercion() {
        let result = validate(
            &json!("[1, 2, 3]"),
            &Schema::array(Schema::number()),
            ValidationOptions::default(),
        );
        assert!(result.is_ok());
        assert_eq!(result.value, json!([1, 2, 3]));
    }

    #[test]
    fn test_json_string_to_object_coercion() {
        let result = validate(
            &json!(r#"{"query": "rust"}"#),
            &search_schema(),
            ValidationOptions::default(),
        );
        assert!(result.is_ok());
        assert_eq!(result.value["query"], json!("rust"));
    }

    #[test]
    fn test_strict_mode_rejects_coercion() {
        let result = validate(&json!("25"), &Schema::number(), ValidationOptions::strict());
        assert!(!result.is_ok());
    }

    #[test]
    fn test_strict_mode_rejects_extra_properties() {
        let result = validate(
            &json!({"query": "rust", "surprise": 1}),
            &search_schema(),
            ValidationOptions::strict(),
        );
        assert!(!result.is_ok());
        assert!(result.errors[0].message.contains("surprise"));
    }

    #[test]
    fn test_extra_properties_pass_through_lenient() {
        let result = validate(
            &json!({"query": "rust", "surprise": 1}),
            &search_schema(),
            ValidationOptions::default(),
        );
        assert!(result.is_ok());
        assert_eq!(result.value["surprise"], json!(1));
    }

    #[test]
    fn test_bounds() {
        let result = validate(
            &json!({"query": "", "limit": 500}),
            &search_schema(),
            ValidationOptions::default(),
        );
        let codes: Vec<_> = result.errors.iter().map(|e| e.code).collect();
        assert!(codes.contains(&ValidationCode::MinLength));
        assert!(codes.contains(&ValidationCode::MaxValue));
    }

    #[test]
    fn test_pattern() {
        let schema = Schema::string().with_pattern("^[a-z]+$");
        let ok = validate(&json!("abc"), &schema, ValidationOptions::default());
        assert!(ok.is_ok());
        let bad = validate(&json!("ABC"), &schema, ValidationOptions::default());
        assert_eq!(bad.errors[0].code, ValidationCode::PatternMismatch);
    }

    #[test]
    fn test_enum() {
        let schema = Schema::string().with_enum(vec![json!("store"), json!("recall")]);
        let bad = validate(&json!("erase"), &schema, ValidationOptions::default());
        assert_eq!(bad.errors[0].code, ValidationCode::EnumMismatch);
    }

    #[test]
    fn test_one_of() {
        let schema = Schema::one_of(vec![Schema::string(), Schema::number()]);
        assert!(validate(&json!("x"), &schema, ValidationOptions::strict()).is_ok());
        assert!(validate(&json!(1), &schema, ValidationOptions::strict()).is_ok());
        let bad = validate(&json!({}), &schema, ValidationOptions::strict());
        assert!(!bad.is_ok());
    }

    #[test]
    fn test_null_type() {
        assert!(validate(&json!(null), &Schema::of(SchemaType::Null), ValidationOptions::default()).is_ok());
        assert!(!validate(&json!(0), &Schema::of(SchemaType::Null), ValidationOptions::default()).is_ok());
    }

    #[test]
    fn test_validate_or_fail() {
        let err = validate_or_fail(&json!({}), &search_schema(), ValidationOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert!(!err.errors.is_empty());
    }

    // Re-validating a coerced value must be clean: no errors, no further coercions.
    #[test]
    fn test_coercion_round_trip() {
        let schema = search_schema();
        let first = validate(
            &json!({"query": "rust", "limit": "25", "fuzzy": "yes"}),
            &schema,
            ValidationOptions::default(),
        );
        assert!(first.is_ok());
        assert!(!first.warnings.is_empty());

        let second = validate(&first.value, &schema, ValidationOptions::default());
        assert!(second.is_ok());
        assert!(second.warnings.is_empty());
        assert_eq!(second.value, first.value);
    }
}
