// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schema model and validation.
//!
//! This module implements the JSON-Schema subset used for tool input and
//! output contracts:
//!
//! - [`Schema`] - the schema model itself (serializable, built via fluent helpers)
//! - [`validate`] - validation and coercion of values against a schema
//!
//! Supported keywords: `type`, `properties`, `required`, `items`, `enum`,
//! `pattern`, `minimum`/`maximum`, `minLength`/`maxLength`, `default`,
//! `description`, and shallow `oneOf` unions.

pub mod validate;

pub use validate::{
    validate, validate_or_fail, SchemaViolation, Validation, ValidationCode, ValidationError,
    ValidationOptions, ValidationWarning,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primitive type of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl SchemaType {
    /// Display name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }

    /// Check whether a JSON value already has this type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Null => value.is_null(),
        }
    }
}

/// A schema node describing the expected shape of a JSON value.
///
/// Properties are kept in a `BTreeMap` so serialization is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,

    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "oneOf", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Schema>>,
}

impl Schema {
    /// Create a schema of the given type.
    pub fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Default::default()
        }
    }

    /// Create an object schema.
    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    /// Create a string schema.
    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    /// Create a number schema.
    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    /// Create a boolean schema.
    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    /// Create an array schema with the given item schema.
    pub fn array(items: Schema) -> Self {
        Self {
            schema_type: Some(SchemaType::Array),
            items: Some(Box::new(items)),
            ..Default::default()
        }
    }

    /// Create a shallow union schema.
    pub fn one_of(alternatives: Vec<Schema>) -> Self {
        Self {
            one_of: Some(alternatives),
            ..Default::default()
        }
    }

    /// Add a property to an object schema.
    pub fn with_property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), schema);
        self
    }

    /// Mark properties as required.
    pub fn with_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to an enumerated set of values.
    pub fn with_enum(mut self, values: Vec<serde_json::Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Require string values to match a regex pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set numeric bounds.
    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    /// Set string length bounds.
    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    /// Set a default value, filled in for missing optional fields.
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Set a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check whether the schema itself is well-formed.
    ///
    /// Returns the list of problems found; an empty list means the schema is
    /// usable. This is what the registry runs against `inputSchema` and
    /// `outputSchema` at registration time.
    pub fn check_well_formed(&self) -> Vec<String> {
        let mut issues = Vec::new();
        self.check_node("$", true, &mut issues);
        issues
    }

    fn check_node(&self, path: &str, allow_union: bool, issues: &mut Vec<String>) {
        if let Some(ref pattern) = self.pattern {
            if regex::Regex::new(pattern).is_err() {
                issues.push(format!("{path}: pattern is not a valid regex: {pattern}"));
            }
        }

        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                issues.push(format!("{path}: minimum {min} exceeds maximum {max}"));
            }
        }

        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                issues.push(format!("{path}: minLength {min} exceeds maxLength {max}"));
            }
        }

        if let Some(ref values) = self.enum_values {
            if values.is_empty() {
                issues.push(format!("{path}: enum must not be empty"));
            }
        }

        if let Some(ref required) = self.required {
            let empty = BTreeMap::new();
            let properties = self.properties.as_ref().unwrap_or(&empty);
            for name in required {
                if !properties.contains_key(name) {
                    issues.push(format!("{path}: required property '{name}' is not declared"));
                }
            }
        }

        if let Some(ref alternatives) = self.one_of {
            if !allow_union {
                issues.push(format!("{path}: oneOf must not be nested (shallow unions only)"));
            }
            if alternatives.is_empty() {
                issues.push(format!("{path}: oneOf must not be empty"));
            }
            for (i, alt) in alternatives.iter().enumerate() {
                alt.check_node(&format!("{path}.oneOf[{i}]"), false, issues);
            }
        }

        if let Some(ref properties) = self.properties {
            for (name, sub) in properties {
                sub.check_node(&format!("{path}.{name}"), allow_union, issues);
            }
        }

        if let Some(ref items) = self.items {
            items.check_node(&format!("{path}[]"), allow_union, issues);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let schema = Schema::object()
            .with_property("query", Schema::string().with_description("Search query"))
            .with_property("limit", Schema::number().with_range(Some(1.0), Some(100.0)))
            .with_required(["query"]);

        assert_eq!(schema.schema_type, Some(SchemaType::Object));
        assert_eq!(schema.properties.as_ref().unwrap().len(), 2);
        assert_eq!(schema.required.as_ref().unwrap(), &["query"]);
    }

    #[test]
    fn test_serialization_keywords() {
        let schema = Schema::string()
            .with_length(Some(1), Some(10))
            .with_default(serde_json::json!("hi"));
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["minLength"], 1);
        assert_eq!(json["maxLength"], 10);
        assert_eq!(json["default"], "hi");
    }

    #[test]
    fn test_well_formed_ok() {
        let schema = Schema::object()
            .with_property("name", Schema::string().with_pattern("^[a-z]+$"))
            .with_required(["name"]);
        assert!(schema.check_well_formed().is_empty());
    }

    #[test]
    fn test_well_formed_bad_pattern() {
        let schema = Schema::string().with_pattern("([unclosed");
        let issues = schema.check_well_formed();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("pattern"));
    }

    #[test]
    fn test_well_formed_inverted_bounds() {
        let schema = Schema::number().with_range(Some(10.0), Some(1.0));
        assert!(!schema.check_well_formed().is_empty());
    }

    #[test]
    fn test_well_formed_undeclared_required() {
        let schema = Schema::object().with_required(["missing"]);
        let issues = schema.check_well_formed();
        assert!(issues[0].contains("missing"));
    }

    #[test]
    fn test_well_formed_nested_one_of() {
        let inner = Schema::one_of(vec![Schema::string()]);
        let schema = Schema::one_of(vec![inner]);
        let issues = schema.check_well_formed();
        assert!(issues.iter().any(|i| i.contains("nested")));
    }
}
