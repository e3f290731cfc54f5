//! Declarative input schemas.
//!
//! A [`Schema`] is declared once per registry entry and serves two purposes:
//! validating raw JSON arguments before a handler runs, and exporting a JSON
//! Schema document for `tools/list` and friends.
//!
//! Validation collects one [`Violation`] per offending field path rather than
//! stopping at the first problem, fills in declared defaults, and strips object
//! keys the schema does not declare.

use std::fmt;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted path to the offending value (`items.0.id`), `(root)` for the top level.
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Joins violations into a single `path: message; path: message` string.
#[must_use]
pub fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Any,
    Array(Box<Schema>),
    Object(IndexMap<String, Field>),
}

impl SchemaType {
    const fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Any => "any",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

/// A named member of an object schema.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    schema: Schema,
    required: bool,
}

impl Field {
    /// A field that must be present (unless the schema declares a default).
    #[must_use]
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    /// A field that may be omitted.
    #[must_use]
    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Whether the field must be supplied.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }
}

/// A schema description with optional constraints.
#[derive(Debug, Clone)]
pub struct Schema {
    ty: SchemaType,
    description: Option<String>,
    default: Option<Value>,
    enum_values: Option<Vec<Value>>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    pattern: Option<Regex>,
    min_items: Option<usize>,
    max_items: Option<usize>,
}

impl Schema {
    const fn of(ty: SchemaType) -> Self {
        Self {
            ty,
            description: None,
            default: None,
            enum_values: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            pattern: None,
            min_items: None,
            max_items: None,
        }
    }

    /// A string.
    #[must_use]
    pub const fn string() -> Self {
        Self::of(SchemaType::String)
    }

    /// Any JSON number.
    #[must_use]
    pub const fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    /// A number without a fractional part.
    #[must_use]
    pub const fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    /// `true` or `false`.
    #[must_use]
    pub const fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    /// Any JSON value, unchecked.
    #[must_use]
    pub const fn any() -> Self {
        Self::of(SchemaType::Any)
    }

    /// An array whose elements match `items`.
    #[must_use]
    pub fn array(items: Self) -> Self {
        Self::of(SchemaType::Array(Box::new(items)))
    }

    /// An object with the given fields.
    #[must_use]
    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        let fields = fields
            .into_iter()
            .map(|field| (field.name.clone(), field))
            .collect();
        Self::of(SchemaType::Object(fields))
    }

    /// An object that takes no arguments.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::object([])
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Value used when an optional field is omitted.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Restricts the value to one of `values`.
    #[must_use]
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Minimum string length in characters.
    #[must_use]
    pub const fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Maximum string length in characters.
    #[must_use]
    pub const fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Inclusive lower bound for numbers.
    #[must_use]
    pub const fn min(mut self, value: f64) -> Self {
        self.minimum = Some(value);
        self
    }

    /// Inclusive upper bound for numbers.
    #[must_use]
    pub const fn max(mut self, value: f64) -> Self {
        self.maximum = Some(value);
        self
    }

    /// Requires strings to match a regular expression.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Minimum number of array elements.
    #[must_use]
    pub const fn min_items(mut self, count: usize) -> Self {
        self.min_items = Some(count);
        self
    }

    /// Maximum number of array elements.
    #[must_use]
    pub const fn max_items(mut self, count: usize) -> Self {
        self.max_items = Some(count);
        self
    }

    /// Description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Object fields in declaration order; empty for non-object schemas.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        let fields = match &self.ty {
            SchemaType::Object(fields) => Some(fields.values()),
            _ => None,
        };
        fields.into_iter().flatten()
    }

    /// Validates `value`, returning the normalised value on success.
    ///
    /// # Errors
    ///
    /// Returns every violation found, one per offending path.
    pub fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>> {
        let mut violations = Vec::new();
        let mut path = Vec::new();
        let normalised = self.check(value, &mut path, &mut violations);
        if violations.is_empty() {
            Ok(normalised)
        } else {
            Err(violations)
        }
    }

    fn check(&self, value: &Value, path: &mut Vec<String>, out: &mut Vec<Violation>) -> Value {
        let mut fail = |path: &[String], message: String| {
            out.push(Violation {
                path: if path.is_empty() {
                    "(root)".to_string()
                } else {
                    path.join(".")
                },
                message,
            });
        };

        let type_ok = match (&self.ty, value) {
            (SchemaType::Any, _)
            | (SchemaType::String, Value::String(_))
            | (SchemaType::Number, Value::Number(_))
            | (SchemaType::Boolean, Value::Bool(_))
            | (SchemaType::Array(_), Value::Array(_))
            | (SchemaType::Object(_), Value::Object(_)) => true,
            (SchemaType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        };
        if !type_ok {
            fail(
                path,
                format!("Expected {}, received {}", self.ty.name(), value_type(value)),
            );
            return value.clone();
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                let expected = allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" | ");
                fail(
                    path,
                    format!("Invalid enum value. Expected {expected}, received {value}"),
                );
                return value.clone();
            }
        }

        match (&self.ty, value) {
            (SchemaType::String, Value::String(s)) => {
                let len = s.chars().count();
                if let Some(min) = self.min_length.filter(|min| len < *min) {
                    fail(path, format!("String must contain at least {min} character(s)"));
                } else if let Some(max) = self.max_length.filter(|max| len > *max) {
                    fail(path, format!("String must contain at most {max} character(s)"));
                } else if let Some(re) = self.pattern.as_ref().filter(|re| !re.is_match(s)) {
                    fail(path, format!("String does not match pattern {}", re.as_str()));
                }
                value.clone()
            }
            (SchemaType::Number | SchemaType::Integer, Value::Number(number)) => {
                let n = number.as_f64().unwrap_or(f64::NAN);
                if let Some(min) = self.minimum.filter(|min| n < *min) {
                    fail(path, format!("Number must be greater than or equal to {min}"));
                } else if let Some(max) = self.maximum.filter(|max| n > *max) {
                    fail(path, format!("Number must be less than or equal to {max}"));
                }
                if matches!(self.ty, SchemaType::Integer) && number.is_f64() {
                    integral(n).unwrap_or_else(|| value.clone())
                } else {
                    value.clone()
                }
            }
            (SchemaType::Array(items), Value::Array(elements)) => {
                if let Some(min) = self.min_items.filter(|min| elements.len() < *min) {
                    fail(path, format!("Array must contain at least {min} element(s)"));
                } else if let Some(max) = self.max_items.filter(|max| elements.len() > *max) {
                    fail(path, format!("Array must contain at most {max} element(s)"));
                }
                let checked = elements
                    .iter()
                    .enumerate()
                    .map(|(i, element)| {
                        path.push(i.to_string());
                        let v = items.check(element, path, out);
                        path.pop();
                        v
                    })
                    .collect();
                Value::Array(checked)
            }
            (SchemaType::Object(fields), Value::Object(map)) => {
                let mut normalised = Map::new();
                for (name, field) in fields {
                    path.push(name.clone());
                    match map.get(name) {
                        Some(v) => {
                            normalised.insert(name.clone(), field.schema.check(v, path, out));
                        }
                        None => {
                            if let Some(default) = &field.schema.default {
                                normalised.insert(name.clone(), default.clone());
                            } else if field.required {
                                out.push(Violation {
                                    path: path.join("."),
                                    message: "Required".to_string(),
                                });
                            }
                        }
                    }
                    path.pop();
                }
                Value::Object(normalised)
            }
            _ => value.clone(),
        }
    }

    /// Exports this schema as a JSON Schema document.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut doc = Map::new();
        if !matches!(self.ty, SchemaType::Any) {
            doc.insert("type".into(), json!(self.ty.name()));
        }
        if let Some(description) = &self.description {
            doc.insert("description".into(), json!(description));
        }
        if let Some(default) = &self.default {
            doc.insert("default".into(), default.clone());
        }
        if let Some(values) = &self.enum_values {
            doc.insert("enum".into(), json!(values));
        }
        let optional = [
            ("minLength", self.min_length.map(|v| json!(v))),
            ("maxLength", self.max_length.map(|v| json!(v))),
            ("minimum", self.minimum.map(|v| json!(v))),
            ("maximum", self.maximum.map(|v| json!(v))),
            ("pattern", self.pattern.as_ref().map(|re| json!(re.as_str()))),
            ("minItems", self.min_items.map(|v| json!(v))),
            ("maxItems", self.max_items.map(|v| json!(v))),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                doc.insert(key.into(), value);
            }
        }

        match &self.ty {
            SchemaType::Array(items) => {
                doc.insert("items".into(), items.to_json_schema());
            }
            SchemaType::Object(fields) => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.schema.to_json_schema()))
                    .collect();
                let required: Vec<&str> = fields
                    .values()
                    .filter(|field| field.required && field.schema.default.is_none())
                    .map(|field| field.name.as_str())
                    .collect();
                doc.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    doc.insert("required".into(), json!(required));
                }
            }
            _ => {}
        }

        Value::Object(doc)
    }
}

const fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `2.0` becomes `2` so handlers can read integers with `as_u64`/`as_i64`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(n: f64) -> Option<Value> {
    (n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64).then(|| Value::from(n as i64))
}
