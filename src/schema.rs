//! Input schemas and the structural validator.
//!
//! Schemas are plain data: a tree of [`FieldSchema`] nodes interpreted by
//! [`validate`]. The same tree renders to a JSON Schema object for
//! `tools/list`, so the advertised shape and the enforced shape never drift.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Tool arguments as received on the wire.
pub type Arguments = Map<String, Value>;

/// Kind of a scalar value, used for array items and free-form map values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Null,
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }

    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Null, Value::Null)
        )
    }
}

/// Declared type of a field, with the constraints that apply to that type.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String,
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Boolean,
    Object {
        properties: Vec<FieldSchema>,
        /// Kind every undeclared value must have, for free-form maps.
        values: Option<ValueKind>,
    },
    Array {
        /// Allowed item kinds; empty means any item.
        items: Vec<ValueKind>,
    },
}

impl SchemaNode {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number { .. } => "number",
            Self::Boolean => "boolean",
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
        }
    }

    fn accepts_type(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number { .. }, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Object { .. }, Value::Object(_))
                | (Self::Array { .. }, Value::Array(_))
        )
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub node: SchemaNode,
    pub required: bool,
    /// When set, membership replaces the type check.
    pub allowed: Option<Vec<Value>>,
}

impl FieldSchema {
    fn new(name: &'static str, description: &'static str, node: SchemaNode) -> Self {
        Self {
            name,
            description,
            node,
            required: false,
            allowed: None,
        }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, SchemaNode::String)
    }

    pub fn number(name: &'static str, description: &'static str) -> Self {
        Self::new(
            name,
            description,
            SchemaNode::Number {
                minimum: None,
                maximum: None,
            },
        )
    }

    pub fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, SchemaNode::Boolean)
    }

    pub fn object(name: &'static str, description: &'static str) -> Self {
        Self::new(
            name,
            description,
            SchemaNode::Object {
                properties: Vec::new(),
                values: None,
            },
        )
    }

    pub fn array(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, SchemaNode::Array { items: Vec::new() })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Inclusive numeric bounds. No-op on non-numeric fields.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        if let SchemaNode::Number { minimum, maximum } = &mut self.node {
            *minimum = Some(min);
            *maximum = Some(max);
        }
        self
    }

    pub fn one_of(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    pub fn items(mut self, kinds: &[ValueKind]) -> Self {
        if let SchemaNode::Array { items } = &mut self.node {
            *items = kinds.to_vec();
        }
        self
    }

    pub fn values(mut self, kind: ValueKind) -> Self {
        if let SchemaNode::Object { values, .. } = &mut self.node {
            *values = Some(kind);
        }
        self
    }

    pub fn property(mut self, field: FieldSchema) -> Self {
        if let SchemaNode::Object { properties, .. } = &mut self.node {
            properties.push(field);
        }
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.node.type_name()));
        if !self.description.is_empty() {
            out.insert("description".into(), json!(self.description));
        }
        if let Some(allowed) = &self.allowed {
            out.insert("enum".into(), Value::Array(allowed.clone()));
        }
        match &self.node {
            SchemaNode::Number { minimum, maximum } => {
                if let Some(min) = minimum {
                    out.insert("minimum".into(), json!(min));
                }
                if let Some(max) = maximum {
                    out.insert("maximum".into(), json!(max));
                }
            }
            SchemaNode::Object { properties, values } => {
                if !properties.is_empty() {
                    let (props, required) = properties_to_json(properties);
                    out.insert("properties".into(), props);
                    if !required.is_empty() {
                        out.insert("required".into(), json!(required));
                    }
                }
                if let Some(kind) = values {
                    out.insert("additionalProperties".into(), json!({ "type": kind.name() }));
                }
            }
            SchemaNode::Array { items } => match items.as_slice() {
                [] => {}
                [single] => {
                    out.insert("items".into(), json!({ "type": single.name() }));
                }
                many => {
                    let names: Vec<&str> = many.iter().map(|kind| kind.name()).collect();
                    out.insert("items".into(), json!({ "type": names }));
                }
            },
            SchemaNode::String | SchemaNode::Boolean => {}
        }
        Value::Object(out)
    }
}

fn properties_to_json(fields: &[FieldSchema]) -> (Value, Vec<&'static str>) {
    let mut props = Map::new();
    let mut required = Vec::new();
    for field in fields {
        props.insert(field.name.to_string(), field.to_json_schema());
        if field.required {
            required.push(field.name);
        }
    }
    (Value::Object(props), required)
}

/// Top-level input schema of an operation: always an object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    fields: Vec<FieldSchema>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Names of required fields in declaration order.
    pub fn required_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name)
            .collect()
    }

    /// Render as a JSON Schema object, the shape advertised by `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        let (props, required) = properties_to_json(&self.fields);
        let mut out = Map::new();
        out.insert("type".into(), json!("object"));
        out.insert("properties".into(), props);
        if !required.is_empty() {
            out.insert("required".into(), json!(required));
        }
        Value::Object(out)
    }
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate `arguments` against `schema`. An empty result means valid.
///
/// Absent arguments (`null`) are treated as an empty object. Undeclared keys
/// are ignored. Nothing is coerced.
pub fn validate(schema: &InputSchema, arguments: &Value) -> Vec<FieldError> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return vec![FieldError::new(
                "arguments",
                format!("expected object, found {}", json_type_name(other)),
            )]
        }
    };

    let mut errors = Vec::new();
    validate_fields(&schema.fields, args, "", &mut errors);
    errors
}

fn validate_fields(fields: &[FieldSchema], args: &Arguments, prefix: &str, errors: &mut Vec<FieldError>) {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };
        match args.get(field.name) {
            None => {
                if field.required {
                    errors.push(FieldError::new(path, "missing required field"));
                }
            }
            Some(value) => validate_value(field, value, &path, errors),
        }
    }
}

fn validate_value(field: &FieldSchema, value: &Value, path: &str, errors: &mut Vec<FieldError>) {
    if let Some(allowed) = &field.allowed {
        if !allowed.contains(value) {
            let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
            errors.push(FieldError::new(
                path,
                format!("value must be one of [{}]", listed.join(", ")),
            ));
        }
        return;
    }

    if !field.node.accepts_type(value) {
        errors.push(FieldError::new(
            path,
            format!(
                "expected {}, found {}",
                field.node.type_name(),
                json_type_name(value)
            ),
        ));
        return;
    }

    match (&field.node, value) {
        (SchemaNode::Number { minimum, maximum }, Value::Number(number)) => {
            let Some(n) = number.as_f64() else { return };
            if let Some(min) = minimum {
                if n < *min {
                    errors.push(FieldError::new(path, format!("value {n} is below minimum {min}")));
                }
            }
            if let Some(max) = maximum {
                if n > *max {
                    errors.push(FieldError::new(path, format!("value {n} is above maximum {max}")));
                }
            }
        }
        (SchemaNode::Array { items }, Value::Array(values)) if !items.is_empty() => {
            for (index, item) in values.iter().enumerate() {
                if !items.iter().any(|kind| kind.matches(item)) {
                    let names: Vec<&str> = items.iter().map(|kind| kind.name()).collect();
                    errors.push(FieldError::new(
                        format!("{path}[{index}]"),
                        format!(
                            "expected one of {}, found {}",
                            names.join(", "),
                            json_type_name(item)
                        ),
                    ));
                }
            }
        }
        (SchemaNode::Object { properties, values }, Value::Object(map)) => {
            validate_fields(properties, map, path, errors);
            if let Some(kind) = values {
                for (key, entry) in map {
                    if properties.iter().any(|prop| prop.name == key.as_str()) {
                        continue;
                    }
                    if !kind.matches(entry) {
                        errors.push(FieldError::new(
                            format!("{path}.{key}"),
                            format!("expected {}, found {}", kind.name(), json_type_name(entry)),
                        ));
                    }
                }
            }
        }
        _ => {}
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
