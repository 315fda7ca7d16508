//! Tool specification model.
//!
//! A [`ToolSpec`] is parsed from the function-calling shape every tool module
//! declares:
//!
//! ```json
//! { "type": "function",
//!   "function": { "name": "add", "description": "Sum two numbers.",
//!                 "parameters": { "type": "object",
//!                                  "properties": { "a": { "type": "number" } },
//!                                  "required": ["a"] } } }
//! ```
//!
//! Type tags are kept verbatim so the validator can report unknown ones.

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::SpecError;

/// Recognized parameter type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// Parse a JSON Schema type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    /// Raw type tag, empty when the property declares none.
    pub type_tag: String,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Values listed under `enum`, if any.
    pub allowed: Option<Vec<Value>>,
}

impl ParameterSpec {
    /// The recognized type, or `None` for an unknown tag.
    pub fn param_type(&self) -> Option<ParamType> {
        ParamType::from_tag(&self.type_tag)
    }
}

/// Declarative description of one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Parameters in declaration order.
    pub parameters: Vec<ParameterSpec>,
    /// Names listed in `required` without a matching property.
    pub undeclared_required: Vec<String>,
    raw: Value,
}

impl ToolSpec {
    /// Parse a spec from its JSON representation.
    pub fn from_value(value: &Value) -> Result<Self, SpecError> {
        let root = value.as_object().ok_or(SpecError::NotAnObject)?;

        match root.get("type").and_then(Value::as_str) {
            Some("function") => {}
            Some(other) => {
                return Err(SpecError::invalid(
                    "type",
                    format!("must be \"function\", got \"{other}\""),
                ));
            }
            None => return Err(SpecError::MissingField("type")),
        }

        let function = root
            .get("function")
            .ok_or(SpecError::MissingField("function"))?
            .as_object()
            .ok_or_else(|| SpecError::invalid("function", "must be an object"))?;

        let name = required_str(function, "name")?;
        if !is_valid_name(name) {
            return Err(SpecError::invalid(
                "function.name",
                "may only contain letters, digits, '_', '-' and '.'",
            ));
        }
        let description = required_str(function, "description")?;

        let (parameters, undeclared_required) = match function.get("parameters") {
            None | Some(Value::Null) => (Vec::new(), Vec::new()),
            Some(params) => parse_parameters(params)?,
        };

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            undeclared_required,
            raw: value.clone(),
        })
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The spec exactly as the module declared it.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Compact JSON rendering of the declared spec.
    pub fn to_compact_json(&self) -> String {
        self.raw.to_string()
    }

    /// The `parameters` object, used as an MCP input schema.
    pub fn input_schema(&self) -> Map<String, Value> {
        self.raw
            .get("function")
            .and_then(|f| f.get("parameters"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(|| {
                let mut schema = Map::new();
                schema.insert("type".to_string(), Value::String("object".to_string()));
                schema
            })
    }
}

fn required_str<'a>(object: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, SpecError> {
    match object.get(field) {
        None => Err(SpecError::MissingField(field)),
        Some(Value::String(s)) if !s.trim().is_empty() || field == "description" => Ok(s.as_str()),
        Some(Value::String(_)) => Err(SpecError::invalid(field, "must not be empty")),
        Some(_) => Err(SpecError::invalid(field, "must be a string")),
    }
}

fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn parse_parameters(params: &Value) -> Result<(Vec<ParameterSpec>, Vec<String>), SpecError> {
    let params = params
        .as_object()
        .ok_or_else(|| SpecError::invalid("parameters", "must be an object"))?;

    if let Some(kind) = params.get("type") {
        if kind.as_str() != Some("object") {
            return Err(SpecError::invalid("parameters.type", "must be \"object\""));
        }
    }

    let required: Vec<String> = match params.get("required") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    SpecError::invalid("parameters.required", "must list parameter names")
                })
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(SpecError::invalid("parameters.required", "must be an array"));
        }
    };

    let properties = match params.get("properties") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(props)) => props.clone(),
        Some(_) => {
            return Err(SpecError::invalid("parameters.properties", "must be an object"));
        }
    };

    let mut parameters = Vec::with_capacity(properties.len());
    for (name, property) in &properties {
        let property = property.as_object().ok_or_else(|| {
            SpecError::invalid(format!("parameters.properties.{name}"), "must be an object")
        })?;

        let type_tag = match property.get("type") {
            None => String::new(),
            Some(Value::String(tag)) => tag.clone(),
            Some(_) => {
                return Err(SpecError::invalid(
                    format!("parameters.properties.{name}.type"),
                    "must be a string",
                ));
            }
        };

        let allowed = match property.get("enum") {
            None => None,
            Some(Value::Array(values)) => Some(values.clone()),
            Some(_) => {
                return Err(SpecError::invalid(
                    format!("parameters.properties.{name}.enum"),
                    "must be an array",
                ));
            }
        };

        parameters.push(ParameterSpec {
            name: name.clone(),
            type_tag,
            required: required.iter().any(|r| r == name),
            default: property.get("default").cloned(),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            allowed,
        });
    }

    let undeclared_required = required
        .into_iter()
        .filter(|r| !properties.contains_key(r))
        .collect();

    Ok((parameters, undeclared_required))
}
