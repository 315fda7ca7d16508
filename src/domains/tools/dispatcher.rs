//! Execution Dispatcher.
//!
//! `resolving -> validating -> invoking -> completed | failed | timed_out`
//!
//! The dispatcher resolves a tool from one registry snapshot, coerces the
//! caller's arguments against the tool's spec and runs the handler on its own
//! task under a timeout. No lock is held while a handler runs. A timed-out
//! handler is abandoned, not cancelled: its task keeps running to completion
//! in the background and its result is discarded.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Number, Value};
use tracing::{debug, instrument, warn};

use super::error::{FieldError, ToolError};
use super::handlers::{Arguments, describe_join_error};
use super::registry::Registry;
use super::spec::{ParamType, ParameterSpec, ToolSpec};

/// A tool's result value, or why there is none.
pub type ExecutionResult = Result<Value, ToolError>;

/// Resolves, validates and invokes tools.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Execute `name` with `arguments`, bounded by `timeout` or the default.
    #[instrument(skip(self, arguments), fields(generation))]
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let snapshot = self.registry.snapshot();
        tracing::Span::current().record("generation", snapshot.generation());

        let entry = snapshot
            .get(name)
            .ok_or_else(|| ToolError::unknown_tool(name))?;
        drop(snapshot);

        let arguments = coerce_arguments(&entry.spec, arguments)?;

        let limit = timeout.unwrap_or(self.default_timeout);
        let handler = Arc::clone(&entry.handler);
        let task = tokio::spawn(async move { handler.invoke(arguments).await });

        match tokio::time::timeout(limit, task).await {
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Tool execution timed out");
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    after: limit,
                })
            }
            Ok(Err(join_error)) => Err(ToolError::handler(name, describe_join_error(join_error))),
            Ok(Ok(Err(fault))) => {
                debug!(error = %fault, "Tool reported a fault");
                Err(ToolError::handler(name, fault.message))
            }
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

/// Check `arguments` against `spec`, converting loosely typed values.
///
/// Every offending field is reported, not just the first. Absent optional
/// parameters take the spec's declared default when there is one.
pub fn coerce_arguments(spec: &ToolSpec, arguments: Value) -> Result<Arguments, ToolError> {
    let supplied = match arguments {
        Value::Null => Arguments::new(),
        Value::Object(map) => map,
        other => {
            return Err(ToolError::invalid_arguments(
                &spec.name,
                vec![FieldError::new(
                    "params",
                    format!("must be an object, got {}", json_kind(&other)),
                )],
            ));
        }
    };

    let mut fields = Vec::new();
    let mut coerced = Arguments::new();

    for (name, value) in supplied {
        let Some(param) = spec.parameter(&name) else {
            fields.push(FieldError::new(name, "is not a parameter of this tool"));
            continue;
        };
        if value.is_null() {
            continue;
        }
        match coerce_value(param, value) {
            Ok(value) => {
                coerced.insert(name, value);
            }
            Err(problem) => fields.push(FieldError::new(name, problem)),
        }
    }

    for param in &spec.parameters {
        if coerced.contains_key(&param.name) || fields.iter().any(|f| f.field == param.name) {
            continue;
        }
        if param.required {
            fields.push(FieldError::new(&param.name, "is required"));
        } else if let Some(default) = &param.default {
            coerced.insert(param.name.clone(), default.clone());
        }
    }

    if fields.is_empty() {
        Ok(coerced)
    } else {
        Err(ToolError::invalid_arguments(&spec.name, fields))
    }
}

fn coerce_value(param: &ParameterSpec, value: Value) -> Result<Value, String> {
    let value = match param.param_type() {
        Some(ParamType::Number) => to_number(value).ok_or("must be a number")?,
        Some(ParamType::Integer) => to_integer(value).ok_or("must be an integer")?,
        Some(ParamType::Boolean) => to_boolean(value).ok_or("must be a boolean")?,
        Some(ParamType::String) if value.is_string() => value,
        Some(ParamType::String) => return Err("must be a string".to_string()),
        Some(ParamType::Object) => {
            from_json_text(value, Value::is_object).ok_or("must be an object")?
        }
        Some(ParamType::Array) => from_json_text(value, Value::is_array).ok_or("must be an array")?,
        None => value,
    };

    if let Some(allowed) = &param.allowed {
        if !allowed.contains(&value) {
            let choices = allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!("must be one of [{choices}]"));
        }
    }
    Ok(value)
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

fn to_number(value: Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value),
        Value::String(s) => parse_number(&s).map(Value::Number),
        _ => None,
    }
}

fn to_integer(value: Value) -> Option<Value> {
    let number = match value {
        Value::Number(n) => n,
        Value::String(s) => parse_number(&s)?,
        _ => return None,
    };
    if number.is_i64() || number.is_u64() {
        return Some(Value::Number(number));
    }
    number
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| Value::Number(Number::from(f as i64)))
}

fn to_boolean(value: Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

/// Accept a value of the wanted kind, or a string holding JSON of that kind.
fn from_json_text(value: Value, is_kind: fn(&Value) -> bool) -> Option<Value> {
    match value {
        Value::String(text) => serde_json::from_str::<Value>(&text)
            .ok()
            .filter(|parsed| is_kind(parsed)),
        other if is_kind(&other) => Some(other),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
