//! Tool-specific error types.
//!
//! [`ToolError`] is the failure taxonomy surfaced to callers of the tool
//! service. [`DiscoveryError`] describes why a single tool module was
//! excluded from the registry; it is reported, never fatal.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::validator::Mismatch;

/// Stable error codes, one per failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    UnknownTool,
    InvalidArguments,
    Timeout,
    ToolError,
    RegistryUnavailable,
    Internal,
}

impl ErrorKind {
    /// The code as it appears in API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "UnknownTool",
            Self::InvalidArguments => "InvalidArguments",
            Self::Timeout => "Timeout",
            Self::ToolError => "ToolError",
            Self::RegistryUnavailable => "RegistryUnavailable",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single offending argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub problem: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// Errors that can occur during tool operations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool is not in the registry.
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    /// The supplied arguments do not satisfy the tool's spec.
    #[error("Invalid arguments for '{tool}': {}", join_fields(.fields))]
    InvalidArguments {
        tool: String,
        fields: Vec<FieldError>,
    },

    /// The handler did not finish within the allotted time.
    #[error("Tool '{tool}' timed out after {}ms", .after.as_millis())]
    Timeout { tool: String, after: Duration },

    /// The handler itself reported a fault or panicked.
    #[error("Tool '{tool}' failed: {message}")]
    Handler { tool: String, message: String },

    /// The tools directory could not be read at all.
    #[error("Tools directory {} is unavailable: {reason}", .path.display())]
    RegistryUnavailable { path: PathBuf, reason: String },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a new "unknown tool" error.
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool(name.into())
    }

    /// Create a new "invalid arguments" error.
    pub fn invalid_arguments(tool: impl Into<String>, fields: Vec<FieldError>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            fields,
        }
    }

    /// Create a new handler fault error.
    pub fn handler(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new "registry unavailable" error.
    pub fn registry_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::RegistryUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new "internal" error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The stable failure kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Handler { .. } => ErrorKind::ToolError,
            Self::RegistryUnavailable { .. } => ErrorKind::RegistryUnavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Names of the offending arguments, if any.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::InvalidArguments { fields, .. } => {
                fields.iter().map(|f| f.field.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced while parsing a tool spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("spec must be a JSON object")]
    NotAnObject,

    #[error("field '{0}' is missing")]
    MissingField(&'static str),

    #[error("field '{field}' {reason}")]
    InvalidField { field: String, reason: String },
}

impl SpecError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Why a tool module was excluded from the registry.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryError {
    #[error("cannot read module: {reason}")]
    Unreadable { reason: String },

    #[error("module is not valid JSON: {reason}")]
    InvalidManifest { reason: String },

    #[error("module lacks the '{entry_point}' entry point")]
    MissingEntryPoint { entry_point: String },

    #[error("malformed spec: {reason}")]
    MalformedSpec { reason: String },

    #[error("malformed run entry point: {reason}")]
    MalformedRun { reason: String },

    #[error("unknown builtin handler '{builtin}'")]
    UnknownBuiltin { builtin: String },

    #[error("script rejected: {reason}")]
    ScriptRejected { reason: String },

    #[error("no runtime for script '{script}' (expected .sh, .py or .js)")]
    UnsupportedRuntime { script: String },

    #[error("spec does not match handler: {}", join_mismatches(.mismatches))]
    Validation { mismatches: Vec<Mismatch> },

    #[error("tool name '{tool}' is already provided by {owner}")]
    DuplicateName { tool: String, owner: String },
}

fn join_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(ToolError::unknown_tool("x").kind().as_str(), "UnknownTool");
        assert_eq!(ToolError::handler("x", "boom").kind().as_str(), "ToolError");
        assert_eq!(
            ToolError::registry_unavailable("/nope", "gone").kind(),
            ErrorKind::RegistryUnavailable
        );
    }

    #[test]
    fn test_invalid_arguments_lists_fields() {
        let err = ToolError::invalid_arguments(
            "add",
            vec![
                FieldError::new("a", "is required"),
                FieldError::new("c", "is not a parameter of this tool"),
            ],
        );
        assert_eq!(err.fields(), vec!["a".to_string(), "c".to_string()]);
        let msg = err.to_string();
        assert!(msg.contains("a: is required"));
        assert!(msg.contains("c: is not a parameter"));
    }

    #[test]
    fn test_discovery_error_serializes_with_kind() {
        let err = DiscoveryError::MissingEntryPoint {
            entry_point: "run".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "missing_entry_point");
        assert_eq!(json["entry_point"], "run");
    }
}
