//! Spec validation.
//!
//! Confirms that a tool's declared spec is consistent with the signature of
//! the handler bound to it. Validation never fails with an error: a mismatch
//! is an ordinary outcome while a tool author iterates on a module.

use serde::Serialize;

use super::handlers::Signature;
use super::spec::ToolSpec;

/// A specific inconsistency between spec and handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    /// The spec declares a parameter the handler does not accept.
    UnacceptedParameter { name: String },

    /// The handler requires a parameter the spec does not declare, or
    /// `required` names a parameter that has no property.
    MissingParameter { name: String },

    /// The declared type tag is not one of the recognized tags.
    UnknownType { name: String, tag: String },

    /// The handler has no default for this parameter but the spec marks it optional.
    RequiredConflict { name: String },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnacceptedParameter { name } => {
                write!(f, "parameter '{name}' is not accepted by the handler")
            }
            Self::MissingParameter { name } => {
                write!(f, "parameter '{name}' is required but not declared")
            }
            Self::UnknownType { name, tag } if tag.is_empty() => {
                write!(f, "parameter '{name}' has no type")
            }
            Self::UnknownType { name, tag } => {
                write!(f, "parameter '{name}' has unknown type '{tag}'")
            }
            Self::RequiredConflict { name } => {
                write!(
                    f,
                    "parameter '{name}' has no default in the handler but is optional in the spec"
                )
            }
        }
    }
}

/// Result of validating a spec against a handler signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(Vec<Mismatch>),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn mismatches(&self) -> &[Mismatch] {
        match self {
            Self::Valid => &[],
            Self::Invalid(mismatches) => mismatches,
        }
    }
}

/// Validate `spec` against the handler's `signature`.
pub fn validate(spec: &ToolSpec, signature: &Signature) -> ValidationOutcome {
    let mut mismatches = Vec::new();

    for param in &spec.parameters {
        if param.param_type().is_none() {
            mismatches.push(Mismatch::UnknownType {
                name: param.name.clone(),
                tag: param.type_tag.clone(),
            });
        }
        if !signature.accepts(&param.name) {
            mismatches.push(Mismatch::UnacceptedParameter {
                name: param.name.clone(),
            });
        }
    }

    for name in &spec.undeclared_required {
        mismatches.push(Mismatch::MissingParameter { name: name.clone() });
    }

    for accepted in signature.params().iter().filter(|p| !p.has_default) {
        match spec.parameter(&accepted.name) {
            None => mismatches.push(Mismatch::MissingParameter {
                name: accepted.name.clone(),
            }),
            Some(declared) if !declared.required => {
                mismatches.push(Mismatch::RequiredConflict {
                    name: accepted.name.clone(),
                })
            }
            Some(_) => {}
        }
    }

    if mismatches.is_empty() {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Invalid(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn spec(properties: Value, required: Value) -> ToolSpec {
        ToolSpec::from_value(&json!({
            "type": "function",
            "function": {
                "name": "t",
                "description": "test tool",
                "parameters": {"type": "object", "properties": properties, "required": required}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_matching_pair_is_valid() {
        let spec = spec(
            json!({"a": {"type": "number"}, "b": {"type": "number"}, "round": {"type": "boolean"}}),
            json!(["a", "b"]),
        );
        let signature = Signature::new().required("a").required("b").optional("round");
        assert_eq!(validate(&spec, &signature), ValidationOutcome::Valid);
    }

    #[test]
    fn test_required_with_handler_default_is_fine() {
        let spec = spec(json!({"a": {"type": "string"}}), json!(["a"]));
        let signature = Signature::new().optional("a");
        assert!(validate(&spec, &signature).is_valid());
    }

    #[test]
    fn test_declared_but_unaccepted_is_named() {
        let spec = spec(
            json!({"a": {"type": "number"}, "extra": {"type": "string"}}),
            json!(["a"]),
        );
        let signature = Signature::new().required("a");
        let outcome = validate(&spec, &signature);
        assert_eq!(
            outcome.mismatches(),
            &[Mismatch::UnacceptedParameter {
                name: "extra".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_handler_parameter() {
        let spec = spec(json!({"a": {"type": "number"}}), json!(["a"]));
        let signature = Signature::new().required("a").required("b");
        assert_eq!(
            validate(&spec, &signature).mismatches(),
            &[Mismatch::MissingParameter {
                name: "b".to_string()
            }]
        );
    }

    #[test]
    fn test_required_conflict() {
        let spec = spec(json!({"a": {"type": "number"}}), json!([]));
        let signature = Signature::new().required("a");
        assert_eq!(
            validate(&spec, &signature).mismatches(),
            &[Mismatch::RequiredConflict {
                name: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_type_tags() {
        let spec = spec(
            json!({"a": {"type": "decimal"}, "b": {"description": "untyped"}}),
            json!([]),
        );
        let signature = Signature::new().optional("a").optional("b");
        let outcome = validate(&spec, &signature);
        assert_eq!(outcome.mismatches().len(), 2);
        assert!(outcome.mismatches().contains(&Mismatch::UnknownType {
            name: "a".to_string(),
            tag: "decimal".to_string()
        }));
        assert_eq!(outcome.mismatches()[1].to_string(), "parameter 'b' has no type");
    }

    #[test]
    fn test_required_name_without_property() {
        let spec = spec(json!({}), json!(["ghost"]));
        let signature = Signature::variadic();
        assert_eq!(
            validate(&spec, &signature).mismatches(),
            &[Mismatch::MissingParameter {
                name: "ghost".to_string()
            }]
        );
    }

    #[test]
    fn test_variadic_accepts_any_declared_name() {
        let spec = spec(
            json!({"anything": {"type": "object"}, "list": {"type": "array"}}),
            json!(["anything"]),
        );
        assert!(validate(&spec, &Signature::variadic()).is_valid());
    }
}
