//! Echo tool definition.

use serde_json::Value;

use crate::domains::tools::handlers::{Arguments, HandlerFault, Signature};

/// Echo tool - returns its message, optionally upper-cased.
pub struct EchoTool;

impl EchoTool {
    pub const NAME: &'static str = "echo";

    pub fn signature() -> Signature {
        Signature::new().required("message").optional("uppercase")
    }

    pub fn execute(args: &Arguments) -> Result<Value, HandlerFault> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerFault::new("'message' must be a string"))?;
        let uppercase = args
            .get("uppercase")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Value::String(if uppercase {
            message.to_uppercase()
        } else {
            message.to_string()
        }))
    }
}
