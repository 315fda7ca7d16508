//! Arithmetic tool definitions.
//!
//! Operands may be JSON numbers or numeric strings. The result mirrors the
//! operands: if any operand arrived as a string the result is a string,
//! otherwise it is a number. Integral results carry no fractional part.
//!
//! The dispatcher coerces arguments to the manifest's declared types before
//! a handler runs, so a string result needs `string`-typed parameters in the
//! manifest. `tools/add.json` declares numbers and returns `5` for
//! `"2"` + `"3"`; `tools/add_text.json` declares strings and returns `"5"`.

use serde_json::{Number, Value};
use tracing::debug;

use crate::domains::tools::handlers::{Arguments, HandlerFault, Signature};

/// Largest integer an `f64` represents exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// An operand together with how it was supplied.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Operand {
    value: f64,
    textual: bool,
}

fn operand(args: &Arguments, name: &str) -> Result<Operand, HandlerFault> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|value| Operand {
                value,
                textual: false,
            })
            .ok_or_else(|| HandlerFault::new(format!("'{name}' is out of range"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|value| Operand {
                value,
                textual: true,
            })
            .ok_or_else(|| HandlerFault::new(format!("'{name}' is not a number: {s:?}"))),
        Some(other) => Err(HandlerFault::new(format!(
            "'{name}' must be a number, got {other}"
        ))),
        None => Err(HandlerFault::new(format!("'{name}' is required"))),
    }
}

/// Render `value` the way the operands were supplied.
fn render(value: f64, textual: bool) -> Result<Value, HandlerFault> {
    if !value.is_finite() {
        return Err(HandlerFault::new("result is not a finite number"));
    }
    let integral = value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER;
    Ok(match (textual, integral) {
        (true, true) => Value::String(format!("{}", value as i64)),
        (true, false) => Value::String(value.to_string()),
        (false, true) => Value::Number(Number::from(value as i64)),
        (false, false) => Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| HandlerFault::new("result is not a finite number"))?,
    })
}

/// Add tool - sums two numbers.
pub struct AddTool;

impl AddTool {
    pub const NAME: &'static str = "add";

    pub fn signature() -> Signature {
        Signature::new().required("a").required("b")
    }

    pub fn execute(args: &Arguments) -> Result<Value, HandlerFault> {
        let (a, b) = (operand(args, "a")?, operand(args, "b")?);
        debug!(a = a.value, b = b.value, "add");
        render(a.value + b.value, a.textual || b.textual)
    }
}

/// Multiply tool - multiplies two numbers.
pub struct MultiplyTool;

impl MultiplyTool {
    pub const NAME: &'static str = "multiply";

    pub fn signature() -> Signature {
        Signature::new().required("a").required("b")
    }

    pub fn execute(args: &Arguments) -> Result<Value, HandlerFault> {
        let (a, b) = (operand(args, "a")?, operand(args, "b")?);
        render(a.value * b.value, a.textual || b.textual)
    }
}

/// Square tool - multiplies a number by itself.
pub struct SquareTool;

impl SquareTool {
    pub const NAME: &'static str = "square";

    pub fn signature() -> Signature {
        Signature::new().required("x")
    }

    pub fn execute(args: &Arguments) -> Result<Value, HandlerFault> {
        let x = operand(args, "x")?;
        render(x.value * x.value, x.textual)
    }
}
