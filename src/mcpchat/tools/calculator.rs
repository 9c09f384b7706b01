//! # Calculator Tool
//!
//! Eight arithmetic operations exposed as individual tools, so a model can reach
//! them the same way it reaches a remote MCP calculator:
//!
//! | Tool | Arguments | Result |
//! |---|---|---|
//! | `add` | `a`, `b` | `a + b` |
//! | `subtract` | `a`, `b` | `a - b` |
//! | `multiply` | `a`, `b` | `a * b` |
//! | `divide` | `a`, `b` | `a / b`, fails when `b == 0` |
//! | `modulus` | integer `a`, `b` | remainder with the sign of `b`, fails when `b == 0` |
//! | `percentage` | `a`, `b` | `a` percent of `b` |
//! | `power` | `a`, `b` | `a` raised to `b` |
//! | `sqrt` | `a` | square root, fails when `a < 0` |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcpchat::tool_protocol::ToolRegistry;
//! use mcpchat::tools::Calculator;
//!
//! # async {
//! let mut registry = ToolRegistry::empty();
//! registry.add_protocol("math", Arc::new(Calculator::new())).await.unwrap();
//! let result = registry.invoke("percentage", serde_json::json!({"a": 12, "b": 250})).await.unwrap();
//! assert_eq!(result.output, serde_json::json!(30.0));
//! # };
//! ```

use crate::mcpchat::tool_protocol::{
    ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;

/// Error type for calculator operations.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorError {
    message: String,
}

impl CalculatorError {
    pub fn new(message: impl Into<String>) -> Self {
        CalculatorError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CalculatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Calculator error: {}", self.message)
    }
}

impl Error for CalculatorError {}

/// The operations the calculator exposes, one tool each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Percentage,
    Power,
    Sqrt,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
        Operation::Modulus,
        Operation::Percentage,
        Operation::Power,
        Operation::Sqrt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
            Operation::Modulus => "modulus",
            Operation::Percentage => "percentage",
            Operation::Power => "power",
            Operation::Sqrt => "sqrt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.name() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            Operation::Add => "Add two numbers",
            Operation::Subtract => "Subtract b from a",
            Operation::Multiply => "Multiply two numbers",
            Operation::Divide => "Divide a by b",
            Operation::Modulus => "Modulus (remainder)",
            Operation::Percentage => "Calculate percentage (a % of b)",
            Operation::Power => "a raised to the power b",
            Operation::Sqrt => "Square root of a number",
        }
    }

    fn metadata(&self) -> ToolMetadata {
        let kind = if *self == Operation::Modulus {
            ToolParameterType::Integer
        } else {
            ToolParameterType::Number
        };
        let mut metadata = ToolMetadata::new(self.name(), self.description())
            .with_parameter(ToolParameter::new("a", kind).required());
        if *self != Operation::Sqrt {
            metadata = metadata.with_parameter(ToolParameter::new("b", kind).required());
        }
        metadata
    }
}

/// Stateless calculator; also a [`ToolProtocol`] serving the eight operations.
#[derive(Clone, Debug, Default)]
pub struct Calculator {}

impl Calculator {
    pub fn new() -> Self {
        Calculator {}
    }

    /// Run `operation` on JSON arguments (`{"a": .., "b": ..}`).
    pub fn compute(&self, operation: Operation, args: &Value) -> Result<Value, CalculatorError> {
        if operation == Operation::Modulus {
            let a = integer_arg(args, "a")?;
            let b = integer_arg(args, "b")?;
            return modulus(a, b).map(|r| json!(r));
        }

        let a = number_arg(args, "a")?;
        let result = match operation {
            Operation::Sqrt => {
                if a < 0.0 {
                    return Err(CalculatorError::new(
                        "Square root of negative number is not allowed",
                    ));
                }
                a.sqrt()
            }
            _ => binary(operation, a, number_arg(args, "b")?)?,
        };

        if !result.is_finite() {
            return Err(CalculatorError::new("Result is not a finite real number"));
        }
        Ok(json!(result))
    }
}

fn binary(operation: Operation, a: f64, b: f64) -> Result<f64, CalculatorError> {
    match operation {
        Operation::Add => Ok(a + b),
        Operation::Subtract => Ok(a - b),
        Operation::Multiply => Ok(a * b),
        Operation::Divide if b == 0.0 => {
            Err(CalculatorError::new("Division by zero is not allowed"))
        }
        Operation::Divide => Ok(a / b),
        Operation::Percentage => Ok((a / 100.0) * b),
        Operation::Power => Ok(a.powf(b)),
        Operation::Modulus | Operation::Sqrt => Err(CalculatorError::new(format!(
            "'{}' is not a binary floating point operation",
            operation.name()
        ))),
    }
}

/// Remainder taking the sign of the divisor.
fn modulus(a: i64, b: i64) -> Result<i64, CalculatorError> {
    if b == 0 {
        return Err(CalculatorError::new("Modulus by zero is not allowed"));
    }
    let r = a.wrapping_rem(b);
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn number_arg(args: &Value, name: &str) -> Result<f64, CalculatorError> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| CalculatorError::new(format!("'{}' is out of range", name))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CalculatorError::new(format!("'{}' must be a number", name))),
        Some(_) => Err(CalculatorError::new(format!("'{}' must be a number", name))),
        None => Err(CalculatorError::new(format!("missing argument '{}'", name))),
    }
}

fn integer_arg(args: &Value, name: &str) -> Result<i64, CalculatorError> {
    let value = number_arg(args, name)?;
    if value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
        return Err(CalculatorError::new(format!("'{}' must be an integer", name)));
    }
    Ok(value as i64)
}

#[async_trait]
impl ToolProtocol for Calculator {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let operation = Operation::from_name(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        if !parameters.is_object() {
            return Err(Box::new(ToolError::InvalidParameters(format!(
                "expected an object of arguments, got {}",
                parameters
            ))));
        }

        Ok(match self.compute(operation, &parameters) {
            Ok(value) => ToolResult::success(value),
            Err(e) => ToolResult::failure(e.message().to_string()),
        })
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(Operation::ALL.iter().map(Operation::metadata).collect())
    }

    fn protocol_name(&self) -> &str {
        "calculator"
    }
}
