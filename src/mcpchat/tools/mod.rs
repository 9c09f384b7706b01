//! Built-in tool providers.
//!
//! - **Calculator**: the eight arithmetic operations of the stock math server,
//!   served in-process. Useful when no Python toolchain is available to run the
//!   MCP calculator, and in tests.

pub mod calculator;

pub use calculator::{Calculator, CalculatorError, Operation};
