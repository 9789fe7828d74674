//! JavaScript bindings for `numerov_core`: parse and differentiate expressions, build fields
//! in one call or row by row.

mod expression;
mod field;

pub use expression::WasmExpression;
pub use field::{WasmField, WasmFieldRunner};
