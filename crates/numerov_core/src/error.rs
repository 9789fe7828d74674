//! Collection of all error types.
//!
//! All errors derive [`thiserror::Error`], so callers can compose them or hand them to
//! `anyhow` in application code.

use crate::binding::Var;
use crate::lattice::Axis;
use thiserror::Error;

/// Returned when building, differentiating or evaluating an expression graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// The graph references a variable for which no binding (or compiler slot) exists.
    #[error("no binding supplied for variable `{0}`")]
    InvalidBinding(Var),

    /// A wrapped function was differentiated with respect to a variable it has no
    /// derivative for.
    #[error("function `{name}` has no derivative with respect to `{var}`")]
    NotDifferentiable { name: String, var: Var },

    /// A wrapped native function reported a failure of its own.
    #[error("function `{name}` failed: {message}")]
    Function { name: String, message: String },

    /// A bytecode program left the VM stack in an inconsistent state.
    #[error("malformed bytecode program: {0}")]
    MalformedProgram(&'static str),
}

/// Returned from [`parse`][crate::equation_engine::parse].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),

    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("expected `{0}`")]
    Expected(&'static str),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{name}` expects {expected} argument(s); got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("unexpected trailing input starting at token {0}")]
    TrailingInput(String),

    /// The expression nests deeper than [`MAX_DEPTH`][crate::equation_engine::MAX_DEPTH].
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Returned when a lattice configuration is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LatticeError {
    /// Returned when an axis has zero lattice points.
    #[error("{0} lattice size must be greater than 0")]
    EmptyAxis(Axis),

    /// Returned when an axis has non-finite bounds or `max <= min`.
    #[error("{axis} bounds must be finite with max > min; got [{min}, {max}]")]
    BadBounds { axis: Axis, min: f64, max: f64 },
}

/// Returned from the field solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// [`LatticeError`]
    #[error("lattice error: {0}")]
    Lattice(#[from] LatticeError),

    /// [`ExprError`]
    #[error("curvature error: {0}")]
    Expr(#[from] ExprError),

    /// Returned by [`Field::interpolate`][crate::numerov::Field::interpolate] for positions
    /// outside the tabulated lattice.
    #[error("position (r = {r}, k = {k}) lies outside the tabulated lattice")]
    OutOfRange { r: f64, k: f64 },
}
