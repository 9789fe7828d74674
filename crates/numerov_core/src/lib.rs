pub mod binding;
pub mod differentiation;
pub mod equation_engine;
pub mod error;
pub mod expression;
pub mod lattice;
pub mod math;
pub mod numerov;
pub mod physics;
/// The `numerov_core` crate builds symbolic expressions, differentiates them analytically,
/// and feeds them to a Numerov-style finite-difference solver for the radial two-body problem.
/// Evaluation is generic over the scalar type (`f32`, `f64`).
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `Curvature` (coefficient function fed to
///   the solver).
/// - **Expression**: Immutable node graphs (`Expr`) built with ordinary operators and
///   `math::{exp, sqrt}`.
/// - **Differentiation**: Closed-form product, quotient and chain rules producing new graphs.
/// - **Equation Engine**: A string parser plus a bytecode VM for evaluating graphs at many points.
/// - **Numerov**: The lattice field solver (`Field`, `NumerovSweep`).
/// - **Physics**: Physical constants, the Reid soft-core potential and ready-made curvature
///   functions.
pub mod traits;

pub use binding::{Binding, Var};
pub use error::{ExprError, FieldError, LatticeError, ParseError};
pub use expression::{Expr, Function};
pub use lattice::{AxisSpec, LatticeConfig};
pub use numerov::{Field, NumerovSweep};
pub use traits::{Curvature, Scalar};
