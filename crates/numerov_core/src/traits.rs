use crate::binding::{Binding, Var};
use crate::error::ExprError;
use crate::expression::Expr;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in expressions and fields.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + Send + Sync + 'static {
    /// Converts an `f64` constant into this scalar type. Unrepresentable values become NaN.
    fn lift(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }

    /// Converts this scalar back to `f64`, e.g. before calling an opaque native function.
    fn lower(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T: Float + FromPrimitive + Debug + Send + Sync + 'static> Scalar for T {}

/// The coefficient function `g(r, k)` driving the Numerov recurrence.
pub trait Curvature<T: Scalar> {
    /// Evaluates the curvature at radial coordinate `r` and momentum `k`.
    fn evaluate(&self, r: T, k: T) -> Result<T, ExprError>;

    /// Rejects the curvature before any evaluation if it is known to reference variables
    /// other than `r` and `k`.
    fn check(&self) -> Result<(), ExprError> {
        Ok(())
    }
}

/// Tree-walking evaluation. `Derivative` nodes are differentiated again on every call; use
/// [`Field::from_expr`][crate::numerov::Field::from_expr] or [`Expr::materialize`] before a
/// sweep.
impl<T: Scalar> Curvature<T> for Expr {
    fn evaluate(&self, r: T, k: T) -> Result<T, ExprError> {
        self.eval(&[Binding::new(Var::R, r), Binding::new(Var::K, k)])
    }

    fn check(&self) -> Result<(), ExprError> {
        self.check_bindings(&[Var::R, Var::K])
    }
}

impl<T: Scalar, C: Curvature<T> + ?Sized> Curvature<T> for &C {
    fn evaluate(&self, r: T, k: T) -> Result<T, ExprError> {
        (**self).evaluate(r, k)
    }

    fn check(&self) -> Result<(), ExprError> {
        (**self).check()
    }
}
