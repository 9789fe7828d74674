//! Elementary functions usable both on numbers and on expression graphs.
//!
//! ```
//! use numerov_core::math::{exp, sqrt};
//! use numerov_core::{Binding, Var};
//!
//! let numeric = exp(0.0_f64) + sqrt(4.0_f64);
//! let symbolic = exp(Var::X * 0.0) + sqrt(Var::X * 4.0);
//! assert_eq!(symbolic.eval(&[Binding::new(Var::X, 1.0)]), Ok(numeric));
//! ```

use crate::binding::Var;
use crate::expression::{Expr, UnaryOp};

pub trait Elementary {
    type Output;

    fn exp(self) -> Self::Output;

    fn sqrt(self) -> Self::Output;
}

impl Elementary for f64 {
    type Output = f64;

    fn exp(self) -> f64 {
        f64::exp(self)
    }

    fn sqrt(self) -> f64 {
        f64::sqrt(self)
    }
}

impl Elementary for f32 {
    type Output = f32;

    fn exp(self) -> f32 {
        f32::exp(self)
    }

    fn sqrt(self) -> f32 {
        f32::sqrt(self)
    }
}

impl Elementary for Expr {
    type Output = Expr;

    fn exp(self) -> Expr {
        Expr::unary(UnaryOp::Exp, self)
    }

    fn sqrt(self) -> Expr {
        Expr::unary(UnaryOp::Sqrt, self)
    }
}

impl Elementary for &Expr {
    type Output = Expr;

    fn exp(self) -> Expr {
        Expr::unary(UnaryOp::Exp, self.clone())
    }

    fn sqrt(self) -> Expr {
        Expr::unary(UnaryOp::Sqrt, self.clone())
    }
}

impl Elementary for Var {
    type Output = Expr;

    fn exp(self) -> Expr {
        Expr::unary(UnaryOp::Exp, Expr::Variable(self))
    }

    fn sqrt(self) -> Expr {
        Expr::unary(UnaryOp::Sqrt, Expr::Variable(self))
    }
}

/// `e^x`
pub fn exp<X: Elementary>(x: X) -> X::Output {
    x.exp()
}

/// `√x`
pub fn sqrt<X: Elementary>(x: X) -> X::Output {
    x.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binding;

    #[test]
    fn numeric_and_symbolic_forms_agree() {
        for value in [-10.0f64, -5.0, -1.0, 0.0, 1.0, 5.0, 10.0] {
            let symbolic = exp(Var::X);
            let bound = [Binding::new(Var::X, value)];
            assert_eq!(symbolic.eval(&bound), Ok(exp(value)));
            assert_eq!(exp(value), value.exp());
        }
        for value in [0.0f64, 0.25, 2.0, 144.0] {
            assert_eq!(sqrt(Var::X).eval(&[Binding::new(Var::X, value)]), Ok(sqrt(value)));
        }
    }

    #[test]
    fn single_precision_is_supported() {
        assert_eq!(sqrt(9.0f32), 3.0f32);
        assert!((exp(1.0f32) - std::f32::consts::E).abs() < 1e-6);
    }

    #[test]
    fn sqrt_of_negative_is_nan() {
        let value: f64 = sqrt(Var::X)
            .eval(&[Binding::new(Var::X, -1.0)])
            .expect("bound");
        assert!(value.is_nan());
    }
}
