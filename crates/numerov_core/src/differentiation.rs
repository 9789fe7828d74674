//! Closed-form differentiation of expression graphs.
//!
//! No simplification is attempted: the result is a fresh graph that shares the unchanged
//! operands of the source (`a` and `b` in `a'·b + a·b'`) and owns only the new nodes.

use crate::binding::Var;
use crate::error::ExprError;
use crate::expression::{BinaryOp, Expr, UnaryOp};
use std::sync::Arc;

impl Expr {
    /// Differentiates the graph with respect to `wrt`.
    ///
    /// Fails only when a wrapped [`Function`][crate::expression::Function] has no derivative
    /// for `wrt`. Quotients and square roots are not guarded: a vanishing denominator yields
    /// IEEE infinities or NaN at evaluation time.
    pub fn diff(&self, wrt: Var) -> Result<Expr, ExprError> {
        let derivative = match self {
            Expr::Constant(_) => Expr::zero(),
            Expr::Variable(var) => {
                if *var == wrt {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Function(function) => function.derivative(wrt)?,
            Expr::Binary(op, a, b) => {
                let da = Arc::new(a.diff(wrt)?);
                let db = Arc::new(b.diff(wrt)?);
                match op {
                    // (a ± b)' = a' ± b'
                    BinaryOp::Add | BinaryOp::Sub => Expr::Binary(*op, da, db),
                    // (a * b)' = a' * b + a * b'
                    BinaryOp::Mul => Expr::binary(
                        BinaryOp::Add,
                        Expr::Binary(BinaryOp::Mul, da, b.clone()),
                        Expr::Binary(BinaryOp::Mul, a.clone(), db),
                    ),
                    // (a / b)' = (a' * b - a * b') / (b * b)
                    BinaryOp::Div => Expr::binary(
                        BinaryOp::Div,
                        Expr::binary(
                            BinaryOp::Sub,
                            Expr::Binary(BinaryOp::Mul, da, b.clone()),
                            Expr::Binary(BinaryOp::Mul, a.clone(), db),
                        ),
                        Expr::Binary(BinaryOp::Mul, b.clone(), b.clone()),
                    ),
                }
            }
            Expr::Unary(op, a) => {
                let da = Arc::new(a.diff(wrt)?);
                match op {
                    UnaryOp::Neg => Expr::Unary(UnaryOp::Neg, da),
                    // exp(a)' = exp(a) * a'
                    UnaryOp::Exp => Expr::Binary(
                        BinaryOp::Mul,
                        Arc::new(Expr::Unary(UnaryOp::Exp, a.clone())),
                        da,
                    ),
                    // sqrt(a)' = 0.5 / sqrt(a) * a'
                    UnaryOp::Sqrt => Expr::binary(
                        BinaryOp::Mul,
                        Expr::binary(
                            BinaryOp::Div,
                            Expr::constant(0.5),
                            Expr::Unary(UnaryOp::Sqrt, a.clone()),
                        ),
                        da,
                    ),
                }
            }
            Expr::Derivative(source, inner) => source.diff(*inner)?.diff(wrt)?,
        };
        Ok(derivative)
    }

    /// Replaces every `Derivative` node with its closed-form derivative, so repeated
    /// evaluation no longer differentiates.
    pub fn materialize(&self) -> Result<Expr, ExprError> {
        let materialized = match self {
            Expr::Constant(_) | Expr::Variable(_) | Expr::Function(_) => self.clone(),
            Expr::Binary(op, a, b) => Expr::binary(*op, a.materialize()?, b.materialize()?),
            Expr::Unary(op, a) => Expr::unary(*op, a.materialize()?),
            // unchanged operands of the derivative may still hold derivative nodes
            Expr::Derivative(source, wrt) => source.diff(*wrt)?.materialize()?,
        };
        Ok(materialized)
    }
}
