//! Immutable symbolic expression graphs.
//!
//! Nodes own their children through `Arc`, so cloning an [`Expr`] is shallow and derivative
//! formulas can share the sub-expressions they repeat. Graphs are strictly compositional
//! (children are built before parents), so no cycles can form.
//!
//! Evaluation and differentiation recurse once per tree level. [`parse`] caps the depth at
//! [`MAX_DEPTH`]; graphs built in code with the operators are not capped.
//!
//! [`parse`]: crate::equation_engine::parse
//! [`MAX_DEPTH`]: crate::equation_engine::MAX_DEPTH

use crate::binding::{lookup, Binding, Var};
use crate::error::ExprError;
use crate::traits::Scalar;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Arithmetic operators with two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply<T: Scalar>(self, lhs: T, rhs: T) -> T {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// Functions of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Sqrt,
}

impl UnaryOp {
    pub fn apply<T: Scalar>(self, operand: T) -> T {
        match self {
            UnaryOp::Neg => -operand,
            UnaryOp::Exp => operand.exp(),
            UnaryOp::Sqrt => operand.sqrt(),
        }
    }
}

type Callback = dyn Fn(&[Binding<f64>]) -> Result<f64, ExprError> + Send + Sync;

/// Lifts a native callable into the algebra.
///
/// The callable sees the bindings converted to `f64`. It can only be differentiated if it
/// exposes derivatives via [`Function::with_derivative`], or with respect to variables it
/// declares it does not depend on.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    callback: Arc<Callback>,
    depends_on: Vec<Var>,
    derivatives: Vec<(Var, Expr)>,
}

impl Function {
    pub fn new<F>(name: impl Into<Arc<str>>, callback: F) -> Self
    where
        F: Fn(&[Binding<f64>]) -> Result<f64, ExprError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
            depends_on: Vec::new(),
            derivatives: Vec::new(),
        }
    }

    /// Wraps a plain function of a single variable.
    pub fn unary<F>(name: impl Into<Arc<str>>, var: Var, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self::new(name, move |bindings| lookup(bindings, var).map(&f)).depends_on(&[var])
    }

    /// Declares the variables the callable reads. Without a declaration the dependencies
    /// are unknown until evaluation.
    pub fn depends_on(mut self, vars: &[Var]) -> Self {
        for var in vars {
            if !self.depends_on.contains(var) {
                self.depends_on.push(*var);
            }
        }
        self
    }

    /// Supplies the partial derivative with respect to `var`.
    pub fn with_derivative(mut self, var: Var, derivative: impl Into<Expr>) -> Self {
        self.derivatives.retain(|(existing, _)| *existing != var);
        self.derivatives.push((var, derivative.into()));
        self.depends_on(&[var])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Var] {
        &self.depends_on
    }

    pub fn call<T: Scalar>(&self, bindings: &[Binding<T>]) -> Result<T, ExprError> {
        let lowered: Vec<Binding<f64>> = bindings
            .iter()
            .map(|binding| binding.map(T::lower))
            .collect();
        (self.callback)(&lowered).map(T::lift)
    }

    pub(crate) fn derivative(&self, var: Var) -> Result<Expr, ExprError> {
        if let Some((_, derivative)) = self.derivatives.iter().find(|(v, _)| *v == var) {
            return Ok(derivative.clone());
        }
        if !self.depends_on.is_empty() && !self.depends_on.contains(&var) {
            return Ok(Expr::zero());
        }
        Err(ExprError::NotDifferentiable {
            name: self.name.to_string(),
            var,
        })
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field(
                "derivatives",
                &self.derivatives.iter().map(|(v, _)| *v).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.callback, &other.callback)
    }
}

/// A node of the expression graph.
#[derive(Debug, Clone)]
pub enum Expr {
    Constant(f64),
    Variable(Var),
    Function(Function),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    Unary(UnaryOp, Arc<Expr>),
    /// Lazily differentiated source. Differentiating it again differentiates the already
    /// differentiated graph.
    Derivative(Arc<Expr>, Var),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Constant(value)
    }

    pub fn zero() -> Self {
        Expr::Constant(0.0)
    }

    pub fn one() -> Self {
        Expr::Constant(1.0)
    }

    pub fn var(var: Var) -> Self {
        Expr::Variable(var)
    }

    pub fn binary(op: BinaryOp, lhs: impl Into<Arc<Expr>>, rhs: impl Into<Arc<Expr>>) -> Self {
        Expr::Binary(op, lhs.into(), rhs.into())
    }

    pub fn unary(op: UnaryOp, operand: impl Into<Arc<Expr>>) -> Self {
        Expr::Unary(op, operand.into())
    }

    /// Builds a `Derivative` node of `self` with respect to `wrt`.
    pub fn derivative(&self, wrt: Var) -> Self {
        Expr::Derivative(Arc::new(self.clone()), wrt)
    }

    /// Evaluates the graph. Every reachable variable must have a binding.
    pub fn eval<T: Scalar>(&self, bindings: &[Binding<T>]) -> Result<T, ExprError> {
        match self {
            Expr::Constant(value) => Ok(T::lift(*value)),
            Expr::Variable(var) => lookup(bindings, *var),
            Expr::Function(function) => function.call(bindings),
            Expr::Binary(op, lhs, rhs) => Ok(op.apply(lhs.eval(bindings)?, rhs.eval(bindings)?)),
            Expr::Unary(op, operand) => Ok(op.apply(operand.eval(bindings)?)),
            Expr::Derivative(source, wrt) => source.diff(*wrt)?.eval(bindings),
        }
    }

    /// Variables the graph is statically known to reference. Functions contribute their
    /// declared dependencies; a `Derivative` node contributes the variables of the graph it
    /// differentiates to, including any declared function derivatives.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut BTreeSet<Var>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Variable(var) => {
                vars.insert(*var);
            }
            Expr::Function(function) => vars.extend(function.dependencies().iter().copied()),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
            Expr::Unary(_, operand) => operand.collect_variables(vars),
            Expr::Derivative(source, wrt) => match source.diff(*wrt) {
                Ok(derivative) => derivative.collect_variables(vars),
                // evaluation fails with the same error before any binding is read
                Err(_) => source.collect_variables(vars),
            },
        }
    }

    /// Rejects the graph before evaluation if it references a variable outside `available`.
    pub fn check_bindings(&self, available: &[Var]) -> Result<(), ExprError> {
        match self
            .variables()
            .into_iter()
            .find(|var| !available.contains(var))
        {
            Some(missing) => Err(ExprError::InvalidBinding(missing)),
            None => Ok(()),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Constant(a), Expr::Constant(b)) => a == b,
            (Expr::Variable(a), Expr::Variable(b)) => a == b,
            (Expr::Function(a), Expr::Function(b)) => a == b,
            (Expr::Binary(op_a, lhs_a, rhs_a), Expr::Binary(op_b, lhs_b, rhs_b)) => {
                op_a == op_b && lhs_a == lhs_b && rhs_a == rhs_b
            }
            (Expr::Unary(op_a, a), Expr::Unary(op_b, b)) => op_a == op_b && a == b,
            (Expr::Derivative(a, wrt_a), Expr::Derivative(b, wrt_b)) => wrt_a == wrt_b && a == b,
            _ => false,
        }
    }
}

/// Infix form. Graphs without function nodes print in a form `parse` reads back;
/// non-finite constants print as quotients of zero (`(1 / 0)`, `(0 / 0)`).
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(value) if value.is_nan() => f.write_str("(0 / 0)"),
            Expr::Constant(value) if value.is_infinite() && *value > 0.0 => f.write_str("(1 / 0)"),
            Expr::Constant(value) if value.is_infinite() => f.write_str("(-1 / 0)"),
            Expr::Constant(value) if *value < 0.0 => write!(f, "(-{})", -value),
            Expr::Constant(value) => write!(f, "{value}"),
            Expr::Variable(var) => write!(f, "{var}"),
            Expr::Function(function) => f.write_str(function.name()),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Unary(UnaryOp::Neg, operand) => write!(f, "-{operand}"),
            Expr::Unary(UnaryOp::Exp, operand) => write!(f, "exp({operand})"),
            Expr::Unary(UnaryOp::Sqrt, operand) => write!(f, "sqrt({operand})"),
            Expr::Derivative(source, wrt) => write!(f, "d({source}, {wrt})"),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Constant(value)
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::Variable(var)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

impl From<Function> for Expr {
    fn from(function: Function) -> Self {
        Expr::Function(function)
    }
}

macro_rules! impl_binary_ops {
    ($($trait:ident, $method:ident, $op:ident;)*) => {$(
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                let rhs: Expr = rhs.into();
                Expr::binary(BinaryOp::$op, self, rhs)
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                let rhs: Expr = rhs.into();
                Expr::binary(BinaryOp::$op, self.clone(), rhs)
            }
        }

        impl<R: Into<Expr>> $trait<R> for Var {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                let rhs: Expr = rhs.into();
                Expr::binary(BinaryOp::$op, Expr::Variable(self), rhs)
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary(BinaryOp::$op, Expr::Constant(self), rhs)
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary(BinaryOp::$op, Expr::Constant(self), rhs.clone())
            }
        }

        impl $trait<Var> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Var) -> Expr {
                Expr::binary(BinaryOp::$op, Expr::Constant(self), Expr::Variable(rhs))
            }
        }
    )*};
}

impl_binary_ops! {
    Add, add, Add;
    Sub, sub, Sub;
    Mul, mul, Mul;
    Div, div, Div;
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self.clone())
    }
}

impl Neg for Var {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, Expr::Variable(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{exp, sqrt};

    fn xy(x: f64, y: f64) -> [Binding<f64>; 2] {
        [Binding::new(Var::X, x), Binding::new(Var::Y, y)]
    }

    #[test]
    fn operators_build_evaluable_graphs() {
        let f = (Var::X + Var::Y) * (Var::X * Var::Y);
        for (x, y) in [(-3.0, 2.0), (0.5, -1.5), (4.0, 4.0)] {
            let value = f.eval(&xy(x, y)).expect("bound variables");
            assert!(((x + y) * x * y - value).abs() < 1e-12);
        }
    }

    #[test]
    fn mixed_operand_kinds_compose() {
        let x = Expr::var(Var::X);
        let f = 2.0 * &x - 1.0 / Var::X + exp(-&x) / sqrt(Var::X) + (-Var::X);
        let value: f64 = f.eval(&[Binding::new(Var::X, 2.0)]).expect("bound");
        let expected = 4.0 - 0.5 + (-2.0f64).exp() / 2.0f64.sqrt() - 2.0;
        assert!((value - expected).abs() < 1e-12, "got {value}, expected {expected}");
    }

    #[test]
    fn evaluation_is_generic_over_scalar_type() {
        let f = Var::R * Var::R + 0.5;
        let single: f32 = f.eval(&[Binding::r(1.5f32)]).expect("bound");
        let double: f64 = f.eval(&[Binding::r(1.5f64)]).expect("bound");
        assert_eq!(single, 2.75f32);
        assert_eq!(double, 2.75f64);
    }

    #[test]
    fn missing_binding_fails_with_identity() {
        let f = Var::R * Var::K;
        let err = f.eval(&[Binding::r(1.0)]).expect_err("k is unbound");
        assert_eq!(err, ExprError::InvalidBinding(Var::K));
    }

    #[test]
    fn check_bindings_rejects_before_evaluation() {
        let f = Var::R / Var::Z + Var::K;
        assert_eq!(f.check_bindings(&[Var::R, Var::K, Var::Z]), Ok(()));
        assert_eq!(
            f.check_bindings(&[Var::R, Var::K]),
            Err(ExprError::InvalidBinding(Var::Z))
        );
        assert_eq!(
            f.variables().into_iter().collect::<Vec<_>>(),
            vec![Var::R, Var::K, Var::Z]
        );
    }

    #[test]
    fn derivative_nodes_report_the_variables_of_their_derivative() {
        let g = Function::unary("g", Var::R, |r| r * r).with_derivative(Var::R, Var::R * Var::Z);
        let dg = Expr::from(g).derivative(Var::R);
        assert_eq!(dg.variables(), BTreeSet::from([Var::R, Var::Z]));
        assert_eq!(dg.check_bindings(&[Var::R, Var::K]), Err(ExprError::InvalidBinding(Var::Z)));

        let dropped = (Var::R * Var::R + Var::X).derivative(Var::R);
        assert_eq!(dropped.variables(), BTreeSet::from([Var::R]));

        let opaque = Expr::from(Function::new("opaque", |_| Ok(1.0)).depends_on(&[Var::Y]));
        assert_eq!(opaque.derivative(Var::Y).variables(), BTreeSet::from([Var::Y]));
    }

    #[test]
    fn function_wrapper_lifts_native_callables() {
        let cube = Function::unary("cube", Var::X, |x| x * x * x);
        let f = Expr::from(cube) + Var::Y;
        assert_eq!(f.eval(&xy(2.0, 1.0)), Ok(9.0));
        assert!(f.variables().contains(&Var::X));
    }

    #[test]
    fn undeclared_function_dependencies_fail_at_evaluation() {
        let f = Expr::from(Function::new("needs_z", |bindings| {
            lookup(bindings, Var::Z)
        }));
        assert_eq!(f.check_bindings(&[]), Ok(()));
        assert_eq!(
            f.eval(&[Binding::new(Var::X, 1.0)]),
            Err(ExprError::InvalidBinding(Var::Z))
        );
    }

    #[test]
    fn display_uses_infix_form() {
        let f = exp(-(2.0 * Var::R)) / (Var::K - 3.5);
        assert_eq!(f.to_string(), "(exp(-(2 * r)) / (k - 3.5))");
        assert_eq!(Expr::constant(-1.25).to_string(), "(-1.25)");
        assert_eq!(Var::X.to_string(), "x");
    }

    #[test]
    fn non_finite_constants_display_in_parseable_form() {
        use crate::equation_engine::parse;

        let f = parse("1e999 * r - 1e999 * k").expect("should parse");
        assert_eq!(f.to_string(), "(((1 / 0) * r) - ((1 / 0) * k))");
        let reparsed = parse(&f.to_string()).expect("display output should parse");
        let bindings = [Binding::r(2.0), Binding::k(-1.0)];
        assert_eq!(reparsed.eval(&bindings), Ok(f64::INFINITY));

        for value in [f64::INFINITY, f64::NEG_INFINITY] {
            let reparsed = parse(&Expr::constant(value).to_string()).expect("should parse");
            assert_eq!(reparsed.eval::<f64>(&[]), Ok(value));
        }
        let nan = parse(&Expr::constant(f64::NAN).to_string()).expect("should parse");
        assert!(nan.eval::<f64>(&[]).expect("constant").is_nan());
    }

    #[test]
    fn equality_is_structural() {
        let a = Var::X * Var::Y + 1.0;
        let b = Var::X * Var::Y + 1.0;
        let c = Var::Y * Var::X + 1.0;
        assert_eq!(a, b);
        assert_ne!(a, c);
        let square = Function::unary("square", Var::X, |x| x * x);
        let same = Expr::from(square.clone());
        assert_eq!(same, Expr::from(square));
        assert_ne!(
            same,
            Expr::from(Function::unary("square", Var::X, |x| x * x))
        );
    }

    #[test]
    fn clones_share_children() {
        let f = Var::X * Var::Y;
        let g = f.clone();
        match (&f, &g) {
            (Expr::Binary(_, lhs_f, _), Expr::Binary(_, lhs_g, _)) => {
                assert!(Arc::ptr_eq(lhs_f, lhs_g));
            }
            other => panic!("expected binary nodes, got {other:?}"),
        }
    }
}
