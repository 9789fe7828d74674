//! Variable identities and the values bound to them at evaluation time.

use crate::error::ExprError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one physical quantity.
///
/// Bindings are matched against expressions by this identity, never by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Var {
    /// Radial coordinate.
    R,
    /// Momentum.
    K,
    X,
    Y,
    Z,
}

impl Var {
    pub const ALL: [Var; 5] = [Var::R, Var::K, Var::X, Var::Y, Var::Z];

    /// Canonical name used by the parser and by `Display`.
    pub fn name(self) -> &'static str {
        match self {
            Var::R => "r",
            Var::K => "k",
            Var::X => "x",
            Var::Y => "y",
            Var::Z => "z",
        }
    }

    pub fn from_name(name: &str) -> Option<Var> {
        Var::ALL.into_iter().find(|var| var.name() == name)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value supplied for one variable identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding<T> {
    var: Var,
    value: T,
}

impl<T: Copy> Binding<T> {
    pub fn new(var: Var, value: T) -> Self {
        Self { var, value }
    }

    /// Binds the radial coordinate.
    pub fn r(value: T) -> Self {
        Self::new(Var::R, value)
    }

    /// Binds the momentum.
    pub fn k(value: T) -> Self {
        Self::new(Var::K, value)
    }

    pub fn var(&self) -> Var {
        self.var
    }

    pub fn get(&self) -> T {
        self.value
    }

    /// Converts the payload, keeping the identity.
    pub fn map<U: Copy>(self, f: impl FnOnce(T) -> U) -> Binding<U> {
        Binding::new(self.var, f(self.value))
    }
}

/// Returns the value of the first binding whose identity is `var`.
pub fn lookup<T: Copy>(bindings: &[Binding<T>], var: Var) -> Result<T, ExprError> {
    bindings
        .iter()
        .find(|binding| binding.var == var)
        .map(Binding::get)
        .ok_or(ExprError::InvalidBinding(var))
}
