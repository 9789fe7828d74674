use crate::error::LatticeError;
use crate::traits::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Names the two lattice axes in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Radial,
    Momentum,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Radial => f.write_str("radial"),
            Axis::Momentum => f.write_str("momentum"),
        }
    }
}

/// One axis of the lattice: `size` points starting at `min`, spaced `(max - min) / size`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub size: usize,
    pub min: f64,
    pub max: f64,
}

impl AxisSpec {
    pub fn new(size: usize, min: f64, max: f64) -> Self {
        Self { size, min, max }
    }

    pub fn validate(&self, axis: Axis) -> Result<(), LatticeError> {
        if self.size == 0 {
            return Err(LatticeError::EmptyAxis(axis));
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.max <= self.min {
            return Err(LatticeError::BadBounds {
                axis,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn step(&self) -> f64 {
        (self.max - self.min) / self.size as f64
    }

    pub fn coordinate<T: Scalar>(&self, index: usize) -> T {
        T::lift(self.min) + T::lift(self.step()) * T::lift(index as f64)
    }

    /// Largest coordinate that carries a lattice point.
    pub fn last(&self) -> f64 {
        self.min + self.step() * (self.size - 1) as f64
    }
}

impl Default for AxisSpec {
    fn default() -> Self {
        Self {
            size: 100,
            min: 0.0,
            max: 10.0,
        }
    }
}

/// Lattice parameters fixed at field construction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatticeConfig {
    #[serde(default)]
    pub radial: AxisSpec,
    #[serde(default)]
    pub momentum: AxisSpec,
}

impl LatticeConfig {
    /// Builds a validated configuration.
    pub fn new(radial: AxisSpec, momentum: AxisSpec) -> Result<Self, LatticeError> {
        let config = Self { radial, momentum };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LatticeError> {
        self.radial.validate(Axis::Radial)?;
        self.momentum.validate(Axis::Momentum)
    }

    pub fn axis(&self, axis: Axis) -> &AxisSpec {
        match axis {
            Axis::Radial => &self.radial,
            Axis::Momentum => &self.momentum,
        }
    }
}
