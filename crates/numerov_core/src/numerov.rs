//! Numerov-style field solver over a (radial, momentum) lattice.
//!
//! The field `u[i, j]` is filled by the three-point recurrence
//! ```text
//! u[i+1, j+1] = [2 u[i, j] (1 - 5h²/12 g(r_i, k_j))
//!                - u[i-1, j-1] (1 + h²/12 g(r_{i-1}, k_{j-1}))]
//!               / (1 + h²/12 g(r_{i+1}, k_{j+1}))
//! ```
//! with `h` the radial step. Both indices advance together, so each diagonal of the lattice
//! is an independent chain. This is a modeling simplification: the usual Numerov scheme
//! integrates one coordinate with the other held fixed, and the accuracy of the coupled sweep
//! is bounded accordingly.
//!
//! Boundary policy: `u[0, ·] = u[·, 0] = 0`, and `u[1, ·]`, `u[·, 1]` are seeded with
//! `sqrt(ε)` of the scalar type. Zero denominators and singular curvature values are not
//! guarded; they propagate as IEEE infinities or NaN into the affected cells.

use crate::equation_engine::CompiledCurvature;
use crate::error::FieldError;
use crate::expression::Expr;
use crate::lattice::{AxisSpec, LatticeConfig};
use crate::traits::{Curvature, Scalar};
use nalgebra::DMatrix;

/// Seed placed on the first row and column next to the origin.
pub fn regularization<T: Scalar>() -> T {
    T::epsilon().sqrt()
}

/// A resumable sweep that fills the field one radial row at a time.
///
/// Cells start out as NaN, so any cell the sweep fails to reach stays observable.
pub struct NumerovSweep<T: Scalar, C: Curvature<T>> {
    config: LatticeConfig,
    curvature: C,
    values: DMatrix<T>,
    h2: T,
    row: usize,
}

impl<T: Scalar, C: Curvature<T>> NumerovSweep<T, C> {
    pub fn new(config: LatticeConfig, curvature: C) -> Result<Self, FieldError> {
        config.validate()?;
        curvature.check()?;

        let size_r = config.radial.size;
        let size_k = config.momentum.size;
        let mut values = DMatrix::from_element(size_r, size_k, T::nan());
        values.row_mut(0).fill(T::zero());
        values.column_mut(0).fill(T::zero());
        let seed = regularization::<T>();
        if size_r > 1 {
            for k in 1..size_k {
                values[(1, k)] = seed;
            }
        }
        if size_k > 1 {
            for r in 1..size_r {
                values[(r, 1)] = seed;
            }
        }

        let h = T::lift(config.radial.step());
        log::debug!(
            "numerov sweep: {}x{} lattice, r in [{}, {}), k in [{}, {})",
            size_r,
            size_k,
            config.radial.min,
            config.radial.max,
            config.momentum.min,
            config.momentum.max
        );

        Ok(Self {
            config,
            curvature,
            values,
            h2: h * h,
            row: 1,
        })
    }

    /// Number of radial rows the recurrence advances from.
    pub fn total_rows(&self) -> usize {
        self.config.radial.size.saturating_sub(2)
    }

    pub fn rows_completed(&self) -> usize {
        self.row - 1
    }

    pub fn is_done(&self) -> bool {
        self.row + 1 >= self.config.radial.size
    }

    /// Advances from the next pending row `i`, writing row `i + 1`.
    ///
    /// Returns `false` once there is nothing left to do.
    pub fn step_row(&mut self) -> Result<bool, FieldError> {
        if self.is_done() {
            return Ok(false);
        }
        let i = self.row;
        for j in 1..self.config.momentum.size.saturating_sub(1) {
            let next = self.recurrence(i, j)?;
            self.values[(i + 1, j + 1)] = next;
        }
        self.row += 1;
        Ok(true)
    }

    pub fn run(&mut self) -> Result<(), FieldError> {
        while self.step_row()? {}
        Ok(())
    }

    /// Completes any pending rows and returns the field.
    pub fn finish(mut self) -> Result<Field<T>, FieldError> {
        self.run()?;
        let field = Field {
            config: self.config,
            values: self.values,
        };
        let non_finite = field.non_finite_count();
        if non_finite > 0 {
            log::warn!(
                "numerov sweep finished with {non_finite} non-finite cells; \
                 the curvature is singular or a denominator vanished"
            );
        }
        log::debug!(
            "numerov sweep finished: {} rows",
            field.config.radial.size.saturating_sub(2)
        );
        Ok(field)
    }

    fn curvature_at(&self, i: usize, j: usize) -> Result<T, FieldError> {
        let r = self.config.radial.coordinate(i);
        let k = self.config.momentum.coordinate(j);
        Ok(self.curvature.evaluate(r, k)?)
    }

    fn recurrence(&self, i: usize, j: usize) -> Result<T, FieldError> {
        let one = T::one();
        let twelfth = T::lift(1.0 / 12.0);
        let five_twelfths = T::lift(5.0 / 12.0);

        let lead = T::lift(2.0)
            * self.values[(i, j)]
            * (one - five_twelfths * self.h2 * self.curvature_at(i, j)?);
        // Predecessors on the origin row or column vanish identically; the curvature is not
        // sampled there.
        let trail = if i == 1 || j == 1 {
            T::zero()
        } else {
            let g = self.curvature_at(i - 1, j - 1)?;
            self.values[(i - 1, j - 1)] * (one + self.h2 * twelfth * g)
        };
        let denominator = one + self.h2 * twelfth * self.curvature_at(i + 1, j + 1)?;
        Ok((lead - trail) / denominator)
    }
}

/// The tabulated field, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<T: Scalar> {
    config: LatticeConfig,
    values: DMatrix<T>,
}

impl<T: Scalar> Field<T> {
    /// Runs a complete sweep with any curvature implementation.
    ///
    /// A tree-walked `Expr` re-differentiates its `Derivative` nodes at every lattice point;
    /// prefer [`Field::from_expr`], which differentiates once while compiling.
    pub fn solve<C: Curvature<T>>(config: LatticeConfig, curvature: C) -> Result<Self, FieldError> {
        NumerovSweep::new(config, curvature)?.finish()
    }

    /// Compiles `curvature` against `[r, k]` and runs a complete sweep.
    pub fn from_expr(config: LatticeConfig, curvature: &Expr) -> Result<Self, FieldError> {
        config.validate()?;
        let compiled = CompiledCurvature::new(curvature)?;
        Self::solve(config, compiled)
    }

    /// Value at lattice indices `(r, k)`.
    ///
    /// *Panics if either index is out of range.*
    pub fn at(&self, r: usize, k: usize) -> T {
        self.values[(r, k)]
    }

    pub fn get(&self, r: usize, k: usize) -> Option<T> {
        self.values.get((r, k)).copied()
    }

    pub fn size_r(&self) -> usize {
        self.config.radial.size
    }

    pub fn size_k(&self) -> usize {
        self.config.momentum.size
    }

    pub fn config(&self) -> &LatticeConfig {
        &self.config
    }

    pub fn r_value(&self, index: usize) -> T {
        self.config.radial.coordinate(index)
    }

    pub fn k_value(&self, index: usize) -> T {
        self.config.momentum.coordinate(index)
    }

    /// All radial values at momentum index `k`.
    ///
    /// *Panics if `k` is out of range.*
    pub fn radial_profile(&self, k: usize) -> Vec<T> {
        self.values.column(k).iter().copied().collect()
    }

    pub fn values(&self) -> &DMatrix<T> {
        &self.values
    }

    pub fn non_finite_count(&self) -> usize {
        self.values.iter().filter(|value| !value.is_finite()).count()
    }

    /// Bilinear interpolation between lattice points.
    ///
    /// Positions outside `[min, last lattice point]` on either axis are rejected.
    pub fn interpolate(&self, r: T, k: T) -> Result<T, FieldError> {
        let out_of_range = || FieldError::OutOfRange {
            r: r.lower(),
            k: k.lower(),
        };
        let (r0, r1, tr) = locate(&self.config.radial, r).ok_or_else(out_of_range)?;
        let (k0, k1, tk) = locate(&self.config.momentum, k).ok_or_else(out_of_range)?;
        let one = T::one();
        Ok((one - tr) * (one - tk) * self.values[(r0, k0)]
            + tr * (one - tk) * self.values[(r1, k0)]
            + (one - tr) * tk * self.values[(r0, k1)]
            + tr * tk * self.values[(r1, k1)])
    }
}

/// Returns the bracketing indices and the fractional offset between them.
fn locate<T: Scalar>(axis: &AxisSpec, x: T) -> Option<(usize, usize, T)> {
    let position = (x - T::lift(axis.min)) / T::lift(axis.step());
    let last = T::lift((axis.size - 1) as f64);
    // negated comparison also rejects NaN
    if !(position >= T::zero() && position <= last) {
        return None;
    }
    let lower = position.floor().to_usize()?.min(axis.size - 1);
    let upper = (lower + 1).min(axis.size - 1);
    Some((lower, upper, position - T::lift(lower as f64)))
}
