//! Physical constants, the Reid soft-core potential and the curvature functions built from them.
//!
//! Energies are in MeV and distances in fm.

use crate::binding::Var;
use crate::equation_engine::parse;
use crate::error::ParseError;
use crate::expression::Expr;
use crate::math::{exp, sqrt};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    pub proton_mass_mev: f64,
    pub fine_structure: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            proton_mass_mev: 938.27208816,
            fine_structure: 0.007297,
        }
    }
}

impl PhysicalConstants {
    /// `e = sqrt(4 π α)` in natural units.
    pub fn elementary_charge(&self) -> Expr {
        sqrt(Expr::constant(4.0) * PI * self.fine_structure)
    }
}

/// Reid soft-core potential for the ¹S₀ nucleon-nucleon channel, as a function of `r`.
///
/// Singular at `r = 0`.
pub fn reid_soft_core_1s0() -> Expr {
    const H: f64 = 10.463;
    const MU: f64 = 0.7;
    let mu_r = Var::R * MU;
    -(H * exp(-&mu_r)) / &mu_r
        - (1650.6 * exp(-4.0 * &mu_r)) / &mu_r
        - (6484.2 * exp(-7.0 * &mu_r)) / &mu_r
}

/// `g(r, k) = k² - 4 e² m_p / r`
pub fn coulomb_curvature(constants: &PhysicalConstants) -> Expr {
    let e = constants.elementary_charge();
    Var::K * Var::K - (4.0 * &e * &e * constants.proton_mass_mev) / Var::R
}

/// Coulomb curvature plus the strong interaction: `g(r, k) - 4 m_p V(r)`.
pub fn nuclear_curvature(constants: &PhysicalConstants) -> Expr {
    coulomb_curvature(constants) - 4.0 * constants.proton_mass_mev * reid_soft_core_1s0()
}

/// Selects the curvature a field is built from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurvatureModel {
    Coulomb,
    #[default]
    Nuclear,
    /// Parsed from text, e.g. `"k*k - 2/r"`.
    Custom { source: String },
}

impl CurvatureModel {
    pub fn build(&self, constants: &PhysicalConstants) -> Result<Expr, ParseError> {
        match self {
            CurvatureModel::Coulomb => Ok(coulomb_curvature(constants)),
            CurvatureModel::Nuclear => Ok(nuclear_curvature(constants)),
            CurvatureModel::Custom { source } => parse(source),
        }
    }
}
