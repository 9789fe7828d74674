use crate::expression::WasmExpression;
use anyhow::Context;
use js_sys::Float64Array;
use numerov_core::equation_engine::CompiledCurvature;
use numerov_core::physics::{CurvatureModel, PhysicalConstants};
use numerov_core::{Expr, Field, LatticeConfig, NumerovSweep};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// A fully tabulated field.
#[wasm_bindgen]
pub struct WasmField {
    field: Field<f64>,
}

#[wasm_bindgen]
impl WasmField {
    /// Builds a field from a lattice config (`{ radial, momentum }`), a curvature model
    /// (`{ kind: "coulomb" | "nuclear" | "custom", source? }`) and optional constants.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, model: JsValue, constants: JsValue) -> Result<WasmField, JsValue> {
        console_error_panic_hook::set_once();
        let (config, curvature) = decode_request(config, model, constants)?;
        let field = Field::from_expr(config, &curvature)
            .map_err(|e| JsValue::from_str(&format!("Field construction failed: {}", e)))?;
        Ok(WasmField { field })
    }

    /// Builds a field from an already parsed curvature expression.
    pub fn from_expression(
        config: JsValue,
        curvature: &WasmExpression,
    ) -> Result<WasmField, JsValue> {
        console_error_panic_hook::set_once();
        let config = decode_config(config)?;
        let field = Field::from_expr(config, curvature.expr())
            .map_err(|e| JsValue::from_str(&format!("Field construction failed: {}", e)))?;
        Ok(WasmField { field })
    }

    pub fn at(&self, r: usize, k: usize) -> Result<f64, JsValue> {
        self.field.get(r, k).ok_or_else(|| {
            JsValue::from_str(&format!(
                "Index ({}, {}) outside {}x{} lattice",
                r,
                k,
                self.field.size_r(),
                self.field.size_k()
            ))
        })
    }

    pub fn interpolate(&self, r: f64, k: f64) -> Result<f64, JsValue> {
        self.field
            .interpolate(r, k)
            .map_err(|e| JsValue::from_str(&format!("{}", e)))
    }

    pub fn radial_profile(&self, k: usize) -> Result<Float64Array, JsValue> {
        if k >= self.field.size_k() {
            return Err(JsValue::from_str("Momentum index out of range."));
        }
        Ok(Float64Array::from(self.field.radial_profile(k).as_slice()))
    }

    /// All values in column-major order: `values[k * size_r + r]`.
    pub fn values(&self) -> Float64Array {
        Float64Array::from(self.field.values().as_slice())
    }

    pub fn size_r(&self) -> usize {
        self.field.size_r()
    }

    pub fn size_k(&self) -> usize {
        self.field.size_k()
    }

    pub fn non_finite_count(&self) -> usize {
        self.field.non_finite_count()
    }
}

#[derive(Serialize)]
struct FieldProgress {
    done: bool,
    current_row: usize,
    total_rows: usize,
}

enum RunnerState {
    Sweeping(NumerovSweep<f64, CompiledCurvature<f64>>),
    Finished(Field<f64>),
}

impl RunnerState {
    fn new(config: LatticeConfig, curvature: &Expr) -> anyhow::Result<Self> {
        config.validate().context("Invalid lattice")?;
        let compiled = CompiledCurvature::new(curvature).context("Curvature rejected")?;
        let sweep = NumerovSweep::new(config, compiled).context("Curvature rejected")?;
        Ok(RunnerState::Sweeping(sweep))
    }

    fn progress(&self) -> FieldProgress {
        match self {
            RunnerState::Sweeping(sweep) => FieldProgress {
                done: false,
                current_row: sweep.rows_completed(),
                total_rows: sweep.total_rows(),
            },
            RunnerState::Finished(field) => {
                let total_rows = field.size_r().saturating_sub(2);
                FieldProgress {
                    done: true,
                    current_row: total_rows,
                    total_rows,
                }
            }
        }
    }
}

/// Advances the sweep by up to `batch_size` rows, finishing the field once every row is done.
fn advance_runner(
    slot: &mut Option<RunnerState>,
    batch_size: usize,
) -> anyhow::Result<FieldProgress> {
    let state = slot.take().context("Runner not initialized")?;
    let next = match state {
        RunnerState::Sweeping(mut sweep) => {
            for _ in 0..batch_size {
                if !sweep.step_row()? {
                    break;
                }
            }
            if sweep.is_done() {
                RunnerState::Finished(sweep.finish()?)
            } else {
                RunnerState::Sweeping(sweep)
            }
        }
        finished @ RunnerState::Finished(_) => finished,
    };
    let progress = next.progress();
    *slot = Some(next);
    Ok(progress)
}

/// Builds a field a batch of radial rows at a time so the caller can report progress.
#[wasm_bindgen]
pub struct WasmFieldRunner {
    state: Option<RunnerState>,
}

#[wasm_bindgen]
impl WasmFieldRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        model: JsValue,
        constants: JsValue,
    ) -> Result<WasmFieldRunner, JsValue> {
        console_error_panic_hook::set_once();
        let (config, curvature) = decode_request(config, model, constants)?;
        let state = RunnerState::new(config, &curvature)
            .map_err(|e| JsValue::from_str(&format!("{:#}", e)))?;
        Ok(WasmFieldRunner { state: Some(state) })
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, Some(RunnerState::Finished(_)) | None)
    }

    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let progress = advance_runner(&mut self.state, batch_size as usize)
            .map_err(|e| JsValue::from_str(&format!("{:#}", e)))?;
        to_value(&progress).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        to_value(&state.progress())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn get_result(&self) -> Result<WasmField, JsValue> {
        match &self.state {
            Some(RunnerState::Finished(field)) => Ok(WasmField {
                field: field.clone(),
            }),
            Some(RunnerState::Sweeping(_)) => Err(JsValue::from_str(
                "Field is still being computed; call run_steps until done.",
            )),
            None => Err(JsValue::from_str("Runner not initialized")),
        }
    }
}

fn decode_config(config: JsValue) -> Result<LatticeConfig, JsValue> {
    if config.is_undefined() || config.is_null() {
        return Ok(LatticeConfig::default());
    }
    from_value(config).map_err(|e| JsValue::from_str(&format!("Invalid lattice config: {}", e)))
}

fn decode_request(
    config: JsValue,
    model: JsValue,
    constants: JsValue,
) -> Result<(LatticeConfig, Expr), JsValue> {
    let config = decode_config(config)?;
    let model: CurvatureModel = if model.is_undefined() || model.is_null() {
        CurvatureModel::default()
    } else {
        from_value(model)
            .map_err(|e| JsValue::from_str(&format!("Invalid curvature model: {}", e)))?
    };
    let constants: PhysicalConstants = if constants.is_undefined() || constants.is_null() {
        PhysicalConstants::default()
    } else {
        from_value(constants)
            .map_err(|e| JsValue::from_str(&format!("Invalid physical constants: {}", e)))?
    };
    let curvature = model
        .build(&constants)
        .map_err(|e| JsValue::from_str(&format!("Invalid curvature source: {}", e)))?;
    Ok((config, curvature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use numerov_core::AxisSpec;

    fn small_config() -> LatticeConfig {
        LatticeConfig::new(AxisSpec::new(10, 0.0, 5.0), AxisSpec::new(6, 0.0, 3.0))
            .expect("valid lattice")
    }

    #[test]
    fn runner_matches_direct_solve() {
        let curvature = CurvatureModel::Coulomb
            .build(&PhysicalConstants::default())
            .expect("curvature");
        let mut slot = Some(RunnerState::new(small_config(), &curvature).expect("runner"));

        let progress = advance_runner(&mut slot, 3).expect("advance");
        assert!(!progress.done);
        assert_eq!(progress.current_row, 3);
        assert_eq!(progress.total_rows, 8);

        let progress = advance_runner(&mut slot, 100).expect("advance");
        assert!(progress.done);
        assert_eq!(progress.current_row, 8);

        let direct = Field::from_expr(small_config(), &curvature).expect("field");
        match slot {
            Some(RunnerState::Finished(field)) => assert_eq!(field, direct),
            _ => panic!("runner should hold the finished field"),
        }
    }

    #[test]
    fn finished_runner_is_stable() {
        let curvature = Expr::one();
        let mut slot = Some(RunnerState::new(small_config(), &curvature).expect("runner"));
        let first = advance_runner(&mut slot, 100).expect("advance");
        let again = advance_runner(&mut slot, 100).expect("advance");
        assert!(first.done && again.done);
        assert_eq!(first.current_row, again.current_row);
    }

    #[test]
    fn runner_rejects_foreign_variables() {
        let curvature = numerov_core::equation_engine::parse("r * x").expect("parse");
        let err = RunnerState::new(small_config(), &curvature)
            .err()
            .expect("x is not a lattice coordinate");
        assert!(format!("{:#}", err).contains("`x`"), "unexpected message: {err:#}");
    }

    #[test]
    fn uninitialized_runner_reports_error() {
        let mut slot = None;
        assert!(advance_runner(&mut slot, 1).is_err());
    }
}
