use numerov_core::equation_engine::parse;
use numerov_core::{Binding, Expr, Var};
use serde_wasm_bindgen::from_value;
use std::collections::BTreeMap;
use wasm_bindgen::prelude::*;

/// A parsed expression graph, e.g. `"k*k - 2/r"`.
#[wasm_bindgen]
pub struct WasmExpression {
    expr: Expr,
}

#[wasm_bindgen]
impl WasmExpression {
    #[wasm_bindgen(constructor)]
    pub fn new(source: &str) -> Result<WasmExpression, JsValue> {
        console_error_panic_hook::set_once();
        let expr = parse(source).map_err(|e| JsValue::from_str(&format!("Parse error: {}", e)))?;
        Ok(WasmExpression { expr })
    }

    /// Evaluates with bindings given as an object, e.g. `{ r: 1.5, k: 0.2 }`.
    pub fn evaluate(&self, bindings: JsValue) -> Result<f64, JsValue> {
        let values: BTreeMap<String, f64> = from_value(bindings)
            .map_err(|e| JsValue::from_str(&format!("Invalid bindings: {}", e)))?;
        evaluate_named(&self.expr, &values).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
    }

    /// Closed-form derivative with respect to the named variable.
    pub fn diff(&self, var_name: &str) -> Result<WasmExpression, JsValue> {
        let var = resolve_var(var_name).map_err(|e| JsValue::from_str(&format!("{}", e)))?;
        let expr = self
            .expr
            .diff(var)
            .map_err(|e| JsValue::from_str(&format!("Differentiation failed: {}", e)))?;
        Ok(WasmExpression { expr })
    }

    /// Lazy derivative node; differentiation happens on each evaluation.
    pub fn derivative(&self, var_name: &str) -> Result<WasmExpression, JsValue> {
        let var = resolve_var(var_name).map_err(|e| JsValue::from_str(&format!("{}", e)))?;
        Ok(WasmExpression {
            expr: self.expr.derivative(var),
        })
    }

    #[wasm_bindgen(js_name = toString)]
    pub fn display(&self) -> String {
        self.expr.to_string()
    }

    pub fn variables(&self) -> Vec<String> {
        self.expr
            .variables()
            .into_iter()
            .map(|var| var.name().to_string())
            .collect()
    }
}

impl WasmExpression {
    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

pub(crate) fn resolve_var(name: &str) -> anyhow::Result<Var> {
    Var::from_name(name).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown variable `{}`; expected one of {}",
            name,
            Var::ALL.map(Var::name).join(", ")
        )
    })
}

fn evaluate_named(expr: &Expr, values: &BTreeMap<String, f64>) -> anyhow::Result<f64> {
    let bindings = values
        .iter()
        .map(|(name, value)| -> anyhow::Result<Binding<f64>> {
            Ok(Binding::new(resolve_var(name)?, *value))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(expr.eval(&bindings)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn resolves_variables_by_name() {
        assert_eq!(resolve_var("k").expect("k"), Var::K);
        let err = resolve_var("w").expect_err("unknown name");
        assert!(err.to_string().contains("r, k, x, y, z"), "unexpected message: {err}");
    }

    #[test]
    fn evaluates_with_named_bindings() {
        let expr = parse("k*k - 2/r").expect("parse");
        let value = evaluate_named(&expr, &named(&[("r", 4.0), ("k", 3.0)])).expect("evaluate");
        assert_eq!(value, 8.5);
    }

    #[test]
    fn missing_and_unknown_bindings_are_errors() {
        let expr = parse("k*k - 2/r").expect("parse");
        let err = evaluate_named(&expr, &named(&[("k", 3.0)])).expect_err("r is unbound");
        assert!(err.to_string().contains("`r`"), "unexpected message: {err}");
        assert!(evaluate_named(&expr, &named(&[("q", 1.0)])).is_err());
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::WasmExpression;
    use serde_wasm_bindgen::to_value;
    use std::collections::BTreeMap;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn parses_differentiates_and_evaluates() {
        let expr = WasmExpression::new("x*x*x + y").expect("parse");
        assert_eq!(expr.variables(), vec!["x".to_string(), "y".to_string()]);
        let dx = expr.diff("x").expect("diff");
        let bindings: BTreeMap<&str, f64> = [("x", 2.0), ("y", 7.0)].into_iter().collect();
        let value = dx.evaluate(to_value(&bindings).expect("bindings")).expect("evaluate");
        assert_eq!(value, 12.0);
    }

    #[wasm_bindgen_test]
    fn rejects_malformed_source() {
        assert!(WasmExpression::new("k * (").is_err());
        assert!(WasmExpression::new(&vec!["r"; 50_000].join(" + ")).is_err());
        let expr = WasmExpression::new("k").expect("parse");
        assert!(expr.diff("w").is_err());
    }
}
