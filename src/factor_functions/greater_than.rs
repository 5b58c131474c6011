use crate::{error::Result, model::value::Value};

use super::factor_function::{check_arity, indicator_energy, FactorFunction};

// out = a > b, with arguments ordered (out, a, b)
#[derive(Debug, Default, Clone)]
pub struct GreaterThan;

impl FactorFunction for GreaterThan {
    fn name(&self) -> &str {
        "GreaterThan"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        check_arity(arguments, 3)?;
        let indicator = arguments[0].to_bool()?;
        let greater = arguments[1].to_f64()? > arguments[2].to_f64()?;
        Ok(indicator_energy(indicator == greater))
    }

    fn is_directed(&self) -> bool {
        true
    }

    fn directed_to_indices(&self, _num_edges: usize) -> Option<Vec<usize>> {
        Some(vec![0])
    }

    fn is_deterministic_directed(&self) -> bool {
        true
    }

    fn eval_deterministic(&self, arguments: &mut [Value]) -> Result<()> {
        check_arity(arguments, 3)?;
        arguments[0] = Value::Bool(arguments[1].to_f64()? > arguments[2].to_f64()?);
        Ok(())
    }
}
