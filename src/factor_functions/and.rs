use crate::{error::Result, model::value::Value};

use super::factor_function::{check_arity, indicator_energy, FactorFunction};

// out = in_1 && in_2 && ... ; the output is argument 0
#[derive(Debug, Default, Clone)]
pub struct And;

fn conjunction(inputs: &[Value]) -> Result<bool> {
    let mut value = true;
    for input in inputs {
        value &= input.to_bool()?;
    }
    Ok(value)
}

impl FactorFunction for And {
    fn name(&self) -> &str {
        "And"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        check_arity(arguments, 1)?;
        let output = arguments[0].to_bool()?;
        Ok(indicator_energy(output == conjunction(&arguments[1..])?))
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
        check_arity(arguments, 1)?;
        arguments[0] = Value::Bool(conjunction(&arguments[1..])?);
        Ok(())
    }
}
