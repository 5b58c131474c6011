use crate::{error::Result, model::value::Value};

use super::factor_function::{check_arity, indicator_energy, FactorFunction};

// Argument 0 indicates whether all remaining arguments are equal
#[derive(Debug, Default, Clone)]
pub struct Equals;

fn all_equal(values: &[Value]) -> Result<bool> {
    let Some((first, rest)) = values.split_first() else {
        return Ok(true);
    };
    let first = first.to_f64()?;
    for value in rest {
        if value.to_f64()? != first {
            return Ok(false);
        }
    }
    Ok(true)
}

impl FactorFunction for Equals {
    fn name(&self) -> &str {
        "Equals"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        check_arity(arguments, 1)?;
        let indicator = arguments[0].to_bool()?;
        Ok(indicator_energy(indicator == all_equal(&arguments[1..])?))
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
        arguments[0] = Value::Bool(all_equal(&arguments[1..])?);
        Ok(())
    }
}

// Undirected constraint forcing every argument to the same value
#[derive(Debug, Default, Clone)]
pub struct Equality;

impl FactorFunction for Equality {
    fn name(&self) -> &str {
        "Equality"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        let Some((first, rest)) = arguments.split_first() else {
            return Ok(0.);
        };
        let first = first.key();
        Ok(indicator_energy(rest.iter().all(|value| value.key() == first)))
    }
}
