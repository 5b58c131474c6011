use crate::{
    error::{FactorGraphError, Result},
    model::value::Value,
};

use super::factor_function::{check_arity, FactorFunction};

// Arguments (index, prior vector): energy is -ln prior[index]
#[derive(Debug, Default, Clone)]
pub struct Prior;

impl FactorFunction for Prior {
    fn name(&self) -> &str {
        "Prior"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        check_arity(arguments, 2)?;
        let index = arguments[0].to_index()?;
        let prior = arguments[1].as_slice()?;
        let weight = prior.get(index).ok_or_else(|| {
            FactorGraphError::InvalidValue(format!(
                "index {} is out of range for a prior of length {}",
                index,
                prior.len()
            ))
        })?;
        Ok(-weight.ln())
    }
}
