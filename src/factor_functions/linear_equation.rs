use crate::{
    error::{FactorGraphError, Result},
    model::value::Value,
};

use super::factor_function::{check_arity, FactorFunction};

// Soft constraint out = 1 + sum_i c_i * x_i, penalized quadratically and scaled by 1 / smoothing.
// Arguments are ordered (out, x_1, ..., x_n).
#[derive(Debug, Clone)]
pub struct LinearEquation {
    constants: Vec<f64>,
    beta: f64,
}

impl LinearEquation {
    pub fn new(constants: Vec<f64>) -> Self {
        LinearEquation {
            constants,
            beta: 1.,
        }
    }

    pub fn with_smoothing(constants: Vec<f64>, smoothing: f64) -> Result<Self> {
        if !(smoothing > 0.) {
            return Err(FactorGraphError::InvalidArgument(format!(
                "smoothing must be positive, got {}",
                smoothing
            )));
        }
        Ok(LinearEquation {
            constants,
            beta: 1. / smoothing,
        })
    }
}

impl FactorFunction for LinearEquation {
    fn name(&self) -> &str {
        "LinearEquation"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        check_arity(arguments, self.constants.len() + 1)?;
        let out = arguments[0].to_f64()?;
        let mut sum = 1.;
        for (constant, argument) in self.constants.iter().zip(&arguments[1..]) {
            sum += constant * argument.to_f64()?;
        }
        Ok((sum - out).powi(2) * self.beta)
    }
}
