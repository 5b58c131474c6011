use crate::{
    error::{FactorGraphError, Result},
    model::value::Value,
};

use super::factor_function::{check_arity, indicator_energy, FactorFunction};

// quotient = dividend / divisor, with arguments ordered (quotient, dividend, divisor).
// With smoothing the constraint becomes a quadratic penalty scaled by 1 / smoothing.
#[derive(Debug, Default, Clone)]
pub struct Divide {
    beta: Option<f64>,
}

impl Divide {
    pub fn new() -> Self {
        Divide { beta: None }
    }

    pub fn with_smoothing(smoothing: f64) -> Self {
        Divide {
            beta: (smoothing > 0.).then(|| 1. / smoothing),
        }
    }
}

impl FactorFunction for Divide {
    fn name(&self) -> &str {
        "Divide"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        check_arity(arguments, 3)?;
        let quotient = arguments[0].to_f64()?;
        let expected = arguments[1].to_f64()? / arguments[2].to_f64()?;
        if !expected.is_finite() {
            return Ok(f64::INFINITY);
        }
        Ok(match self.beta {
            Some(beta) => (expected - quotient).powi(2) * beta,
            None => indicator_energy(expected == quotient),
        })
    }

    fn is_directed(&self) -> bool {
        true
    }

    fn directed_to_indices(&self, _num_edges: usize) -> Option<Vec<usize>> {
        Some(vec![0])
    }

    fn is_deterministic_directed(&self) -> bool {
        self.beta.is_none()
    }

    fn eval_deterministic(&self, arguments: &mut [Value]) -> Result<()> {
        check_arity(arguments, 3)?;
        let quotient = arguments[1].to_f64()? / arguments[2].to_f64()?;
        if !quotient.is_finite() {
            return Err(FactorGraphError::NonFinite(format!(
                "Divide({}, {})",
                arguments[1], arguments[2]
            )));
        }
        arguments[0] = Value::Real(quotient);
        Ok(())
    }
}
