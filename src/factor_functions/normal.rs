use crate::{
    error::{FactorGraphError, Result},
    model::value::Value,
};

use super::factor_function::{index_range, FactorFunction};

// Independent normal samples. With constant parameters every argument is a sample;
// otherwise arguments 0 and 1 are the mean and precision and the rest are samples.
#[derive(Debug, Clone)]
pub struct Normal {
    parameters: Option<(f64, f64)>, // (mean, precision)
}

impl Normal {
    pub fn new() -> Self {
        Normal { parameters: None }
    }

    pub fn with_parameters(mean: f64, precision: f64) -> Result<Self> {
        if precision < 0. {
            return Err(FactorGraphError::NegativePrecision(precision));
        }
        Ok(Normal {
            parameters: Some((mean, precision)),
        })
    }

    fn first_sample_index(&self) -> usize {
        if self.parameters.is_some() {
            0
        } else {
            2
        }
    }
}

impl Default for Normal {
    fn default() -> Self {
        Normal::new()
    }
}

impl FactorFunction for Normal {
    fn name(&self) -> &str {
        "Normal"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        let (mean, precision) = match self.parameters {
            Some(parameters) => parameters,
            None => {
                if arguments.len() < 2 {
                    return Err(FactorGraphError::DimensionMismatch {
                        expected: 2,
                        got: arguments.len(),
                    });
                }
                let precision = arguments[1].to_f64()?;
                if precision < 0. {
                    return Err(FactorGraphError::NegativePrecision(precision));
                }
                (arguments[0].to_f64()?, precision)
            }
        };

        let samples = &arguments[self.first_sample_index()..];
        let mut sum = 0.;
        for sample in samples {
            let relative = sample.to_f64()? - mean;
            sum += relative * relative;
        }
        let n = samples.len() as f64;
        // 0 * inf is NaN when precision is zero and there are no samples
        if n == 0. {
            return Ok(0.);
        }
        Ok(sum * precision * 0.5 - n * precision.ln() * 0.5)
    }

    fn is_directed(&self) -> bool {
        true
    }

    fn directed_to_indices(&self, num_edges: usize) -> Option<Vec<usize>> {
        Some(index_range(self.first_sample_index(), num_edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_parameters() {
        let normal = Normal::with_parameters(1., 4.).unwrap();
        let energy = normal
            .eval_energy(&[Value::Real(2.), Value::Real(0.)])
            .unwrap();
        assert!((energy - (2. * 4. * 0.5 - 2. * 4f64.ln() * 0.5)).abs() < 1e-12);
        assert_eq!(normal.directed_to_indices(2), Some(vec![0, 1]));
    }

    #[test]
    fn negative_precision_is_rejected() {
        assert!(Normal::with_parameters(0., -1.).is_err());
        let normal = Normal::new();
        assert_eq!(
            normal.eval_energy(&[Value::Real(0.), Value::Real(-2.), Value::Real(1.)]),
            Err(FactorGraphError::NegativePrecision(-2.))
        );
    }
}
