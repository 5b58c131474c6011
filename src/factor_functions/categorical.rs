use crate::{
    error::{FactorGraphError, Result},
    model::value::Value,
};

use super::factor_function::{index_range, FactorFunction};

// Categorical samples parameterized by per-category energies `alpha`
// (probability of category i is exp(-alpha_i) / sum_j exp(-alpha_j)).
// Parameters are either constant or the first `dimension` arguments.
#[derive(Debug, Clone)]
pub struct Categorical {
    dimension: usize,
    alphas: Option<Vec<f64>>,
}

impl Categorical {
    pub fn new(dimension: usize) -> Self {
        Categorical {
            dimension,
            alphas: None,
        }
    }

    pub fn with_alphas(alphas: Vec<f64>) -> Self {
        Categorical {
            dimension: alphas.len(),
            alphas: Some(alphas),
        }
    }

    fn first_sample_index(&self) -> usize {
        if self.alphas.is_some() {
            0
        } else {
            self.dimension
        }
    }
}

impl FactorFunction for Categorical {
    fn name(&self) -> &str {
        "Categorical"
    }

    fn eval_energy(&self, arguments: &[Value]) -> Result<f64> {
        let alphas = match &self.alphas {
            Some(alphas) => alphas.clone(),
            None => {
                if arguments.len() <= self.dimension {
                    return Err(FactorGraphError::DimensionMismatch {
                        expected: self.dimension + 1,
                        got: arguments.len(),
                    });
                }
                arguments[..self.dimension]
                    .iter()
                    .map(Value::to_f64)
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let normalization: f64 = alphas.iter().map(|alpha| (-alpha).exp()).sum();
        let samples = &arguments[self.first_sample_index()..];
        let mut sum = 0.;
        for sample in samples {
            let category = sample.to_index()?;
            sum += *alphas.get(category).ok_or_else(|| {
                FactorGraphError::InvalidValue(format!(
                    "category {} is out of range for dimension {}",
                    category, self.dimension
                ))
            })?;
        }
        Ok(sum + samples.len() as f64 * normalization.ln())
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
    fn probabilities_sum_to_one() {
        let categorical = Categorical::with_alphas(vec![0.1, 1.2, 0.7]);
        let total: f64 = (0..3)
            .map(|category| categorical.eval(&[Value::Int(category)]).unwrap())
            .sum();
        assert!((total - 1.).abs() < 1e-12);
        assert!(categorical.eval_energy(&[Value::Int(3)]).is_err());
    }
}
