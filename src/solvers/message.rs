use ndarray::Array1;

use crate::error::{FactorGraphError, Result};

// Scales a probability message to sum to one
pub(crate) fn normalize(message: &mut Array1<f64>, node: usize, port: usize) -> Result<()> {
    let total = message.sum();
    if !(total > 0.) || !total.is_finite() {
        return Err(FactorGraphError::ZeroNormalization { node, port });
    }
    message.mapv_inplace(|value| value / total);
    Ok(())
}

// Shifts a cost message so that its minimum is zero
pub(crate) fn normalize_costs(message: &mut Array1<f64>, node: usize, port: usize) -> Result<()> {
    let minimum = message.fold(f64::INFINITY, |minimum, value| minimum.min(*value));
    if !minimum.is_finite() {
        return Err(FactorGraphError::ZeroNormalization { node, port });
    }
    message.mapv_inplace(|value| value - minimum);
    Ok(())
}

// Converts costs to normalized probabilities
pub(crate) fn costs_to_probabilities(costs: &[f64]) -> Vec<f64> {
    let minimum = costs.iter().fold(f64::INFINITY, |minimum, value| minimum.min(*value));
    if !minimum.is_finite() {
        return vec![0.; costs.len()];
    }
    let weights = costs
        .iter()
        .map(|cost| (-(cost - minimum)).exp())
        .collect::<Vec<_>>();
    let total = weights.iter().sum::<f64>();
    weights.into_iter().map(|weight| weight / total).collect()
}

// (1 - d) * new + d * old, elementwise
pub(crate) fn damp(new: &mut Array1<f64>, old: &Array1<f64>, damping: f64) {
    if damping == 0. {
        return;
    }
    if damping == 1. {
        new.assign(old);
        return;
    }
    for (value, previous) in new.iter_mut().zip(old.iter()) {
        *value = if value.is_infinite() || previous.is_infinite() {
            f64::INFINITY
        } else {
            (1. - damping) * *value + damping * previous
        };
    }
}

// Largest elementwise difference; equal infinities count as no change
pub(crate) fn max_change(new: &Array1<f64>, old: &Array1<f64>) -> f64 {
    new.iter()
        .zip(old.iter())
        .map(|(a, b)| if a == b { 0. } else { (a - b).abs() })
        .fold(0., f64::max)
}

// -sum p ln p, skipping zero entries
pub(crate) fn entropy(probabilities: &[f64]) -> f64 {
    probabilities
        .iter()
        .filter(|p| **p > 0.)
        .map(|p| -p * p.ln())
        .sum()
}

// sum p * energy, skipping zero-probability entries
pub(crate) fn expected_energy(probabilities: &[f64], energies: impl Iterator<Item = f64>) -> f64 {
    probabilities
        .iter()
        .zip(energies)
        .filter(|(p, _)| **p > 0.)
        .map(|(p, energy)| p * energy)
        .sum()
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (index, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn all_zero_messages_fail_to_normalize() {
        let mut message = array![0., 0.];
        assert_eq!(
            normalize(&mut message, 4, 1),
            Err(FactorGraphError::ZeroNormalization { node: 4, port: 1 })
        );
        let mut costs = array![f64::INFINITY, f64::INFINITY];
        assert!(normalize_costs(&mut costs, 4, 1).is_err());
    }

    #[test]
    fn damping_mixes_old_and_new() {
        let mut message = array![1., 0.];
        damp(&mut message, &array![0., 1.], 0.25);
        assert_eq!(message, array![0.75, 0.25]);
        let mut costs = array![f64::INFINITY, 1.];
        damp(&mut costs, &array![0., 3.], 0.5);
        assert_eq!(costs, array![f64::INFINITY, 2.]);
    }

    #[test]
    fn costs_convert_to_probabilities() {
        let probabilities = costs_to_probabilities(&[0., f64::INFINITY, 0.]);
        assert_eq!(probabilities, vec![0.5, 0., 0.5]);
        assert!((entropy(&probabilities) - 2f64.ln()).abs() < 1e-12);
    }
}
