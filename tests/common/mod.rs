#![allow(dead_code)]

use fgsolve::{Assignment, FactorGraph, VariableId};

// Every full assignment of the flattened variables with its unnormalized probability
pub fn enumerate(graph: &FactorGraph) -> Vec<(Vec<usize>, f64)> {
    let variables = graph.variables_flat();
    let sizes = domain_sizes(graph, &variables);
    let mut labels = vec![0; variables.len()];
    let mut result = Vec::new();
    loop {
        let mut assignment = Assignment::new(graph.model());
        for (variable, label) in variables.iter().zip(&labels) {
            assignment.set(*variable, Some(*label));
        }
        let energy = graph.score_assignment(&assignment).unwrap();
        result.push((labels.clone(), (-energy).exp()));

        // odometer increment, last variable fastest
        let mut position = labels.len();
        loop {
            if position == 0 {
                return result;
            }
            position -= 1;
            labels[position] += 1;
            if labels[position] < sizes[position] {
                break;
            }
            labels[position] = 0;
        }
    }
}

pub fn domain_sizes(graph: &FactorGraph, variables: &[VariableId]) -> Vec<usize> {
    variables
        .iter()
        .map(|variable| graph.model().variable(*variable).unwrap().domain_size().unwrap())
        .collect()
}

// Exact marginal of every flattened variable, in flattened order
pub fn exact_marginals(graph: &FactorGraph) -> Vec<Vec<f64>> {
    let variables = graph.variables_flat();
    let sizes = domain_sizes(graph, &variables);
    let mut marginals = sizes.iter().map(|size| vec![0.; *size]).collect::<Vec<_>>();
    let mut total = 0.;
    for (labels, weight) in enumerate(graph) {
        total += weight;
        for (marginal, label) in marginals.iter_mut().zip(&labels) {
            marginal[*label] += weight;
        }
    }
    for marginal in marginals.iter_mut() {
        for probability in marginal.iter_mut() {
            *probability /= total;
        }
    }
    marginals
}

// Labels of the most probable assignment
pub fn exact_map(graph: &FactorGraph) -> Vec<usize> {
    enumerate(graph)
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(labels, _)| labels)
        .unwrap()
}

pub fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            (a - e).abs() <= tolerance,
            "{:?} differs from {:?} by more than {}",
            actual,
            expected,
            tolerance
        );
    }
}
