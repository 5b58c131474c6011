mod common;

use std::sync::Arc;

use common::{assert_close, enumerate, exact_map, exact_marginals};
use fgsolve::{
    schedulers::scheduler::FloodingScheduler, DiscreteDomain, ErrorKind, FactorGraph,
    FactorGraphError, FactorTable, SolverKind, VariableId,
};

// Deterministic, uneven weights for a dense table
fn weights(sizes: &[usize], salt: usize) -> Vec<f64> {
    let rows = sizes.iter().product::<usize>();
    (0..rows)
        .map(|row| 0.5 + ((row * 7 + salt * 3) % 5) as f64)
        .collect()
}

fn add_dense(graph: &mut FactorGraph, variables: &[VariableId], salt: usize) {
    let sizes = variables
        .iter()
        .map(|variable| graph.model().variable(*variable).unwrap().domain_size().unwrap())
        .collect::<Vec<_>>();
    let table = FactorTable::dense(sizes.clone(), weights(&sizes, salt)).unwrap();
    let table = graph.add_table(table).unwrap();
    graph.add_table_factor(table, variables).unwrap();
}

// x0 - x1 - x2 where x0, x1 have exactly one true and x1, x2 have at most one true
fn constrained_chain() -> (FactorGraph, Vec<VariableId>) {
    let mut graph = FactorGraph::new();
    let variables = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::bit()).unwrap())
        .collect::<Vec<_>>();
    graph
        .add_factor_from_table(
            vec![2, 2],
            vec![vec![0, 1], vec![1, 0]],
            vec![1., 1.],
            &variables[0..2],
        )
        .unwrap();
    graph
        .add_factor_from_table(
            vec![2, 2],
            vec![vec![0, 0], vec![0, 1], vec![1, 0]],
            vec![1., 1., 1.],
            &variables[1..3],
        )
        .unwrap();
    (graph, variables)
}

// Tree over mixed domain sizes with a three-way factor
fn mixed_tree() -> FactorGraph {
    let mut graph = FactorGraph::new();
    let sizes = [2, 3, 2, 3, 2];
    let variables = sizes
        .iter()
        .map(|size| graph.add_variable(DiscreteDomain::range(0, *size - 1).unwrap()).unwrap())
        .collect::<Vec<_>>();
    graph.set_input(variables[0], &[0.3, 0.7]).unwrap();
    graph.set_input(variables[3], &[0.2, 0.5, 0.3]).unwrap();
    add_dense(&mut graph, &[variables[0], variables[1]], 1);
    add_dense(&mut graph, &[variables[1], variables[2], variables[3]], 2);
    add_dense(&mut graph, &[variables[3], variables[4]], 3);
    add_dense(&mut graph, &[variables[4]], 4);
    graph
}

#[test]
fn constrained_chain_has_three_consistent_assignments() {
    let (mut graph, variables) = constrained_chain();
    let consistent = enumerate(&graph)
        .into_iter()
        .filter(|(_, weight)| *weight > 0.)
        .map(|(labels, _)| labels)
        .collect::<Vec<_>>();
    assert_eq!(consistent, vec![vec![0, 1, 0], vec![1, 0, 0], vec![1, 0, 1]]);

    // one forward-backward pass of the default tree schedule is exact
    graph.solve().unwrap();
    let expected = exact_marginals(&graph);
    for (variable, marginal) in variables.iter().zip(&expected) {
        assert_close(&graph.belief(*variable).unwrap(), marginal, 1e-12);
    }
    assert_close(&graph.belief(variables[0]).unwrap(), &[1. / 3., 2. / 3.], 1e-12);
}

#[test]
fn tree_beliefs_match_enumeration() {
    let mut graph = mixed_tree();
    assert!(graph.is_tree().unwrap());
    graph.solve().unwrap();
    let expected = exact_marginals(&graph);
    for (belief, marginal) in graph.beliefs().unwrap().iter().zip(&expected) {
        assert_close(belief, marginal, 1e-9);
    }
}

#[test]
fn tree_free_energy_is_minus_log_partition() {
    let mut graph = mixed_tree();
    graph.solve().unwrap();
    let partition = enumerate(&graph).iter().map(|(_, weight)| weight).sum::<f64>();
    assert!((graph.bethe_free_energy().unwrap() + partition.ln()).abs() < 1e-9);
}

#[test]
fn flooding_converges_on_a_tree() {
    let mut graph = mixed_tree();
    graph.set_scheduler(Arc::new(FloodingScheduler)).unwrap();
    graph.set_num_iterations(20).unwrap();
    graph.solve().unwrap();
    let expected = exact_marginals(&graph);
    for (belief, marginal) in graph.beliefs().unwrap().iter().zip(&expected) {
        assert_close(belief, marginal, 1e-9);
    }
}

#[test]
fn damping_keeps_the_fixed_point() {
    let mut graph = mixed_tree();
    graph.set_scheduler(Arc::new(FloodingScheduler)).unwrap();
    graph.set_damping(0.3).unwrap();
    graph.set_num_iterations(200).unwrap();
    graph.solve().unwrap();
    let expected = exact_marginals(&graph);
    for (belief, marginal) in graph.beliefs().unwrap().iter().zip(&expected) {
        assert_close(belief, marginal, 1e-7);
    }
}

#[test]
fn parallel_factor_updates_give_the_same_beliefs() {
    let mut sequential = mixed_tree();
    sequential.solve().unwrap();
    let mut parallel = mixed_tree();
    parallel.set_num_threads(4).unwrap();
    parallel.solve().unwrap();
    for (a, b) in sequential.beliefs().unwrap().iter().zip(&parallel.beliefs().unwrap()) {
        assert_close(a, b, 1e-12);
    }
}

#[test]
fn min_sum_guesses_the_most_probable_assignment() {
    let mut graph = mixed_tree();
    graph.set_solver(SolverKind::MinSum).unwrap();
    graph.solve().unwrap();
    let guesses = graph
        .variables_flat()
        .into_iter()
        .map(|variable| graph.guess(variable).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(guesses, exact_map(&graph));
}

#[test]
fn nested_graphs_behave_like_their_flattening() {
    let mut template = FactorGraph::new();
    let p = template.add_variable(DiscreteDomain::bit()).unwrap();
    let q = template.add_variable(DiscreteDomain::bit()).unwrap();
    let r = template.add_variable(DiscreteDomain::range(0, 2).unwrap()).unwrap();
    add_dense(&mut template, &[p, q], 5);
    add_dense(&mut template, &[q, r], 6);
    template.set_boundary_variables(&[p, q]).unwrap();

    let mut graph = FactorGraph::new();
    let x = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::bit()).unwrap())
        .collect::<Vec<_>>();
    graph.set_input(x[0], &[0.9, 0.1]).unwrap();
    let (first, _) = graph.add_graph(&template, &[x[0], x[1]]).unwrap();
    let (second, _) = graph.add_graph(&template, &[x[1], x[2]]).unwrap();
    assert_eq!(graph.child_graphs(graph.root()).unwrap(), &[first, second]);
    assert_eq!(graph.parent_graph(first).unwrap(), Some(graph.root()));
    assert_eq!(graph.variables_flat().len(), 5);
    assert_eq!(graph.factors_flat().len(), 4);

    graph.solve().unwrap();
    let expected = exact_marginals(&graph);
    for (belief, marginal) in graph.beliefs().unwrap().iter().zip(&expected) {
        assert_close(belief, marginal, 1e-9);
    }
}

#[test]
fn joining_factors_keeps_the_marginals() {
    let mut graph = FactorGraph::new();
    let x = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::range(0, 2).unwrap()).unwrap())
        .collect::<Vec<_>>();
    add_dense(&mut graph, &x[0..2], 7);
    add_dense(&mut graph, &x[1..3], 8);
    let expected = exact_marginals(&graph);

    let factors = graph.factors_flat();
    let joint = graph.join_factors(factors[0], factors[1]).unwrap();
    assert_eq!(graph.factors_flat(), vec![joint]);
    assert_eq!(graph.model().factor(joint).unwrap().degree(), 3);

    graph.solve().unwrap();
    for (variable, marginal) in x.iter().zip(&expected) {
        assert_close(&graph.belief(*variable).unwrap(), marginal, 1e-9);
    }
}

#[test]
fn splitting_a_variable_keeps_the_marginals() {
    let mut graph = FactorGraph::new();
    let x = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::bit()).unwrap())
        .collect::<Vec<_>>();
    graph.set_input(x[1], &[0.35, 0.65]).unwrap();
    add_dense(&mut graph, &x[0..2], 9);
    add_dense(&mut graph, &x[1..3], 10);
    let expected = exact_marginals(&graph);
    graph.solve().unwrap();

    let second = graph.factors_flat()[1];
    let (copy, _) = graph.split_variable(x[1], &[second]).unwrap();
    assert_eq!(graph.model().factor(second).unwrap().siblings(), &[copy, x[2]]);
    graph.solve().unwrap();
    for (variable, marginal) in x.iter().zip(&expected) {
        assert_close(&graph.belief(*variable).unwrap(), marginal, 1e-9);
    }
    assert_close(&graph.belief(copy).unwrap(), &expected[1], 1e-9);
}

#[test]
fn contradictory_evidence_fails_the_update() {
    let mut graph = FactorGraph::new();
    let x = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::bit()).unwrap())
        .collect::<Vec<_>>();
    graph
        .add_factor_from_table(vec![2, 2], vec![vec![0, 1], vec![1, 0]], vec![1., 1.], &x[0..2])
        .unwrap();
    graph
        .add_factor_from_table(vec![2, 2], vec![vec![0, 0], vec![1, 1]], vec![1., 1.], &[x[0], x[2]])
        .unwrap();
    graph.set_fixed_index(x[0], 1).unwrap();
    graph.set_fixed_index(x[2], 0).unwrap();
    graph.set_scheduler(Arc::new(FloodingScheduler)).unwrap();
    graph.set_num_iterations(5).unwrap();

    let error = graph.solve().unwrap_err();
    assert!(matches!(error, FactorGraphError::ZeroNormalization { .. }));
    assert_eq!(error.kind(), ErrorKind::Numeric);
    assert!(!graph.is_solver_running());
}
