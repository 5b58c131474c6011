mod common;

use common::assert_close;
use fgsolve::{
    DiscreteDomain, FactorGraph, FactorGraphError, FactorTable, SolverKind, StreamId, StreamSlice,
};

const TRANSITION: [f64; 4] = [0.9, 0.1, 0.2, 0.8];

fn observations() -> Vec<Vec<f64>> {
    vec![
        vec![0.8, 0.2],
        vec![0.3, 0.7],
        vec![0.6, 0.4],
        vec![0.1, 0.9],
        vec![0.5, 0.5],
        vec![0.7, 0.3],
        vec![0.2, 0.8],
        vec![0.9, 0.1],
    ]
}

// Forward recursion of a two-state hidden Markov model whose evidence is the variable input
fn filtered(data: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let normalized = |values: Vec<f64>| {
        let total = values.iter().sum::<f64>();
        values.into_iter().map(|value| value / total).collect::<Vec<_>>()
    };
    let mut alphas = vec![normalized(data[0].clone())];
    for evidence in &data[1..] {
        let previous = alphas.last().unwrap();
        let next = (0..2)
            .map(|j| evidence[j] * (0..2).map(|i| previous[i] * TRANSITION[i * 2 + j]).sum::<f64>())
            .collect();
        alphas.push(normalized(next));
    }
    alphas
}

// One step of the chain: previous -> next
fn transition_template() -> FactorGraph {
    let mut template = FactorGraph::new();
    let previous = template.add_variable(DiscreteDomain::bit()).unwrap();
    let next = template.add_variable(DiscreteDomain::bit()).unwrap();
    let table = template
        .add_table(FactorTable::dense(vec![2, 2], TRANSITION.to_vec()).unwrap())
        .unwrap();
    template.add_table_factor(table, &[previous, next]).unwrap();
    template.set_boundary_variables(&[previous, next]).unwrap();
    template
}

fn chain(kind: SolverKind, buffer_size: usize) -> (FactorGraph, StreamId) {
    let mut graph = FactorGraph::with_solver(kind);
    let states = graph.add_variable_stream(DiscreteDomain::bit()).unwrap();
    graph
        .add_repeated_graph(
            &transition_template(),
            buffer_size,
            &[StreamSlice::new(states, 0), StreamSlice::new(states, 1)],
        )
        .unwrap();
    (graph, states)
}

#[test]
fn sliding_window_tracks_the_filtered_state() {
    let (mut graph, states) = chain(SolverKind::SumProduct, 3);
    let data = observations();
    let expected = filtered(&data);
    graph.set_stream_data(states, data.clone()).unwrap();
    graph.collect_stream_beliefs(states).unwrap();
    let window = graph.stream_variables(states).unwrap().to_vec();
    assert_eq!(window.len(), 4);
    assert!(graph.blast_factor(states).unwrap().is_some());

    graph.solve().unwrap();
    assert_close(&graph.belief(window[3]).unwrap(), &expected[3], 1e-9);
    let mut time = 3;
    while graph.has_next() {
        graph.advance().unwrap();
        graph.solve_one_step().unwrap();
        time += 1;
        assert_close(&graph.belief(window[3]).unwrap(), &expected[time], 1e-9);
    }
    assert_eq!(time, data.len() - 1);
    assert_eq!(graph.num_advances(), 4);
    assert_eq!(graph.stream_beliefs(states).unwrap().len(), 4);
}

#[test]
fn one_copy_window_is_a_filter() {
    let (mut graph, states) = chain(SolverKind::SumProduct, 1);
    let data = observations();
    let expected = filtered(&data);
    graph.set_stream_data(states, data).unwrap();
    let window = graph.stream_variables(states).unwrap().to_vec();
    graph.solve().unwrap();
    assert_close(&graph.belief(window[1]).unwrap(), &expected[1], 1e-9);
    for time in 2..expected.len() {
        graph.advance().unwrap();
        graph.solve().unwrap();
        assert_close(&graph.belief(window[1]).unwrap(), &expected[time], 1e-9);
    }
    assert!(!graph.has_next());
}

#[test]
fn repeated_graph_arguments_are_checked() {
    let mut graph = FactorGraph::new();
    let states = graph.add_variable_stream(DiscreteDomain::bit()).unwrap();
    let template = transition_template();
    assert!(matches!(
        graph.add_repeated_graph(&template, 2, &[StreamSlice::new(states, 0)]),
        Err(FactorGraphError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        graph.add_repeated_graph(
            &template,
            2,
            &[StreamSlice::new(states, 0), StreamSlice::new(states, 2)]
        ),
        Err(FactorGraphError::InvalidArgument(_))
    ));
    assert!(graph
        .add_repeated_graph(
            &template,
            0,
            &[StreamSlice::new(states, 0), StreamSlice::new(states, 1)]
        )
        .is_err());
    let trits = graph
        .add_variable_stream(DiscreteDomain::range(0, 2).unwrap())
        .unwrap();
    assert!(matches!(
        graph.add_repeated_graph(
            &template,
            2,
            &[StreamSlice::new(trits, 0), StreamSlice::new(trits, 1)]
        ),
        Err(FactorGraphError::IncompatibleDomains(_))
    ));
    assert!(matches!(graph.advance(), Err(FactorGraphError::InvalidArgument(_))));
    assert!(graph.stream_variables(states).unwrap().is_empty());
}

#[test]
fn gibbs_windows_keep_labels_and_redraw_entering_variables() {
    let (mut graph, states) = chain(SolverKind::Gibbs, 2);
    graph.set_seed(17).unwrap();
    graph
        .solver_mut()
        .unwrap()
        .as_gibbs_mut()
        .unwrap()
        .options_mut()
        .set_num_samples(200);
    graph.set_stream_data(states, observations()).unwrap();
    let window = graph.stream_variables(states).unwrap().to_vec();
    graph.solve().unwrap();
    let before = graph
        .solver()
        .unwrap()
        .as_gibbs()
        .unwrap()
        .current_values(&window)
        .unwrap();

    graph.advance().unwrap();
    let gibbs = graph.solver().unwrap().as_gibbs().unwrap();
    assert_eq!(gibbs.num_collected_samples(), 0);
    let after = gibbs.current_values(&window).unwrap();
    assert_eq!(after[..2], before[1..]);

    graph.continue_solve().unwrap();
    let belief = graph.belief(window[2]).unwrap();
    assert!((belief.iter().sum::<f64>() - 1.).abs() < 1e-12);
    let blast = graph.blast_factor(states).unwrap().unwrap();
    assert!(matches!(
        graph.factor_belief(blast),
        Err(FactorGraphError::Unsupported { .. })
    ));
}

#[test]
fn gibbs_cannot_summarize_directed_factors() {
    let mut template = transition_template();
    let factor = template.factors_flat()[0];
    template.set_directed_to(factor, &[1]).unwrap();

    let mut graph = FactorGraph::with_solver(SolverKind::Gibbs);
    let states = graph.add_variable_stream(DiscreteDomain::bit()).unwrap();
    graph
        .add_repeated_graph(
            &template,
            2,
            &[StreamSlice::new(states, 0), StreamSlice::new(states, 1)],
        )
        .unwrap();
    graph.set_seed(3).unwrap();
    graph.solve().unwrap();
    assert!(matches!(
        graph.advance(),
        Err(FactorGraphError::Unsupported { .. })
    ));
    assert_eq!(graph.num_advances(), 0);

    graph.set_solver(SolverKind::SumProduct).unwrap();
    graph.solve().unwrap();
    assert!(graph.advance().is_ok());
}
