use fgsolve::{
    estimation::{
        baum_welch::BaumWelch, gradient_ascent::GradientAscent,
        parameter_estimator::ParameterEstimator, pseudolikelihood::PseudoLikelihood,
    },
    DiscreteDomain, FactorGraph, FactorTable, TableId, VariableId,
};

// x0 - x1 - x2 where both factors share one table
fn shared_chain() -> (FactorGraph, TableId) {
    let mut graph = FactorGraph::new();
    let x = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::range(0, 2).unwrap()).unwrap())
        .collect::<Vec<_>>();
    graph.set_input(x[0], &[0.5, 0.2, 0.3]).unwrap();
    graph.set_input(x[2], &[0.1, 0.6, 0.3]).unwrap();
    let table = graph
        .add_table(FactorTable::dense(vec![3, 3], vec![2., 1., 0.5, 1., 3., 1.5, 0.7, 1., 2.]).unwrap())
        .unwrap();
    graph.add_table_factor(table, &x[0..2]).unwrap();
    graph.add_table_factor(table, &x[1..3]).unwrap();
    (graph, table)
}

fn free_energy_with_weight(graph: &mut FactorGraph, table: TableId, row: usize, weight: f64) -> f64 {
    graph.table_mut(table).unwrap().change_weight(row, weight).unwrap();
    graph.solve().unwrap();
    graph.bethe_free_energy().unwrap()
}

#[test]
fn bethe_gradient_matches_finite_differences() {
    let (mut graph, table) = shared_chain();
    let gradient = GradientAscent::default()
        .gradients(&mut graph, &[table])
        .unwrap()
        .remove(0);

    // at a fixed point only the explicit dependence on the weights remains
    let weights = graph.table(table).unwrap().weights().to_vec();
    let beliefs = graph
        .factors_flat()
        .into_iter()
        .map(|factor| graph.factor_belief(factor).unwrap())
        .collect::<Vec<_>>();
    for (row, slope) in gradient.iter().enumerate() {
        let explicit = -beliefs.iter().map(|belief| belief[row]).sum::<f64>() / weights[row];
        assert!((slope - explicit).abs() < 1e-8, "row {}: {} vs {}", row, slope, explicit);
    }

    let delta = 1e-5;
    for (row, slope) in gradient.iter().enumerate() {
        let above = free_energy_with_weight(&mut graph, table, row, weights[row] + delta);
        let below = free_energy_with_weight(&mut graph, table, row, weights[row] - delta);
        free_energy_with_weight(&mut graph, table, row, weights[row]);
        let numerical = (above - below) / (2. * delta);
        assert!((slope - numerical).abs() < 1e-6, "row {}: {} vs {}", row, slope, numerical);
    }
}

#[test]
fn gradient_ascent_lowers_the_free_energy() {
    let (mut graph, table) = shared_chain();
    graph.solve().unwrap();
    let before = graph.bethe_free_energy().unwrap();
    let mut estimator = ParameterEstimator::new(&graph, &[table], GradientAscent::new(0.1)).unwrap();
    let after = estimator.run(&mut graph, 0, 5).unwrap();
    assert!(after <= before);
    graph.solve().unwrap();
    assert!((graph.bethe_free_energy().unwrap() - after).abs() < 1e-9);
}

#[test]
fn baum_welch_leaves_a_consistent_model_unchanged() {
    let mut graph = FactorGraph::new();
    let a = graph.add_variable(DiscreteDomain::bit()).unwrap();
    let b = graph.add_variable(DiscreteDomain::bit()).unwrap();
    let prior = graph
        .add_table(FactorTable::dense(vec![2], vec![0.3, 0.7]).unwrap())
        .unwrap();
    let conditional = graph
        .add_table(FactorTable::dense(vec![2, 2], vec![0.9, 0.1, 0.25, 0.75]).unwrap())
        .unwrap();
    let f = graph.add_table_factor(prior, &[a]).unwrap();
    let g = graph.add_table_factor(conditional, &[a, b]).unwrap();
    graph.set_directed_to(f, &[0]).unwrap();
    graph.set_directed_to(g, &[1]).unwrap();

    let mut estimator = ParameterEstimator::new(&graph, &[prior, conditional], BaumWelch).unwrap();
    estimator.run(&mut graph, 0, 3).unwrap();

    let expected = [vec![0.3, 0.7], vec![0.9, 0.1, 0.25, 0.75]];
    for (table, weights) in [prior, conditional].iter().zip(&expected) {
        for (actual, wanted) in graph.table(*table).unwrap().weights().iter().zip(weights) {
            assert!((actual - wanted).abs() < 1e-9);
        }
    }
}

// Triangle of bits with one shared table and one private table
fn triangle() -> (FactorGraph, Vec<VariableId>, Vec<TableId>) {
    let mut graph = FactorGraph::new();
    let x = (0..3)
        .map(|_| graph.add_variable(DiscreteDomain::bit()).unwrap())
        .collect::<Vec<_>>();
    let shared = graph
        .add_table(FactorTable::dense(vec![2, 2], vec![1.2, 0.4, 0.7, 2.]).unwrap())
        .unwrap();
    let private = graph
        .add_table(FactorTable::dense(vec![2, 2], vec![0.5, 1.5, 1., 0.8]).unwrap())
        .unwrap();
    graph.add_table_factor(shared, &[x[0], x[1]]).unwrap();
    graph.add_table_factor(shared, &[x[1], x[2]]).unwrap();
    graph.add_table_factor(private, &[x[2], x[0]]).unwrap();
    (graph, x, vec![shared, private])
}

#[test]
fn pseudolikelihood_gradient_matches_numerical_on_a_loop() {
    let (mut graph, x, tables) = triangle();
    let mut learner = PseudoLikelihood::new(&graph, &x).unwrap();
    let data = vec![
        vec![0, 0, 0],
        vec![1, 1, 0],
        vec![1, 1, 1],
        vec![0, 1, 1],
        vec![1, 0, 1],
        vec![1, 1, 1],
    ];
    learner.set_data(&graph, &data).unwrap();
    assert_eq!(learner.num_samples(), 6);

    let gradients = learner.calculate_gradient(&graph, &tables).unwrap();
    for (table, gradient) in tables.iter().zip(&gradients) {
        for (row, slope) in gradient.iter().enumerate() {
            let numerical = learner
                .calculate_numerical_gradient(&mut graph, *table, row, 1e-6)
                .unwrap();
            assert!(
                (slope - numerical).abs() < 1e-4,
                "table {} row {}: {} vs {}",
                table.index(),
                row,
                slope,
                numerical
            );
        }
    }
}
