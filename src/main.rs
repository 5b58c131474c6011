use std::time::Instant;

use fgsolve::{DiscreteDomain, FactorGraph, FactorTable, Result, SolverKind, VariableId};
use log::info;

// x0 - x1 - x2 where neighbouring variables prefer to differ
fn build_chain() -> Result<(FactorGraph, Vec<VariableId>)> {
    let mut graph = FactorGraph::new();
    let variables = (0..3)
        .map(|index| graph.add_named_variable(&format!("x{}", index), DiscreteDomain::bit()))
        .collect::<Result<Vec<_>>>()?;
    graph.set_input(variables[0], &[0.3, 0.7])?;
    let table = graph.add_table(FactorTable::dense(vec![2, 2], vec![0.05, 1., 1., 0.05])?)?;
    for pair in variables.windows(2) {
        graph.add_table_factor(table, pair)?;
    }
    Ok((graph, variables))
}

fn report(graph: &FactorGraph, variables: &[VariableId]) -> Result<()> {
    for variable in variables {
        let name = graph.model().variable(*variable)?.name().unwrap_or("?").to_string();
        info!(
            "{}: belief {:?}, guess {}",
            name,
            graph.belief(*variable)?,
            graph.guess(*variable)?
        );
    }
    info!("Score of the guesses: {}", graph.score()?);
    Ok(())
}

fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info"); // change "info" to "debug" for debug-level logging, etc.
    env_logger::init();

    for kind in [SolverKind::SumProduct, SolverKind::MinSum, SolverKind::Gibbs] {
        let (mut graph, variables) = build_chain()?;
        graph.set_solver(kind)?;
        graph.set_seed(1)?;

        let time_start = Instant::now();
        graph.solve()?;
        info!("{} finished in {:?}", kind, time_start.elapsed());
        report(&graph, &variables)?;
        if kind == SolverKind::SumProduct {
            info!("Bethe free energy: {}", graph.bethe_free_energy()?);
        }
    }
    Ok(())
}
