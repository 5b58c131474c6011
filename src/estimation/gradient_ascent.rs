use log::debug;

use crate::{
    error::Result,
    model::{factor_graph::FactorGraph, graph_model::TableId},
    solvers::sumproduct::derivative::bethe_free_energy_gradient,
};

use super::parameter_estimator::{ParameterUpdate, TableFactors};

// Multiplicative descent on the Bethe free energy: ln w <- ln w - scale * w * dF/dw.
// Needs the sum-product solver.
#[derive(Debug, Clone)]
pub struct GradientAscent {
    scale: f64,
    num_passes: usize, // derivative propagation sweeps over the schedule
}

impl Default for GradientAscent {
    fn default() -> Self {
        GradientAscent {
            scale: 1.,
            num_passes: 1,
        }
    }
}

impl GradientAscent {
    pub fn new(scale: f64) -> Self {
        GradientAscent {
            scale,
            ..Default::default()
        }
    }

    pub fn set_scale(&mut self, value: f64) -> &mut Self {
        self.scale = value;
        self
    }

    pub fn set_num_passes(&mut self, value: usize) -> &mut Self {
        self.num_passes = value;
        self
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn num_passes(&self) -> usize {
        self.num_passes
    }

    // dF/dw for each learned table at the current weights
    pub fn gradients(&self, graph: &mut FactorGraph, tables: &[TableId]) -> Result<Vec<Vec<f64>>> {
        graph.solve()?;
        let schedule = graph.schedule()?;
        let (model, solver) = graph.model_and_solver()?;
        let solver = solver.as_sum_product()?;
        tables
            .iter()
            .map(|table| bethe_free_energy_gradient(model, solver, &schedule, *table, self.num_passes))
            .collect()
    }
}

impl ParameterUpdate for GradientAscent {
    fn name(&self) -> &'static str {
        "GradientAscent"
    }

    fn step(
        &mut self,
        graph: &mut FactorGraph,
        tables: &[TableId],
        _table_factors: &TableFactors,
    ) -> Result<()> {
        let gradients = self.gradients(graph, tables)?;
        for (table, gradient) in tables.iter().zip(gradients) {
            let table_data = graph.table_mut(*table)?;
            let weights = table_data
                .weights()
                .iter()
                .zip(&gradient)
                .map(|(weight, slope)| weight * (-self.scale * weight * slope).exp())
                .collect::<Vec<_>>();
            table_data.change_weights(weights)?;
            table_data.normalize()?;
            debug!(
                "Table {}: largest gradient magnitude {}",
                table.index(),
                gradient.iter().fold(0f64, |acc, slope| acc.max(slope.abs()))
            );
        }
        Ok(())
    }
}
