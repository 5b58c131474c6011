use std::collections::HashMap;

use log::{debug, info};

use crate::{
    data_structures::random_stream::RandomStream,
    error::{FactorGraphError, Result},
    model::{
        factor_graph::FactorGraph,
        graph_model::{FactorId, TableId},
    },
    tables::factor_table::FactorTable,
};

// Factors of the flattened graph that share each learned table
pub type TableFactors = HashMap<TableId, Vec<FactorId>>;

// One rule for adjusting table weights; `step` is run `num_steps` times per restart
pub trait ParameterUpdate {
    fn name(&self) -> &'static str;

    // Checks that the rule applies to the graph before any weight is touched
    fn prepare(&mut self, _graph: &FactorGraph, _table_factors: &TableFactors) -> Result<()> {
        Ok(())
    }

    fn step(
        &mut self,
        graph: &mut FactorGraph,
        tables: &[TableId],
        table_factors: &TableFactors,
    ) -> Result<()>;
}

// Restarts an update rule from random weights and keeps the tables with the lowest Bethe free energy
pub struct ParameterEstimator<U: ParameterUpdate> {
    tables: Vec<TableId>,
    table_factors: TableFactors,
    random: RandomStream,
    force_keep: bool, // keep the last restart regardless of its free energy
    update: U,
}

impl<U: ParameterUpdate> ParameterEstimator<U> {
    pub fn new(graph: &FactorGraph, tables: &[TableId], mut update: U) -> Result<Self> {
        let mut unique: Vec<TableId> = Vec::with_capacity(tables.len());
        for table in tables {
            graph.table(*table)?;
            if !unique.contains(table) {
                unique.push(*table);
            }
        }
        let table_factors = unique
            .iter()
            .map(|table| (*table, graph.model().factors_using_table(*table)))
            .collect::<TableFactors>();
        update.prepare(graph, &table_factors)?;
        Ok(ParameterEstimator {
            tables: unique,
            table_factors,
            random: RandomStream::from_entropy(),
            force_keep: false,
            update,
        })
    }

    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.random.reseed(seed);
        self
    }

    pub fn set_force_keep(&mut self, value: bool) -> &mut Self {
        self.force_keep = value;
        self
    }

    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    pub fn table_factors(&self) -> &TableFactors {
        &self.table_factors
    }

    pub fn update(&self) -> &U {
        &self.update
    }

    pub fn update_mut(&mut self) -> &mut U {
        &mut self.update
    }

    fn checkpoint(&self, graph: &FactorGraph) -> Result<Vec<FactorTable>> {
        self.tables
            .iter()
            .map(|table| graph.table(*table).cloned())
            .collect()
    }

    fn restore(&self, graph: &mut FactorGraph, checkpoint: &[FactorTable]) -> Result<()> {
        for (table, saved) in self.tables.iter().zip(checkpoint) {
            graph.table_mut(*table)?.copy_from(saved);
        }
        Ok(())
    }

    fn randomize(&mut self, graph: &mut FactorGraph) -> Result<()> {
        for table in &self.tables {
            let table = graph.table_mut(*table)?;
            table.randomize_weights(&mut self.random);
            if table.is_directed() {
                table.normalize()?;
            }
        }
        Ok(())
    }

    fn measure(graph: &mut FactorGraph) -> Result<f64> {
        graph.solve()?;
        let energy = graph.bethe_free_energy()?;
        if energy.is_nan() {
            return Err(FactorGraphError::NonFinite("Bethe free energy".to_string()));
        }
        Ok(energy)
    }

    // Returns the Bethe free energy of the retained weights
    pub fn run(&mut self, graph: &mut FactorGraph, num_restarts: usize, num_steps: usize) -> Result<f64> {
        let mut best_energy = Self::measure(graph)?;
        let mut best_tables = self.checkpoint(graph)?;
        info!(
            "Estimating {} tables with {}. Initial Bethe free energy {}.",
            self.tables.len(),
            self.update.name(),
            best_energy
        );

        for restart in 0..=num_restarts {
            if restart != 0 {
                self.randomize(graph)?;
            }
            for step in 0..num_steps {
                self.update.step(graph, &self.tables, &self.table_factors)?;
                debug!("Restart {}. Step {} done.", restart, step + 1);
            }

            let energy = Self::measure(graph)?;
            info!("Restart {}. Bethe free energy {}.", restart, energy);
            if energy < best_energy || self.force_keep {
                best_energy = energy;
                best_tables = self.checkpoint(graph)?;
            }
        }

        self.restore(graph, &best_tables)?;
        Ok(best_energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::domain::DiscreteDomain;

    // Overwrites every weight with a fixed vector
    struct Overwrite(Vec<f64>);

    impl ParameterUpdate for Overwrite {
        fn name(&self) -> &'static str {
            "Overwrite"
        }

        fn step(
            &mut self,
            graph: &mut FactorGraph,
            tables: &[TableId],
            _table_factors: &TableFactors,
        ) -> Result<()> {
            for table in tables {
                graph.table_mut(*table)?.change_weights(self.0.clone())?;
            }
            Ok(())
        }
    }

    fn single_factor_graph() -> (FactorGraph, TableId) {
        let mut graph = FactorGraph::new();
        let a = graph.add_variable(DiscreteDomain::bit()).unwrap();
        let table = graph
            .add_table(FactorTable::dense(vec![2], vec![0.5, 0.5]).unwrap())
            .unwrap();
        graph.add_table_factor(table, &[a]).unwrap();
        (graph, table)
    }

    #[test]
    fn tables_are_deduplicated() {
        let (graph, table) = single_factor_graph();
        let estimator = ParameterEstimator::new(&graph, &[table, table], Overwrite(vec![1., 1.])).unwrap();
        assert_eq!(estimator.tables(), &[table]);
        assert_eq!(estimator.table_factors()[&table].len(), 1);
    }

    #[test]
    fn force_keep_retains_the_last_weights() {
        let (mut graph, table) = single_factor_graph();
        let mut estimator =
            ParameterEstimator::new(&graph, &[table], Overwrite(vec![0.9, 0.1])).unwrap();
        estimator.set_force_keep(true).set_seed(3);
        estimator.run(&mut graph, 0, 1).unwrap();
        assert_eq!(graph.table(table).unwrap().weights(), &[0.9, 0.1]);
    }

    #[test]
    fn lower_free_energy_is_kept() {
        // On a tree F = -ln Z, here -ln(0.5 * 2 + 0.5 * 2)
        let (mut graph, table) = single_factor_graph();
        let mut estimator =
            ParameterEstimator::new(&graph, &[table], Overwrite(vec![2., 2.])).unwrap();
        let energy = estimator.run(&mut graph, 0, 1).unwrap();
        assert_eq!(graph.table(table).unwrap().weights(), &[2., 2.]);
        assert!((energy + 2f64.ln()).abs() < 1e-9);
    }
}
