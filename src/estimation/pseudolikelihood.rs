#![allow(dead_code)]

use std::collections::HashMap;

use log::debug;

use crate::{
    error::{FactorGraphError, Result},
    model::{
        factor_graph::FactorGraph,
        graph_model::{FactorId, GraphModel, TableId, VariableId},
        value::Value,
    },
};

use super::parameter_estimator::{ParameterEstimator, ParameterUpdate, TableFactors};

type Distribution = HashMap<Vec<usize>, f64>;

// Empirical distribution over the neighbours of one variable, and how to build the rows of
// each incident factor from a neighbour sample
#[derive(Debug, Clone)]
struct Neighborhood {
    size: usize,
    neighbors: Vec<VariableId>,
    factors: Vec<(FactorId, Vec<Option<usize>>)>, // per column: position in `neighbors`, None = this variable
    distribution: Distribution,
}

impl Neighborhood {
    fn new(model: &GraphModel, variable: VariableId) -> Result<Self> {
        let data = model.variable(variable)?;
        let mut neighbors: Vec<VariableId> = Vec::new();
        let mut factors = Vec::with_capacity(data.degree());
        for factor in data.siblings() {
            let columns = model
                .factor(*factor)?
                .siblings()
                .iter()
                .map(|sibling| {
                    if *sibling == variable {
                        return None;
                    }
                    let position = match neighbors.iter().position(|neighbor| neighbor == sibling) {
                        Some(position) => position,
                        None => {
                            neighbors.push(*sibling);
                            neighbors.len() - 1
                        }
                    };
                    Some(position)
                })
                .collect();
            factors.push((*factor, columns));
        }
        Ok(Neighborhood {
            size: data.domain_size()?,
            neighbors,
            factors,
            distribution: Distribution::new(),
        })
    }

    fn factor_row(columns: &[Option<usize>], sample: &[usize], value: usize) -> Vec<usize> {
        columns
            .iter()
            .map(|column| match column {
                Some(position) => sample[*position],
                None => value,
            })
            .collect()
    }

    // Product of the incident factor weights for each value of the variable
    fn unnormalized(&self, model: &GraphModel, sample: &[usize]) -> Result<Vec<f64>> {
        let mut products = vec![1.; self.size];
        for (value, product) in products.iter_mut().enumerate() {
            for (factor, columns) in &self.factors {
                let table = model.factor_table(*factor)?;
                let row = Neighborhood::factor_row(columns, sample, value);
                *product *= table.weight_index(&row).map_or(0., |row| table.weight(row));
            }
        }
        Ok(products)
    }
}

// Maximum pseudolikelihood learning from fully labelled samples
#[derive(Debug, Clone)]
pub struct PseudoLikelihood {
    variables: Vec<VariableId>, // column order of the samples
    positions: HashMap<VariableId, usize>,
    factor_distributions: HashMap<FactorId, Distribution>,
    neighborhoods: HashMap<VariableId, Neighborhood>,
    num_samples: usize,
    scale: f64,
}

impl PseudoLikelihood {
    // Every variable touched by a factor of the graph must be one of `variables`
    pub fn new(graph: &FactorGraph, variables: &[VariableId]) -> Result<Self> {
        let model = graph.model();
        let positions = variables
            .iter()
            .enumerate()
            .map(|(position, variable)| (*variable, position))
            .collect::<HashMap<_, _>>();

        let mut factor_distributions = HashMap::new();
        let mut neighborhoods = HashMap::new();
        for factor in graph.factors_flat() {
            model.factor_table(factor)?;
            for sibling in model.factor(factor)?.siblings() {
                if !positions.contains_key(sibling) {
                    return Err(FactorGraphError::InvalidArgument(format!(
                        "variable {} of factor {} has no data column",
                        sibling.index(),
                        factor.index()
                    )));
                }
                if !neighborhoods.contains_key(sibling) {
                    neighborhoods.insert(*sibling, Neighborhood::new(model, *sibling)?);
                }
            }
            factor_distributions.insert(factor, Distribution::new());
        }

        Ok(PseudoLikelihood {
            variables: variables.to_vec(),
            positions,
            factor_distributions,
            neighborhoods,
            num_samples: 0,
            scale: 1.,
        })
    }

    pub fn set_scale(&mut self, value: f64) -> &mut Self {
        self.scale = value;
        self
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    // Builds the empirical distributions from samples given as domain indices
    pub fn set_data(&mut self, graph: &FactorGraph, data: &[Vec<usize>]) -> Result<()> {
        let model = graph.model();
        for sample in data {
            if sample.len() != self.variables.len() {
                return Err(FactorGraphError::DimensionMismatch {
                    expected: self.variables.len(),
                    got: sample.len(),
                });
            }
            for (variable, index) in self.variables.iter().zip(sample) {
                if *index >= model.variable(*variable)?.domain_size()? {
                    return Err(FactorGraphError::InvalidValue(format!(
                        "index {} is out of range for variable {}",
                        index,
                        variable.index()
                    )));
                }
            }
        }

        let weight = 1. / data.len().max(1) as f64;
        for (factor, distribution) in self.factor_distributions.iter_mut() {
            distribution.clear();
            let siblings = model.factor(*factor)?.siblings();
            for sample in data {
                let key = siblings
                    .iter()
                    .map(|sibling| sample[self.positions[sibling]])
                    .collect();
                *distribution.entry(key).or_insert(0.) += weight;
            }
        }
        for neighborhood in self.neighborhoods.values_mut() {
            neighborhood.distribution.clear();
            for sample in data {
                let key = neighborhood
                    .neighbors
                    .iter()
                    .map(|neighbor| sample[self.positions[neighbor]])
                    .collect();
                *neighborhood.distribution.entry(key).or_insert(0.) += weight;
            }
        }
        self.num_samples = data.len();
        debug!(
            "Pseudolikelihood data: {} samples over {} variables",
            self.num_samples,
            self.variables.len()
        );
        Ok(())
    }

    // Same as `set_data` with samples given as domain values
    pub fn set_data_values(&mut self, graph: &FactorGraph, data: &[Vec<Value>]) -> Result<()> {
        let model = graph.model();
        let mut indices = Vec::with_capacity(data.len());
        for sample in data {
            if sample.len() != self.variables.len() {
                return Err(FactorGraphError::DimensionMismatch {
                    expected: self.variables.len(),
                    got: sample.len(),
                });
            }
            let row = self
                .variables
                .iter()
                .zip(sample)
                .map(|(variable, value)| {
                    model
                        .variable(*variable)?
                        .discrete_domain()?
                        .index_of(value)
                        .ok_or(FactorGraphError::InvalidValue(format!(
                            "{} is not in the domain of variable {}",
                            value,
                            variable.index()
                        )))
                })
                .collect::<Result<Vec<_>>>()?;
            indices.push(row);
        }
        self.set_data(graph, &indices)
    }

    fn check_data(&self) -> Result<()> {
        if self.num_samples == 0 {
            return Err(FactorGraphError::InvalidArgument(
                "no data has been set".to_string(),
            ));
        }
        Ok(())
    }

    // Gradient of the pseudo log-likelihood with respect to the log weights of each table
    pub fn calculate_gradient(&self, graph: &FactorGraph, tables: &[TableId]) -> Result<Vec<Vec<f64>>> {
        self.check_data()?;
        let model = graph.model();
        let mut gradients = Vec::with_capacity(tables.len());
        for table in tables {
            let table_data = model.table(*table)?;
            let mut gradient = vec![0.; table_data.num_rows()];
            for factor in model.factors_using_table(*table) {
                let Some(empirical) = self.factor_distributions.get(&factor) else {
                    continue;
                };
                let siblings = model.factor(factor)?.siblings();
                for (row, probability) in empirical {
                    if let Some(index) = table_data.weight_index(row) {
                        gradient[index] += siblings.len() as f64 * probability;
                    }
                }

                for sibling in siblings {
                    let neighborhood = &self.neighborhoods[sibling];
                    let columns = neighborhood
                        .factors
                        .iter()
                        .find(|(candidate, _)| *candidate == factor)
                        .map(|(_, columns)| columns)
                        .ok_or(FactorGraphError::NotAdjacent(sibling.index(), factor.index()))?;
                    for (sample, frequency) in &neighborhood.distribution {
                        let products = neighborhood.unnormalized(model, sample)?;
                        let total = products.iter().sum::<f64>();
                        if !(total > 0.) {
                            continue;
                        }
                        for (value, product) in products.iter().enumerate() {
                            let row = Neighborhood::factor_row(columns, sample, value);
                            if let Some(index) = table_data.weight_index(&row) {
                                gradient[index] -= frequency * product / total;
                            }
                        }
                    }
                }
            }
            gradients.push(gradient);
        }
        Ok(gradients)
    }

    // Average over samples of sum_v [ sum_{f at v} ln w_f(x_f) - ln Z_v(x_neighbours) ]
    pub fn calculate_pseudo_likelihood(&self, graph: &FactorGraph) -> Result<f64> {
        self.check_data()?;
        let model = graph.model();
        let mut total = 0.;
        for (factor, empirical) in &self.factor_distributions {
            let table = model.factor_table(*factor)?;
            let degree = model.factor(*factor)?.degree() as f64;
            for (row, probability) in empirical {
                let weight = table.weight_index(row).map_or(0., |row| table.weight(row));
                total += degree * probability * weight.ln();
            }
        }
        for neighborhood in self.neighborhoods.values() {
            for (sample, frequency) in &neighborhood.distribution {
                let partition = neighborhood.unnormalized(model, sample)?.iter().sum::<f64>();
                total -= frequency * partition.ln();
            }
        }
        Ok(total)
    }

    // Forward difference of the pseudolikelihood in the log weight of one row
    pub fn calculate_numerical_gradient(
        &self,
        graph: &mut FactorGraph,
        table: TableId,
        row: usize,
        delta: f64,
    ) -> Result<f64> {
        let before = self.calculate_pseudo_likelihood(graph)?;
        let old = graph.table(table)?.weight(row);
        graph.table_mut(table)?.change_weight(row, old * delta.exp())?;
        let after = self.calculate_pseudo_likelihood(graph);
        graph.table_mut(table)?.change_weight(row, old)?;
        Ok((after? - before) / delta)
    }
}

impl ParameterUpdate for PseudoLikelihood {
    fn name(&self) -> &'static str {
        "PseudoLikelihood"
    }

    fn step(
        &mut self,
        graph: &mut FactorGraph,
        tables: &[TableId],
        _table_factors: &TableFactors,
    ) -> Result<()> {
        let gradients = self.calculate_gradient(graph, tables)?;
        for (table, gradient) in tables.iter().zip(gradients) {
            let table = graph.table_mut(*table)?;
            let weights = table
                .weights()
                .iter()
                .zip(&gradient)
                .map(|(weight, slope)| weight * (self.scale * slope).exp())
                .collect::<Vec<_>>();
            table.change_weights(weights)?;
            table.normalize()?;
        }
        Ok(())
    }
}

impl ParameterEstimator<PseudoLikelihood> {
    // Sets the data and runs `num_steps` ascent steps, always keeping the result
    pub fn learn(
        &mut self,
        graph: &mut FactorGraph,
        data: &[Vec<usize>],
        num_steps: usize,
        scale: f64,
    ) -> Result<f64> {
        self.set_force_keep(true);
        self.update_mut().set_data(graph, data)?;
        self.update_mut().set_scale(scale);
        self.run(graph, 0, num_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::domain::DiscreteDomain, tables::factor_table::FactorTable};

    // a - b - c with one shared pairwise table
    fn chain() -> (FactorGraph, Vec<VariableId>, TableId) {
        let mut graph = FactorGraph::new();
        let variables = (0..3)
            .map(|_| graph.add_variable(DiscreteDomain::bit()).unwrap())
            .collect::<Vec<_>>();
        let table = graph
            .add_table(FactorTable::dense(vec![2, 2], vec![0.4, 0.1, 0.2, 0.3]).unwrap())
            .unwrap();
        graph.add_table_factor(table, &variables[0..2]).unwrap();
        graph.add_table_factor(table, &variables[1..3]).unwrap();
        (graph, variables, table)
    }

    fn data() -> Vec<Vec<usize>> {
        vec![vec![0, 0, 0], vec![0, 0, 1], vec![1, 1, 1], vec![0, 1, 1], vec![1, 0, 0]]
    }

    #[test]
    fn analytic_gradient_matches_numerical() {
        let (mut graph, variables, table) = chain();
        let mut learner = PseudoLikelihood::new(&graph, &variables).unwrap();
        learner.set_data(&graph, &data()).unwrap();
        let gradient = learner.calculate_gradient(&graph, &[table]).unwrap();
        for row in 0..4 {
            let numerical = learner
                .calculate_numerical_gradient(&mut graph, table, row, 1e-6)
                .unwrap();
            assert!(
                (gradient[0][row] - numerical).abs() < 1e-4,
                "row {}: {} vs {}",
                row,
                gradient[0][row],
                numerical
            );
        }
        assert_eq!(graph.table(table).unwrap().weights(), &[0.4, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn learning_raises_the_pseudolikelihood() {
        let (mut graph, variables, table) = chain();
        let learner = PseudoLikelihood::new(&graph, &variables).unwrap();
        let mut estimator = ParameterEstimator::new(&graph, &[table], learner).unwrap();
        estimator.update_mut().set_data(&graph, &data()).unwrap();
        let before = estimator.update().calculate_pseudo_likelihood(&graph).unwrap();
        estimator.learn(&mut graph, &data(), 5, 0.1).unwrap();
        let after = estimator.update().calculate_pseudo_likelihood(&graph).unwrap();
        assert!(after > before);
        let total = graph.table(table).unwrap().weights().iter().sum::<f64>();
        assert!((total - 1.).abs() < 1e-9);
    }

    #[test]
    fn missing_data_columns_are_rejected() {
        let (graph, variables, _) = chain();
        assert!(PseudoLikelihood::new(&graph, &variables[..2]).is_err());
        let mut learner = PseudoLikelihood::new(&graph, &variables).unwrap();
        assert!(matches!(
            learner.set_data(&graph, &[vec![0, 1]]),
            Err(FactorGraphError::DimensionMismatch { .. })
        ));
        assert!(learner.calculate_gradient(&graph, &[]).is_err());
    }
}
