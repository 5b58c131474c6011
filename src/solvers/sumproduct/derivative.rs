use std::collections::HashMap;

use log::debug;
use ndarray::{Array1, Array2, ArrayView1};

use crate::{
    error::{FactorGraphError, Result},
    model::graph_model::{EdgeId, FactorId, GraphModel, NodeId, NodeKind, TableId, VariableId},
    schedulers::schedule::{Schedule, ScheduleEntry},
    solvers::{
        bp_graph::{BpSolverGraph, SumProduct},
        messages::{MessageStore, Side},
    },
};

// Product of `values` skipping `excluded`, and for each other position j the product also skipping j
fn leave_one_out(values: &[f64], excluded: Option<usize>) -> (f64, Vec<f64>) {
    let included = |index: usize| Some(index) != excluded;
    let product = values
        .iter()
        .enumerate()
        .filter(|(index, _)| included(*index))
        .map(|(_, value)| *value)
        .product::<f64>();
    let partial = (0..values.len())
        .map(|skipped| {
            if !included(skipped) {
                return 0.;
            }
            values
                .iter()
                .enumerate()
                .filter(|(index, _)| included(*index) && *index != skipped)
                .map(|(_, value)| *value)
                .product::<f64>()
        })
        .collect();
    (product, partial)
}

// Derivative of u / sum(u) given u and its derivative, one row per weight
fn normalized_derivative(
    unnormalized: &Array1<f64>,
    derivative: Array2<f64>,
    node: NodeId,
    port: usize,
) -> Result<Array2<f64>> {
    let total = unnormalized.sum();
    if !(total > 0.) {
        return Err(FactorGraphError::ZeroNormalization {
            node: node.index(),
            port,
        });
    }
    let normalized = unnormalized / total;
    let mut result = derivative;
    for mut row in result.rows_mut() {
        let row_total = row.sum();
        row.zip_mut_with(&normalized, |value, share| {
            *value = (*value - share * row_total) / total
        });
    }
    Ok(result)
}

// Derivatives of every message and belief with respect to the weights of one table,
// with the solved messages held fixed
struct BetheGradient<'a> {
    model: &'a GraphModel,
    messages: &'a MessageStore,
    table: TableId,
    num_weights: usize,
    derivatives: HashMap<(EdgeId, Side), Array2<f64>>,
}

impl<'a> BetheGradient<'a> {
    fn new(model: &'a GraphModel, messages: &'a MessageStore, table: TableId) -> Result<Self> {
        let num_weights = model.table(table)?.num_rows();
        Ok(BetheGradient {
            model,
            messages,
            table,
            num_weights,
            derivatives: HashMap::new(),
        })
    }

    fn derivative(&self, edge: EdgeId, sender: Side, size: usize) -> Array2<f64> {
        match self.derivatives.get(&(edge, sender)) {
            Some(derivative) => derivative.clone(),
            None => Array2::zeros((self.num_weights, size)),
        }
    }

    // Unnormalized factor output over `port` (or over rows when `port` is None) and its derivative
    fn factor_terms(
        &self,
        factor: FactorId,
        port: Option<usize>,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let data = self.model.factor(factor)?;
        let table_id = self.model.factor_table_id(factor)?;
        let table = self.model.table(table_id)?;
        let uses_table = table_id == self.table;
        let edges = self.model.node_edges(factor.node())?;
        let sizes = table.domain_sizes();
        let incoming = edges
            .iter()
            .zip(sizes)
            .map(|(edge, size)| self.messages.message(*edge, Side::Variable, *size))
            .collect::<Vec<_>>();
        let derivatives = edges
            .iter()
            .zip(sizes)
            .map(|(edge, size)| self.derivative(*edge, Side::Variable, *size))
            .collect::<Vec<_>>();

        let width = match port {
            Some(port) => sizes[port],
            None => table.num_rows(),
        };
        let mut output = Array1::zeros(width);
        let mut derivative = Array2::zeros((self.num_weights, width));
        for row in 0..table.num_rows() {
            let indices = table.row(row);
            let bucket = match port {
                Some(port) => indices[port],
                None => row,
            };
            let values = (0..data.degree())
                .map(|column| incoming[column][indices[column]])
                .collect::<Vec<_>>();
            let (product, partial) = leave_one_out(&values, port);
            let weight = table.weight(row);
            output[bucket] += weight * product;
            if uses_table {
                derivative[[row, bucket]] += product;
            }
            for column in 0..data.degree() {
                if Some(column) == port {
                    continue;
                }
                let incoming_derivative: ArrayView1<f64> =
                    derivatives[column].column(indices[column]);
                let mut target = derivative.column_mut(bucket);
                target.scaled_add(weight * partial[column], &incoming_derivative);
            }
        }
        Ok((output, derivative))
    }

    // Unnormalized variable output on `port` (or the belief when `port` is None) and its derivative
    fn variable_terms(
        &self,
        variable: VariableId,
        port: Option<usize>,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let data = self.model.variable(variable)?;
        let size = data.domain_size()?;
        let edges = self.model.node_edges(variable.node())?;
        let incoming = edges
            .iter()
            .map(|edge| self.messages.message(*edge, Side::Factor, size))
            .collect::<Vec<_>>();
        let derivatives = edges
            .iter()
            .map(|edge| self.derivative(*edge, Side::Factor, size))
            .collect::<Vec<_>>();

        let mut output = Array1::zeros(size);
        let mut derivative = Array2::zeros((self.num_weights, size));
        for index in 0..size {
            let input = data.input()[index];
            let values = incoming
                .iter()
                .map(|message| message[index])
                .collect::<Vec<_>>();
            let (product, partial) = leave_one_out(&values, port);
            output[index] = input * product;
            for (sibling, sibling_derivative) in derivatives.iter().enumerate() {
                if Some(sibling) == port {
                    continue;
                }
                let mut target = derivative.column_mut(index);
                target.scaled_add(input * partial[sibling], &sibling_derivative.column(index));
            }
        }
        Ok((output, derivative))
    }

    fn update_port(&mut self, node: NodeId, port: usize) -> Result<()> {
        let (edge, sender, derivative) = match self.model.node_kind(node) {
            Some(NodeKind::Variable(variable)) => {
                let (output, derivative) = self.variable_terms(variable, Some(port))?;
                let edge = self.model.node_edges(node)?[port];
                (edge, Side::Variable, normalized_derivative(&output, derivative, node, port)?)
            }
            Some(NodeKind::Factor(factor)) => {
                let (output, derivative) = self.factor_terms(factor, Some(port))?;
                let edge = self.model.node_edges(node)?[port];
                (edge, Side::Factor, normalized_derivative(&output, derivative, node, port)?)
            }
            None => {
                return Err(FactorGraphError::UnknownNode {
                    kind: "node",
                    index: node.index(),
                })
            }
        };
        self.derivatives.insert((edge, sender), derivative);
        Ok(())
    }

    fn run_entry(&mut self, entry: &ScheduleEntry) -> Result<()> {
        match entry {
            ScheduleEntry::Node(node) => {
                for port in 0..self.model.degree(*node)? {
                    self.update_port(*node, port)?;
                }
            }
            ScheduleEntry::Edge { node, port } => self.update_port(*node, *port)?,
            ScheduleEntry::SubSchedule { schedule, .. } => {
                for entry in schedule.iter() {
                    self.run_entry(entry)?;
                }
            }
            ScheduleEntry::Block(entries) => {
                for entry in entries {
                    self.run_entry(entry)?;
                }
            }
        }
        Ok(())
    }

    // Sum over rows/elements of d(belief) * (energy + ln belief + 1)
    fn belief_term(
        belief: &Array1<f64>,
        derivative: &Array2<f64>,
        energy: impl Fn(usize) -> f64,
        entropy_scale: f64,
        weight: usize,
    ) -> f64 {
        belief
            .iter()
            .enumerate()
            .filter(|(_, probability)| **probability > 0.)
            .map(|(index, probability)| {
                derivative[[weight, index]] * (energy(index) + entropy_scale * (probability.ln() + 1.))
            })
            .sum()
    }

    fn gradient(&self) -> Result<Vec<f64>> {
        let root = self.model.root();
        let table = self.model.table(self.table)?;
        let mut gradient = vec![0.; self.num_weights];

        for factor in self.model.factors_flat(root).iter() {
            let (output, derivative) = self.factor_terms(*factor, None)?;
            let belief_derivative =
                normalized_derivative(&output, derivative, factor.node(), usize::MAX)?;
            let belief = &output / output.sum();
            let factor_table = self.model.factor_table(*factor)?;
            let uses_table = self.model.factor_table_id(*factor)? == self.table;
            for (weight, slot) in gradient.iter_mut().enumerate() {
                *slot += BetheGradient::belief_term(
                    &belief,
                    &belief_derivative,
                    |row| -factor_table.weight(row).ln(),
                    1.,
                    weight,
                );
                if uses_table {
                    *slot -= belief[weight] / table.weight(weight);
                }
            }
        }

        for variable in self.model.variables_flat(root).iter() {
            let data = self.model.variable(*variable)?;
            let (output, derivative) = self.variable_terms(*variable, None)?;
            let belief_derivative =
                normalized_derivative(&output, derivative, variable.node(), usize::MAX)?;
            let belief = &output / output.sum();
            let scale = -(data.degree() as f64 - 1.);
            for (weight, slot) in gradient.iter_mut().enumerate() {
                *slot += BetheGradient::belief_term(
                    &belief,
                    &belief_derivative,
                    |index| data.input_energy(index),
                    scale,
                    weight,
                );
            }
        }
        Ok(gradient)
    }
}

// Gradient of the Bethe free energy with respect to the weights of `table`, at the solver's
// current messages; the derivative messages are propagated `num_passes` times through `schedule`
pub fn bethe_free_energy_gradient(
    model: &GraphModel,
    solver: &BpSolverGraph<SumProduct>,
    schedule: &Schedule,
    table: TableId,
    num_passes: usize,
) -> Result<Vec<f64>> {
    let mut gradient = BetheGradient::new(model, solver.messages(), table)?;
    for _ in 0..num_passes.max(1) {
        for entry in schedule.iter() {
            gradient.run_entry(entry)?;
        }
    }
    debug!(
        "Propagated derivatives of {} weights over {} edges",
        gradient.num_weights,
        gradient.derivatives.len()
    );
    gradient.gradient()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_one_out_skips_positions() {
        let (product, partial) = leave_one_out(&[2., 3., 5.], Some(1));
        assert_eq!(product, 10.);
        assert_eq!(partial, vec![5., 0., 2.]);
        let (product, partial) = leave_one_out(&[2., 3.], None);
        assert_eq!(product, 6.);
        assert_eq!(partial, vec![3., 2.]);
    }
}
