use std::borrow::Cow;

use ndarray::Array1;

use crate::{
    error::{FactorGraphError, Result},
    model::graph_model::{EdgeId, FactorId, GraphModel, NodeId, TableId},
    solvers::{
        message::{costs_to_probabilities, entropy, expected_energy, normalize_costs},
        messages::{MessageStore, Side},
        shadow::SolverNode,
    },
    tables::factor_table::FactorTable,
};

// Min-sum state of a factor backed by a factor table
#[derive(Debug, Clone)]
pub struct MinSumTableFactor {
    factor: FactorId,
    table: TableId,
    edges: Vec<EdgeId>,
    sizes: Vec<usize>,
}

impl MinSumTableFactor {
    pub(crate) fn new(model: &GraphModel, factor: FactorId, solver: &'static str) -> Result<Self> {
        let table = model
            .factor(factor)?
            .table()
            .ok_or(FactorGraphError::unsupported("factors over real-valued variables", solver))?;
        Ok(MinSumTableFactor {
            factor,
            table,
            edges: model.node_edges(factor.node())?,
            sizes: model.table(table)?.domain_sizes().to_vec(),
        })
    }

    fn incoming<'a>(&self, messages: &'a MessageStore) -> Vec<Cow<'a, Array1<f64>>> {
        self.edges
            .iter()
            .zip(&self.sizes)
            .map(|(edge, size)| messages.message(*edge, Side::Variable, *size))
            .collect()
    }

    // Energy of every row plus the incoming costs, skipping port `excluded`
    fn row_costs(table: &FactorTable, incoming: &[Cow<Array1<f64>>], excluded: Option<usize>) -> Vec<f64> {
        (0..table.num_rows())
            .map(|row| {
                let indices = table.row(row);
                incoming
                    .iter()
                    .enumerate()
                    .filter(|(port, _)| Some(*port) != excluded)
                    .fold(-table.weight(row).ln(), |cost, (port, message)| {
                        cost + message[indices[port]]
                    })
            })
            .collect()
    }
}

impl SolverNode for MinSumTableFactor {
    fn node(&self) -> NodeId {
        self.factor.node()
    }

    fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    fn sender(&self) -> Side {
        Side::Factor
    }

    fn message_size(&self, port: usize) -> usize {
        self.sizes[port]
    }

    fn compute_edge(&self, model: &GraphModel, messages: &MessageStore, port: usize) -> Result<Array1<f64>> {
        let table = model.table(self.table)?;
        let incoming = self.incoming(messages);
        let costs = MinSumTableFactor::row_costs(table, &incoming, Some(port));
        let mut outgoing = Array1::from_elem(self.sizes[port], f64::INFINITY);
        for (row, cost) in costs.into_iter().enumerate() {
            let index = table.row(row)[port];
            outgoing[index] = outgoing[index].min(cost);
        }
        normalize_costs(&mut outgoing, self.factor.index(), port)?;
        Ok(outgoing)
    }

    fn belief(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<f64>> {
        let table = model.table(self.table)?;
        let incoming = self.incoming(messages);
        let costs = MinSumTableFactor::row_costs(table, &incoming, None);
        if costs.iter().all(|cost| cost.is_infinite()) {
            return Err(FactorGraphError::ZeroNormalization {
                node: self.factor.index(),
                port: self.edges.len(),
            });
        }
        Ok(costs_to_probabilities(&costs))
    }

    fn internal_energy(&self, model: &GraphModel, messages: &MessageStore) -> Result<f64> {
        let belief = self.belief(model, messages)?;
        let table = model.table(self.table)?;
        Ok(expected_energy(
            &belief,
            table.weights().iter().map(|weight| -weight.ln()),
        ))
    }

    fn bethe_entropy(&self, model: &GraphModel, messages: &MessageStore) -> Result<f64> {
        Ok(entropy(&self.belief(model, messages)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::domain::DiscreteDomain, solvers::messages::DefaultMessage};

    #[test]
    fn messages_keep_the_cheapest_row() {
        let mut model = GraphModel::new();
        let root = model.root();
        let x = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let y = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let weights = vec![1., (-2f64).exp(), (-3f64).exp(), (-1f64).exp()];
        let table = model.add_table(FactorTable::dense(vec![2, 2], weights).unwrap());
        let (f, _) = model.add_table_factor(root, None, table, &[x, y]).unwrap();

        let shadow = MinSumTableFactor::new(&model, f, "MinSum").unwrap();
        let messages = MessageStore::new(DefaultMessage::Zero);
        let to_x = shadow.compute_edge(&model, &messages, 0).unwrap();
        assert!(to_x[0].abs() < 1e-12);
        assert!((to_x[1] - 1.).abs() < 1e-12);
    }
}
