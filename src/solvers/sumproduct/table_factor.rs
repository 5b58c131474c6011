use std::borrow::Cow;

use ndarray::Array1;

use crate::{
    error::{FactorGraphError, Result},
    model::graph_model::{EdgeId, FactorId, GraphModel, NodeId, TableId},
    solvers::{
        message::{entropy, expected_energy, normalize},
        messages::{MessageStore, Side},
        shadow::SolverNode,
    },
    tables::factor_table::FactorTable,
};

// Sum-product state of a factor backed by a factor table
#[derive(Debug, Clone)]
pub struct SumProductTableFactor {
    factor: FactorId,
    table: TableId,
    edges: Vec<EdgeId>,
    sizes: Vec<usize>, // domain size of each port
}

impl SumProductTableFactor {
    pub(crate) fn new(model: &GraphModel, factor: FactorId, solver: &'static str) -> Result<Self> {
        let table = model
            .factor(factor)?
            .table()
            .ok_or(FactorGraphError::unsupported("factors over real-valued variables", solver))?;
        Ok(SumProductTableFactor {
            factor,
            table,
            edges: model.node_edges(factor.node())?,
            sizes: model.table(table)?.domain_sizes().to_vec(),
        })
    }

    pub fn factor(&self) -> FactorId {
        self.factor
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub(crate) fn incoming<'a>(&self, messages: &'a MessageStore) -> Vec<Cow<'a, Array1<f64>>> {
        self.edges
            .iter()
            .zip(&self.sizes)
            .map(|(edge, size)| messages.message(*edge, Side::Variable, *size))
            .collect()
    }

    // Weight of every row times the incoming messages, skipping port `excluded`
    pub(crate) fn row_products(
        table: &FactorTable,
        incoming: &[Cow<Array1<f64>>],
        excluded: Option<usize>,
    ) -> Vec<f64> {
        (0..table.num_rows())
            .map(|row| {
                let indices = table.row(row);
                incoming
                    .iter()
                    .enumerate()
                    .filter(|(port, _)| Some(*port) != excluded)
                    .fold(table.weight(row), |product, (port, message)| {
                        product * message[indices[port]]
                    })
            })
            .collect()
    }
}

impl SolverNode for SumProductTableFactor {
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
        let products = SumProductTableFactor::row_products(table, &incoming, Some(port));
        let mut outgoing = Array1::zeros(self.sizes[port]);
        for (row, product) in products.into_iter().enumerate() {
            outgoing[table.row(row)[port]] += product;
        }
        normalize(&mut outgoing, self.factor.index(), port)?;
        Ok(outgoing)
    }

    // Belief over the table rows, in row order
    fn belief(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<f64>> {
        let table = model.table(self.table)?;
        let incoming = self.incoming(messages);
        let mut belief = Array1::from(SumProductTableFactor::row_products(table, &incoming, None));
        normalize(&mut belief, self.factor.index(), self.edges.len())?;
        Ok(belief.to_vec())
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
    fn messages_marginalize_the_table() {
        let mut model = GraphModel::new();
        let root = model.root();
        let x = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let y = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1., 2., 3., 4.]).unwrap());
        let (f, _) = model.add_table_factor(root, None, table, &[x, y]).unwrap();

        let shadow = SumProductTableFactor::new(&model, f, "SumProduct").unwrap();
        let messages = MessageStore::new(DefaultMessage::Uniform);
        let to_x = shadow.compute_edge(&model, &messages, 0).unwrap();
        assert!((to_x[0] - 0.3).abs() < 1e-12);
        let to_y = shadow.compute_edge(&model, &messages, 1).unwrap();
        assert!((to_y[1] - 0.6).abs() < 1e-12);
        let belief = shadow.belief(&model, &messages).unwrap();
        assert!((belief[3] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn impossible_evidence_fails_fast() {
        let mut model = GraphModel::new();
        let root = model.root();
        let x = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let y = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let table = model.add_table(FactorTable::new(vec![2, 2], vec![vec![0, 0]], vec![1.]).unwrap());
        let (f, _) = model.add_table_factor(root, None, table, &[x, y]).unwrap();

        let shadow = SumProductTableFactor::new(&model, f, "SumProduct").unwrap();
        let mut messages = MessageStore::new(DefaultMessage::Uniform);
        *messages.message_mut(model.edge(y, f).unwrap(), Side::Variable, 2) = ndarray::array![0., 1.];
        assert_eq!(
            shadow.compute_edge(&model, &messages, 0),
            Err(FactorGraphError::ZeroNormalization {
                node: f.index(),
                port: 0
            })
        );
    }
}
