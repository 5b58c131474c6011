use ndarray::Array1;

use crate::{
    error::{FactorGraphError, Result},
    model::graph_model::{EdgeId, GraphModel, NodeId, VariableId},
    solvers::{
        message::{entropy, expected_energy, normalize},
        messages::{MessageStore, Side},
        shadow::SolverNode,
    },
};

// Sum-product state of a discrete variable
#[derive(Debug, Clone)]
pub struct SumProductVariable {
    variable: VariableId,
    edges: Vec<EdgeId>,
    size: usize,
}

// Product of the input and incoming messages in log space, with zeros counted separately
struct LogProduct {
    log_sum: Vec<f64>,
    zeros: Vec<usize>,
}

impl SumProductVariable {
    pub(crate) fn new(model: &GraphModel, variable: VariableId, solver: &'static str) -> Result<Self> {
        let data = model.variable(variable)?;
        if !data.domain().is_discrete() {
            return Err(FactorGraphError::unsupported("real-valued variables", solver));
        }
        Ok(SumProductVariable {
            variable,
            edges: model.node_edges(variable.node())?,
            size: data.domain_size()?,
        })
    }

    pub fn variable(&self) -> VariableId {
        self.variable
    }

    fn log_product(&self, model: &GraphModel, messages: &MessageStore) -> Result<LogProduct> {
        let input = model.variable(self.variable)?.input();
        let mut product = LogProduct {
            log_sum: vec![0.; self.size],
            zeros: vec![0; self.size],
        };
        let mut add = |index: usize, value: f64| {
            if value == 0. {
                product.zeros[index] += 1;
            } else {
                product.log_sum[index] += value.ln();
            }
        };
        for (index, value) in input.iter().enumerate() {
            add(index, *value);
        }
        for edge in &self.edges {
            let incoming = messages.message(*edge, Side::Factor, self.size);
            for (index, value) in incoming.iter().enumerate() {
                add(index, *value);
            }
        }
        Ok(product)
    }

    // Exponentiates log values relative to their maximum, leaving entries with zeros at 0
    fn exponentiate(log_values: Vec<f64>, zeros: impl Iterator<Item = bool>) -> Array1<f64> {
        let zeros = zeros.collect::<Vec<_>>();
        let maximum = log_values
            .iter()
            .zip(&zeros)
            .filter(|(_, zero)| !**zero)
            .fold(f64::NEG_INFINITY, |maximum, (value, _)| maximum.max(*value));
        log_values
            .into_iter()
            .zip(zeros)
            .map(|(value, zero)| if zero { 0. } else { (value - maximum).exp() })
            .collect()
    }

    fn output(&self, product: &LogProduct, messages: &MessageStore, port: usize) -> Result<Array1<f64>> {
        let incoming = messages.message(self.edges[port], Side::Factor, self.size);
        let mut log_values = Vec::with_capacity(self.size);
        let mut zeros = Vec::with_capacity(self.size);
        for index in 0..self.size {
            let own = incoming[index];
            if own == 0. {
                log_values.push(product.log_sum[index]);
                zeros.push(product.zeros[index] > 1);
            } else {
                log_values.push(product.log_sum[index] - own.ln());
                zeros.push(product.zeros[index] > 0);
            }
        }
        let mut outgoing = SumProductVariable::exponentiate(log_values, zeros.into_iter());
        normalize(&mut outgoing, self.variable.index(), port)?;
        Ok(outgoing)
    }
}

impl SolverNode for SumProductVariable {
    fn node(&self) -> NodeId {
        self.variable.node()
    }

    fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    fn sender(&self) -> Side {
        Side::Variable
    }

    fn message_size(&self, _port: usize) -> usize {
        self.size
    }

    fn compute_edge(&self, model: &GraphModel, messages: &MessageStore, port: usize) -> Result<Array1<f64>> {
        let product = self.log_product(model, messages)?;
        self.output(&product, messages, port)
    }

    fn compute_all(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<Array1<f64>>> {
        let product = self.log_product(model, messages)?;
        (0..self.edges.len())
            .map(|port| self.output(&product, messages, port))
            .collect()
    }

    fn belief(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<f64>> {
        let product = self.log_product(model, messages)?;
        let mut belief = SumProductVariable::exponentiate(
            product.log_sum,
            product.zeros.iter().map(|zeros| *zeros > 0),
        );
        normalize(&mut belief, self.variable.index(), self.edges.len())?;
        Ok(belief.to_vec())
    }

    fn internal_energy(&self, model: &GraphModel, messages: &MessageStore) -> Result<f64> {
        let belief = self.belief(model, messages)?;
        let data = model.variable(self.variable)?;
        Ok(expected_energy(
            &belief,
            (0..self.size).map(|index| data.input_energy(index)),
        ))
    }

    fn bethe_entropy(&self, model: &GraphModel, messages: &MessageStore) -> Result<f64> {
        Ok(entropy(&self.belief(model, messages)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::domain::DiscreteDomain, solvers::messages::DefaultMessage,
        tables::factor_table::FactorTable,
    };

    #[test]
    fn outgoing_messages_exclude_their_own_port() {
        let mut model = GraphModel::new();
        let root = model.root();
        let x = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let y = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        let (f, _) = model.add_table_factor(root, None, table, &[x, y]).unwrap();
        let (g, _) = model.add_table_factor(root, None, table, &[x, y]).unwrap();
        model.set_variable_input(x, &[0.2, 0.8]).unwrap();

        let shadow = SumProductVariable::new(&model, x, "SumProduct").unwrap();
        let mut messages = MessageStore::new(DefaultMessage::Uniform);
        shadow.create_messages(&mut messages);
        *messages.message_mut(model.edge(x, f).unwrap(), Side::Factor, 2) = ndarray::array![0., 1.];
        *messages.message_mut(model.edge(x, g).unwrap(), Side::Factor, 2) = ndarray::array![0.5, 0.5];

        let to_f = shadow.compute_edge(&model, &messages, 0).unwrap();
        assert!((to_f[0] - 0.2).abs() < 1e-12);
        let to_g = shadow.compute_edge(&model, &messages, 1).unwrap();
        assert_eq!(to_g.to_vec(), vec![0., 1.]);
        assert_eq!(shadow.belief(&model, &messages).unwrap(), vec![0., 1.]);
    }
}
