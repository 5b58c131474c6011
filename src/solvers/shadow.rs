use std::{borrow::Cow, fmt::Debug};

use ndarray::Array1;

use crate::{
    error::{FactorGraphError, Result},
    model::{
        assignment::Assignment,
        graph_model::{EdgeId, FactorId, GraphModel, NodeId, NodeKind, VariableId},
    },
};

use super::messages::{DefaultMessage, MessageStore, Side};

// Solver-side state attached to one model node
pub trait SolverNode: Send + Sync + Debug {
    fn node(&self) -> NodeId;

    // Edges in port order
    fn edges(&self) -> &[EdgeId];

    // Direction of the messages this node writes
    fn sender(&self) -> Side;

    // Length of the messages on `port`
    fn message_size(&self, port: usize) -> usize;

    fn create_messages(&self, messages: &mut MessageStore) {
        for (port, edge) in self.edges().iter().enumerate() {
            messages.ensure(*edge, self.message_size(port));
        }
    }

    fn reset_edge_messages(&self, messages: &mut MessageStore, port: usize) {
        if let Some(edge) = self.edges().get(port) {
            messages.reset_edge(*edge);
        }
    }

    // New outgoing message on `port`, computed from the current incoming messages
    fn compute_edge(
        &self,
        model: &GraphModel,
        messages: &MessageStore,
        port: usize,
    ) -> Result<Array1<f64>>;

    // New outgoing messages on every port
    fn compute_all(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<Array1<f64>>> {
        (0..self.edges().len())
            .map(|port| self.compute_edge(model, messages, port))
            .collect()
    }

    // Normalized belief: over the domain for variables, over the table rows for factors
    fn belief(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<f64>>;

    fn internal_energy(&self, model: &GraphModel, messages: &MessageStore) -> Result<f64>;

    fn bethe_entropy(&self, model: &GraphModel, messages: &MessageStore) -> Result<f64>;

    // Energy of the node at the given labels
    fn score(&self, model: &GraphModel, assignment: &Assignment) -> Result<f64> {
        match model.node_kind(self.node()) {
            Some(NodeKind::Variable(variable)) => {
                let index = assignment.get(variable).ok_or(FactorGraphError::InvalidArgument(
                    format!("variable {} is unlabeled", variable.index()),
                ))?;
                model.variable_energy(variable, index)
            }
            Some(NodeKind::Factor(factor)) => model.factor_energy(factor, assignment),
            None => Err(FactorGraphError::UnknownNode {
                kind: "node",
                index: self.node().index(),
            }),
        }
    }

    fn input_message<'a>(&self, messages: &'a MessageStore, port: usize) -> Result<Cow<'a, Array1<f64>>> {
        let edge = self.edge(port)?;
        Ok(messages.message(edge, self.sender().opposite(), self.message_size(port)))
    }

    fn output_message<'a>(&self, messages: &'a MessageStore, port: usize) -> Result<Cow<'a, Array1<f64>>> {
        let edge = self.edge(port)?;
        Ok(messages.message(edge, self.sender(), self.message_size(port)))
    }

    fn edge(&self, port: usize) -> Result<EdgeId> {
        self.edges()
            .get(port)
            .copied()
            .ok_or(FactorGraphError::InvalidArgument(format!(
                "port {} is out of range for node {}",
                port,
                self.node().index()
            )))
    }
}

// Creates the shadows of one message-passing strategy
pub trait SolverFactory: Default + Debug + Send + Sync {
    type Variable: SolverNode;
    type Factor: SolverNode;

    const NAME: &'static str;
    const DEFAULT_MESSAGE: DefaultMessage;

    fn create_variable(&self, model: &GraphModel, variable: VariableId) -> Result<Self::Variable>;

    fn create_factor(&self, model: &GraphModel, factor: FactorId) -> Result<Self::Factor>;
}
