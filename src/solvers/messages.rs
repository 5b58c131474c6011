#![allow(dead_code)]

use std::{borrow::Cow, collections::HashMap};

use ndarray::Array1;

use crate::model::graph_model::EdgeId;

// Sender of a message along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Variable, // variable -> factor
    Factor,   // factor -> variable
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Variable => Side::Factor,
            Side::Factor => Side::Variable,
        }
    }
}

// Value a message takes before anything has been sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultMessage {
    Uniform, // probabilities 1/n
    Zero,    // zero costs
}

impl DefaultMessage {
    pub fn create(self, size: usize) -> Array1<f64> {
        match self {
            DefaultMessage::Uniform => Array1::from_elem(size, 1. / size as f64),
            DefaultMessage::Zero => Array1::zeros(size),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMessages {
    pub to_factor: Array1<f64>,
    pub to_variable: Array1<f64>,
}

impl EdgeMessages {
    fn get(&self, sender: Side) -> &Array1<f64> {
        match sender {
            Side::Variable => &self.to_factor,
            Side::Factor => &self.to_variable,
        }
    }

    fn get_mut(&mut self, sender: Side) -> &mut Array1<f64> {
        match sender {
            Side::Variable => &mut self.to_factor,
            Side::Factor => &mut self.to_variable,
        }
    }
}

// Message buffers of every edge, keyed by edge identity
#[derive(Debug, Clone)]
pub struct MessageStore {
    edges: HashMap<EdgeId, EdgeMessages>,
    default: DefaultMessage,
}

impl MessageStore {
    pub fn new(default: DefaultMessage) -> Self {
        MessageStore {
            edges: HashMap::new(),
            default,
        }
    }

    pub fn default_message(&self, size: usize) -> Array1<f64> {
        self.default.create(size)
    }

    // Creates default messages of length `size` for an edge that has none
    pub fn ensure(&mut self, edge: EdgeId, size: usize) {
        let default = self.default;
        let entry = self.edges.entry(edge).or_insert_with(|| EdgeMessages {
            to_factor: default.create(size),
            to_variable: default.create(size),
        });
        if entry.to_factor.len() != size {
            *entry = EdgeMessages {
                to_factor: default.create(size),
                to_variable: default.create(size),
            };
        }
    }

    pub fn contains(&self, edge: EdgeId) -> bool {
        self.edges.contains_key(&edge)
    }

    // Message sent by `sender` along `edge`; the default message when none has been sent
    pub fn message(&self, edge: EdgeId, sender: Side, size: usize) -> Cow<'_, Array1<f64>> {
        match self.edges.get(&edge) {
            Some(messages) if messages.get(sender).len() == size => {
                Cow::Borrowed(messages.get(sender))
            }
            _ => Cow::Owned(self.default.create(size)),
        }
    }

    pub fn get(&self, edge: EdgeId) -> Option<&EdgeMessages> {
        self.edges.get(&edge)
    }

    pub fn message_mut(&mut self, edge: EdgeId, sender: Side, size: usize) -> &mut Array1<f64> {
        self.ensure(edge, size);
        let default = self.default;
        self.edges
            .entry(edge)
            .or_insert_with(|| EdgeMessages {
                to_factor: default.create(size),
                to_variable: default.create(size),
            })
            .get_mut(sender)
    }

    // Resets both directions of an edge to the default message
    pub fn reset_edge(&mut self, edge: EdgeId) {
        let default = self.default;
        if let Some(messages) = self.edges.get_mut(&edge) {
            let size = messages.to_factor.len();
            messages.to_factor = default.create(size);
            messages.to_variable = default.create(size);
        }
    }

    pub fn remove(&mut self, edge: EdgeId) -> Option<EdgeMessages> {
        self.edges.remove(&edge)
    }

    // Moves the messages of every `old` edge to its `new` edge; moves are applied as one batch
    pub fn move_messages(&mut self, moves: &[(EdgeId, EdgeId)]) {
        let taken = moves
            .iter()
            .filter_map(|(old, new)| self.edges.remove(old).map(|messages| (*new, messages)))
            .collect::<Vec<_>>();
        for (new, messages) in taken {
            self.edges.insert(new, messages);
        }
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::stable_graph::EdgeIndex;

    #[test]
    fn missing_messages_read_as_default() {
        let store = MessageStore::new(DefaultMessage::Uniform);
        let message = store.message(EdgeIndex::new(3), Side::Factor, 4);
        assert_eq!(message.to_vec(), vec![0.25; 4]);
    }

    #[test]
    fn moves_are_applied_as_a_batch() {
        let mut store = MessageStore::new(DefaultMessage::Zero);
        let (a, b) = (EdgeIndex::new(0), EdgeIndex::new(1));
        store.message_mut(a, Side::Variable, 2)[0] = 1.;
        store.message_mut(b, Side::Variable, 2)[0] = 2.;
        store.move_messages(&[(a, b), (b, a)]);
        assert_eq!(store.message(a, Side::Variable, 2)[0], 2.);
        assert_eq!(store.message(b, Side::Variable, 2)[0], 1.);
    }
}
