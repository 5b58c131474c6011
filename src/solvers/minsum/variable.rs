use ndarray::Array1;

use crate::{
    error::{FactorGraphError, Result},
    model::graph_model::{EdgeId, GraphModel, NodeId, VariableId},
    solvers::{
        message::{costs_to_probabilities, entropy, expected_energy, normalize_costs},
        messages::{MessageStore, Side},
        shadow::SolverNode,
    },
};

// Min-sum state of a discrete variable; messages are costs
#[derive(Debug, Clone)]
pub struct MinSumVariable {
    variable: VariableId,
    edges: Vec<EdgeId>,
    size: usize,
}

// Sum of the input cost and incoming costs, with infinities counted separately
struct CostSum {
    finite: Vec<f64>,
    infinities: Vec<usize>,
}

impl MinSumVariable {
    pub(crate) fn new(model: &GraphModel, variable: VariableId, solver: &'static str) -> Result<Self> {
        let data = model.variable(variable)?;
        if !data.domain().is_discrete() {
            return Err(FactorGraphError::unsupported("real-valued variables", solver));
        }
        Ok(MinSumVariable {
            variable,
            edges: model.node_edges(variable.node())?,
            size: data.domain_size()?,
        })
    }

    fn cost_sum(&self, model: &GraphModel, messages: &MessageStore) -> Result<CostSum> {
        let data = model.variable(self.variable)?;
        let mut sum = CostSum {
            finite: vec![0.; self.size],
            infinities: vec![0; self.size],
        };
        let mut add = |index: usize, cost: f64| {
            if cost.is_infinite() {
                sum.infinities[index] += 1;
            } else {
                sum.finite[index] += cost;
            }
        };
        for index in 0..self.size {
            add(index, data.input_energy(index));
        }
        for edge in &self.edges {
            let incoming = messages.message(*edge, Side::Factor, self.size);
            for (index, cost) in incoming.iter().enumerate() {
                add(index, *cost);
            }
        }
        Ok(sum)
    }

    fn total_costs(sum: &CostSum) -> Vec<f64> {
        sum.finite
            .iter()
            .zip(&sum.infinities)
            .map(|(cost, infinities)| if *infinities > 0 { f64::INFINITY } else { *cost })
            .collect()
    }

    fn output(&self, sum: &CostSum, messages: &MessageStore, port: usize) -> Result<Array1<f64>> {
        let incoming = messages.message(self.edges[port], Side::Factor, self.size);
        let mut outgoing = (0..self.size)
            .map(|index| {
                let own = incoming[index];
                if own.is_infinite() {
                    if sum.infinities[index] > 1 {
                        f64::INFINITY
                    } else {
                        sum.finite[index]
                    }
                } else if sum.infinities[index] > 0 {
                    f64::INFINITY
                } else {
                    sum.finite[index] - own
                }
            })
            .collect::<Array1<f64>>();
        normalize_costs(&mut outgoing, self.variable.index(), port)?;
        Ok(outgoing)
    }
}

impl SolverNode for MinSumVariable {
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
        let sum = self.cost_sum(model, messages)?;
        self.output(&sum, messages, port)
    }

    fn compute_all(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<Array1<f64>>> {
        let sum = self.cost_sum(model, messages)?;
        (0..self.edges.len())
            .map(|port| self.output(&sum, messages, port))
            .collect()
    }

    fn belief(&self, model: &GraphModel, messages: &MessageStore) -> Result<Vec<f64>> {
        let costs = MinSumVariable::total_costs(&self.cost_sum(model, messages)?);
        if costs.iter().all(|cost| cost.is_infinite()) {
            return Err(FactorGraphError::ZeroNormalization {
                node: self.variable.index(),
                port: self.edges.len(),
            });
        }
        Ok(costs_to_probabilities(&costs))
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
