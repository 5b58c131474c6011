#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Instant};

use log::{debug, info, warn};
use ndarray::Array1;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};

use crate::{
    error::{FactorGraphError, Result},
    model::{
        graph_model::{EdgeId, FactorId, GraphModel, NodeId, NodeKind, StructureChange, VariableId},
        stream::StreamShift,
    },
    schedulers::{schedule::Schedule, scheduler::Scheduler, tree_scheduler::TreeOrFloodingScheduler},
};

use super::{
    message::{costs_to_probabilities, damp, max_change},
    messages::{DefaultMessage, MessageStore, Side},
    minsum::{table_factor::MinSumTableFactor, variable::MinSumVariable},
    shadow::{SolverFactory, SolverNode},
    solver::{InterruptHandle, SolverGraph},
    solver_options::SolverOptions,
    sumproduct::{table_factor::SumProductTableFactor, variable::SumProductVariable},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SumProduct;

impl SolverFactory for SumProduct {
    type Variable = SumProductVariable;
    type Factor = SumProductTableFactor;

    const NAME: &'static str = "SumProduct";
    const DEFAULT_MESSAGE: DefaultMessage = DefaultMessage::Uniform;

    fn create_variable(&self, model: &GraphModel, variable: VariableId) -> Result<Self::Variable> {
        SumProductVariable::new(model, variable, Self::NAME)
    }

    fn create_factor(&self, model: &GraphModel, factor: FactorId) -> Result<Self::Factor> {
        SumProductTableFactor::new(model, factor, Self::NAME)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinSum;

impl SolverFactory for MinSum {
    type Variable = MinSumVariable;
    type Factor = MinSumTableFactor;

    const NAME: &'static str = "MinSum";
    const DEFAULT_MESSAGE: DefaultMessage = DefaultMessage::Zero;

    fn create_variable(&self, model: &GraphModel, variable: VariableId) -> Result<Self::Variable> {
        MinSumVariable::new(model, variable, Self::NAME)
    }

    fn create_factor(&self, model: &GraphModel, factor: FactorId) -> Result<Self::Factor> {
        MinSumTableFactor::new(model, factor, Self::NAME)
    }
}

// Message-passing solver state: lazily created shadows plus the message buffers of every edge
#[derive(Debug)]
pub struct BpSolverGraph<F: SolverFactory> {
    factory: F,
    options: SolverOptions,
    variables: HashMap<NodeId, F::Variable>,
    factors: HashMap<NodeId, F::Factor>,
    messages: MessageStore,
    port_damping: HashMap<(NodeId, usize), f64>, // overrides of the global damping
    pool: Option<ThreadPool>,
    iteration_change: f64, // largest message change of the current iteration
}

impl<F: SolverFactory> Default for BpSolverGraph<F> {
    fn default() -> Self {
        BpSolverGraph::new()
    }
}

fn check_damping(damping: f64) -> Result<()> {
    if !(0. ..=1.).contains(&damping) {
        return Err(FactorGraphError::InvalidArgument(format!(
            "damping {} is outside [0, 1]",
            damping
        )));
    }
    Ok(())
}

impl<F: SolverFactory> BpSolverGraph<F> {
    pub fn new() -> Self {
        BpSolverGraph {
            factory: F::default(),
            options: SolverOptions::default(),
            variables: HashMap::new(),
            factors: HashMap::new(),
            messages: MessageStore::new(F::DEFAULT_MESSAGE),
            port_damping: HashMap::new(),
            pool: None,
            iteration_change: 0.,
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut SolverOptions {
        &mut self.options
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    // Damping of the message leaving `node` through `port`
    pub fn set_port_damping(&mut self, node: NodeId, port: usize, damping: f64) -> Result<()> {
        check_damping(damping)?;
        self.port_damping.insert((node, port), damping);
        Ok(())
    }

    pub fn damping(&self, node: NodeId, port: usize) -> f64 {
        self.port_damping
            .get(&(node, port))
            .copied()
            .unwrap_or(self.options.damping())
    }

    pub fn num_shadows(&self) -> usize {
        self.variables.len() + self.factors.len()
    }

    // Largest message change seen during the last iteration
    pub fn iteration_change(&self) -> f64 {
        self.iteration_change
    }

    fn ensure_variable(&mut self, model: &GraphModel, variable: VariableId) -> Result<()> {
        if !self.variables.contains_key(&variable.node()) {
            let shadow = self.factory.create_variable(model, variable)?;
            shadow.create_messages(&mut self.messages);
            self.variables.insert(variable.node(), shadow);
        }
        Ok(())
    }

    fn ensure_factor(&mut self, model: &GraphModel, factor: FactorId) -> Result<()> {
        if !self.factors.contains_key(&factor.node()) {
            let shadow = self.factory.create_factor(model, factor)?;
            shadow.create_messages(&mut self.messages);
            self.factors.insert(factor.node(), shadow);
        }
        Ok(())
    }

    fn ensure_node(&mut self, model: &GraphModel, node: NodeId) -> Result<NodeKind> {
        let kind = model.node_kind(node).ok_or(FactorGraphError::UnknownNode {
            kind: "node",
            index: node.index(),
        })?;
        match kind {
            NodeKind::Variable(variable) => self.ensure_variable(model, variable)?,
            NodeKind::Factor(factor) => self.ensure_factor(model, factor)?,
        }
        Ok(kind)
    }

    // Runs `action` on the shadow of a variable, using a temporary one if none exists yet
    pub(crate) fn with_variable<R>(
        &self,
        model: &GraphModel,
        variable: VariableId,
        action: impl FnOnce(&F::Variable, &MessageStore) -> Result<R>,
    ) -> Result<R> {
        match self.variables.get(&variable.node()) {
            Some(shadow) => action(shadow, &self.messages),
            None => action(&self.factory.create_variable(model, variable)?, &self.messages),
        }
    }

    pub(crate) fn with_factor<R>(
        &self,
        model: &GraphModel,
        factor: FactorId,
        action: impl FnOnce(&F::Factor, &MessageStore) -> Result<R>,
    ) -> Result<R> {
        match self.factors.get(&factor.node()) {
            Some(shadow) => action(shadow, &self.messages),
            None => action(&self.factory.create_factor(model, factor)?, &self.messages),
        }
    }

    // Writes a new outgoing message after damping; returns the largest change
    fn commit(
        messages: &mut MessageStore,
        edge: EdgeId,
        sender: Side,
        mut message: Array1<f64>,
        damping: f64,
    ) -> f64 {
        let size = message.len();
        let old = messages.message_mut(edge, sender, size);
        damp(&mut message, old, damping);
        let change = max_change(&message, old);
        *old = message;
        change
    }

    fn commit_all<S: SolverNode>(
        shadow: &S,
        messages: &mut MessageStore,
        outgoing: Vec<Array1<f64>>,
        dampings: &[f64],
    ) -> f64 {
        let mut change: f64 = 0.;
        for (port, message) in outgoing.into_iter().enumerate() {
            change = change.max(BpSolverGraph::<F>::commit(
                messages,
                shadow.edges()[port],
                shadow.sender(),
                message,
                dampings[port],
            ));
        }
        change
    }

    fn port_dampings(&self, node: NodeId, degree: usize) -> Vec<f64> {
        (0..degree).map(|port| self.damping(node, port)).collect()
    }

    // Runs the schedule `num_iterations` times, stopping early on interruption, time limit, or convergence
    fn run(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
        num_iterations: usize,
    ) -> Result<()> {
        let time_start = Instant::now();
        let mut iteration = 0;
        while iteration < num_iterations {
            self.iteration_change = 0.;
            for entry in schedule.iter() {
                self.run_entry(model, entry)?;
            }
            iteration += 1;

            let elapsed_time = time_start.elapsed();
            info!(
                "Iteration {}. Elapsed time {:?}. Largest message change {}.",
                iteration, elapsed_time, self.iteration_change
            );

            if interrupt.is_interrupted() {
                warn!("Solver interrupted after {} iterations.", iteration);
                break;
            } else if iteration >= num_iterations {
                info!("Maximum number of iterations reached. Interrupting.");
                break;
            } else if elapsed_time >= self.options.time_max() {
                info!("Time limit reached. Interrupting.");
                break;
            } else if self.options.eps() > 0. && self.iteration_change < self.options.eps() {
                info!("Largest message change is below epsilon. Interrupting.");
                break;
            }
        }
        Ok(())
    }

    // Sums a per-node quantity over every flattened variable and factor
    fn sum_over_nodes(
        &self,
        model: &GraphModel,
        variable_term: impl Fn(&F::Variable, &MessageStore, usize) -> Result<f64>,
        factor_term: impl Fn(&F::Factor, &MessageStore) -> Result<f64>,
    ) -> Result<f64> {
        let root = model.root();
        let mut total = 0.;
        for factor in model.factors_flat(root).iter() {
            total += self.with_factor(model, *factor, |shadow, messages| factor_term(shadow, messages))?;
        }
        for variable in model.variables_flat(root).iter() {
            let degree = model.variable(*variable)?.degree();
            total += self.with_variable(model, *variable, |shadow, messages| {
                variable_term(shadow, messages, degree)
            })?;
        }
        Ok(total)
    }
}

impl<F: SolverFactory> SolverGraph for BpSolverGraph<F> {
    fn name(&self) -> &'static str {
        F::NAME
    }

    fn default_scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::new(TreeOrFloodingScheduler)
    }

    fn initialize(&mut self, model: &GraphModel) -> Result<()> {
        self.variables.clear();
        self.factors.clear();
        self.messages.clear();
        self.iteration_change = 0.;
        let root = model.root();
        for variable in model.variables_flat(root).iter() {
            self.ensure_variable(model, *variable)?;
        }
        for factor in model.factors_flat(root).iter() {
            self.ensure_factor(model, *factor)?;
        }
        debug!(
            "Initialized {} solver with {} shadows and {} edges",
            F::NAME,
            self.num_shadows(),
            self.messages.len()
        );
        Ok(())
    }

    fn update_node(&mut self, model: &GraphModel, node: NodeId) -> Result<()> {
        let missing = || FactorGraphError::UnknownNode {
            kind: "solver node",
            index: node.index(),
        };
        let change = match self.ensure_node(model, node)? {
            NodeKind::Variable(_) => {
                let shadow = self.variables.get(&node).ok_or_else(missing)?;
                let dampings = self.port_dampings(node, shadow.edges().len());
                let outgoing = shadow.compute_all(model, &self.messages)?;
                BpSolverGraph::<F>::commit_all(shadow, &mut self.messages, outgoing, &dampings)
            }
            NodeKind::Factor(_) => {
                let shadow = self.factors.get(&node).ok_or_else(missing)?;
                let dampings = self.port_dampings(node, shadow.edges().len());
                let outgoing = match &self.pool {
                    Some(pool) => {
                        let messages = &self.messages;
                        pool.install(|| {
                            (0..shadow.edges().len())
                                .into_par_iter()
                                .map(|port| shadow.compute_edge(model, messages, port))
                                .collect::<Result<Vec<_>>>()
                        })?
                    }
                    None => shadow.compute_all(model, &self.messages)?,
                };
                BpSolverGraph::<F>::commit_all(shadow, &mut self.messages, outgoing, &dampings)
            }
        };
        self.iteration_change = self.iteration_change.max(change);
        Ok(())
    }

    fn update_edge(&mut self, model: &GraphModel, node: NodeId, port: usize) -> Result<()> {
        let missing = || FactorGraphError::UnknownNode {
            kind: "solver node",
            index: node.index(),
        };
        let damping = self.damping(node, port);
        let change = match self.ensure_node(model, node)? {
            NodeKind::Variable(_) => {
                let shadow = self.variables.get(&node).ok_or_else(missing)?;
                let edge = shadow.edge(port)?;
                let message = shadow.compute_edge(model, &self.messages, port)?;
                BpSolverGraph::<F>::commit(&mut self.messages, edge, shadow.sender(), message, damping)
            }
            NodeKind::Factor(_) => {
                let shadow = self.factors.get(&node).ok_or_else(missing)?;
                let edge = shadow.edge(port)?;
                let message = shadow.compute_edge(model, &self.messages, port)?;
                BpSolverGraph::<F>::commit(&mut self.messages, edge, shadow.sender(), message, damping)
            }
        };
        self.iteration_change = self.iteration_change.max(change);
        Ok(())
    }

    fn solve_one_step(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        let num_iterations = self.options.num_iterations();
        self.run(model, schedule, interrupt, num_iterations)
    }

    fn iterate(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
        num_iterations: usize,
    ) -> Result<()> {
        self.run(model, schedule, interrupt, num_iterations)
    }

    fn belief(&self, model: &GraphModel, variable: VariableId) -> Result<Vec<f64>> {
        self.with_variable(model, variable, |shadow, messages| shadow.belief(model, messages))
    }

    fn factor_belief(&self, model: &GraphModel, factor: FactorId) -> Result<Vec<f64>> {
        self.with_factor(model, factor, |shadow, messages| shadow.belief(model, messages))
    }

    fn internal_energy(&self, model: &GraphModel) -> Result<f64> {
        self.sum_over_nodes(
            model,
            |shadow, messages, _| shadow.internal_energy(model, messages),
            |shadow, messages| shadow.internal_energy(model, messages),
        )
    }

    fn bethe_entropy(&self, model: &GraphModel) -> Result<f64> {
        self.sum_over_nodes(
            model,
            |shadow, messages, degree| {
                Ok(-(degree as f64 - 1.) * shadow.bethe_entropy(model, messages)?)
            },
            |shadow, messages| shadow.bethe_entropy(model, messages),
        )
    }

    fn set_num_iterations(&mut self, num_iterations: usize) -> Result<()> {
        self.options.set_num_iterations(num_iterations);
        Ok(())
    }

    fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        if num_threads == 0 {
            return Err(FactorGraphError::InvalidArgument(
                "the number of threads must be positive".to_string(),
            ));
        }
        self.pool = if num_threads == 1 {
            None
        } else {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .map_err(|error| FactorGraphError::InvalidArgument(error.to_string()))?,
            )
        };
        self.options.set_num_threads(num_threads);
        Ok(())
    }

    fn set_damping(&mut self, damping: f64) -> Result<()> {
        check_damping(damping)?;
        self.options.set_damping(damping);
        Ok(())
    }

    fn set_seed(&mut self, _seed: u64) {}

    fn invalidate(&mut self, change: &StructureChange) {
        for edge in &change.removed_edges {
            self.messages.remove(*edge);
        }
        self.messages.move_messages(&change.moved_edges);
        for node in &change.touched {
            self.variables.remove(node);
            self.factors.remove(node);
            self.port_damping.retain(|(damped, _), _| damped != node);
        }
    }

    fn reset_factor_messages(&mut self, model: &GraphModel, factor: FactorId) -> Result<()> {
        self.factors.remove(&factor.node());
        self.ensure_factor(model, factor)?;
        if let Some(shadow) = self.factors.get(&factor.node()) {
            for port in 0..shadow.edges().len() {
                shadow.reset_edge_messages(&mut self.messages, port);
            }
        }
        Ok(())
    }

    // Product of the factor-to-variable messages, converted from costs for min-sum
    fn blast_weights(
        &mut self,
        model: &GraphModel,
        variable: VariableId,
        factors: &[FactorId],
    ) -> Result<Vec<f64>> {
        let size = model.variable(variable)?.domain_size()?;
        let incoming = factors
            .iter()
            .map(|factor| {
                let edge = model.edge(variable, *factor)?;
                Ok(self.messages.message(edge, Side::Factor, size))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(match F::DEFAULT_MESSAGE {
            DefaultMessage::Uniform => (0..size)
                .map(|index| incoming.iter().map(|message| message[index]).product::<f64>())
                .collect(),
            DefaultMessage::Zero => {
                let costs = (0..size)
                    .map(|index| incoming.iter().map(|message| message[index]).sum::<f64>())
                    .collect::<Vec<_>>();
                costs_to_probabilities(&costs)
            }
        })
    }

    fn advance(&mut self, _model: &GraphModel, shift: &StreamShift) -> Result<()> {
        self.messages.move_messages(&shift.edges);
        self.iteration_change = 0.;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::domain::DiscreteDomain, schedulers::scheduler::FloodingScheduler,
        tables::factor_table::FactorTable,
    };

    fn loop_model() -> GraphModel {
        let mut model = GraphModel::new();
        let root = model.root();
        let variables = (0..3)
            .map(|_| model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap())
            .collect::<Vec<_>>();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![2., 1., 1., 2.]).unwrap());
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            model
                .add_table_factor(root, None, table, &[variables[a], variables[b]])
                .unwrap();
        }
        model.set_variable_input(variables[0], &[0.7, 0.3]).unwrap();
        model
    }

    #[test]
    fn parallel_factor_updates_match_sequential_ones() {
        let model = loop_model();
        let schedule = FloodingScheduler.create_schedule(&model, model.root()).unwrap();
        let interrupt = InterruptHandle::new();

        let mut sequential = BpSolverGraph::<SumProduct>::new();
        sequential.set_num_iterations(5).unwrap();
        sequential.initialize(&model).unwrap();
        sequential.solve_one_step(&model, &schedule, &interrupt).unwrap();

        let mut parallel = BpSolverGraph::<SumProduct>::new();
        parallel.set_num_iterations(5).unwrap();
        parallel.set_num_threads(2).unwrap();
        parallel.initialize(&model).unwrap();
        parallel.solve_one_step(&model, &schedule, &interrupt).unwrap();

        for variable in model.variables_flat(model.root()).iter() {
            let a = sequential.belief(&model, *variable).unwrap();
            let b = parallel.belief(&model, *variable).unwrap();
            assert!((a[0] - b[0]).abs() < 1e-12);
        }
    }

    #[test]
    fn eps_stops_converged_runs() {
        let model = loop_model();
        let schedule = FloodingScheduler.create_schedule(&model, model.root()).unwrap();
        let mut solver = BpSolverGraph::<SumProduct>::new();
        solver.set_num_iterations(1000).unwrap();
        solver.options_mut().set_eps(1e-9);
        solver.initialize(&model).unwrap();
        solver
            .solve_one_step(&model, &schedule, &InterruptHandle::new())
            .unwrap();
        assert!(solver.iteration_change() < 1e-9);
    }

    #[test]
    fn damping_is_validated() {
        let mut solver = BpSolverGraph::<MinSum>::new();
        assert!(solver.set_damping(1.5).is_err());
        solver.set_damping(0.5).unwrap();
        assert_eq!(solver.damping(NodeId::new(0), 0), 0.5);
    }
}
