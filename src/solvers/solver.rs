#![allow(dead_code)]

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    error::{FactorGraphError, Result},
    model::{
        graph_model::{FactorId, GraphModel, NodeId, StructureChange, VariableId},
        stream::StreamShift,
    },
    schedulers::{
        schedule::{Schedule, ScheduleEntry},
        scheduler::Scheduler,
    },
};

use super::{
    bp_graph::{BpSolverGraph, MinSum, SumProduct},
    gibbs::gibbs_graph::GibbsSolverGraph,
    message::argmax,
};

// Cloneable flag used to stop a running solve at the next iteration or sample boundary
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        InterruptHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverKind {
    SumProduct,
    MinSum,
    Gibbs,
}

impl Display for SolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SolverKind::SumProduct => "SumProduct",
            SolverKind::MinSum => "MinSum",
            SolverKind::Gibbs => "Gibbs",
        };
        write!(f, "{}", name)
    }
}

// Inference strategy state attached to a graph
pub trait SolverGraph: Send {
    fn name(&self) -> &'static str;

    fn default_scheduler(&self) -> Arc<dyn Scheduler>;

    // Discards all shadow state and starts from default messages (or fresh samples)
    fn initialize(&mut self, model: &GraphModel) -> Result<()>;

    fn update_node(&mut self, model: &GraphModel, node: NodeId) -> Result<()>;

    fn update_edge(&mut self, model: &GraphModel, node: NodeId, port: usize) -> Result<()>;

    fn run_entry(&mut self, model: &GraphModel, entry: &ScheduleEntry) -> Result<()> {
        match entry {
            ScheduleEntry::Node(node) => self.update_node(model, *node),
            ScheduleEntry::Edge { node, port } => self.update_edge(model, *node, *port),
            ScheduleEntry::SubSchedule { schedule, .. } => {
                for entry in schedule.iter() {
                    self.run_entry(model, entry)?;
                }
                Ok(())
            }
            ScheduleEntry::Block(entries) => {
                for entry in entries {
                    self.run_entry(model, entry)?;
                }
                Ok(())
            }
        }
    }

    // One full run without re-initialization
    fn solve_one_step(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()>;

    fn continue_solve(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        self.solve_one_step(model, schedule, interrupt)
    }

    fn iterate(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
        num_iterations: usize,
    ) -> Result<()>;

    fn belief(&self, model: &GraphModel, variable: VariableId) -> Result<Vec<f64>>;

    fn factor_belief(&self, model: &GraphModel, factor: FactorId) -> Result<Vec<f64>>;

    // Most likely domain index of a variable
    fn guess(&self, model: &GraphModel, variable: VariableId) -> Result<usize> {
        if let Some(index) = model.variable(variable)?.fixed_value_index() {
            return Ok(index);
        }
        Ok(argmax(&self.belief(model, variable)?))
    }

    fn internal_energy(&self, model: &GraphModel) -> Result<f64>;

    fn bethe_entropy(&self, model: &GraphModel) -> Result<f64>;

    fn set_num_iterations(&mut self, num_iterations: usize) -> Result<()>;

    fn set_num_threads(&mut self, num_threads: usize) -> Result<()>;

    fn set_damping(&mut self, damping: f64) -> Result<()>;

    fn set_seed(&mut self, seed: u64);

    // Drops the state of touched nodes and removed edges, and moves the messages of rewired edges
    fn invalidate(&mut self, change: &StructureChange);

    fn reset_factor_messages(&mut self, model: &GraphModel, factor: FactorId) -> Result<()>;

    // Unnormalized weights over the domain of `variable` combining what `factors` say about it
    fn blast_weights(
        &mut self,
        model: &GraphModel,
        variable: VariableId,
        factors: &[FactorId],
    ) -> Result<Vec<f64>>;

    // Moves per-node state one step along a sliding window
    fn advance(&mut self, model: &GraphModel, shift: &StreamShift) -> Result<()>;
}

pub enum Solver {
    SumProduct(BpSolverGraph<SumProduct>),
    MinSum(BpSolverGraph<MinSum>),
    Gibbs(GibbsSolverGraph),
}

macro_rules! match_solver_action {
    ($solver:ident, $solver_match:ident, $action:expr) => {
        match $solver {
            Solver::SumProduct($solver_match) => $action,
            Solver::MinSum($solver_match) => $action,
            Solver::Gibbs($solver_match) => $action,
        }
    };
}

impl Solver {
    pub fn new(kind: SolverKind) -> Self {
        match kind {
            SolverKind::SumProduct => Solver::SumProduct(BpSolverGraph::new()),
            SolverKind::MinSum => Solver::MinSum(BpSolverGraph::new()),
            SolverKind::Gibbs => Solver::Gibbs(GibbsSolverGraph::new()),
        }
    }

    pub fn kind(&self) -> SolverKind {
        match self {
            Solver::SumProduct(_) => SolverKind::SumProduct,
            Solver::MinSum(_) => SolverKind::MinSum,
            Solver::Gibbs(_) => SolverKind::Gibbs,
        }
    }

    pub fn as_sum_product(&self) -> Result<&BpSolverGraph<SumProduct>> {
        match self {
            Solver::SumProduct(solver) => Ok(solver),
            other => Err(FactorGraphError::unsupported(
                "this operation",
                other.name(),
            )),
        }
    }

    pub fn as_sum_product_mut(&mut self) -> Result<&mut BpSolverGraph<SumProduct>> {
        match self {
            Solver::SumProduct(solver) => Ok(solver),
            other => Err(FactorGraphError::unsupported(
                "this operation",
                other.name(),
            )),
        }
    }

    pub fn as_gibbs(&self) -> Result<&GibbsSolverGraph> {
        match self {
            Solver::Gibbs(solver) => Ok(solver),
            other => Err(FactorGraphError::unsupported(
                "this operation",
                other.name(),
            )),
        }
    }

    pub fn as_gibbs_mut(&mut self) -> Result<&mut GibbsSolverGraph> {
        match self {
            Solver::Gibbs(solver) => Ok(solver),
            other => Err(FactorGraphError::unsupported(
                "this operation",
                other.name(),
            )),
        }
    }
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Solver({})", self.kind())
    }
}

impl SolverGraph for Solver {
    fn name(&self) -> &'static str {
        match_solver_action!(self, solver, solver.name())
    }

    fn default_scheduler(&self) -> Arc<dyn Scheduler> {
        match_solver_action!(self, solver, solver.default_scheduler())
    }

    fn initialize(&mut self, model: &GraphModel) -> Result<()> {
        match_solver_action!(self, solver, solver.initialize(model))
    }

    fn update_node(&mut self, model: &GraphModel, node: NodeId) -> Result<()> {
        match_solver_action!(self, solver, solver.update_node(model, node))
    }

    fn update_edge(&mut self, model: &GraphModel, node: NodeId, port: usize) -> Result<()> {
        match_solver_action!(self, solver, solver.update_edge(model, node, port))
    }

    fn run_entry(&mut self, model: &GraphModel, entry: &ScheduleEntry) -> Result<()> {
        match_solver_action!(self, solver, solver.run_entry(model, entry))
    }

    fn solve_one_step(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        match_solver_action!(self, solver, solver.solve_one_step(model, schedule, interrupt))
    }

    fn continue_solve(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        match_solver_action!(self, solver, solver.continue_solve(model, schedule, interrupt))
    }

    fn iterate(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
        num_iterations: usize,
    ) -> Result<()> {
        match_solver_action!(
            self,
            solver,
            solver.iterate(model, schedule, interrupt, num_iterations)
        )
    }

    fn belief(&self, model: &GraphModel, variable: VariableId) -> Result<Vec<f64>> {
        match_solver_action!(self, solver, solver.belief(model, variable))
    }

    fn factor_belief(&self, model: &GraphModel, factor: FactorId) -> Result<Vec<f64>> {
        match_solver_action!(self, solver, solver.factor_belief(model, factor))
    }

    fn guess(&self, model: &GraphModel, variable: VariableId) -> Result<usize> {
        match_solver_action!(self, solver, solver.guess(model, variable))
    }

    fn internal_energy(&self, model: &GraphModel) -> Result<f64> {
        match_solver_action!(self, solver, solver.internal_energy(model))
    }

    fn bethe_entropy(&self, model: &GraphModel) -> Result<f64> {
        match_solver_action!(self, solver, solver.bethe_entropy(model))
    }

    fn set_num_iterations(&mut self, num_iterations: usize) -> Result<()> {
        match_solver_action!(self, solver, solver.set_num_iterations(num_iterations))
    }

    fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        match_solver_action!(self, solver, solver.set_num_threads(num_threads))
    }

    fn set_damping(&mut self, damping: f64) -> Result<()> {
        match_solver_action!(self, solver, solver.set_damping(damping))
    }

    fn set_seed(&mut self, seed: u64) {
        match_solver_action!(self, solver, solver.set_seed(seed))
    }

    fn invalidate(&mut self, change: &StructureChange) {
        match_solver_action!(self, solver, solver.invalidate(change))
    }

    fn reset_factor_messages(&mut self, model: &GraphModel, factor: FactorId) -> Result<()> {
        match_solver_action!(self, solver, solver.reset_factor_messages(model, factor))
    }

    fn blast_weights(
        &mut self,
        model: &GraphModel,
        variable: VariableId,
        factors: &[FactorId],
    ) -> Result<Vec<f64>> {
        match_solver_action!(self, solver, solver.blast_weights(model, variable, factors))
    }

    fn advance(&mut self, model: &GraphModel, shift: &StreamShift) -> Result<()> {
        match_solver_action!(self, solver, solver.advance(model, shift))
    }
}
