use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, info};
use ndarray::Array2;
use petgraph::stable_graph::NodeIndex;

use crate::{
    error::{FactorGraphError, Result},
    factor_functions::factor_function::FactorFunction,
    schedulers::{schedule::Schedule, scheduler::Scheduler},
    solvers::solver::{InterruptHandle, Solver, SolverGraph, SolverKind},
    tables::factor_table::FactorTable,
};

use super::{
    assignment::Assignment,
    domain::Domain,
    graph_model::{
        EdgeId, FactorId, GraphId, GraphModel, NodeId, NodeMap, StructureChange, TableId,
        VariableId,
    },
    stream::{RepeatedGraphId, StreamId, StreamSlice, Streams},
    value::Value,
};

// Clears the running flag and any pending interrupt when a run ends, however it ends
pub(crate) struct RunningGuard {
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) interrupt: InterruptHandle,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.interrupt.clear();
    }
}

// A factor graph together with the solver, scheduler, and run state attached to it
#[derive(Debug)]
pub struct FactorGraph {
    model: GraphModel,
    solver: Option<Solver>,
    scheduler: Option<Arc<dyn Scheduler>>, // None = the solver's default scheduler
    schedule_cache: Option<Schedule>,
    streams: Streams,
    running: Arc<AtomicBool>,
    interrupt: InterruptHandle,
    seed: Option<u64>,
}

impl Default for FactorGraph {
    fn default() -> Self {
        FactorGraph::new()
    }
}

impl FactorGraph {
    // Creates an empty graph with the sum-product solver attached
    pub fn new() -> Self {
        FactorGraph {
            model: GraphModel::new(),
            solver: Some(Solver::new(SolverKind::SumProduct)),
            scheduler: None,
            schedule_cache: None,
            streams: Streams::default(),
            running: Arc::new(AtomicBool::new(false)),
            interrupt: InterruptHandle::new(),
            seed: None,
        }
    }

    pub fn with_solver(kind: SolverKind) -> Self {
        let mut graph = FactorGraph::new();
        graph.solver = Some(Solver::new(kind));
        graph
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn root(&self) -> GraphId {
        self.model.root()
    }

    pub fn is_solver_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn check_not_running(&self) -> Result<()> {
        if self.is_solver_running() {
            return Err(FactorGraphError::SolverRunning);
        }
        Ok(())
    }

    // Drops solver state made stale by a structural change
    fn apply_change(&mut self, change: StructureChange) {
        if let Some(solver) = self.solver.as_mut() {
            solver.invalidate(&change);
        }
        self.schedule_cache = None;
    }

    // ---------------------------------------------------------------------------------------------
    // Variables

    pub fn add_variable(&mut self, domain: impl Into<Domain>) -> Result<VariableId> {
        self.add_variable_to(self.root(), None, domain)
    }

    pub fn add_named_variable(&mut self, name: &str, domain: impl Into<Domain>) -> Result<VariableId> {
        self.add_variable_to(self.root(), Some(name.to_string()), domain)
    }

    pub fn add_variable_to(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        domain: impl Into<Domain>,
    ) -> Result<VariableId> {
        self.check_not_running()?;
        let variable = self.model.add_variable(graph, name, domain.into())?;
        self.apply_change(StructureChange {
            touched: vec![variable.node()],
            ..Default::default()
        });
        Ok(variable)
    }

    pub fn set_input(&mut self, variable: VariableId, weights: &[f64]) -> Result<()> {
        self.check_not_running()?;
        self.model.set_variable_input(variable, weights)
    }

    pub fn set_fixed_value(&mut self, variable: VariableId, value: &Value) -> Result<()> {
        self.check_not_running()?;
        self.model.set_variable_fixed_value(variable, value)
    }

    pub fn set_fixed_index(&mut self, variable: VariableId, index: usize) -> Result<()> {
        self.check_not_running()?;
        self.model.set_variable_fixed_index(variable, index)
    }

    pub fn input(&self, variable: VariableId) -> Result<&[f64]> {
        Ok(self.model.variable(variable)?.input())
    }

    pub fn remove_variable(&mut self, variable: VariableId) -> Result<()> {
        self.check_not_running()?;
        let change = self.model.remove_variable(variable)?;
        self.apply_change(change);
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Factors

    pub fn add_factor(
        &mut self,
        function: Arc<dyn FactorFunction>,
        variables: &[VariableId],
    ) -> Result<FactorId> {
        self.add_factor_to(self.root(), None, function, variables)
    }

    pub fn add_factor_to(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        function: Arc<dyn FactorFunction>,
        variables: &[VariableId],
    ) -> Result<FactorId> {
        self.check_not_running()?;
        let (factor, change) = self
            .model
            .add_function_factor(graph, name, function, variables)?;
        self.apply_change(change);
        Ok(factor)
    }

    pub fn add_table(&mut self, table: FactorTable) -> Result<TableId> {
        self.check_not_running()?;
        Ok(self.model.add_table(table))
    }

    pub fn add_table_factor(&mut self, table: TableId, variables: &[VariableId]) -> Result<FactorId> {
        self.add_table_factor_to(self.root(), None, table, variables)
    }

    pub fn add_table_factor_to(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        table: TableId,
        variables: &[VariableId],
    ) -> Result<FactorId> {
        self.check_not_running()?;
        let (factor, change) = self
            .model
            .add_table_factor(graph, name, table, variables)?;
        self.apply_change(change);
        Ok(factor)
    }

    // Builds a table from explicit rows and attaches a factor using it
    pub fn add_factor_from_table(
        &mut self,
        domain_sizes: Vec<usize>,
        rows: Vec<Vec<usize>>,
        weights: Vec<f64>,
        variables: &[VariableId],
    ) -> Result<FactorId> {
        self.check_not_running()?;
        let table = FactorTable::new(domain_sizes, rows, weights)?;
        let table = self.model.add_table(table);
        self.add_table_factor(table, variables)
    }

    pub fn remove_factor(&mut self, factor: FactorId) -> Result<()> {
        self.check_not_running()?;
        let change = self.model.remove_factor(factor)?;
        self.apply_change(change);
        Ok(())
    }

    pub fn set_directed_to(&mut self, factor: FactorId, directed_to: &[usize]) -> Result<()> {
        self.check_not_running()?;
        self.model.set_directed_to(factor, directed_to)?;
        if let Some(solver) = self.solver.as_mut() {
            solver.reset_factor_messages(&self.model, factor)?;
        }
        Ok(())
    }

    pub fn table(&self, table: TableId) -> Result<&FactorTable> {
        self.model.table(table)
    }

    pub fn table_mut(&mut self, table: TableId) -> Result<&mut FactorTable> {
        self.check_not_running()?;
        self.model.table_mut(table)
    }

    pub fn join_factors(&mut self, a: FactorId, b: FactorId) -> Result<FactorId> {
        self.check_not_running()?;
        let (factor, change) = self.model.join_factors(a, b)?;
        self.apply_change(change);
        Ok(factor)
    }

    // Returns the new copy of `variable` and the equality factor tying it to the original
    pub fn split_variable(
        &mut self,
        variable: VariableId,
        factors: &[FactorId],
    ) -> Result<(VariableId, FactorId)> {
        self.check_not_running()?;
        let (copy, constraint, change) = self.model.split_variable(variable, factors)?;
        self.apply_change(change);
        Ok((copy, constraint))
    }

    // ---------------------------------------------------------------------------------------------
    // Adjacency

    pub fn siblings(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.model.neighbors(node)
    }

    pub fn port_of(&self, node: NodeId, neighbor: NodeId) -> Result<usize> {
        self.model.port_of(node, neighbor)
    }

    pub fn edge(&self, variable: VariableId, factor: FactorId) -> Result<EdgeId> {
        self.model.edge(variable, factor)
    }

    pub fn is_tree(&self) -> Result<bool> {
        self.model.is_tree(self.root())
    }

    pub fn adjacency_matrix(&self) -> Result<Array2<u8>> {
        self.model.adjacency_matrix(self.root())
    }

    pub fn variables_flat(&self) -> Vec<VariableId> {
        self.model.variables_flat(self.root()).to_vec()
    }

    pub fn factors_flat(&self) -> Vec<FactorId> {
        self.model.factors_flat(self.root()).to_vec()
    }

    // ---------------------------------------------------------------------------------------------
    // Nesting

    // Nests a copy of `template` in the root graph, identifying its boundary variables with `boundary`
    pub fn add_graph(&mut self, template: &FactorGraph, boundary: &[VariableId]) -> Result<(GraphId, NodeMap)> {
        self.add_graph_to(self.root(), None, template, boundary)
    }

    pub fn add_graph_to(
        &mut self,
        parent: GraphId,
        name: Option<String>,
        template: &FactorGraph,
        boundary: &[VariableId],
    ) -> Result<(GraphId, NodeMap)> {
        self.check_not_running()?;
        let (graph, map, change) = self.model.add_graph(&template.model, boundary, parent, name)?;
        self.apply_change(change);
        Ok((graph, map))
    }

    pub fn set_boundary_variables(&mut self, variables: &[VariableId]) -> Result<()> {
        self.check_not_running()?;
        self.model.set_boundary_variables(self.root(), variables)
    }

    pub fn parent_graph(&self, graph: GraphId) -> Result<Option<GraphId>> {
        self.model.parent_graph(graph)
    }

    pub fn child_graphs(&self, graph: GraphId) -> Result<&[GraphId]> {
        self.model.child_graphs(graph)
    }

    pub fn is_ancestor_of(&self, ancestor: GraphId, graph: GraphId) -> Result<bool> {
        self.model.is_ancestor_of(ancestor, graph)
    }

    // ---------------------------------------------------------------------------------------------
    // Streams

    pub fn add_variable_stream(&mut self, domain: impl Into<Domain>) -> Result<StreamId> {
        self.check_not_running()?;
        self.streams.add_stream(domain.into())
    }

    // Nests `buffer_size` copies of `template` over a sliding window of the streams named by
    // `slices`, one slice per boundary variable of the template
    pub fn add_repeated_graph(
        &mut self,
        template: &FactorGraph,
        buffer_size: usize,
        slices: &[StreamSlice],
    ) -> Result<RepeatedGraphId> {
        self.check_not_running()?;
        let (repeated, change) =
            self.streams
                .add_repeated_graph(&mut self.model, &template.model, buffer_size, slices)?;
        self.apply_change(change);
        Ok(repeated)
    }

    // Window variables of a stream, oldest first
    pub fn stream_variables(&self, stream: StreamId) -> Result<&[VariableId]> {
        self.streams.variables(stream)
    }

    // Copies of a repeated graph, oldest first, with the template-to-copy node maps
    pub fn repeated_graph_copies(&self, repeated: RepeatedGraphId) -> Result<&[(GraphId, NodeMap)]> {
        self.streams.copies(repeated)
    }

    pub fn blast_factor(&self, stream: StreamId) -> Result<Option<FactorId>> {
        self.streams.blast_factor(stream)
    }

    // Inputs of the stream's variables in order; the window takes the first ones
    pub fn set_stream_data(&mut self, stream: StreamId, data: Vec<Vec<f64>>) -> Result<()> {
        self.check_not_running()?;
        self.streams.set_data(&mut self.model, stream, data)
    }

    // Records the belief of each variable leaving the window of `stream`
    pub fn collect_stream_beliefs(&mut self, stream: StreamId) -> Result<()> {
        self.check_not_running()?;
        self.streams.enable_sink(stream)
    }

    pub fn stream_beliefs(&self, stream: StreamId) -> Result<&[Vec<f64>]> {
        self.streams.sink(stream)
    }

    pub fn has_next(&self) -> bool {
        self.streams.has_next()
    }

    pub fn num_advances(&self) -> u64 {
        self.streams.num_advances()
    }

    // Slides every repeated graph one copy along its streams, keeping the solver state of the
    // copies that stay in the window
    pub fn advance(&mut self) -> Result<()> {
        self.check_not_running()?;
        let solver = self.solver.as_mut().ok_or(FactorGraphError::NoSolver)?;
        self.streams.advance(&mut self.model, solver)
    }

    // ---------------------------------------------------------------------------------------------
    // Solver and schedule

    pub fn set_solver(&mut self, kind: SolverKind) -> Result<()> {
        self.check_not_running()?;
        let mut solver = Solver::new(kind);
        if let Some(seed) = self.seed {
            solver.set_seed(seed);
        }
        debug!("Attached the {} solver", kind);
        self.solver = Some(solver);
        self.schedule_cache = None;
        Ok(())
    }

    pub fn solver(&self) -> Result<&Solver> {
        self.solver.as_ref().ok_or(FactorGraphError::NoSolver)
    }

    pub fn solver_mut(&mut self) -> Result<&mut Solver> {
        self.check_not_running()?;
        self.solver.as_mut().ok_or(FactorGraphError::NoSolver)
    }

    pub(crate) fn model_and_solver(&self) -> Result<(&GraphModel, &Solver)> {
        Ok((&self.model, self.solver.as_ref().ok_or(FactorGraphError::NoSolver)?))
    }

    fn model_and_solver_mut(&mut self) -> Result<(&GraphModel, &mut Solver)> {
        Ok((&self.model, self.solver.as_mut().ok_or(FactorGraphError::NoSolver)?))
    }

    pub fn set_scheduler(&mut self, scheduler: Arc<dyn Scheduler>) -> Result<()> {
        self.check_not_running()?;
        self.scheduler = Some(scheduler);
        self.schedule_cache = None;
        Ok(())
    }

    // Fixes the schedule of the root graph; it bypasses every scheduler
    pub fn set_schedule(&mut self, schedule: Schedule) -> Result<()> {
        self.set_graph_schedule(self.root(), schedule)
    }

    pub fn set_graph_schedule(&mut self, graph: GraphId, mut schedule: Schedule) -> Result<()> {
        self.check_not_running()?;
        schedule.attach(graph);
        schedule.validate(&self.model)?;
        self.model.set_graph_schedule(graph, Some(schedule))?;
        self.schedule_cache = None;
        Ok(())
    }

    pub fn clear_schedule(&mut self) -> Result<()> {
        self.check_not_running()?;
        self.model.set_graph_schedule(self.root(), None)?;
        self.schedule_cache = None;
        Ok(())
    }

    // Fixed schedule if any, otherwise the selected scheduler's, otherwise the solver default's
    pub fn schedule(&mut self) -> Result<Schedule> {
        if let Some(fixed) = self.model.graph_schedule(self.root())? {
            return Ok(fixed.clone());
        }
        if let Some(cached) = &self.schedule_cache {
            return Ok(cached.clone());
        }
        let scheduler = match &self.scheduler {
            Some(scheduler) => scheduler.clone(),
            None => self.solver()?.default_scheduler(),
        };
        let schedule = scheduler.create_schedule(&self.model, self.root())?;
        debug!(
            "{} scheduler created {} entries",
            scheduler.name(),
            schedule.len()
        );
        self.schedule_cache = Some(schedule.clone());
        Ok(schedule)
    }

    pub fn set_num_iterations(&mut self, num_iterations: usize) -> Result<()> {
        self.solver_mut()?.set_num_iterations(num_iterations)
    }

    pub fn set_damping(&mut self, damping: f64) -> Result<()> {
        self.solver_mut()?.set_damping(damping)
    }

    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        self.solver_mut()?.set_num_threads(num_threads)
    }

    pub fn set_seed(&mut self, seed: u64) -> Result<()> {
        self.check_not_running()?;
        self.seed = Some(seed);
        if let Some(solver) = self.solver.as_mut() {
            solver.set_seed(seed);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Run control

    fn begin_run(&self) -> Result<RunningGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FactorGraphError::SolverRunning);
        }
        Ok(RunningGuard {
            running: self.running.clone(),
            interrupt: self.interrupt.clone(),
        })
    }

    // Initializes the solver and runs it once
    pub fn solve(&mut self) -> Result<()> {
        let _guard = self.begin_run()?;
        self.solve_marked()
    }

    // Runs without re-initialization
    pub fn solve_one_step(&mut self) -> Result<()> {
        let _guard = self.begin_run()?;
        self.solve_one_step_marked()
    }

    // Continues from the current state; Gibbs collects more samples without restarting
    pub fn continue_solve(&mut self) -> Result<()> {
        let _guard = self.begin_run()?;
        self.continue_solve_marked()
    }

    pub fn iterate(&mut self, num_iterations: usize) -> Result<()> {
        let _guard = self.begin_run()?;
        let schedule = self.schedule()?;
        let interrupt = self.interrupt.clone();
        let (model, solver) = self.model_and_solver_mut()?;
        solver.iterate(model, &schedule, &interrupt, num_iterations)
    }

    // Run bodies for callers that already hold the running flag
    pub(crate) fn solve_marked(&mut self) -> Result<()> {
        let schedule = self.schedule()?;
        let interrupt = self.interrupt.clone();
        let (model, solver) = self.model_and_solver_mut()?;
        info!("Solving with {} over {} schedule entries", solver.name(), schedule.len());
        solver.initialize(model)?;
        solver.solve_one_step(model, &schedule, &interrupt)
    }

    pub(crate) fn solve_one_step_marked(&mut self) -> Result<()> {
        let schedule = self.schedule()?;
        let interrupt = self.interrupt.clone();
        let (model, solver) = self.model_and_solver_mut()?;
        solver.solve_one_step(model, &schedule, &interrupt)
    }

    pub(crate) fn continue_solve_marked(&mut self) -> Result<()> {
        let schedule = self.schedule()?;
        let interrupt = self.interrupt.clone();
        let (model, solver) = self.model_and_solver_mut()?;
        solver.continue_solve(model, &schedule, &interrupt)
    }

    // ---------------------------------------------------------------------------------------------
    // Read-back

    pub fn belief(&self, variable: VariableId) -> Result<Vec<f64>> {
        let (model, solver) = self.model_and_solver()?;
        solver.belief(model, variable)
    }

    // Beliefs of every flattened variable, in flattened order
    pub fn beliefs(&self) -> Result<Vec<Vec<f64>>> {
        self.variables_flat()
            .into_iter()
            .map(|variable| self.belief(variable))
            .collect()
    }

    // Belief over the rows of the factor's table
    pub fn factor_belief(&self, factor: FactorId) -> Result<Vec<f64>> {
        let (model, solver) = self.model_and_solver()?;
        if solver.kind() == SolverKind::Gibbs && self.streams.is_blast_factor(factor) {
            return Err(FactorGraphError::unsupported(
                "beliefs of blast-from-the-past factors",
                solver.name(),
            ));
        }
        solver.factor_belief(model, factor)
    }

    pub fn guess(&self, variable: VariableId) -> Result<usize> {
        let (model, solver) = self.model_and_solver()?;
        solver.guess(model, variable)
    }

    pub fn guess_value(&self, variable: VariableId) -> Result<Value> {
        let index = self.guess(variable)?;
        let domain = self.model.variable(variable)?.discrete_domain()?;
        domain
            .element(index)
            .cloned()
            .ok_or(FactorGraphError::InvalidValue(format!(
                "index {} is out of range",
                index
            )))
    }

    // Guesses of every flattened variable
    pub fn guesses(&self) -> Result<Assignment> {
        let mut assignment = Assignment::new(&self.model);
        for variable in self.model.variables_flat(self.root()).iter() {
            assignment.set(*variable, Some(self.guess(*variable)?));
        }
        Ok(assignment)
    }

    // Total energy of the current guesses
    pub fn score(&self) -> Result<f64> {
        self.model.score_assignment(self.root(), &self.guesses()?)
    }

    pub fn score_assignment(&self, assignment: &Assignment) -> Result<f64> {
        self.model.score_assignment(self.root(), assignment)
    }

    pub fn internal_energy(&self) -> Result<f64> {
        let (model, solver) = self.model_and_solver()?;
        solver.internal_energy(model)
    }

    pub fn bethe_entropy(&self) -> Result<f64> {
        let (model, solver) = self.model_and_solver()?;
        solver.bethe_entropy(model)
    }

    pub fn bethe_free_energy(&self) -> Result<f64> {
        Ok(self.internal_energy()? - self.bethe_entropy()?)
    }

    // Node handle for a raw node index, if such a node exists
    pub fn node(&self, index: usize) -> Option<NodeId> {
        let node = NodeIndex::new(index);
        self.model.contains_node(node).then_some(node)
    }
}
