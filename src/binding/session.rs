use std::{
    panic,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
};

use log::{info, warn};

use crate::{
    error::{FactorGraphError, Result},
    factor_functions::registry::FactorFunctionRegistry,
    model::{
        domain::DiscreteDomain,
        factor_graph::{FactorGraph, RunningGuard},
        graph_model::{FactorId, NodeKind, VariableId},
        snapshot::GraphSnapshot,
        value::Value,
    },
    solvers::solver::{InterruptHandle, SolverKind},
};

// Graph handle for an external caller: nodes are plain indices, results are flat arrays,
// and a solve can run on a background thread
pub struct SolverSession {
    graph: Arc<Mutex<FactorGraph>>,
    running: Arc<AtomicBool>,
    interrupt: InterruptHandle,
    worker: Option<JoinHandle<Result<()>>>,
    registry: FactorFunctionRegistry,
}

impl Default for SolverSession {
    fn default() -> Self {
        SolverSession::new(FactorGraph::new())
    }
}

impl SolverSession {
    pub fn new(graph: FactorGraph) -> Self {
        SolverSession {
            running: graph.running_flag(),
            interrupt: graph.interrupt_handle(),
            graph: Arc::new(Mutex::new(graph)),
            worker: None,
            registry: FactorFunctionRegistry::with_builtins(),
        }
    }

    pub fn registry_mut(&mut self) -> &mut FactorFunctionRegistry {
        &mut self.registry
    }

    pub fn is_solver_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, FactorGraph>> {
        if self.is_solver_running() {
            return Err(FactorGraphError::SolverRunning);
        }
        Ok(self.graph.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn variable_id(graph: &FactorGraph, index: usize) -> Result<VariableId> {
        match graph.node(index).and_then(|node| graph.model().node_kind(node)) {
            Some(NodeKind::Variable(variable)) => Ok(variable),
            _ => Err(FactorGraphError::UnknownNode {
                kind: "variable",
                index,
            }),
        }
    }

    fn variable_ids(graph: &FactorGraph, indices: &[usize]) -> Result<Vec<VariableId>> {
        indices
            .iter()
            .map(|index| SolverSession::variable_id(graph, *index))
            .collect()
    }

    fn factor_id(graph: &FactorGraph, index: usize) -> Result<FactorId> {
        match graph.node(index).and_then(|node| graph.model().node_kind(node)) {
            Some(NodeKind::Factor(factor)) => Ok(factor),
            _ => Err(FactorGraphError::UnknownNode {
                kind: "factor",
                index,
            }),
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Construction

    // Variable over the integers 0..domain_size
    pub fn add_variable(&self, domain_size: usize) -> Result<usize> {
        if domain_size == 0 {
            return Err(FactorGraphError::InvalidArgument(
                "a domain needs at least one element".to_string(),
            ));
        }
        let domain = DiscreteDomain::range(0, domain_size as i64 - 1)?;
        Ok(self.lock()?.add_variable(domain)?.index())
    }

    pub fn add_discrete_variable(&self, elements: Vec<Value>) -> Result<usize> {
        let domain = DiscreteDomain::new(elements)?;
        Ok(self.lock()?.add_variable(domain)?.index())
    }

    pub fn set_input(&self, variable: usize, weights: &[f64]) -> Result<()> {
        let mut graph = self.lock()?;
        let variable = SolverSession::variable_id(&graph, variable)?;
        graph.set_input(variable, weights)
    }

    pub fn set_fixed_index(&self, variable: usize, index: usize) -> Result<()> {
        let mut graph = self.lock()?;
        let variable = SolverSession::variable_id(&graph, variable)?;
        graph.set_fixed_index(variable, index)
    }

    // Factor built from a registered function name
    pub fn add_factor(&self, function: &str, parameters: &[f64], variables: &[usize]) -> Result<usize> {
        let function = self.registry.create(function, parameters)?;
        let mut graph = self.lock()?;
        let variables = SolverSession::variable_ids(&graph, variables)?;
        Ok(graph.add_factor(function, &variables)?.index())
    }

    // Table factor; the table dimensions are the domain sizes of `variables`
    pub fn add_table_factor(
        &self,
        rows: Vec<Vec<usize>>,
        weights: Vec<f64>,
        variables: &[usize],
    ) -> Result<usize> {
        let mut graph = self.lock()?;
        let variables = SolverSession::variable_ids(&graph, variables)?;
        let sizes = variables
            .iter()
            .map(|variable| graph.model().variable(*variable)?.domain_size())
            .collect::<Result<Vec<_>>>()?;
        Ok(graph
            .add_factor_from_table(sizes, rows, weights, &variables)?
            .index())
    }

    pub fn set_directed_to(&self, factor: usize, directed_to: &[usize]) -> Result<()> {
        let mut graph = self.lock()?;
        let factor = SolverSession::factor_id(&graph, factor)?;
        graph.set_directed_to(factor, directed_to)
    }

    // Nests a copy of `template`; returns the new graph's index
    pub fn add_graph(&self, template: &FactorGraph, boundary: &[usize]) -> Result<usize> {
        let mut graph = self.lock()?;
        let boundary = SolverSession::variable_ids(&graph, boundary)?;
        Ok(graph.add_graph(template, &boundary)?.0.index())
    }

    pub fn set_solver(&self, kind: SolverKind) -> Result<()> {
        self.lock()?.set_solver(kind)
    }

    pub fn set_num_iterations(&self, num_iterations: usize) -> Result<()> {
        self.lock()?.set_num_iterations(num_iterations)
    }

    pub fn set_seed(&self, seed: u64) -> Result<()> {
        self.lock()?.set_seed(seed)
    }

    // ---------------------------------------------------------------------------------------------
    // Run control

    pub fn solve(&self) -> Result<()> {
        self.lock()?.solve()
    }

    pub fn solve_one_step(&self) -> Result<()> {
        self.lock()?.solve_one_step()
    }

    pub fn continue_solve(&self) -> Result<()> {
        self.lock()?.continue_solve()
    }

    // Starts `solve` on a background thread; collect the outcome with `wait`
    pub fn start_solve(&mut self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FactorGraphError::SolverRunning);
        }
        let guard = RunningGuard {
            running: self.running.clone(),
            interrupt: self.interrupt.clone(),
        };
        let previous = self.worker.take();
        let graph = self.graph.clone();
        self.worker = Some(thread::spawn(move || {
            let _guard = guard;
            if let Some(previous) = previous {
                // Its result was never collected
                if let Ok(Err(error)) = previous.join() {
                    warn!("Discarding the result of an earlier solve: {}", error);
                }
            }
            let mut graph = graph.lock().unwrap_or_else(PoisonError::into_inner);
            graph.solve_marked()
        }));
        info!("Started a background solve");
        Ok(())
    }

    // Blocks until the background solve ends and returns its result
    pub fn wait(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            },
            None => Ok(()),
        }
    }

    // Asks a running solve to stop at its next iteration or sample boundary
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    // ---------------------------------------------------------------------------------------------
    // Read-back

    // Flattened variable indices, in the order used by the array results
    pub fn variables(&self) -> Result<Vec<usize>> {
        Ok(self
            .lock()?
            .variables_flat()
            .into_iter()
            .map(|variable| variable.index())
            .collect())
    }

    pub fn belief(&self, variable: usize) -> Result<Vec<f64>> {
        let graph = self.lock()?;
        graph.belief(SolverSession::variable_id(&graph, variable)?)
    }

    // All beliefs concatenated, and the offset of each variable's block (plus the total length)
    pub fn beliefs(&self) -> Result<(Vec<f64>, Vec<usize>)> {
        let graph = self.lock()?;
        let mut values = Vec::new();
        let mut offsets = vec![0];
        for belief in graph.beliefs()? {
            values.extend(belief);
            offsets.push(values.len());
        }
        Ok((values, offsets))
    }

    pub fn factor_belief(&self, factor: usize) -> Result<Vec<f64>> {
        let graph = self.lock()?;
        graph.factor_belief(SolverSession::factor_id(&graph, factor)?)
    }

    pub fn guesses(&self) -> Result<Vec<usize>> {
        let graph = self.lock()?;
        graph
            .variables_flat()
            .into_iter()
            .map(|variable| graph.guess(variable))
            .collect()
    }

    pub fn score(&self) -> Result<f64> {
        self.lock()?.score()
    }

    pub fn bethe_free_energy(&self) -> Result<f64> {
        self.lock()?.bethe_free_energy()
    }

    // Row-major adjacency matrix and its dimension
    pub fn adjacency_matrix(&self) -> Result<(Vec<u8>, usize)> {
        let matrix = self.lock()?.adjacency_matrix()?;
        let dimension = matrix.nrows();
        Ok((matrix.iter().copied().collect(), dimension))
    }

    pub fn snapshot(&self) -> Result<GraphSnapshot> {
        let graph = self.lock()?;
        GraphSnapshot::capture(&graph)
    }
}

impl Drop for SolverSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.interrupt.interrupt();
            if let Ok(Err(error)) = worker.join() {
                warn!("Background solve failed: {}", error);
            }
        }
    }
}
