#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Instant,
};

use log::{debug, info, warn};

use crate::{
    data_structures::random_stream::RandomStream,
    error::{FactorGraphError, Result},
    factor_functions::factor_function::FactorFunction,
    model::{
        assignment::Assignment,
        graph_model::{FactorId, GraphModel, NodeId, NodeKind, StructureChange, VariableId},
        stream::StreamShift,
    },
    schedulers::{
        gibbs_scheduler::GibbsSequentialScanScheduler,
        schedule::{Schedule, ScheduleEntry},
        scheduler::Scheduler,
    },
    solvers::solver::{InterruptHandle, SolverGraph},
};

use super::options::GibbsOptions;

const NAME: &str = "Gibbs";

// Tempering stops here so that 1 / temperature stays finite
const MIN_TEMPERATURE: f64 = 1e-300;

// Single-chain Gibbs sampler over the discrete variables of a graph
#[derive(Debug)]
pub struct GibbsSolverGraph {
    options: GibbsOptions,
    random: RandomStream,
    state: Assignment,                           // current sample
    counts: HashMap<NodeId, Vec<u64>>,            // per-variable value counts
    factor_counts: HashMap<NodeId, Vec<u64>>,     // per-factor table row counts
    history: HashMap<NodeId, VecDeque<usize>>,    // saved samples, when enabled
    scores: Vec<f64>,                             // saved total potentials, when enabled
    best: Option<(f64, Assignment)>,              // sample with the lowest total potential
    num_samples: u64,
    temperature: f64,
    scan_position: usize,
}

impl Default for GibbsSolverGraph {
    fn default() -> Self {
        GibbsSolverGraph::new()
    }
}

impl GibbsSolverGraph {
    pub fn new() -> Self {
        let options = GibbsOptions::default();
        GibbsSolverGraph {
            temperature: options.initial_temperature(),
            options,
            random: RandomStream::from_entropy(),
            state: Assignment::default(),
            counts: HashMap::new(),
            factor_counts: HashMap::new(),
            history: HashMap::new(),
            scores: Vec::new(),
            best: None,
            num_samples: 0,
            scan_position: 0,
        }
    }

    pub fn options(&self) -> &GibbsOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut GibbsOptions {
        &mut self.options
    }

    pub fn num_collected_samples(&self) -> u64 {
        self.num_samples
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn current_sample(&self) -> &Assignment {
        &self.state
    }

    // Joint assignment with the lowest total potential seen so far, and that potential
    pub fn best_sample(&self) -> Option<(f64, &Assignment)> {
        self.best.as_ref().map(|(score, sample)| (*score, sample))
    }

    pub fn sample_history(&self, variable: VariableId) -> Option<&VecDeque<usize>> {
        self.history.get(&variable.node())
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    // Current labels of a group of variables
    pub fn current_values(&self, variables: &[VariableId]) -> Result<Vec<usize>> {
        variables.iter().map(|variable| self.label(*variable)).collect()
    }

    // Saved samples of a group of variables, one row per sample, oldest first
    pub fn sample_values(&self, variables: &[VariableId]) -> Result<Vec<Vec<usize>>> {
        if !self.options.save_all_samples() {
            return Err(FactorGraphError::InvalidArgument(
                "samples are only kept when saving all samples is enabled".to_string(),
            ));
        }
        let histories = variables
            .iter()
            .map(|variable| self.history.get(&variable.node()).ok_or(FactorGraphError::NoSamples))
            .collect::<Result<Vec<_>>>()?;
        let num_rows = histories.iter().map(|history| history.len()).min().unwrap_or(0);
        Ok((0..num_rows)
            .map(|row| {
                histories
                    .iter()
                    .map(|history| history[history.len() - num_rows + row])
                    .collect()
            })
            .collect())
    }

    fn check_supported(model: &GraphModel) -> Result<()> {
        let root = model.root();
        for variable in model.variables_flat(root).iter() {
            if !model.variable(*variable)?.domain().is_discrete() {
                return Err(FactorGraphError::unsupported("real-valued variables", NAME));
            }
        }
        for factor in model.factors_flat(root).iter() {
            if model.factor(*factor)?.table().is_none() {
                return Err(FactorGraphError::unsupported(
                    "factors over real-valued variables",
                    NAME,
                ));
            }
        }
        Ok(())
    }

    // Draws a value from the variable's input, or takes its fixed value
    fn draw_initial(&mut self, model: &GraphModel, variable: VariableId) -> Result<usize> {
        let data = model.variable(variable)?;
        match data.fixed_value_index() {
            Some(index) => Ok(index),
            None => self.random.sample_weighted(data.input()),
        }
    }

    fn randomize(&mut self, model: &GraphModel) -> Result<()> {
        self.state = Assignment::new(model);
        for variable in model.variables_flat(model.root()).iter() {
            let index = self.draw_initial(model, *variable)?;
            self.state.set(*variable, Some(index));
        }
        Ok(())
    }

    // Labels variables added since the last run
    fn ensure_labels(&mut self, model: &GraphModel) -> Result<()> {
        for variable in model.variables_flat(model.root()).iter() {
            if self.state.get(*variable).is_none() {
                let index = self.draw_initial(model, *variable)?;
                self.state.set(*variable, Some(index));
            }
        }
        Ok(())
    }

    fn label(&self, variable: VariableId) -> Result<usize> {
        self.state
            .get(variable)
            .ok_or(FactorGraphError::InvalidArgument(format!(
                "variable {} has no sample",
                variable.index()
            )))
    }

    // Energy of every value of `variable` given the current values of its neighbours
    fn conditional_energies(&self, model: &GraphModel, variable: VariableId) -> Result<Vec<f64>> {
        let data = model.variable(variable)?;
        let size = data.domain_size()?;
        let mut energies = (0..size)
            .map(|index| data.input_energy(index))
            .collect::<Vec<_>>();
        self.add_factor_energies(model, variable, data.siblings(), &mut energies)?;
        Ok(energies)
    }

    // Adds the energy of each factor at the current labels, for every value of `variable`
    fn add_factor_energies(
        &self,
        model: &GraphModel,
        variable: VariableId,
        factors: &[FactorId],
        energies: &mut [f64],
    ) -> Result<()> {
        for factor in factors {
            let factor_data = model.factor(*factor)?;
            let table = model.factor_table(*factor)?;
            let mut tuple = factor_data
                .siblings()
                .iter()
                .map(|sibling| self.label(*sibling))
                .collect::<Result<Vec<_>>>()?;
            let port = factor_data
                .port_of(variable)
                .ok_or(FactorGraphError::NotAdjacent(variable.index(), factor.index()))?;
            for (index, energy) in energies.iter_mut().enumerate() {
                tuple[port] = index;
                *energy += table.energy(&tuple);
            }
        }
        Ok(())
    }

    fn clear_statistics(&mut self) {
        self.counts.clear();
        self.factor_counts.clear();
        self.history.clear();
        self.scores.clear();
        self.best = None;
        self.num_samples = 0;
    }

    fn sample_variable(&mut self, model: &GraphModel, variable: VariableId) -> Result<()> {
        if model.variable(variable)?.fixed_value_index().is_some() {
            return Ok(());
        }
        let energies = self.conditional_energies(model, variable)?;
        let minimum = energies.iter().fold(f64::INFINITY, |minimum, energy| minimum.min(*energy));
        if !minimum.is_finite() {
            return Err(FactorGraphError::ZeroNormalization {
                node: variable.index(),
                port: model.variable(variable)?.degree(),
            });
        }
        let beta = 1. / self.temperature;
        let weights = energies
            .iter()
            .map(|energy| {
                if *energy == minimum {
                    1.
                } else {
                    (-(energy - minimum) * beta).exp()
                }
            })
            .collect::<Vec<_>>();
        let index = self.random.sample_weighted(&weights)?;
        self.state.set(variable, Some(index));
        Ok(())
    }

    // Leaf node updates of a schedule in order
    fn scan_order(schedule: &Schedule) -> Result<Vec<NodeId>> {
        fn collect(entry: &ScheduleEntry, order: &mut Vec<NodeId>) -> Result<()> {
            match entry {
                ScheduleEntry::Node(node) => order.push(*node),
                ScheduleEntry::Edge { .. } => {
                    return Err(FactorGraphError::unsupported("edge schedule entries", NAME))
                }
                ScheduleEntry::SubSchedule { schedule, .. } => {
                    for entry in schedule.iter() {
                        collect(entry, order)?;
                    }
                }
                ScheduleEntry::Block(entries) => {
                    for entry in entries {
                        collect(entry, order)?;
                    }
                }
            }
            Ok(())
        }
        let mut order = Vec::new();
        for entry in schedule.iter() {
            collect(entry, &mut order)?;
        }
        Ok(order)
    }

    // Performs `num_updates` node updates, continuing the scan where the last one stopped
    fn run_updates(&mut self, model: &GraphModel, order: &[NodeId], num_updates: usize) -> Result<()> {
        if order.is_empty() {
            return Ok(());
        }
        for _ in 0..num_updates {
            if self.scan_position >= order.len() {
                self.scan_position = 0;
            }
            let node = order[self.scan_position];
            self.scan_position += 1;
            self.update_node(model, node)?;
        }
        Ok(())
    }

    // Records the current state as one sample
    fn collect_sample(&mut self, model: &GraphModel) -> Result<()> {
        let root = model.root();
        for variable in model.variables_flat(root).iter() {
            let index = self.label(*variable)?;
            let size = model.variable(*variable)?.domain_size()?;
            let counts = self
                .counts
                .entry(variable.node())
                .or_insert_with(|| vec![0; size]);
            if counts.len() != size {
                *counts = vec![0; size];
            }
            counts[index] += 1;
            if self.options.save_all_samples() {
                let history = self.history.entry(variable.node()).or_default();
                history.push_back(index);
                if let Some(limit) = self.options.sample_history_limit() {
                    while history.len() > limit {
                        history.pop_front();
                    }
                }
            }
        }
        for factor in model.factors_flat(root).iter() {
            let table = model.factor_table(*factor)?;
            let tuple = model
                .factor(*factor)?
                .siblings()
                .iter()
                .map(|variable| self.label(*variable))
                .collect::<Result<Vec<_>>>()?;
            let counts = self
                .factor_counts
                .entry(factor.node())
                .or_insert_with(|| vec![0; table.num_rows()]);
            if counts.len() != table.num_rows() {
                *counts = vec![0; table.num_rows()];
            }
            if let Some(row) = table.weight_index(&tuple) {
                counts[row] += 1;
            }
        }

        let score = model.score_assignment(root, &self.state)?;
        if self.options.save_all_scores() {
            self.scores.push(score);
        }
        if self.best.as_ref().map_or(true, |(best, _)| score < *best) {
            self.best = Some((score, self.state.clone()));
        }
        self.num_samples += 1;
        if self.options.temper() {
            self.temperature =
                (self.temperature * self.options.temperature_decay()).max(MIN_TEMPERATURE);
        }
        Ok(())
    }

    // Collects `num_samples` samples; returns false when interrupted
    fn sample(
        &mut self,
        model: &GraphModel,
        order: &[NodeId],
        interrupt: &InterruptHandle,
        num_samples: usize,
    ) -> Result<bool> {
        let num_variables = model.variables_flat(model.root()).len();
        let updates_per_sample = self.options.updates_per_sample(num_variables);
        for _ in 0..num_samples {
            self.run_updates(model, order, updates_per_sample)?;
            self.collect_sample(model)?;
            if interrupt.is_interrupted() {
                warn!("Sampling interrupted after {} samples.", self.num_samples);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn normalized_counts(counts: &[u64]) -> Result<Vec<f64>> {
        let total = counts.iter().sum::<u64>();
        if total == 0 {
            return Err(FactorGraphError::NoSamples);
        }
        Ok(counts
            .iter()
            .map(|count| *count as f64 / total as f64)
            .collect())
    }
}

impl SolverGraph for GibbsSolverGraph {
    fn name(&self) -> &'static str {
        NAME
    }

    fn default_scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::new(GibbsSequentialScanScheduler)
    }

    fn initialize(&mut self, model: &GraphModel) -> Result<()> {
        GibbsSolverGraph::check_supported(model)?;
        self.clear_statistics();
        self.scan_position = 0;
        self.temperature = self.options.initial_temperature();
        self.randomize(model)
    }

    fn update_node(&mut self, model: &GraphModel, node: NodeId) -> Result<()> {
        match model.node_kind(node) {
            Some(NodeKind::Variable(variable)) => self.sample_variable(model, variable),
            Some(NodeKind::Factor(factor)) => {
                for variable in model.factor(factor)?.siblings().to_vec() {
                    self.sample_variable(model, variable)?;
                }
                Ok(())
            }
            None => Err(FactorGraphError::UnknownNode {
                kind: "node",
                index: node.index(),
            }),
        }
    }

    fn update_edge(&mut self, _model: &GraphModel, _node: NodeId, _port: usize) -> Result<()> {
        Err(FactorGraphError::unsupported("edge updates", NAME))
    }

    // Every restart draws a fresh state, burns in, and collects the configured number of samples
    fn solve_one_step(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        GibbsSolverGraph::check_supported(model)?;
        let order = GibbsSolverGraph::scan_order(schedule)?;
        let num_variables = model.variables_flat(model.root()).len();
        let time_start = Instant::now();
        self.best = None;
        for restart in 0..=self.options.num_restarts() {
            self.randomize(model)?;
            self.scan_position = 0;
            self.temperature = self.options.initial_temperature();
            let burn_in = self.options.burn_in_updates(num_variables);
            self.run_updates(model, &order, burn_in)?;
            debug!("Restart {}: {} burn-in updates done", restart, burn_in);

            let completed = self.sample(model, &order, interrupt, self.options.num_samples())?;
            info!(
                "Restart {}. Elapsed time {:?}. Samples collected {}. Best score {:?}.",
                restart,
                time_start.elapsed(),
                self.num_samples,
                self.best.as_ref().map(|(score, _)| *score)
            );
            if !completed {
                break;
            }
        }
        Ok(())
    }

    // Collects more samples from the current state, without burn-in or restarts
    fn continue_solve(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        GibbsSolverGraph::check_supported(model)?;
        self.ensure_labels(model)?;
        let order = GibbsSolverGraph::scan_order(schedule)?;
        self.sample(model, &order, interrupt, self.options.num_samples())?;
        Ok(())
    }

    // Collects `num_iterations` more samples
    fn iterate(
        &mut self,
        model: &GraphModel,
        schedule: &Schedule,
        interrupt: &InterruptHandle,
        num_iterations: usize,
    ) -> Result<()> {
        GibbsSolverGraph::check_supported(model)?;
        self.ensure_labels(model)?;
        let order = GibbsSolverGraph::scan_order(schedule)?;
        self.sample(model, &order, interrupt, num_iterations)?;
        Ok(())
    }

    fn belief(&self, model: &GraphModel, variable: VariableId) -> Result<Vec<f64>> {
        let data = model.variable(variable)?;
        match self.counts.get(&variable.node()) {
            Some(counts) => GibbsSolverGraph::normalized_counts(counts),
            None => match data.fixed_value_index() {
                Some(index) => {
                    let mut belief = vec![0.; data.domain_size()?];
                    belief[index] = 1.;
                    Ok(belief)
                }
                None => Err(FactorGraphError::NoSamples),
            },
        }
    }

    fn factor_belief(&self, model: &GraphModel, factor: FactorId) -> Result<Vec<f64>> {
        model.factor(factor)?;
        let counts = self
            .factor_counts
            .get(&factor.node())
            .ok_or(FactorGraphError::NoSamples)?;
        GibbsSolverGraph::normalized_counts(counts)
    }

    fn internal_energy(&self, _model: &GraphModel) -> Result<f64> {
        Err(FactorGraphError::unsupported("internal energy", NAME))
    }

    fn bethe_entropy(&self, _model: &GraphModel) -> Result<f64> {
        Err(FactorGraphError::unsupported("Bethe entropy", NAME))
    }

    fn set_num_iterations(&mut self, _num_iterations: usize) -> Result<()> {
        Err(FactorGraphError::unsupported("setting the number of iterations", NAME))
    }

    fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        if num_threads != 1 {
            return Err(FactorGraphError::unsupported("multithreading", NAME));
        }
        Ok(())
    }

    fn set_damping(&mut self, _damping: f64) -> Result<()> {
        Err(FactorGraphError::unsupported("damping", NAME))
    }

    fn set_seed(&mut self, seed: u64) {
        self.random.reseed(seed);
    }

    fn invalidate(&mut self, change: &StructureChange) {
        for node in &change.touched {
            self.counts.remove(node);
            self.factor_counts.remove(node);
            self.history.remove(node);
        }
        self.best = None;
    }

    fn reset_factor_messages(&mut self, _model: &GraphModel, factor: FactorId) -> Result<()> {
        self.factor_counts.remove(&factor.node());
        Ok(())
    }

    // Conditional weights of `variable` given the current labels of the other arguments
    fn blast_weights(
        &mut self,
        model: &GraphModel,
        variable: VariableId,
        factors: &[FactorId],
    ) -> Result<Vec<f64>> {
        for factor in factors {
            let data = model.factor(*factor)?;
            let deterministic = data
                .function()
                .map_or(false, |function| function.is_deterministic_directed());
            if data.is_directed() || deterministic {
                return Err(FactorGraphError::unsupported(
                    "blast from the past over directed factors",
                    NAME,
                ));
            }
        }
        GibbsSolverGraph::check_supported(model)?;
        self.ensure_labels(model)?;
        let mut energies = vec![0.; model.variable(variable)?.domain_size()?];
        self.add_factor_energies(model, variable, factors, &mut energies)?;
        let minimum = energies.iter().fold(f64::INFINITY, |minimum, energy| minimum.min(*energy));
        if !minimum.is_finite() {
            return Err(FactorGraphError::ZeroNormalization {
                node: variable.index(),
                port: 0,
            });
        }
        Ok(energies
            .iter()
            .map(|energy| (-(energy - minimum)).exp())
            .collect())
    }

    // Labels follow their variables down the window; variables entering it are redrawn from
    // their inputs and the collected statistics start over
    fn advance(&mut self, model: &GraphModel, shift: &StreamShift) -> Result<()> {
        let labels = shift
            .variables
            .iter()
            .map(|(from, _)| self.state.get(*from))
            .collect::<Vec<_>>();
        for ((_, to), label) in shift.variables.iter().zip(labels) {
            self.state.set(*to, label);
        }
        for variable in &shift.fresh {
            let index = self.draw_initial(model, *variable)?;
            self.state.set(*variable, Some(index));
        }
        self.clear_statistics();
        self.scan_position = 0;
        self.temperature = self.options.initial_temperature();
        debug!("Advanced the sampler; {} variables redrawn", shift.fresh.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::domain::DiscreteDomain, tables::factor_table::FactorTable};

    fn coupled_pair() -> (GraphModel, VariableId, VariableId) {
        let mut model = GraphModel::new();
        let root = model.root();
        let a = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let b = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let table = model.add_table(FactorTable::new(vec![2, 2], vec![vec![0, 0], vec![1, 1]], vec![1., 1.]).unwrap());
        model.add_table_factor(root, None, table, &[a, b]).unwrap();
        (model, a, b)
    }

    fn schedule(model: &GraphModel) -> Schedule {
        GibbsSequentialScanScheduler
            .create_schedule(model, model.root())
            .unwrap()
    }

    #[test]
    fn fixed_variables_are_never_resampled() {
        let (mut model, a, b) = coupled_pair();
        model.set_variable_fixed_index(a, 1).unwrap();
        let mut solver = GibbsSolverGraph::new();
        solver.set_seed(7);
        solver.options_mut().set_num_samples(50);
        solver.initialize(&model).unwrap();
        solver
            .solve_one_step(&model, &schedule(&model), &InterruptHandle::new())
            .unwrap();
        assert_eq!(solver.belief(&model, a).unwrap(), vec![0., 1.]);
        assert_eq!(solver.belief(&model, b).unwrap(), vec![0., 1.]);
        assert_eq!(solver.num_collected_samples(), 50);
    }

    #[test]
    fn history_is_bounded() {
        let (model, a, _) = coupled_pair();
        let mut solver = GibbsSolverGraph::new();
        solver.set_seed(3);
        solver
            .options_mut()
            .set_num_samples(20)
            .set_save_all_samples(true)
            .set_sample_history_limit(Some(5))
            .set_save_all_scores(true);
        solver.initialize(&model).unwrap();
        solver
            .solve_one_step(&model, &schedule(&model), &InterruptHandle::new())
            .unwrap();
        assert_eq!(solver.sample_history(a).unwrap().len(), 5);
        assert_eq!(solver.scores().len(), 20);
        let (best, _) = solver.best_sample().unwrap();
        assert!((best - 2. * 2f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn message_passing_features_are_unsupported() {
        let (model, a, _) = coupled_pair();
        let mut solver = GibbsSolverGraph::new();
        assert!(matches!(
            solver.set_num_threads(2),
            Err(FactorGraphError::Unsupported { .. })
        ));
        assert!(solver.set_num_threads(1).is_ok());
        assert!(matches!(
            solver.bethe_entropy(&model),
            Err(FactorGraphError::Unsupported { .. })
        ));
        assert_eq!(solver.belief(&model, a), Err(FactorGraphError::NoSamples));
        let edge_schedule = Schedule::new(vec![ScheduleEntry::Edge {
            node: a.node(),
            port: 0,
        }]);
        solver.initialize(&model).unwrap();
        assert!(matches!(
            solver.solve_one_step(&model, &edge_schedule, &InterruptHandle::new()),
            Err(FactorGraphError::Unsupported { .. })
        ));
    }

    #[test]
    fn long_tempered_runs_stay_finite() {
        let (model, a, _) = coupled_pair();
        let mut solver = GibbsSolverGraph::new();
        solver.set_seed(1);
        solver
            .options_mut()
            .set_num_samples(1200)
            .set_temper(true)
            .set_initial_temperature(1.)
            .unwrap()
            .set_tempering_half_life_in_samples(1.)
            .unwrap();
        solver.initialize(&model).unwrap();
        solver
            .solve_one_step(&model, &schedule(&model), &InterruptHandle::new())
            .unwrap();
        assert_eq!(solver.num_collected_samples(), 1200);
        assert!(solver.temperature() > 0.);
        assert!((1. / solver.temperature()).is_finite());
        let belief = solver.belief(&model, a).unwrap();
        assert!((belief.iter().sum::<f64>() - 1.).abs() < 1e-12);
    }

    #[test]
    fn best_sample_is_rescored_on_every_solve() {
        let (mut model, a, _) = coupled_pair();
        let mut solver = GibbsSolverGraph::new();
        solver.set_seed(9);
        solver.options_mut().set_num_samples(30);
        solver.initialize(&model).unwrap();
        let schedule = schedule(&model);
        solver
            .solve_one_step(&model, &schedule, &InterruptHandle::new())
            .unwrap();
        let (before, _) = solver.best_sample().unwrap();
        assert!((before - 2. * 2f64.ln()).abs() < 1e-9);

        // Same structure, heavier weights: every old score is now too high
        let factor = model.variable(a).unwrap().siblings()[0];
        let table = model.factor_table_id(factor).unwrap();
        *model.table_mut(table).unwrap() =
            FactorTable::new(vec![2, 2], vec![vec![0, 0], vec![1, 1]], vec![4., 4.]).unwrap();
        solver
            .solve_one_step(&model, &schedule, &InterruptHandle::new())
            .unwrap();
        let (after, sample) = solver.best_sample().unwrap();
        assert_eq!(after, model.score_assignment(model.root(), sample).unwrap());
        assert!(after < before);
    }
}
