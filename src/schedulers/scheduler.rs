use std::fmt::Debug;

use crate::{error::Result, model::graph_model::{GraphId, GraphModel}};

use super::schedule::{Schedule, ScheduleEntry};

// Policy that orders the updates of a graph
pub trait Scheduler: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn create_schedule(&self, model: &GraphModel, graph: GraphId) -> Result<Schedule>;
}

// Every factor, then every nested graph, then every variable
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodingScheduler;

impl FloodingScheduler {
    pub(crate) fn flooding_schedule(model: &GraphModel, graph: GraphId) -> Result<Schedule> {
        let mut schedule = Schedule::for_graph(graph, Vec::new());
        for factor in model.factors(graph)? {
            schedule.push(ScheduleEntry::Node(factor.node()));
        }
        for child in model.child_graphs(graph)? {
            let nested = match model.graph_schedule(*child)? {
                Some(fixed) => fixed.clone(),
                None => FloodingScheduler::flooding_schedule(model, *child)?,
            };
            schedule.push(ScheduleEntry::SubSchedule {
                graph: *child,
                schedule: nested,
            });
        }
        for variable in model.variables(graph)? {
            schedule.push(ScheduleEntry::Node(variable.node()));
        }
        Ok(schedule)
    }
}

impl Scheduler for FloodingScheduler {
    fn name(&self) -> &'static str {
        "Flooding"
    }

    fn create_schedule(&self, model: &GraphModel, graph: GraphId) -> Result<Schedule> {
        FloodingScheduler::flooding_schedule(model, graph)
    }
}

// For each factor: the messages of its variables toward it, then the factor itself
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialScheduler;

impl Scheduler for SequentialScheduler {
    fn name(&self) -> &'static str {
        "Sequential"
    }

    fn create_schedule(&self, model: &GraphModel, graph: GraphId) -> Result<Schedule> {
        let mut schedule = Schedule::for_graph(graph, Vec::new());
        for factor in model.factors_flat(graph).iter() {
            for variable in model.factor(*factor)?.siblings() {
                schedule.push(ScheduleEntry::edge_between(
                    model,
                    variable.node(),
                    factor.node(),
                )?);
            }
            schedule.push(ScheduleEntry::Node(factor.node()));
        }
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::domain::DiscreteDomain, schedulers::schedule::ScheduleCursor,
        tables::factor_table::FactorTable,
    };

    fn pair() -> GraphModel {
        let mut model = GraphModel::new();
        let root = model.root();
        let a = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let b = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        model.add_table_factor(root, None, table, &[a, b]).unwrap();
        model
    }

    #[test]
    fn flooding_updates_factors_before_variables() {
        let model = pair();
        let schedule = FloodingScheduler
            .create_schedule(&model, model.root())
            .unwrap();
        let factor = model.factors(model.root()).unwrap()[0];
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.entries()[0], ScheduleEntry::Node(factor.node()));
        schedule.validate(&model).unwrap();
    }

    #[test]
    fn repeated_passes_visit_the_same_order() {
        let model = pair();
        let schedule = SequentialScheduler
            .create_schedule(&model, model.root())
            .unwrap();
        let first = schedule.iter().cloned().collect::<Vec<_>>();
        let second = schedule.iter().cloned().collect::<Vec<_>>();
        assert_eq!(first, second);
        let wrapped = ScheduleCursor::new(&schedule)
            .skip(schedule.len())
            .take(schedule.len())
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(first, wrapped);
    }
}
