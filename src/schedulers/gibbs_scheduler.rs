use crate::{
    error::Result,
    model::graph_model::{GraphId, GraphModel},
};

use super::{
    schedule::{Schedule, ScheduleEntry},
    scheduler::Scheduler,
};

// One update per variable in a fixed order; factors are never scheduled
#[derive(Debug, Clone, Copy, Default)]
pub struct GibbsSequentialScanScheduler;

impl Scheduler for GibbsSequentialScanScheduler {
    fn name(&self) -> &'static str {
        "GibbsSequentialScan"
    }

    fn create_schedule(&self, model: &GraphModel, graph: GraphId) -> Result<Schedule> {
        Ok(Schedule::for_graph(
            graph,
            model
                .variables_flat(graph)
                .iter()
                .map(|variable| ScheduleEntry::Node(variable.node()))
                .collect(),
        ))
    }
}
