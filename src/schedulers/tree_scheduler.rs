use bitvec::prelude::*;
use log::debug;

use crate::{
    error::Result,
    model::graph_model::{GraphId, GraphModel, NodeId},
};

use super::{
    schedule::{Schedule, ScheduleEntry},
    scheduler::{FloodingScheduler, Scheduler},
};

// Exact two-pass schedule on forests, flooding otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeOrFloodingScheduler;

impl TreeOrFloodingScheduler {
    fn tree_schedule(model: &GraphModel, graph: GraphId) -> Result<Schedule> {
        let nodes = model.nodes_flat(graph)?;
        let bound = model.node_bound();
        let mut in_graph = BitVec::<usize, LocalBits>::repeat(false, bound);
        for node in &nodes {
            in_graph.set(node.index(), true);
        }
        let mut is_touched = BitVec::<usize, LocalBits>::repeat(false, bound);

        let mut inward = Vec::new(); // messages toward each component's root
        let mut outward = Vec::new(); // messages away from each component's root
        for root in &nodes {
            if is_touched[root.index()] {
                continue;
            }
            // Depth-first pre-order of the component, with each node's parent
            let mut order: Vec<(NodeId, Option<NodeId>)> = Vec::new();
            let mut stack = vec![(*root, None)];
            is_touched.set(root.index(), true);
            while let Some((node, parent)) = stack.pop() {
                order.push((node, parent));
                for neighbor in model.neighbors(node)?.into_iter().rev() {
                    if in_graph[neighbor.index()] && !is_touched[neighbor.index()] {
                        is_touched.set(neighbor.index(), true);
                        stack.push((neighbor, Some(node)));
                    }
                }
            }
            for (node, parent) in order.iter().rev() {
                if let Some(parent) = parent {
                    inward.push(ScheduleEntry::edge_between(model, *node, *parent)?);
                }
            }
            for (node, parent) in &order {
                if let Some(parent) = parent {
                    outward.push(ScheduleEntry::edge_between(model, *parent, *node)?);
                }
            }
        }
        debug!(
            "Tree schedule with {} messages over {} nodes",
            inward.len() + outward.len(),
            nodes.len()
        );
        inward.extend(outward);
        Ok(Schedule::for_graph(graph, inward))
    }
}

impl Scheduler for TreeOrFloodingScheduler {
    fn name(&self) -> &'static str {
        "TreeOrFlooding"
    }

    fn create_schedule(&self, model: &GraphModel, graph: GraphId) -> Result<Schedule> {
        if model.is_tree(graph)? {
            TreeOrFloodingScheduler::tree_schedule(model, graph)
        } else {
            FloodingScheduler.create_schedule(model, graph)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::domain::DiscreteDomain, tables::factor_table::FactorTable};

    #[test]
    fn every_edge_is_scheduled_in_both_directions() {
        let mut model = GraphModel::new();
        let root = model.root();
        let variables = (0..4)
            .map(|_| model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap())
            .collect::<Vec<_>>();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        for pair in variables.windows(2) {
            model.add_table_factor(root, None, table, pair).unwrap();
        }
        let schedule = TreeOrFloodingScheduler.create_schedule(&model, root).unwrap();
        assert_eq!(schedule.len(), 2 * model.edge_count());
        assert!(schedule
            .iter()
            .all(|entry| matches!(entry, ScheduleEntry::Edge { .. })));
        schedule.validate(&model).unwrap();
    }

    #[test]
    fn loops_fall_back_to_flooding() {
        let mut model = GraphModel::new();
        let root = model.root();
        let a = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let b = model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        model.add_table_factor(root, None, table, &[a, b]).unwrap();
        model.add_table_factor(root, None, table, &[b, a]).unwrap();
        let schedule = TreeOrFloodingScheduler.create_schedule(&model, root).unwrap();
        assert!(schedule
            .iter()
            .all(|entry| matches!(entry, ScheduleEntry::Node(_))));
    }
}
