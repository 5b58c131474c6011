#![allow(dead_code)]

use crate::{
    error::{FactorGraphError, Result},
    model::graph_model::{GraphId, GraphModel, NodeId, NodeMap},
};

fn check_member(model: &GraphModel, node: NodeId, graph: GraphId) -> Result<()> {
    if !model.contains_node(node) {
        return Err(FactorGraphError::InvalidSchedule(format!(
            "node {} does not exist",
            node.index()
        )));
    }
    if !model.is_in_graph(node, graph)? {
        return Err(FactorGraphError::InvalidSchedule(format!(
            "node {} is not part of graph {}",
            node.index(),
            graph.index()
        )));
    }
    Ok(())
}

// One unit of work of a schedule
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleEntry {
    Node(NodeId),                                          // full update of a node
    Edge { node: NodeId, port: usize },                    // recompute the message leaving `node` through `port`
    SubSchedule { graph: GraphId, schedule: Schedule },    // replay of a nested graph's schedule
    Block(Vec<ScheduleEntry>),                             // group of entries run back to back
}

impl ScheduleEntry {
    // Edge entry for the message sent from `from` to the adjacent node `to`
    pub fn edge_between(model: &GraphModel, from: NodeId, to: NodeId) -> Result<ScheduleEntry> {
        let port = model.port_of(from, to)?;
        Ok(ScheduleEntry::Edge { node: from, port })
    }

    // Number of leaf updates performed by the entry
    pub fn num_updates(&self) -> usize {
        match self {
            ScheduleEntry::Node(_) | ScheduleEntry::Edge { .. } => 1,
            ScheduleEntry::SubSchedule { schedule, .. } => schedule.num_updates(),
            ScheduleEntry::Block(entries) => entries.iter().map(|entry| entry.num_updates()).sum(),
        }
    }

    fn validate(&self, model: &GraphModel, graph: GraphId) -> Result<()> {
        match self {
            ScheduleEntry::Node(node) => check_member(model, *node, graph)?,
            ScheduleEntry::Edge { node, port } => {
                check_member(model, *node, graph)?;
                let degree = model.degree(*node)?;
                if *port >= degree {
                    return Err(FactorGraphError::InvalidSchedule(format!(
                        "port {} is out of range for node {} with {} edges",
                        port,
                        node.index(),
                        degree
                    )));
                }
            }
            ScheduleEntry::SubSchedule {
                graph: nested,
                schedule,
            } => {
                if !model.graph_exists(*nested) || !model.is_ancestor_of(graph, *nested)? {
                    return Err(FactorGraphError::InvalidSchedule(format!(
                        "graph {} is not nested in graph {}",
                        nested.index(),
                        graph.index()
                    )));
                }
                for entry in schedule.iter() {
                    entry.validate(model, *nested)?;
                }
            }
            ScheduleEntry::Block(entries) => {
                for entry in entries {
                    entry.validate(model, graph)?;
                }
            }
        }
        Ok(())
    }

    fn copy(&self, map: &NodeMap) -> Result<ScheduleEntry> {
        let node = |node: &NodeId| {
            map.node(*node).ok_or(FactorGraphError::InvalidSchedule(format!(
                "node {} has no copy",
                node.index()
            )))
        };
        Ok(match self {
            ScheduleEntry::Node(old) => ScheduleEntry::Node(node(old)?),
            ScheduleEntry::Edge { node: old, port } => ScheduleEntry::Edge {
                node: node(old)?,
                port: *port,
            },
            ScheduleEntry::SubSchedule { graph, schedule } => ScheduleEntry::SubSchedule {
                graph: map.graph(*graph).ok_or(FactorGraphError::InvalidSchedule(format!(
                    "graph {} has no copy",
                    graph.index()
                )))?,
                schedule: schedule.copy(map)?,
            },
            ScheduleEntry::Block(entries) => ScheduleEntry::Block(
                entries
                    .iter()
                    .map(|entry| entry.copy(map))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    fn inline_into(&self, out: &mut Vec<ScheduleEntry>) {
        match self {
            ScheduleEntry::SubSchedule { schedule, .. } => {
                for entry in schedule.iter() {
                    entry.inline_into(out);
                }
            }
            ScheduleEntry::Block(entries) => {
                let mut inlined = Vec::with_capacity(entries.len());
                for entry in entries {
                    entry.inline_into(&mut inlined);
                }
                out.push(ScheduleEntry::Block(inlined));
            }
            leaf => out.push(leaf.clone()),
        }
    }
}

// Ordered list of updates, bound to at most one graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    graph: Option<GraphId>,
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Schedule {
            graph: None,
            entries,
        }
    }

    pub fn for_graph(graph: GraphId, entries: Vec<ScheduleEntry>) -> Self {
        Schedule {
            graph: Some(graph),
            entries,
        }
    }

    pub fn attach(&mut self, graph: GraphId) {
        self.graph = Some(graph);
    }

    pub fn graph(&self) -> Option<GraphId> {
        self.graph
    }

    pub fn push(&mut self, entry: ScheduleEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    // Fresh iterator over the entries; every pass starts at the first entry
    pub fn iter(&self) -> std::slice::Iter<'_, ScheduleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_updates(&self) -> usize {
        self.entries.iter().map(|entry| entry.num_updates()).sum()
    }

    // Checks that every entry refers to existing nodes, in-range ports, and nested graphs
    pub fn validate(&self, model: &GraphModel) -> Result<()> {
        let graph = self.graph.unwrap_or(model.root());
        if !model.graph_exists(graph) {
            return Err(FactorGraphError::InvalidSchedule(format!(
                "graph {} does not exist",
                graph.index()
            )));
        }
        for entry in &self.entries {
            entry.validate(model, graph)?;
        }
        Ok(())
    }

    // Structural copy onto the nodes and graphs named by `map`
    pub fn copy(&self, map: &NodeMap) -> Result<Schedule> {
        let graph = match self.graph {
            Some(graph) => Some(map.graph(graph).ok_or(FactorGraphError::InvalidSchedule(
                format!("graph {} has no copy", graph.index()),
            ))?),
            None => None,
        };
        Ok(Schedule {
            graph,
            entries: self
                .entries
                .iter()
                .map(|entry| entry.copy(map))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    // Copy with every nested sub-schedule replaced by its entries
    pub fn copy_to_root(&self) -> Schedule {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            entry.inline_into(&mut entries);
        }
        Schedule {
            graph: self.graph,
            entries,
        }
    }
}

impl<'a> IntoIterator for &'a Schedule {
    type Item = &'a ScheduleEntry;
    type IntoIter = std::slice::Iter<'a, ScheduleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// Endless iteration over a schedule, wrapping around to the first entry
#[derive(Debug, Clone)]
pub struct ScheduleCursor<'a> {
    schedule: &'a Schedule,
    position: usize,
}

impl<'a> ScheduleCursor<'a> {
    pub fn new(schedule: &'a Schedule) -> Self {
        ScheduleCursor {
            schedule,
            position: 0,
        }
    }

    // Number of entries consumed since the last wrap-around
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for ScheduleCursor<'a> {
    type Item = &'a ScheduleEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.schedule.is_empty() {
            return None;
        }
        if self.position == self.schedule.len() {
            self.position = 0;
        }
        let entry = &self.schedule.entries[self.position];
        self.position += 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::domain::DiscreteDomain, tables::factor_table::FactorTable};
    use petgraph::stable_graph::NodeIndex;

    fn node(index: usize) -> NodeId {
        NodeIndex::new(index)
    }

    #[test]
    fn cursor_wraps_around() {
        let schedule = Schedule::new(vec![
            ScheduleEntry::Node(node(0)),
            ScheduleEntry::Node(node(1)),
        ]);
        let visited = ScheduleCursor::new(&schedule).take(5).cloned().collect::<Vec<_>>();
        assert_eq!(
            visited,
            vec![
                ScheduleEntry::Node(node(0)),
                ScheduleEntry::Node(node(1)),
                ScheduleEntry::Node(node(0)),
                ScheduleEntry::Node(node(1)),
                ScheduleEntry::Node(node(0)),
            ]
        );
        assert_eq!(ScheduleCursor::new(&Schedule::default()).next(), None);
    }

    #[test]
    fn sub_schedules_are_inlined() {
        let nested = Schedule::new(vec![
            ScheduleEntry::Node(node(2)),
            ScheduleEntry::Edge {
                node: node(3),
                port: 1,
            },
        ]);
        let schedule = Schedule::new(vec![
            ScheduleEntry::Node(node(0)),
            ScheduleEntry::SubSchedule {
                graph: GraphId(1),
                schedule: nested,
            },
            ScheduleEntry::Node(node(1)),
        ]);
        assert_eq!(schedule.num_updates(), 4);
        let inlined = schedule.copy_to_root();
        assert_eq!(inlined.len(), 4);
        assert_eq!(
            inlined.entries()[2],
            ScheduleEntry::Edge {
                node: node(3),
                port: 1
            }
        );
    }

    #[test]
    fn copies_follow_the_node_map() {
        let mut map = NodeMap::default();
        map.nodes.insert(node(0), node(10));
        let schedule = Schedule::new(vec![ScheduleEntry::Node(node(0))]);
        assert_eq!(
            schedule.copy(&map).unwrap().entries(),
            &[ScheduleEntry::Node(node(10))]
        );
        let missing = Schedule::new(vec![ScheduleEntry::Node(node(1))]);
        assert!(matches!(
            missing.copy(&map),
            Err(FactorGraphError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn entries_must_belong_to_the_scheduled_graph() {
        let mut template = GraphModel::new();
        let root = template.root();
        let inner = (0..2)
            .map(|_| template.add_variable(root, None, DiscreteDomain::bit().into()).unwrap())
            .collect::<Vec<_>>();
        let table = template.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        let (factor, _) = template.add_table_factor(root, None, table, &inner).unwrap();
        template.set_boundary_variables(root, &inner[0..1]).unwrap();

        let mut model = GraphModel::new();
        let shared = model
            .add_variable(model.root(), None, DiscreteDomain::bit().into())
            .unwrap();
        let (first, first_map, _) = model.add_graph(&template, &[shared], model.root(), None).unwrap();
        let (_, second_map, _) = model.add_graph(&template, &[shared], model.root(), None).unwrap();
        let own = first_map.node(factor.node()).unwrap();
        let foreign = second_map.node(factor.node()).unwrap();

        let local = Schedule::for_graph(
            first,
            vec![ScheduleEntry::Node(own), ScheduleEntry::Node(shared.node())],
        );
        local.validate(&model).unwrap();
        let stray = Schedule::for_graph(first, vec![ScheduleEntry::Node(foreign)]);
        assert!(matches!(
            stray.validate(&model),
            Err(FactorGraphError::InvalidSchedule(_))
        ));
        let stray_edge = Schedule::for_graph(first, vec![ScheduleEntry::Edge { node: foreign, port: 0 }]);
        assert!(stray_edge.validate(&model).is_err());
        let whole = Schedule::new(vec![ScheduleEntry::Node(own), ScheduleEntry::Node(foreign)]);
        whole.validate(&model).unwrap();
    }
}
