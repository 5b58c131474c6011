#![allow(dead_code)]

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use bitvec::prelude::*;
use log::debug;
use ndarray::Array2;
use petgraph::{
    stable_graph::{EdgeIndex, NodeIndex, StableGraph},
    visit::NodeIndexable,
    Undirected,
};

use crate::{
    error::{FactorGraphError, Result},
    factor_functions::factor_function::FactorFunction,
    schedulers::schedule::Schedule,
    tables::factor_table::FactorTable,
};

use super::{
    assignment::Assignment, domain::Domain, factor::Factor, value::Value, variable::Variable,
};

pub type NodeId = NodeIndex<usize>;
pub type EdgeId = EdgeIndex<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactorId(pub(crate) NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) usize);

impl VariableId {
    pub fn node(self) -> NodeId {
        self.0
    }

    pub fn index(self) -> usize {
        self.0.index()
    }
}

impl FactorId {
    pub fn node(self) -> NodeId {
        self.0
    }

    pub fn index(self) -> usize {
        self.0.index()
    }
}

impl GraphId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<VariableId> for NodeIndex<usize> {
    fn from(variable: VariableId) -> Self {
        variable.0
    }
}

impl From<FactorId> for NodeIndex<usize> {
    fn from(factor: FactorId) -> Self {
        factor.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Variable(VariableId),
    Factor(FactorId),
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Variable(Variable),
    Factor(Factor),
}

// Old -> new identities produced when a graph is copied
#[derive(Debug, Clone, Default)]
pub struct NodeMap {
    pub(crate) nodes: HashMap<NodeId, NodeId>,
    pub(crate) graphs: HashMap<GraphId, GraphId>,
}

impl NodeMap {
    pub fn node(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).copied()
    }

    pub fn graph(&self, graph: GraphId) -> Option<GraphId> {
        self.graphs.get(&graph).copied()
    }
}

// Nodes and edges touched by a structural mutation, used to invalidate solver state
#[derive(Debug, Clone, Default)]
pub struct StructureChange {
    pub(crate) touched: Vec<NodeId>,
    pub(crate) removed_edges: Vec<EdgeId>,
    pub(crate) moved_edges: Vec<(EdgeId, EdgeId)>,
}

impl StructureChange {
    pub(crate) fn merge(&mut self, other: StructureChange) {
        self.touched.extend(other.touched);
        self.removed_edges.extend(other.removed_edges);
        self.moved_edges.extend(other.moved_edges);
    }
}

// One level of the nesting tree
#[derive(Debug, Clone, Default)]
pub(crate) struct GraphRecord {
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<GraphId>,
    pub(crate) children: Vec<GraphId>,
    pub(crate) variables: Vec<VariableId>, // variables owned by this level
    pub(crate) factors: Vec<FactorId>,     // factors owned by this level
    pub(crate) boundary: Vec<VariableId>,  // variables shared with the parent
    pub(crate) schedule: Option<Schedule>, // user-fixed schedule, if any
}

// Flattened views of the root graph, rebuilt lazily after each structural change
#[derive(Debug, Clone, Default)]
struct FlatCache {
    variables: OnceLock<Vec<VariableId>>,
    factors: OnceLock<Vec<FactorId>>,
}

type TableKey = (usize, Vec<u64>);

// Arena of variables, factors, nesting levels, and factor tables
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: StableGraph<Node, (), Undirected, usize>,
    pub(crate) graphs: Vec<GraphRecord>,
    tables: Vec<FactorTable>,
    table_cache: HashMap<TableKey, TableId>, // (function identity, domain fingerprints) -> shared table
    cached_functions: Vec<Arc<dyn FactorFunction>>, // keeps cached function identities alive
    flat: FlatCache,
}

impl Default for GraphModel {
    fn default() -> Self {
        GraphModel::new()
    }
}

impl GraphModel {
    pub fn new() -> Self {
        GraphModel {
            nodes: StableGraph::default(),
            graphs: vec![GraphRecord::default()],
            tables: Vec::new(),
            table_cache: HashMap::new(),
            cached_functions: Vec::new(),
            flat: FlatCache::default(),
        }
    }

    pub fn root(&self) -> GraphId {
        GraphId(0)
    }

    pub(crate) fn node_bound(&self) -> usize {
        self.nodes.node_bound()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.edge_count()
    }

    // Single point of cache invalidation, called by every structural mutation
    pub(crate) fn structure_changed(&mut self) {
        self.flat = FlatCache::default();
    }

    // ---------------------------------------------------------------------------------------------
    // Node access

    pub fn node_kind(&self, node: NodeId) -> Option<NodeKind> {
        match self.nodes.node_weight(node)? {
            Node::Variable(_) => Some(NodeKind::Variable(VariableId(node))),
            Node::Factor(_) => Some(NodeKind::Factor(FactorId(node))),
        }
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains_node(node)
    }

    // Graph level that owns the node
    pub fn node_owner(&self, node: NodeId) -> Option<GraphId> {
        match self.nodes.node_weight(node)? {
            Node::Variable(data) => Some(data.owner),
            Node::Factor(data) => Some(data.owner),
        }
    }

    // Owned by `graph` or one of its nested graphs, or a boundary variable of `graph`
    pub fn is_in_graph(&self, node: NodeId, graph: GraphId) -> Result<bool> {
        let owner = match self.node_owner(node) {
            Some(owner) => owner,
            None => return Ok(false),
        };
        if self.is_ancestor_of(graph, owner)? {
            return Ok(true);
        }
        Ok(self
            .boundary_variables(graph)?
            .iter()
            .any(|variable| variable.0 == node))
    }

    pub fn variable(&self, variable: VariableId) -> Result<&Variable> {
        match self.nodes.node_weight(variable.0) {
            Some(Node::Variable(data)) => Ok(data),
            _ => Err(FactorGraphError::UnknownNode {
                kind: "variable",
                index: variable.index(),
            }),
        }
    }

    pub(crate) fn variable_mut(&mut self, variable: VariableId) -> Result<&mut Variable> {
        match self.nodes.node_weight_mut(variable.0) {
            Some(Node::Variable(data)) => Ok(data),
            _ => Err(FactorGraphError::UnknownNode {
                kind: "variable",
                index: variable.index(),
            }),
        }
    }

    pub fn factor(&self, factor: FactorId) -> Result<&Factor> {
        match self.nodes.node_weight(factor.0) {
            Some(Node::Factor(data)) => Ok(data),
            _ => Err(FactorGraphError::UnknownNode {
                kind: "factor",
                index: factor.index(),
            }),
        }
    }

    pub(crate) fn factor_mut(&mut self, factor: FactorId) -> Result<&mut Factor> {
        match self.nodes.node_weight_mut(factor.0) {
            Some(Node::Factor(data)) => Ok(data),
            _ => Err(FactorGraphError::UnknownNode {
                kind: "factor",
                index: factor.index(),
            }),
        }
    }

    pub fn table(&self, table: TableId) -> Result<&FactorTable> {
        self.tables.get(table.0).ok_or(FactorGraphError::UnknownNode {
            kind: "table",
            index: table.0,
        })
    }

    pub(crate) fn table_mut(&mut self, table: TableId) -> Result<&mut FactorTable> {
        self.tables.get_mut(table.0).ok_or(FactorGraphError::UnknownNode {
            kind: "table",
            index: table.0,
        })
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    // Table of a factor; factors over non-discrete variables have none
    pub fn factor_table(&self, factor: FactorId) -> Result<&FactorTable> {
        let table = self.factor(factor)?.table.ok_or_else(|| {
            FactorGraphError::IncompatibleDomains(format!(
                "factor {} has non-discrete arguments and no table",
                factor.index()
            ))
        })?;
        self.table(table)
    }

    pub fn factor_table_id(&self, factor: FactorId) -> Result<TableId> {
        self.factor(factor)?.table.ok_or_else(|| {
            FactorGraphError::IncompatibleDomains(format!(
                "factor {} has non-discrete arguments and no table",
                factor.index()
            ))
        })
    }

    // Factors (anywhere in the model) whose table is `table`
    pub fn factors_using_table(&self, table: TableId) -> Vec<FactorId> {
        self.factors_flat(self.root())
            .iter()
            .copied()
            .filter(|factor| {
                self.factor(*factor)
                    .map_or(false, |data| data.table == Some(table))
            })
            .collect()
    }

    // ---------------------------------------------------------------------------------------------
    // Adjacency

    // Neighbours of a node in port order
    pub fn neighbors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        match self.node_kind(node) {
            Some(NodeKind::Variable(variable)) => Ok(self
                .variable(variable)?
                .siblings
                .iter()
                .map(|factor| factor.0)
                .collect()),
            Some(NodeKind::Factor(factor)) => Ok(self
                .factor(factor)?
                .siblings
                .iter()
                .map(|variable| variable.0)
                .collect()),
            None => Err(FactorGraphError::UnknownNode {
                kind: "node",
                index: node.index(),
            }),
        }
    }

    pub fn degree(&self, node: NodeId) -> Result<usize> {
        match self.node_kind(node) {
            Some(NodeKind::Variable(variable)) => Ok(self.variable(variable)?.degree()),
            Some(NodeKind::Factor(factor)) => Ok(self.factor(factor)?.degree()),
            None => Err(FactorGraphError::UnknownNode {
                kind: "node",
                index: node.index(),
            }),
        }
    }

    // Port of `node` that leads to `neighbor`
    pub fn port_of(&self, node: NodeId, neighbor: NodeId) -> Result<usize> {
        self.neighbors(node)?
            .iter()
            .position(|candidate| *candidate == neighbor)
            .ok_or(FactorGraphError::NotAdjacent(node.index(), neighbor.index()))
    }

    pub fn neighbor_at(&self, node: NodeId, port: usize) -> Result<NodeId> {
        let neighbors = self.neighbors(node)?;
        neighbors
            .get(port)
            .copied()
            .ok_or(FactorGraphError::InvalidArgument(format!(
                "port {} is out of range for node {} with {} edges",
                port,
                node.index(),
                neighbors.len()
            )))
    }

    pub fn edge(&self, variable: VariableId, factor: FactorId) -> Result<EdgeId> {
        self.nodes
            .find_edge(variable.0, factor.0)
            .ok_or(FactorGraphError::NotAdjacent(variable.index(), factor.index()))
    }

    // Edges of a node in port order
    pub fn node_edges(&self, node: NodeId) -> Result<Vec<EdgeId>> {
        self.neighbors(node)?
            .into_iter()
            .map(|neighbor| {
                self.nodes
                    .find_edge(node, neighbor)
                    .ok_or(FactorGraphError::NotAdjacent(node.index(), neighbor.index()))
            })
            .collect()
    }

    // ---------------------------------------------------------------------------------------------
    // Nesting

    pub fn graph_exists(&self, graph: GraphId) -> bool {
        graph.0 < self.graphs.len()
    }

    pub(crate) fn record(&self, graph: GraphId) -> Result<&GraphRecord> {
        self.graphs.get(graph.0).ok_or(FactorGraphError::UnknownNode {
            kind: "graph",
            index: graph.0,
        })
    }

    pub(crate) fn record_mut(&mut self, graph: GraphId) -> Result<&mut GraphRecord> {
        self.graphs.get_mut(graph.0).ok_or(FactorGraphError::UnknownNode {
            kind: "graph",
            index: graph.0,
        })
    }

    pub fn graph_name(&self, graph: GraphId) -> Result<Option<&str>> {
        Ok(self.record(graph)?.name.as_deref())
    }

    pub fn parent_graph(&self, graph: GraphId) -> Result<Option<GraphId>> {
        Ok(self.record(graph)?.parent)
    }

    pub fn child_graphs(&self, graph: GraphId) -> Result<&[GraphId]> {
        Ok(&self.record(graph)?.children)
    }

    pub fn boundary_variables(&self, graph: GraphId) -> Result<&[VariableId]> {
        Ok(&self.record(graph)?.boundary)
    }

    pub fn graph_schedule(&self, graph: GraphId) -> Result<Option<&Schedule>> {
        Ok(self.record(graph)?.schedule.as_ref())
    }

    // Checks whether `ancestor` is `graph` itself or one of its enclosing graphs
    pub fn is_ancestor_of(&self, ancestor: GraphId, graph: GraphId) -> Result<bool> {
        let mut current = Some(graph);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return Ok(true);
            }
            current = self.record(candidate)?.parent;
        }
        Ok(false)
    }

    pub(crate) fn common_ancestor(&self, a: GraphId, b: GraphId) -> Result<GraphId> {
        let mut current = Some(a);
        while let Some(candidate) = current {
            if self.is_ancestor_of(candidate, b)? {
                return Ok(candidate);
            }
            current = self.record(candidate)?.parent;
        }
        Ok(self.root())
    }

    // Variables owned directly by `graph`
    pub fn variables(&self, graph: GraphId) -> Result<&[VariableId]> {
        Ok(&self.record(graph)?.variables)
    }

    // Factors owned directly by `graph`
    pub fn factors(&self, graph: GraphId) -> Result<&[FactorId]> {
        Ok(&self.record(graph)?.factors)
    }

    fn collect_flat<T: Copy>(&self, graph: GraphId, select: fn(&GraphRecord) -> &[T], out: &mut Vec<T>) {
        if let Some(record) = self.graphs.get(graph.0) {
            out.extend_from_slice(select(record));
            for child in &record.children {
                self.collect_flat(*child, select, out);
            }
        }
    }

    // Variables of `graph` and of every graph nested in it
    pub fn variables_flat(&self, graph: GraphId) -> Cow<'_, [VariableId]> {
        let compute = || {
            let mut variables = Vec::new();
            self.collect_flat(graph, |record| &record.variables, &mut variables);
            variables
        };
        if graph == self.root() {
            Cow::Borrowed(self.flat.variables.get_or_init(compute))
        } else {
            Cow::Owned(compute())
        }
    }

    // Factors of `graph` and of every graph nested in it
    pub fn factors_flat(&self, graph: GraphId) -> Cow<'_, [FactorId]> {
        let compute = || {
            let mut factors = Vec::new();
            self.collect_flat(graph, |record| &record.factors, &mut factors);
            factors
        };
        if graph == self.root() {
            Cow::Borrowed(self.flat.factors.get_or_init(compute))
        } else {
            Cow::Owned(compute())
        }
    }

    // Flattened variables then flattened factors of a graph, plus its boundary variables
    pub fn nodes_flat(&self, graph: GraphId) -> Result<Vec<NodeId>> {
        let record = self.record(graph)?;
        let mut nodes = record
            .boundary
            .iter()
            .map(|variable| variable.0)
            .collect::<Vec<_>>();
        nodes.extend(self.variables_flat(graph).iter().map(|variable| variable.0));
        nodes.extend(self.factors_flat(graph).iter().map(|factor| factor.0));
        Ok(nodes)
    }

    // Checks whether the flattened graph has no cycles
    pub fn is_tree(&self, graph: GraphId) -> Result<bool> {
        let nodes = self.nodes_flat(graph)?;
        let bound = self.node_bound();
        let mut in_graph = BitVec::<usize, LocalBits>::repeat(false, bound);
        for node in &nodes {
            in_graph.set(node.index(), true);
        }
        let mut is_touched = BitVec::<usize, LocalBits>::repeat(false, bound);
        let mut stack: Vec<(NodeId, Option<NodeId>)> = Vec::new();

        for start in &nodes {
            if is_touched[start.index()] {
                continue;
            }
            is_touched.set(start.index(), true);
            stack.push((*start, None));
            while let Some((node, parent)) = stack.pop() {
                for neighbor in self.neighbors(node)? {
                    if !in_graph[neighbor.index()] || Some(neighbor) == parent {
                        continue;
                    }
                    if is_touched[neighbor.index()] {
                        return Ok(false);
                    }
                    is_touched.set(neighbor.index(), true);
                    stack.push((neighbor, Some(node)));
                }
            }
        }
        Ok(true)
    }

    // 0/1 adjacency over the flattened variables followed by the flattened factors
    pub fn adjacency_matrix(&self, graph: GraphId) -> Result<Array2<u8>> {
        let mut nodes = self
            .variables_flat(graph)
            .iter()
            .map(|variable| variable.0)
            .collect::<Vec<_>>();
        nodes.extend(self.factors_flat(graph).iter().map(|factor| factor.0));
        let position = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (*node, position))
            .collect::<HashMap<_, _>>();

        let mut matrix = Array2::zeros((nodes.len(), nodes.len()));
        for (row, node) in nodes.iter().enumerate() {
            for neighbor in self.neighbors(*node)? {
                if let Some(column) = position.get(&neighbor) {
                    matrix[[row, *column]] = 1;
                }
            }
        }
        Ok(matrix)
    }

    // ---------------------------------------------------------------------------------------------
    // Energies

    pub fn variable_energy(&self, variable: VariableId, index: usize) -> Result<f64> {
        let data = self.variable(variable)?;
        if index >= data.input().len() {
            return Err(FactorGraphError::InvalidValue(format!(
                "index {} is out of range for variable {}",
                index,
                variable.index()
            )));
        }
        Ok(data.input_energy(index))
    }

    // Energy of a factor at the labels of its variables
    pub fn factor_energy(&self, factor: FactorId, assignment: &Assignment) -> Result<f64> {
        let data = self.factor(factor)?;
        let tuple = data
            .siblings
            .iter()
            .map(|variable| {
                assignment.get(*variable).ok_or(FactorGraphError::InvalidArgument(format!(
                    "variable {} is unlabeled",
                    variable.index()
                )))
            })
            .collect::<Result<Vec<_>>>()?;
        match (data.table, &data.function) {
            (Some(table), _) => Ok(self.table(table)?.energy(&tuple)),
            (None, Some(function)) => {
                let arguments = data
                    .siblings
                    .iter()
                    .zip(&tuple)
                    .map(|(variable, index)| {
                        let domain = self.variable(*variable)?.discrete_domain()?;
                        domain.element(*index).cloned().ok_or(FactorGraphError::InvalidValue(
                            format!("index {} is out of range", index),
                        ))
                    })
                    .collect::<Result<Vec<Value>>>()?;
                function.eval_energy(&arguments)
            }
            (None, None) => Err(FactorGraphError::InvalidArgument(format!(
                "factor {} has neither a table nor a function",
                factor.index()
            ))),
        }
    }

    // Total energy (negative log of the unnormalized probability) of a full assignment
    pub fn score_assignment(&self, graph: GraphId, assignment: &Assignment) -> Result<f64> {
        let mut score = 0.;
        for variable in self.variables_flat(graph).iter() {
            let index = assignment.get(*variable).ok_or(FactorGraphError::InvalidArgument(
                format!("variable {} is unlabeled", variable.index()),
            ))?;
            score += self.variable_energy(*variable, index)?;
        }
        for factor in self.factors_flat(graph).iter() {
            score += self.factor_energy(*factor, assignment)?;
        }
        Ok(score)
    }

    // ---------------------------------------------------------------------------------------------
    // Mutation

    pub(crate) fn add_variable(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        domain: Domain,
    ) -> Result<VariableId> {
        self.record(graph)?;
        let node = self
            .nodes
            .add_node(Node::Variable(Variable::new(name, domain, graph)));
        let variable = VariableId(node);
        self.graphs[graph.0].variables.push(variable);
        self.structure_changed();
        Ok(variable)
    }

    pub(crate) fn add_table(&mut self, table: FactorTable) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() - 1)
    }

    pub(crate) fn check_arguments(&self, variables: &[VariableId]) -> Result<()> {
        for (position, variable) in variables.iter().enumerate() {
            self.variable(*variable)?;
            if variables[..position].contains(variable) {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "variable {} appears more than once in a factor",
                    variable.index()
                )));
            }
        }
        Ok(())
    }

    // Inserts a factor node and its edges
    pub(crate) fn insert_factor(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        function: Option<Arc<dyn FactorFunction>>,
        table: Option<TableId>,
        variables: &[VariableId],
    ) -> Result<(FactorId, StructureChange)> {
        self.record(graph)?;
        self.check_arguments(variables)?;
        let node = self.nodes.add_node(Node::Factor(Factor::new(
            name,
            function,
            table,
            graph,
            variables.to_vec(),
        )));
        let factor = FactorId(node);
        let mut change = StructureChange::default();
        change.touched.push(node);
        for variable in variables {
            self.nodes.add_edge(variable.0, node, ());
            self.variable_mut(*variable)?.siblings.push(factor);
            change.touched.push(variable.0);
        }
        self.graphs[graph.0].factors.push(factor);
        self.structure_changed();
        Ok((factor, change))
    }

    // Shared table for (function, domains), tabulated on first use
    fn cached_table(
        &mut self,
        function: &Arc<dyn FactorFunction>,
        variables: &[VariableId],
    ) -> Result<TableId> {
        let mut domains = Vec::with_capacity(variables.len());
        for variable in variables {
            domains.push(self.variable(*variable)?.discrete_domain()?.clone());
        }
        let key = (
            Arc::as_ptr(function) as *const () as usize,
            domains.iter().map(|domain| domain.fingerprint()).collect(),
        );
        if let Some(table) = self.table_cache.get(&key) {
            return Ok(*table);
        }
        let table = FactorTable::from_function(
            function.as_ref(),
            &domains.iter().collect::<Vec<_>>(),
        )?;
        debug!(
            "Created table for {} with {} rows",
            function.name(),
            table.num_rows()
        );
        let table = self.add_table(table);
        self.table_cache.insert(key, table);
        self.cached_functions.push(function.clone());
        Ok(table)
    }

    pub(crate) fn add_function_factor(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        function: Arc<dyn FactorFunction>,
        variables: &[VariableId],
    ) -> Result<(FactorId, StructureChange)> {
        self.check_arguments(variables)?;
        let mut all_discrete = true;
        for variable in variables {
            all_discrete &= self.variable(*variable)?.domain().is_discrete();
        }
        let table = if all_discrete {
            Some(self.cached_table(&function, variables)?)
        } else {
            None
        };
        let directed_to = if function.is_directed() {
            function.directed_to_indices(variables.len())
        } else {
            None
        };

        let (factor, change) =
            self.insert_factor(graph, name, Some(function), table, variables)?;
        if let Some(directed_to) = directed_to {
            if let Err(error) = self.set_directed_to(factor, &directed_to) {
                self.remove_factor(factor)?;
                return Err(error);
            }
        }
        Ok((factor, change))
    }

    pub(crate) fn add_table_factor(
        &mut self,
        graph: GraphId,
        name: Option<String>,
        table: TableId,
        variables: &[VariableId],
    ) -> Result<(FactorId, StructureChange)> {
        let table_data = self.table(table)?;
        if table_data.arity() != variables.len() {
            return Err(FactorGraphError::DimensionMismatch {
                expected: table_data.arity(),
                got: variables.len(),
            });
        }
        for (column, variable) in variables.iter().enumerate() {
            let size = self.variable(*variable)?.domain_size()?;
            if size != table_data.domain_sizes()[column] {
                return Err(FactorGraphError::DimensionMismatch {
                    expected: table_data.domain_sizes()[column],
                    got: size,
                });
            }
        }
        let directed = table_data
            .directed_to()
            .map(|to| to.to_vec())
            .zip(table_data.directed_from().map(|from| from.to_vec()));

        let (factor, change) = self.insert_factor(graph, name, None, Some(table), variables)?;
        if let Some((to, from)) = directed {
            let data = self.factor_mut(factor)?;
            data.directed_to = Some(to);
            data.directed_from = Some(from);
        }
        Ok((factor, change))
    }

    pub(crate) fn remove_factor(&mut self, factor: FactorId) -> Result<StructureChange> {
        let siblings = self.factor(factor)?.siblings.clone();
        let owner = self.factor(factor)?.owner;
        let mut change = StructureChange::default();
        change.touched.push(factor.0);
        for variable in siblings {
            change.removed_edges.push(self.edge(variable, factor)?);
            change.touched.push(variable.0);
            self.variable_mut(variable)?
                .siblings
                .retain(|sibling| *sibling != factor);
        }
        self.graphs[owner.0].factors.retain(|other| *other != factor);
        self.nodes.remove_node(factor.0);
        self.structure_changed();
        Ok(change)
    }

    pub(crate) fn remove_variable(&mut self, variable: VariableId) -> Result<StructureChange> {
        let data = self.variable(variable)?;
        if !data.siblings.is_empty() {
            return Err(FactorGraphError::VariableInUse(
                variable.index(),
                data.siblings.len(),
            ));
        }
        if self
            .graphs
            .iter()
            .any(|record| record.boundary.contains(&variable))
        {
            return Err(FactorGraphError::InvalidArgument(format!(
                "variable {} is a boundary variable",
                variable.index()
            )));
        }
        let owner = data.owner;
        self.graphs[owner.0]
            .variables
            .retain(|other| *other != variable);
        self.nodes.remove_node(variable.0);
        self.structure_changed();
        Ok(StructureChange {
            touched: vec![variable.0],
            ..Default::default()
        })
    }

    // Marks the given ports as outputs and renormalizes the factor's table as a conditional
    pub(crate) fn set_directed_to(&mut self, factor: FactorId, directed_to: &[usize]) -> Result<()> {
        let num_edges = self.factor(factor)?.degree();
        let mut seen = vec![false; num_edges];
        for index in directed_to {
            if *index >= num_edges {
                return Err(FactorGraphError::InvalidDirectedIndex {
                    index: *index,
                    num_edges,
                });
            }
            if seen[*index] {
                return Err(FactorGraphError::DuplicateDirectedIndex(*index));
            }
            seen[*index] = true;
        }
        let directed_from = (0..num_edges).filter(|index| !seen[*index]).collect::<Vec<_>>();

        if let Some(table) = self.factor(factor)?.table {
            self.table_mut(table)?
                .set_directed(directed_to.to_vec(), directed_from.clone())?;
        }
        let data = self.factor_mut(factor)?;
        data.directed_to = Some(directed_to.to_vec());
        data.directed_from = Some(directed_from);
        Ok(())
    }

    pub(crate) fn set_boundary_variables(
        &mut self,
        graph: GraphId,
        variables: &[VariableId],
    ) -> Result<()> {
        for variable in variables {
            let owner = self.variable(*variable)?.owner;
            if !self.is_ancestor_of(owner, graph)? {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "variable {} is not visible from graph {}",
                    variable.index(),
                    graph.0
                )));
            }
        }
        self.record_mut(graph)?.boundary = variables.to_vec();
        Ok(())
    }

    pub(crate) fn set_graph_schedule(&mut self, graph: GraphId, schedule: Option<Schedule>) -> Result<()> {
        self.record_mut(graph)?.schedule = schedule;
        Ok(())
    }

    pub(crate) fn set_variable_input(&mut self, variable: VariableId, weights: &[f64]) -> Result<()> {
        self.variable_mut(variable)?.set_input(weights)
    }

    pub(crate) fn set_variable_fixed_value(&mut self, variable: VariableId, value: &Value) -> Result<()> {
        self.variable_mut(variable)?.set_fixed_value(value)
    }

    pub(crate) fn set_variable_fixed_index(&mut self, variable: VariableId, index: usize) -> Result<()> {
        self.variable_mut(variable)?.set_fixed_index(index)
    }

    // Reconnects port `port` of `factor` to `replacement`, keeping the port position
    pub(crate) fn replace_factor_argument(
        &mut self,
        factor: FactorId,
        port: usize,
        replacement: VariableId,
    ) -> Result<(EdgeId, EdgeId)> {
        let previous = *self
            .factor(factor)?
            .siblings
            .get(port)
            .ok_or(FactorGraphError::InvalidArgument(format!(
                "port {} is out of range for factor {}",
                port,
                factor.index()
            )))?;
        if self.factor(factor)?.siblings.contains(&replacement) {
            return Err(FactorGraphError::InvalidArgument(format!(
                "variable {} is already connected to factor {}",
                replacement.index(),
                factor.index()
            )));
        }
        let previous_domain = self.variable(previous)?.domain().clone();
        if *self.variable(replacement)?.domain() != previous_domain {
            return Err(FactorGraphError::IncompatibleDomains(format!(
                "variables {} and {} have different domains",
                previous.index(),
                replacement.index()
            )));
        }

        let old_edge = self.edge(previous, factor)?;
        self.nodes.remove_edge(old_edge);
        let new_edge = self.nodes.add_edge(replacement.0, factor.0, ());
        self.factor_mut(factor)?.siblings[port] = replacement;
        self.variable_mut(previous)?
            .siblings
            .retain(|sibling| *sibling != factor);
        self.variable_mut(replacement)?.siblings.push(factor);
        self.structure_changed();
        Ok((old_edge, new_edge))
    }

    pub(crate) fn add_graph_record(&mut self, parent: GraphId, name: Option<String>) -> Result<GraphId> {
        self.record(parent)?;
        let graph = GraphId(self.graphs.len());
        self.graphs.push(GraphRecord {
            name,
            parent: Some(parent),
            ..Default::default()
        });
        self.graphs[parent.0].children.push(graph);
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{factor_functions::and::And, model::domain::DiscreteDomain};

    fn chain(length: usize) -> (GraphModel, Vec<VariableId>, Vec<FactorId>) {
        let mut model = GraphModel::new();
        let root = model.root();
        let variables = (0..length)
            .map(|_| {
                model
                    .add_variable(root, None, DiscreteDomain::bit().into())
                    .unwrap()
            })
            .collect::<Vec<_>>();
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1., 2., 3., 4.]).unwrap());
        let factors = variables
            .windows(2)
            .map(|pair| model.add_table_factor(root, None, table, pair).unwrap().0)
            .collect();
        (model, variables, factors)
    }

    #[test]
    fn ports_follow_insertion_order() {
        let (model, variables, factors) = chain(3);
        assert_eq!(model.port_of(variables[1].0, factors[1].0).unwrap(), 1);
        assert_eq!(model.port_of(factors[1].0, variables[1].0).unwrap(), 0);
        assert!(model.port_of(variables[0].0, factors[1].0).is_err());
        assert_eq!(model.factors_using_table(TableId(0)).len(), 2);
    }

    #[test]
    fn chains_are_trees_and_loops_are_not() {
        let (mut model, variables, _) = chain(3);
        assert!(model.is_tree(model.root()).unwrap());
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        model
            .add_table_factor(model.root(), None, table, &[variables[0], variables[2]])
            .unwrap();
        assert!(!model.is_tree(model.root()).unwrap());
    }

    #[test]
    fn flat_cache_is_cleared_on_mutation() {
        let (mut model, variables, factors) = chain(2);
        assert_eq!(model.variables_flat(model.root()).len(), 2);
        model.remove_factor(factors[0]).unwrap();
        assert_eq!(model.factors_flat(model.root()).len(), 0);
        model.remove_variable(variables[0]).unwrap();
        assert_eq!(model.variables_flat(model.root()).len(), 1);
    }

    #[test]
    fn connected_variables_cannot_be_removed() {
        let (mut model, variables, _) = chain(2);
        assert!(matches!(
            model.remove_variable(variables[0]),
            Err(FactorGraphError::VariableInUse(index, 1)) if index == variables[0].index()
        ));
    }

    #[test]
    fn function_factors_share_tables() {
        let mut model = GraphModel::new();
        let root = model.root();
        let function: Arc<dyn FactorFunction> = Arc::new(And);
        let bits = (0..6)
            .map(|_| model.add_variable(root, None, DiscreteDomain::bit().into()).unwrap())
            .collect::<Vec<_>>();
        let (a, _) = model
            .add_function_factor(root, None, function.clone(), &bits[0..3])
            .unwrap();
        let (b, _) = model
            .add_function_factor(root, None, function, &bits[3..6])
            .unwrap();
        assert_eq!(model.factor(a).unwrap().table, model.factor(b).unwrap().table);
        assert_eq!(model.factor(a).unwrap().directed_to(), Some(&[0][..]));
        assert_eq!(model.factor(a).unwrap().directed_from(), Some(&[1, 2][..]));
    }

    #[test]
    fn directed_indices_are_validated() {
        let (mut model, _, factors) = chain(2);
        assert_eq!(
            model.set_directed_to(factors[0], &[2]),
            Err(FactorGraphError::InvalidDirectedIndex {
                index: 2,
                num_edges: 2
            })
        );
        assert_eq!(
            model.set_directed_to(factors[0], &[1, 1]),
            Err(FactorGraphError::DuplicateDirectedIndex(1))
        );
        model.set_directed_to(factors[0], &[1]).unwrap();
        let table = model.factor_table(factors[0]).unwrap();
        let total = table.weight(table.weight_index(&[0, 0]).unwrap())
            + table.weight(table.weight_index(&[0, 1]).unwrap());
        assert!((total - 1.).abs() < 1e-12);
    }
}
