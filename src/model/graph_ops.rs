use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::{
    error::{FactorGraphError, Result},
    factor_functions::{equals::Equality, factor_function::FactorFunction},
};

use super::{
    graph_model::{
        FactorId, GraphId, GraphModel, NodeMap, StructureChange, TableId, VariableId,
    },
    variable::Variable,
};

impl GraphModel {
    // Replaces two discrete factors with one factor over the union of their arguments
    pub(crate) fn join_factors(
        &mut self,
        a: FactorId,
        b: FactorId,
    ) -> Result<(FactorId, StructureChange)> {
        if a == b {
            return Err(FactorGraphError::InvalidArgument(
                "cannot join a factor with itself".to_string(),
            ));
        }
        let table_a = self.factor_table_id(a)?;
        let table_b = self.factor_table_id(b)?;

        let mut variables = self.factor(a)?.siblings.clone();
        let mut columns_b = Vec::with_capacity(self.factor(b)?.degree());
        for variable in self.factor(b)?.siblings.clone() {
            match variables.iter().position(|other| *other == variable) {
                Some(column) => columns_b.push(column),
                None => {
                    columns_b.push(variables.len());
                    variables.push(variable);
                }
            }
        }
        let columns_a = (0..self.factor(a)?.degree()).collect::<Vec<_>>();
        let domain_sizes = variables
            .iter()
            .map(|variable| self.variable(*variable)?.domain_size())
            .collect::<Result<Vec<_>>>()?;

        let joint = self
            .table(table_a)?
            .product(&columns_a, self.table(table_b)?, &columns_b, domain_sizes)?;
        let owner = self.common_ancestor(self.factor(a)?.owner, self.factor(b)?.owner)?;
        debug!(
            "Joining factors {} and {} into a table with {} rows",
            a.index(),
            b.index(),
            joint.num_rows()
        );

        self.record(owner)?;
        self.check_arguments(&variables)?;
        let table = self.add_table(joint);
        let (joined, mut change) = self.insert_factor(owner, None, None, Some(table), &variables)?;
        change.merge(self.remove_factor(a)?);
        change.merge(self.remove_factor(b)?);
        Ok((joined, change))
    }

    // Moves the listed factors onto a copy of `variable` tied to it by an equality constraint
    pub(crate) fn split_variable(
        &mut self,
        variable: VariableId,
        factors: &[FactorId],
    ) -> Result<(VariableId, FactorId, StructureChange)> {
        for factor in factors {
            if self.factor(*factor)?.port_of(variable).is_none() {
                return Err(FactorGraphError::NotAdjacent(variable.index(), factor.index()));
            }
        }
        let original = self.variable(variable)?;
        let owner = original.owner;
        let name = original.name().map(|name| format!("{}_split", name));
        let domain = original.domain().clone();

        let copy = self.add_variable(owner, name, domain)?;
        let mut change = StructureChange::default();
        change.touched.push(variable.node());
        change.touched.push(copy.node());
        for factor in factors {
            let port = self
                .factor(*factor)?
                .port_of(variable)
                .ok_or(FactorGraphError::NotAdjacent(variable.index(), factor.index()))?;
            let moved = self.replace_factor_argument(*factor, port, copy)?;
            change.moved_edges.push(moved);
            change.touched.push(factor.node());
        }

        let equality: Arc<dyn FactorFunction> = Arc::new(Equality);
        let (constraint, inserted) =
            self.add_function_factor(owner, None, equality, &[variable, copy])?;
        change.merge(inserted);
        Ok((copy, constraint, change))
    }

    // Deep-copies `template` as a graph nested in `parent`; the template's boundary variables
    // are identified with `boundary`
    pub(crate) fn add_graph(
        &mut self,
        template: &GraphModel,
        boundary: &[VariableId],
        parent: GraphId,
        name: Option<String>,
    ) -> Result<(GraphId, NodeMap, StructureChange)> {
        self.record(parent)?;
        let template_root = template.root();
        let template_boundary = template.boundary_variables(template_root)?;
        if template_boundary.len() != boundary.len() {
            return Err(FactorGraphError::DimensionMismatch {
                expected: template_boundary.len(),
                got: boundary.len(),
            });
        }

        let mut map = NodeMap::default();
        for (inner, outer) in template_boundary.iter().zip(boundary) {
            let outer_variable = self.variable(*outer)?;
            if !self.is_ancestor_of(outer_variable.owner, parent)? {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "variable {} is not visible from graph {}",
                    outer.index(),
                    parent.index()
                )));
            }
            if template.variable(*inner)?.domain() != outer_variable.domain() {
                return Err(FactorGraphError::IncompatibleDomains(format!(
                    "boundary variable {} does not match variable {}",
                    inner.index(),
                    outer.index()
                )));
            }
            map.nodes.insert(inner.node(), outer.node());
        }

        let graph = self.copy_records(template, template_root, parent, name, &mut map)?;

        let mut table_map: HashMap<TableId, TableId> = HashMap::new();
        let mut change = StructureChange::default();
        for old_graph in template_records(template, template_root) {
            let new_graph = map.graph(old_graph).ok_or(FactorGraphError::UnknownNode {
                kind: "graph",
                index: old_graph.index(),
            })?;
            for factor in template.factors(old_graph)? {
                let (new_factor, inserted) =
                    self.copy_factor(template, *factor, new_graph, &map, &mut table_map)?;
                map.nodes.insert(factor.node(), new_factor.node());
                change.merge(inserted);
            }
        }

        for old_graph in template_records(template, template_root) {
            let new_graph = map.graph(old_graph).ok_or(FactorGraphError::UnknownNode {
                kind: "graph",
                index: old_graph.index(),
            })?;
            if old_graph != template_root {
                let nested_boundary = template
                    .boundary_variables(old_graph)?
                    .iter()
                    .map(|variable| mapped_variable(&map, *variable))
                    .collect::<Result<Vec<_>>>()?;
                self.record_mut(new_graph)?.boundary = nested_boundary;
            }
            if let Some(schedule) = template.graph_schedule(old_graph)? {
                let mut copied = schedule.copy(&map)?;
                copied.attach(new_graph);
                self.record_mut(new_graph)?.schedule = Some(copied);
            }
        }
        self.record_mut(graph)?.boundary = boundary.to_vec();
        self.structure_changed();
        debug!(
            "Added graph {} with {} nodes under graph {}",
            graph.index(),
            map.nodes.len(),
            parent.index()
        );
        Ok((graph, map, change))
    }

    // Copies graph records and their own variables, depth first
    fn copy_records(
        &mut self,
        template: &GraphModel,
        old_graph: GraphId,
        parent: GraphId,
        name: Option<String>,
        map: &mut NodeMap,
    ) -> Result<GraphId> {
        let graph = self.add_graph_record(parent, name)?;
        map.graphs.insert(old_graph, graph);
        for variable in template.variables(old_graph)? {
            if map.node(variable.node()).is_some() {
                continue;
            }
            let copy = self.copy_variable(template.variable(*variable)?, graph)?;
            map.nodes.insert(variable.node(), copy.node());
        }
        for child in template.child_graphs(old_graph)? {
            let child_name = template.graph_name(*child)?.map(str::to_string);
            self.copy_records(template, *child, graph, child_name, map)?;
        }
        Ok(graph)
    }

    fn copy_variable(&mut self, variable: &Variable, graph: GraphId) -> Result<VariableId> {
        let copy = self.add_variable(
            graph,
            variable.name().map(str::to_string),
            variable.domain().clone(),
        )?;
        match variable.fixed_value_index() {
            Some(index) => self.set_variable_fixed_index(copy, index)?,
            None if variable.domain().is_discrete() => {
                self.set_variable_input(copy, variable.input())?
            }
            None => {}
        }
        Ok(copy)
    }

    fn copy_factor(
        &mut self,
        template: &GraphModel,
        factor: FactorId,
        graph: GraphId,
        map: &NodeMap,
        table_map: &mut HashMap<TableId, TableId>,
    ) -> Result<(FactorId, StructureChange)> {
        let data = template.factor(factor)?;
        let variables = data
            .siblings
            .iter()
            .map(|variable| mapped_variable(map, *variable))
            .collect::<Result<Vec<_>>>()?;
        let table = match data.table {
            Some(old) => Some(match table_map.get(&old) {
                Some(new) => *new,
                None => {
                    let new = self.add_table(template.table(old)?.clone());
                    table_map.insert(old, new);
                    new
                }
            }),
            None => None,
        };
        let (copy, change) = self.insert_factor(
            graph,
            data.name().map(str::to_string),
            data.function.clone(),
            table,
            &variables,
        )?;
        let directed_to = data.directed_to.clone();
        let directed_from = data.directed_from.clone();
        let copied = self.factor_mut(copy)?;
        copied.directed_to = directed_to;
        copied.directed_from = directed_from;
        Ok((copy, change))
    }
}

fn mapped_variable(map: &NodeMap, variable: VariableId) -> Result<VariableId> {
    map.node(variable.node())
        .map(VariableId)
        .ok_or(FactorGraphError::InvalidArgument(format!(
            "variable {} is not part of the copied graph",
            variable.index()
        )))
}

// Records of `graph` and all nested graphs, parents before children
fn template_records(template: &GraphModel, graph: GraphId) -> Vec<GraphId> {
    let mut records = vec![graph];
    let mut next = 0;
    while next < records.len() {
        if let Ok(children) = template.child_graphs(records[next]) {
            records.extend_from_slice(children);
        }
        next += 1;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{assignment::Assignment, domain::DiscreteDomain},
        schedulers::schedule::{Schedule, ScheduleEntry},
        tables::factor_table::FactorTable,
    };

    fn bits(model: &mut GraphModel, count: usize) -> Vec<VariableId> {
        (0..count)
            .map(|_| {
                model
                    .add_variable(model.root(), None, DiscreteDomain::bit().into())
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn joined_factor_scores_like_the_pair() {
        let mut model = GraphModel::new();
        let variables = bits(&mut model, 3);
        let first = model.add_table(FactorTable::dense(vec![2, 2], vec![1., 2., 3., 4.]).unwrap());
        let second = model.add_table(FactorTable::dense(vec![2, 2], vec![5., 6., 7., 8.]).unwrap());
        let (a, _) = model
            .add_table_factor(model.root(), None, first, &variables[0..2])
            .unwrap();
        let (b, _) = model
            .add_table_factor(model.root(), None, second, &variables[1..3])
            .unwrap();

        let mut assignment = Assignment::new(&model);
        assignment.set(variables[0], Some(1));
        assignment.set(variables[1], Some(0));
        assignment.set(variables[2], Some(1));
        let before = model.score_assignment(model.root(), &assignment).unwrap();

        let (joined, change) = model.join_factors(a, b).unwrap();
        assert_eq!(change.removed_edges.len(), 4);
        assert_eq!(model.factors_flat(model.root()).len(), 1);
        assert_eq!(model.factor(joined).unwrap().siblings(), &variables[..]);
        let after = model.score_assignment(model.root(), &assignment).unwrap();
        assert!((before - after).abs() < 1e-12);
    }

    #[test]
    fn failed_join_leaves_both_factors() {
        let mut model = GraphModel::new();
        let variables = bits(&mut model, 2);
        let heavy = model.add_table(FactorTable::dense(vec![2, 2], vec![1e200; 4]).unwrap());
        let (a, _) = model
            .add_table_factor(model.root(), None, heavy, &variables)
            .unwrap();
        let (b, _) = model
            .add_table_factor(model.root(), None, heavy, &variables)
            .unwrap();
        let edges = model.edge_count();

        assert!(matches!(
            model.join_factors(a, b),
            Err(FactorGraphError::NonFinite(_))
        ));
        assert_eq!(model.factors_flat(model.root()).as_ref(), &[a, b]);
        assert_eq!(model.edge_count(), edges);
        assert_eq!(model.variable(variables[0]).unwrap().siblings(), &[a, b]);
    }

    #[test]
    fn split_keeps_ports_and_adds_a_constraint() {
        let mut model = GraphModel::new();
        let variables = bits(&mut model, 2);
        let table = model.add_table(FactorTable::dense(vec![2, 2], vec![1.; 4]).unwrap());
        let (factor, _) = model
            .add_table_factor(model.root(), None, table, &[variables[1], variables[0]])
            .unwrap();
        let (copy, constraint, change) = model.split_variable(variables[0], &[factor]).unwrap();
        assert_eq!(model.factor(factor).unwrap().siblings(), &[variables[1], copy]);
        assert_eq!(change.moved_edges.len(), 1);
        assert_eq!(model.variable(variables[0]).unwrap().siblings(), &[constraint]);
        assert_eq!(model.factor(constraint).unwrap().function_name(), "Equality");
    }

    #[test]
    fn nested_copies_share_boundary_variables() {
        let mut template = GraphModel::new();
        let inner = bits(&mut template, 2);
        let table = template.add_table(FactorTable::dense(vec![2, 2], vec![1., 2., 3., 4.]).unwrap());
        let (factor, _) = template
            .add_table_factor(template.root(), None, table, &inner)
            .unwrap();
        template
            .set_boundary_variables(template.root(), &inner[0..1])
            .unwrap();
        template
            .set_graph_schedule(
                template.root(),
                Some(Schedule::new(vec![ScheduleEntry::Node(factor.node())])),
            )
            .unwrap();

        let mut model = GraphModel::new();
        let outer = bits(&mut model, 1);
        let (first, map, _) = model.add_graph(&template, &outer, model.root(), None).unwrap();
        let (second, _, _) = model.add_graph(&template, &outer, model.root(), None).unwrap();

        assert_eq!(model.child_graphs(model.root()).unwrap(), &[first, second]);
        assert_eq!(model.variables_flat(model.root()).len(), 3);
        assert_eq!(model.factors_flat(model.root()).len(), 2);
        assert_eq!(model.variable(outer[0]).unwrap().degree(), 2);
        assert_eq!(model.boundary_variables(first).unwrap(), &outer[..]);
        let copied = map.node(factor.node()).unwrap();
        assert_eq!(
            model.graph_schedule(first).unwrap().unwrap().entries(),
            &[ScheduleEntry::Node(copied)]
        );
        assert!(model.is_ancestor_of(model.root(), second).unwrap());
        assert!(!model.is_ancestor_of(first, second).unwrap());
    }

    #[test]
    fn boundary_domains_must_match() {
        let mut template = GraphModel::new();
        let inner = bits(&mut template, 1);
        template
            .set_boundary_variables(template.root(), &inner)
            .unwrap();
        let mut model = GraphModel::new();
        let outer = model
            .add_variable(
                model.root(),
                None,
                DiscreteDomain::range(0, 2).unwrap().into(),
            )
            .unwrap();
        assert!(matches!(
            model.add_graph(&template, &[outer], model.root(), None),
            Err(FactorGraphError::IncompatibleDomains(_))
        ));
    }
}
