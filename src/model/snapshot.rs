use std::collections::HashMap;

use crate::{error::Result, tables::factor_table::FactorTable};

use super::{domain::Domain, factor_graph::FactorGraph, value::Value};

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSnapshot {
    pub index: usize,
    pub name: Option<String>,
    pub domain: Domain,
    pub input: Vec<f64>,
    pub fixed_value: Option<Value>,
    pub belief: Option<Vec<f64>>, // None when the solver cannot report one yet
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorSnapshot {
    pub index: usize,
    pub name: Option<String>,
    pub function_name: String,
    pub variables: Vec<usize>,
    pub directed_to: Option<Vec<usize>>,
    pub table_hash: Option<u64>, // key into GraphSnapshot::tables
}

// Read-only image of a graph for external persistence; tables are deduplicated by content hash
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub variables: Vec<VariableSnapshot>,
    pub factors: Vec<FactorSnapshot>,
    pub tables: HashMap<u64, FactorTable>,
}

impl GraphSnapshot {
    pub fn capture(graph: &FactorGraph) -> Result<Self> {
        let model = graph.model();
        let mut snapshot = GraphSnapshot::default();

        for variable in graph.variables_flat() {
            let data = model.variable(variable)?;
            snapshot.variables.push(VariableSnapshot {
                index: variable.index(),
                name: data.name().map(str::to_string),
                domain: data.domain().clone(),
                input: data.input().to_vec(),
                fixed_value: data.fixed_value().cloned(),
                belief: graph.belief(variable).ok(),
            });
        }

        for factor in graph.factors_flat() {
            let data = model.factor(factor)?;
            let table_hash = match data.table() {
                Some(table) => {
                    let table = model.table(table)?;
                    let hash = table.content_hash();
                    snapshot.tables.entry(hash).or_insert_with(|| table.clone());
                    Some(hash)
                }
                None => None,
            };
            snapshot.factors.push(FactorSnapshot {
                index: factor.index(),
                name: data.name().map(str::to_string),
                function_name: data.function_name().to_string(),
                variables: data.siblings().iter().map(|variable| variable.index()).collect(),
                directed_to: data.directed_to().map(<[usize]>::to_vec),
                table_hash,
            });
        }
        Ok(snapshot)
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::domain::DiscreteDomain;

    #[test]
    fn shared_tables_are_stored_once() {
        let mut graph = FactorGraph::new();
        let a = graph.add_variable(DiscreteDomain::bit()).unwrap();
        let b = graph.add_variable(DiscreteDomain::bit()).unwrap();
        let c = graph.add_variable(DiscreteDomain::bit()).unwrap();
        let table = graph
            .add_table(FactorTable::dense(vec![2, 2], vec![1., 2., 3., 4.]).unwrap())
            .unwrap();
        graph.add_table_factor(table, &[a, b]).unwrap();
        graph.add_table_factor(table, &[b, c]).unwrap();
        graph.solve().unwrap();

        let snapshot = GraphSnapshot::capture(&graph).unwrap();
        assert_eq!(snapshot.variables.len(), 3);
        assert_eq!(snapshot.factors.len(), 2);
        assert_eq!(snapshot.num_tables(), 1);
        assert_eq!(snapshot.factors[0].function_name, "Table");
        assert_eq!(snapshot.factors[1].variables, vec![b.index(), c.index()]);
        assert!(snapshot.variables.iter().all(|variable| variable.belief.is_some()));
    }
}
