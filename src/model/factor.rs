#![allow(dead_code)]

use std::sync::Arc;

use crate::factor_functions::factor_function::FactorFunction;

use super::graph_model::{GraphId, TableId, VariableId};

// Stores a factor of the model: a potential over an ordered list of variables
#[derive(Debug, Clone)]
pub struct Factor {
    name: Option<String>,
    pub(crate) function: Option<Arc<dyn FactorFunction>>, // None for factors defined by a table only
    pub(crate) table: Option<TableId>,                    // present when all arguments are discrete
    pub(crate) owner: GraphId,
    pub(crate) siblings: Vec<VariableId>, // position = factor-side port = table column
    pub(crate) directed_to: Option<Vec<usize>>,
    pub(crate) directed_from: Option<Vec<usize>>,
}

impl Factor {
    pub(crate) fn new(
        name: Option<String>,
        function: Option<Arc<dyn FactorFunction>>,
        table: Option<TableId>,
        owner: GraphId,
        siblings: Vec<VariableId>,
    ) -> Self {
        Factor {
            name,
            function,
            table,
            owner,
            siblings,
            directed_to: None,
            directed_from: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn function_name(&self) -> &str {
        match &self.function {
            Some(function) => function.name(),
            None => "Table",
        }
    }

    pub fn function(&self) -> Option<&Arc<dyn FactorFunction>> {
        self.function.as_ref()
    }

    pub fn table(&self) -> Option<TableId> {
        self.table
    }

    pub fn siblings(&self) -> &[VariableId] {
        &self.siblings
    }

    pub fn degree(&self) -> usize {
        self.siblings.len()
    }

    pub fn owner(&self) -> GraphId {
        self.owner
    }

    pub fn is_directed(&self) -> bool {
        self.directed_to.is_some()
    }

    pub fn directed_to(&self) -> Option<&[usize]> {
        self.directed_to.as_deref()
    }

    pub fn directed_from(&self) -> Option<&[usize]> {
        self.directed_from.as_deref()
    }

    pub(crate) fn port_of(&self, variable: VariableId) -> Option<usize> {
        self.siblings.iter().position(|sibling| *sibling == variable)
    }
}
