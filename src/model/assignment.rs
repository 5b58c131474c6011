use std::{fmt::Display, ops::Index};

use super::graph_model::{GraphModel, VariableId};

// Partial labelling of variables by domain index, indexed by the variable's node index
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Assignment {
    labels: Vec<Option<usize>>, // None = variable is unlabeled
}

impl Assignment {
    // Creates an assignment with every variable of the model unlabeled
    pub fn new(model: &GraphModel) -> Self {
        Assignment {
            labels: vec![None; model.node_bound()],
        }
    }

    pub fn get(&self, variable: VariableId) -> Option<usize> {
        self.labels.get(variable.index()).copied().flatten()
    }

    pub fn set(&mut self, variable: VariableId, label: Option<usize>) {
        if variable.index() >= self.labels.len() {
            self.labels.resize(variable.index() + 1, None);
        }
        self.labels[variable.index()] = label;
    }

    // Checks if every given variable is labeled
    pub fn is_fully_labeled(&self, variables: &[VariableId]) -> bool {
        variables.iter().all(|variable| self.get(*variable).is_some())
    }

    pub fn num_labeled(&self) -> usize {
        self.labels.iter().filter(|label| label.is_some()).count()
    }
}

impl Index<VariableId> for Assignment {
    type Output = Option<usize>;

    fn index(&self, variable: VariableId) -> &Self::Output {
        self.labels.get(variable.index()).unwrap_or(&None)
    }
}

fn label_to_str(label: Option<usize>) -> String {
    match label {
        Some(label) => label.to_string(),
        None => "None".to_string(),
    }
}

impl std::fmt::Debug for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}",
            self.labels
                .iter()
                .map(|label| label_to_str(*label))
                .collect::<Vec<_>>()
        )
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labeled = self
            .labels
            .iter()
            .enumerate()
            .filter_map(|(index, label)| label.map(|label| format!("{}={}", index, label)))
            .collect::<Vec<_>>();
        write!(f, "[{}]", labeled.join(", "))
    }
}
