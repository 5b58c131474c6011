#![allow(dead_code)]

use crate::error::{FactorGraphError, Result};

use super::{
    domain::{DiscreteDomain, Domain},
    graph_model::{FactorId, GraphId},
    value::Value,
};

// Stores a random variable of the model
#[derive(Debug, Clone)]
pub struct Variable {
    name: Option<String>,
    domain: Domain,
    input: Vec<f64>,            // normalized prior over the discrete domain (empty for real domains)
    fixed_value: Option<usize>, // index of the clamped element, if any
    pub(crate) owner: GraphId,
    pub(crate) siblings: Vec<FactorId>, // incident factors; position = variable-side port
}

impl Variable {
    pub(crate) fn new(name: Option<String>, domain: Domain, owner: GraphId) -> Self {
        let input = match &domain {
            Domain::Discrete(domain) => vec![1. / domain.size() as f64; domain.size()],
            _ => Vec::new(),
        };
        Variable {
            name,
            domain,
            input,
            fixed_value: None,
            owner,
            siblings: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn discrete_domain(&self) -> Result<&DiscreteDomain> {
        self.domain.as_discrete()
    }

    pub fn domain_size(&self) -> Result<usize> {
        Ok(self.discrete_domain()?.size())
    }

    pub fn input(&self) -> &[f64] {
        &self.input
    }

    // Negative log of the prior at `index`
    pub fn input_energy(&self, index: usize) -> f64 {
        -self.input[index].ln()
    }

    pub fn fixed_value_index(&self) -> Option<usize> {
        self.fixed_value
    }

    pub fn fixed_value(&self) -> Option<&Value> {
        let domain = self.domain.as_discrete().ok()?;
        self.fixed_value.and_then(|index| domain.element(index))
    }

    pub fn siblings(&self) -> &[FactorId] {
        &self.siblings
    }

    pub fn degree(&self) -> usize {
        self.siblings.len()
    }

    pub fn owner(&self) -> GraphId {
        self.owner
    }

    pub(crate) fn set_input(&mut self, weights: &[f64]) -> Result<()> {
        let size = self.domain_size()?;
        if weights.len() != size {
            return Err(FactorGraphError::DimensionMismatch {
                expected: size,
                got: weights.len(),
            });
        }
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.) {
            return Err(FactorGraphError::NonFinite("variable input".to_string()));
        }
        let total = weights.iter().sum::<f64>();
        if total <= 0. {
            return Err(FactorGraphError::ZeroWeightGroup);
        }
        self.input = weights.iter().map(|weight| weight / total).collect();
        self.fixed_value = None;
        Ok(())
    }

    pub(crate) fn set_fixed_index(&mut self, index: usize) -> Result<()> {
        let size = self.domain_size()?;
        if index >= size {
            return Err(FactorGraphError::InvalidValue(format!(
                "index {} is out of range for a domain of size {}",
                index, size
            )));
        }
        self.input = vec![0.; size];
        self.input[index] = 1.;
        self.fixed_value = Some(index);
        Ok(())
    }

    pub(crate) fn set_fixed_value(&mut self, value: &Value) -> Result<()> {
        let index = self.discrete_domain()?.index_of(value).ok_or_else(|| {
            FactorGraphError::InvalidValue(format!("{} is not in the variable's domain", value))
        })?;
        self.set_fixed_index(index)
    }

    pub(crate) fn port_of(&self, factor: FactorId) -> Option<usize> {
        self.siblings.iter().position(|sibling| *sibling == factor)
    }
}
