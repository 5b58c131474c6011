#![allow(dead_code)]

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
};

use crate::error::{FactorGraphError, Result};

use super::value::{Value, ValueKey};

// Finite ordered set of values with constant-time value to index lookup
#[derive(Debug, Clone)]
pub struct DiscreteDomain {
    elements: Vec<Value>,
    lookup: HashMap<ValueKey, usize>, // element key -> position in `elements`
}

impl DiscreteDomain {
    pub fn new(elements: Vec<Value>) -> Result<Self> {
        if elements.is_empty() {
            return Err(FactorGraphError::InvalidArgument(
                "a discrete domain needs at least one element".to_string(),
            ));
        }
        let mut lookup = HashMap::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            if lookup.insert(element.key(), index).is_some() {
                return Err(FactorGraphError::InvalidArgument(format!(
                    "duplicate domain element {}",
                    element
                )));
            }
        }
        Ok(DiscreteDomain { elements, lookup })
    }

    // Integers from `lower` to `upper` inclusive
    pub fn range(lower: i64, upper: i64) -> Result<Self> {
        if lower > upper {
            return Err(FactorGraphError::InvalidArgument(format!(
                "empty range {}..={}",
                lower, upper
            )));
        }
        DiscreteDomain::new((lower..=upper).map(Value::Int).collect())
    }

    pub fn bit() -> Self {
        DiscreteDomain {
            elements: vec![Value::Int(0), Value::Int(1)],
            lookup: HashMap::from([(ValueKey::Int(0), 0), (ValueKey::Int(1), 1)]),
        }
    }

    pub fn boolean() -> Self {
        DiscreteDomain {
            elements: vec![Value::Bool(false), Value::Bool(true)],
            lookup: HashMap::from([(ValueKey::Bool(false), 0), (ValueKey::Bool(true), 1)]),
        }
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn element(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.lookup.get(&value.key()).copied()
    }

    // Stable hash of the element list, used to share factor tables between equal domains
    pub(crate) fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for element in &self.elements {
            element.key().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl PartialEq for DiscreteDomain {
    fn eq(&self, other: &Self) -> bool {
        self.elements.len() == other.elements.len()
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| a.key() == b.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealDomain {
    lower: f64,
    upper: f64,
}

impl RealDomain {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(FactorGraphError::InvalidArgument(format!(
                "invalid real bounds [{}, {}]",
                lower, upper
            )));
        }
        Ok(RealDomain { lower, upper })
    }

    pub fn unbounded() -> Self {
        RealDomain {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealJointDomain {
    components: Vec<RealDomain>,
}

impl RealJointDomain {
    pub fn new(components: Vec<RealDomain>) -> Self {
        RealJointDomain { components }
    }

    pub fn dimensions(&self) -> usize {
        self.components.len()
    }

    pub fn component(&self, index: usize) -> Option<&RealDomain> {
        self.components.get(index)
    }

    pub fn contains(&self, values: &[f64]) -> bool {
        values.len() == self.components.len()
            && self
                .components
                .iter()
                .zip(values)
                .all(|(domain, value)| domain.contains(*value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Discrete(DiscreteDomain),
    Real(RealDomain),
    RealJoint(RealJointDomain),
}

impl Domain {
    pub fn is_discrete(&self) -> bool {
        matches!(self, Domain::Discrete(_))
    }

    pub fn as_discrete(&self) -> Result<&DiscreteDomain> {
        match self {
            Domain::Discrete(domain) => Ok(domain),
            _ => Err(FactorGraphError::IncompatibleDomains(
                "expected a discrete domain".to_string(),
            )),
        }
    }

    // Checks whether a value belongs to this domain
    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (Domain::Discrete(domain), value) => domain.index_of(value).is_some(),
            (Domain::Real(domain), value) => {
                value.to_f64().map_or(false, |value| domain.contains(value))
            }
            (Domain::RealJoint(domain), Value::RealVector(values)) => domain.contains(values),
            (Domain::RealJoint(_), _) => false,
        }
    }
}

impl From<DiscreteDomain> for Domain {
    fn from(domain: DiscreteDomain) -> Self {
        Domain::Discrete(domain)
    }
}

impl From<RealDomain> for Domain {
    fn from(domain: RealDomain) -> Self {
        Domain::Real(domain)
    }
}

impl From<RealJointDomain> for Domain {
    fn from(domain: RealJointDomain) -> Self {
        Domain::RealJoint(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_lookup() {
        let domain = DiscreteDomain::new(vec![Value::Int(5), Value::Real(0.5), Value::Bool(true)])
            .unwrap();
        assert_eq!(domain.size(), 3);
        assert_eq!(domain.index_of(&Value::Real(0.5)), Some(1));
        assert_eq!(domain.index_of(&Value::Int(0)), None);
        assert!(DiscreteDomain::new(vec![Value::Int(1), Value::Int(1)]).is_err());
    }

    #[test]
    fn fingerprints_match_for_equal_domains() {
        assert_eq!(
            DiscreteDomain::bit().fingerprint(),
            DiscreteDomain::range(0, 1).unwrap().fingerprint()
        );
        assert_ne!(
            DiscreteDomain::bit().fingerprint(),
            DiscreteDomain::boolean().fingerprint()
        );
    }

    #[test]
    fn real_domains() {
        assert!(RealDomain::new(1., 0.).is_err());
        let joint = RealJointDomain::new(vec![RealDomain::new(0., 1.).unwrap(); 2]);
        assert!(Domain::from(joint.clone()).contains(&Value::RealVector(vec![0.5, 1.])));
        assert!(!Domain::from(joint).contains(&Value::RealVector(vec![0.5])));
    }
}
