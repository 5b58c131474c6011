use std::fmt::Display;

use crate::error::{FactorGraphError, Result};

// A single argument value passed to factor functions and stored in discrete domains
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    RealVector(Vec<f64>),
}

// Hashable bit-exact image of a value, used for domain lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Bool(bool),
    Int(i64),
    Real(u64),
    RealVector(Vec<u64>),
}

impl Value {
    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            Value::Int(value) => Ok(*value != 0),
            Value::Real(value) => Ok(*value != 0.),
            Value::RealVector(_) => Err(FactorGraphError::InvalidValue(
                "cannot convert a real vector to a boolean".to_string(),
            )),
        }
    }

    pub fn to_f64(&self) -> Result<f64> {
        match self {
            Value::Bool(value) => Ok(if *value { 1. } else { 0. }),
            Value::Int(value) => Ok(*value as f64),
            Value::Real(value) => Ok(*value),
            Value::RealVector(_) => Err(FactorGraphError::InvalidValue(
                "cannot convert a real vector to a real".to_string(),
            )),
        }
    }

    // Reals are truncated toward zero
    pub fn to_i64(&self) -> Result<i64> {
        match self {
            Value::Bool(value) => Ok(*value as i64),
            Value::Int(value) => Ok(*value),
            Value::Real(value) if value.is_finite() => Ok(value.trunc() as i64),
            Value::Real(value) => Err(FactorGraphError::InvalidValue(format!(
                "cannot convert {} to an integer",
                value
            ))),
            Value::RealVector(_) => Err(FactorGraphError::InvalidValue(
                "cannot convert a real vector to an integer".to_string(),
            )),
        }
    }

    pub fn to_index(&self) -> Result<usize> {
        let value = self.to_i64()?;
        usize::try_from(value).map_err(|_| {
            FactorGraphError::InvalidValue(format!("{} is not a valid index", value))
        })
    }

    pub fn as_slice(&self) -> Result<&[f64]> {
        match self {
            Value::RealVector(values) => Ok(values),
            other => Err(FactorGraphError::InvalidValue(format!(
                "expected a real vector, got {}",
                other
            ))),
        }
    }

    pub(crate) fn key(&self) -> ValueKey {
        match self {
            Value::Bool(value) => ValueKey::Bool(*value),
            Value::Int(value) => ValueKey::Int(*value),
            Value::Real(value) => ValueKey::Real(value.to_bits()),
            Value::RealVector(values) => {
                ValueKey::RealVector(values.iter().map(|value| value.to_bits()).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Value::RealVector(values)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{}", value),
            Value::Int(value) => write!(f, "{}", value),
            Value::Real(value) => write!(f, "{}", value),
            Value::RealVector(values) => write!(f, "{:?}", values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercions() {
        assert!(Value::Int(3).to_bool().unwrap());
        assert!(!Value::Real(0.).to_bool().unwrap());
        assert_eq!(Value::Bool(true).to_f64().unwrap(), 1.);
        assert_eq!(Value::Real(2.9).to_i64().unwrap(), 2);
        assert_eq!(Value::Int(4).to_index().unwrap(), 4);
        assert!(Value::Int(-1).to_index().is_err());
        assert!(Value::Real(f64::NAN).to_i64().is_err());
        assert!(Value::RealVector(vec![1.]).to_f64().is_err());
    }

    #[test]
    fn keys_distinguish_types() {
        assert_ne!(Value::Int(1).key(), Value::Real(1.).key());
        assert_eq!(Value::Real(0.5).key(), Value::Real(0.5).key());
    }
}
