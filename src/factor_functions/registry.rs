use std::{collections::HashMap, sync::Arc};

use crate::error::{FactorGraphError, Result};

use super::{
    and::And,
    categorical::Categorical,
    divide::Divide,
    equals::{Equality, Equals},
    factor_function::FactorFunction,
    greater_than::GreaterThan,
    linear_equation::LinearEquation,
    normal::Normal,
    prior::Prior,
};

pub type FactorConstructor = fn(&[f64]) -> Result<Arc<dyn FactorFunction>>;

// Name -> constructor table used to create factor functions by name
pub struct FactorFunctionRegistry {
    constructors: HashMap<String, FactorConstructor>,
}

fn no_parameters(name: &str, parameters: &[f64]) -> Result<()> {
    if !parameters.is_empty() {
        return Err(FactorGraphError::InvalidArgument(format!(
            "{} takes no parameters, got {}",
            name,
            parameters.len()
        )));
    }
    Ok(())
}

impl FactorFunctionRegistry {
    pub fn empty() -> Self {
        FactorFunctionRegistry {
            constructors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = FactorFunctionRegistry::empty();
        registry
            .register("And", |parameters| {
                no_parameters("And", parameters)?;
                Ok(Arc::new(And))
            })
            .register("Equals", |parameters| {
                no_parameters("Equals", parameters)?;
                Ok(Arc::new(Equals))
            })
            .register("Equality", |parameters| {
                no_parameters("Equality", parameters)?;
                Ok(Arc::new(Equality))
            })
            .register("GreaterThan", |parameters| {
                no_parameters("GreaterThan", parameters)?;
                Ok(Arc::new(GreaterThan))
            })
            .register("Prior", |parameters| {
                no_parameters("Prior", parameters)?;
                Ok(Arc::new(Prior))
            })
            .register("Divide", |parameters| match parameters {
                [] => Ok(Arc::new(Divide::new())),
                [smoothing] => Ok(Arc::new(Divide::with_smoothing(*smoothing))),
                _ => Err(FactorGraphError::InvalidArgument(
                    "Divide takes at most one parameter (smoothing)".to_string(),
                )),
            })
            .register("Normal", |parameters| match parameters {
                [] => Ok(Arc::new(Normal::new())),
                [mean, precision] => Ok(Arc::new(Normal::with_parameters(*mean, *precision)?)),
                _ => Err(FactorGraphError::InvalidArgument(
                    "Normal takes no parameters or (mean, precision)".to_string(),
                )),
            })
            .register("Categorical", |parameters| match parameters {
                [dimension] if *dimension >= 1. && dimension.fract() == 0. => {
                    Ok(Arc::new(Categorical::new(*dimension as usize)))
                }
                _ => Err(FactorGraphError::InvalidArgument(
                    "Categorical takes one positive integer parameter (dimension)".to_string(),
                )),
            })
            .register("LinearEquation", |parameters| {
                Ok(Arc::new(LinearEquation::new(parameters.to_vec())))
            });
        registry
    }

    pub fn register(&mut self, name: &str, constructor: FactorConstructor) -> &mut Self {
        self.constructors.insert(name.to_string(), constructor);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn create(&self, name: &str, parameters: &[f64]) -> Result<Arc<dyn FactorFunction>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            FactorGraphError::InvalidArgument(format!("unknown factor function {}", name))
        })?;
        constructor(parameters)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self
            .constructors
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

impl Default for FactorFunctionRegistry {
    fn default() -> Self {
        FactorFunctionRegistry::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::Value;

    #[test]
    fn builtins_by_name() {
        let registry = FactorFunctionRegistry::with_builtins();
        let and = registry.create("And", &[]).unwrap();
        assert_eq!(and.name(), "And");
        assert!(registry.create("And", &[1.]).is_err());
        assert!(registry.create("Missing", &[]).is_err());
        let normal = registry.create("Normal", &[0., 1.]).unwrap();
        assert!(normal.eval_energy(&[Value::Real(0.)]).unwrap().abs() < 1e-12);
    }

    #[test]
    fn custom_registration() {
        let mut registry = FactorFunctionRegistry::empty();
        registry.register("Gt", |_| Ok(Arc::new(GreaterThan)));
        assert!(registry.contains("Gt"));
        assert_eq!(registry.names(), vec!["Gt"]);
    }
}
