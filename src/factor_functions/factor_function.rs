use std::fmt::Debug;

use crate::{
    error::{FactorGraphError, Result},
    model::value::Value,
};

// A potential over an ordered argument list, expressed as an energy (negative log weight)
pub trait FactorFunction: Debug + Send + Sync {
    fn name(&self) -> &str;

    // Energy of one joint assignment of the arguments; +inf means the assignment is impossible
    fn eval_energy(&self, arguments: &[Value]) -> Result<f64>;

    fn eval(&self, arguments: &[Value]) -> Result<f64> {
        Ok((-self.eval_energy(arguments)?).exp())
    }

    fn is_directed(&self) -> bool {
        false
    }

    // Positions of the output arguments for a factor with `num_edges` arguments
    fn directed_to_indices(&self, _num_edges: usize) -> Option<Vec<usize>> {
        None
    }

    // True when the outputs are a function of the inputs (rather than a distribution over them)
    fn is_deterministic_directed(&self) -> bool {
        false
    }

    // Overwrites the output arguments with the values implied by the inputs
    fn eval_deterministic(&self, _arguments: &mut [Value]) -> Result<()> {
        Err(FactorGraphError::unsupported(
            "deterministic evaluation",
            "factor function",
        ))
    }
}

// Indices `first..num_edges`, the usual set of outputs following a block of parameter arguments
pub fn index_range(first: usize, num_edges: usize) -> Vec<usize> {
    (first..num_edges).collect()
}

pub(crate) fn check_arity(arguments: &[Value], minimum: usize) -> Result<()> {
    if arguments.len() < minimum {
        return Err(FactorGraphError::DimensionMismatch {
            expected: minimum,
            got: arguments.len(),
        });
    }
    Ok(())
}

// Energy of a deterministic constraint: free when satisfied, impossible otherwise
pub(crate) fn indicator_energy(satisfied: bool) -> f64 {
    if satisfied {
        0.
    } else {
        f64::INFINITY
    }
}
