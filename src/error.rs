use thiserror::Error;

// Broad category of a failure: bad graph or argument, numerical breakdown, or missing capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Numeric,
    Capability,
}

#[non_exhaustive]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FactorGraphError {
    #[error("invalid edge: index {index} is out of range for a factor with {num_edges} edges")]
    InvalidDirectedIndex { index: usize, num_edges: usize },
    #[error("invalid edge: index {0} appears more than once")]
    DuplicateDirectedIndex(usize),
    #[error("no changes allowed while the solver is running")]
    SolverRunning,
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("incompatible domains: {0}")]
    IncompatibleDomains(String),
    #[error("unknown {kind} {index}")]
    UnknownNode { kind: &'static str, index: usize },
    #[error("variable {0} is still connected to {1} factors")]
    VariableInUse(usize, usize),
    #[error("nodes {0} and {1} are not adjacent")]
    NotAdjacent(usize, usize),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("update failed on node {node}, port {port}: all probabilities were zero")]
    ZeroNormalization { node: usize, port: usize },
    #[error("cannot normalize a group of table rows whose total weight is zero")]
    ZeroWeightGroup,
    #[error("negative precision {0}")]
    NegativePrecision(f64),
    #[error("non-finite value in {0}")]
    NonFinite(String),

    #[error("{operation} is not supported by the {solver} solver")]
    Unsupported {
        operation: &'static str,
        solver: &'static str,
    },
    #[error("no solver is attached to the graph")]
    NoSolver,
    #[error("no samples have been collected")]
    NoSamples,
}

impl FactorGraphError {
    pub fn kind(&self) -> ErrorKind {
        use FactorGraphError::*;
        match self {
            ZeroNormalization { .. } | ZeroWeightGroup | NegativePrecision(_) | NonFinite(_) => {
                ErrorKind::Numeric
            }
            Unsupported { .. } | NoSolver | NoSamples => ErrorKind::Capability,
            _ => ErrorKind::Structural,
        }
    }

    pub(crate) fn unsupported(operation: &'static str, solver: &'static str) -> Self {
        FactorGraphError::Unsupported { operation, solver }
    }
}

pub type Result<T> = std::result::Result<T, FactorGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(FactorGraphError::SolverRunning.kind(), ErrorKind::Structural);
        assert_eq!(
            FactorGraphError::ZeroNormalization { node: 0, port: 1 }.kind(),
            ErrorKind::Numeric
        );
        assert_eq!(
            FactorGraphError::unsupported("setNumThreads", "Gibbs").kind(),
            ErrorKind::Capability
        );
        assert_eq!(
            FactorGraphError::SolverRunning.to_string(),
            "no changes allowed while the solver is running"
        );
    }
}
