pub mod error;

pub mod data_structures {
    pub mod random_stream;
}

pub mod model {
    pub mod assignment;
    pub mod domain;
    pub mod factor;
    pub mod factor_graph;
    pub mod graph_model;
    mod graph_ops;
    pub mod snapshot;
    pub mod stream;
    pub mod value;
    pub mod variable;
}

pub mod factor_functions {
    pub mod and;
    pub mod categorical;
    pub mod divide;
    pub mod equals;
    pub mod factor_function;
    pub mod greater_than;
    pub mod linear_equation;
    pub mod normal;
    pub mod prior;
    pub mod registry;
}

pub mod tables {
    pub mod factor_table;
}

pub mod schedulers {
    pub mod gibbs_scheduler;
    pub mod schedule;
    pub mod scheduler;
    pub mod tree_scheduler;
}

pub mod solvers {
    pub mod bp_graph;
    pub mod message;
    pub mod messages;
    pub mod shadow;
    pub mod solver;
    pub mod solver_options;

    pub mod sumproduct {
        pub mod derivative;
        pub mod table_factor;
        pub mod variable;
    }

    pub mod minsum {
        pub mod table_factor;
        pub mod variable;
    }

    pub mod gibbs {
        pub mod gibbs_graph;
        pub mod options;
    }
}

pub mod estimation {
    pub mod baum_welch;
    pub mod gradient_ascent;
    pub mod parameter_estimator;
    pub mod pseudolikelihood;
}

pub mod binding {
    pub mod session;
}

pub use error::{ErrorKind, FactorGraphError, Result};
pub use model::{
    assignment::Assignment,
    domain::{DiscreteDomain, Domain, RealDomain, RealJointDomain},
    factor_graph::FactorGraph,
    graph_model::{EdgeId, FactorId, GraphId, NodeId, NodeKind, NodeMap, TableId, VariableId},
    stream::{RepeatedGraphId, StreamId, StreamSlice},
    value::Value,
};
pub use schedulers::{
    schedule::{Schedule, ScheduleEntry},
    scheduler::Scheduler,
};
pub use solvers::solver::{InterruptHandle, Solver, SolverGraph, SolverKind};
pub use tables::factor_table::FactorTable;
