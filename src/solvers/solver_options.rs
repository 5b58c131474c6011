#![allow(dead_code)]

use std::time::Duration;

// Options of the message-passing solvers
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    num_iterations: usize,
    time_max: Duration,
    eps: f64,           // eps = 0 means "never stop early"
    damping: f64,       // weight of the previous message, in [0, 1]
    num_threads: usize, // num_threads = 1 means "no worker pool"
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            num_iterations: 1,
            time_max: Duration::new(20 * 60, 0), // 20 minutes
            eps: 0.,
            damping: 0.,
            num_threads: 1,
        }
    }
}

impl SolverOptions {
    pub fn set_num_iterations(&mut self, value: usize) -> &mut Self {
        self.num_iterations = value;
        self
    }

    pub fn set_time_max(&mut self, value: Duration) -> &mut Self {
        self.time_max = value;
        self
    }

    pub fn set_eps(&mut self, value: f64) -> &mut Self {
        self.eps = value;
        self
    }

    pub fn set_damping(&mut self, value: f64) -> &mut Self {
        self.damping = value;
        self
    }

    pub fn set_num_threads(&mut self, value: usize) -> &mut Self {
        self.num_threads = value;
        self
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn time_max(&self) -> Duration {
        self.time_max
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}
