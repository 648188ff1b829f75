use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::basic::error::ModelError;

/// Numerical method used for each solver pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum SolverMethod {
    #[default]
    #[display("Newton-Raphson")]
    NewtonRaphson,
    #[display("Levenberg-Marquardt")]
    LevenbergMarquardt,
}

/// Reactive-limit enforcement mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum QControl {
    #[default]
    #[display("off")]
    Off,
    /// Check PV generators after every converged pass and demote violators to PQ.
    #[display("direct")]
    Direct,
}

/// Options for a single power-flow solve.
///
/// `robust` and `method` are independent: `robust` only adds a
/// Levenberg-Marquardt retry after a failed Newton-Raphson pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerFlowConfig {
    pub method: SolverMethod,
    pub robust: bool,
    /// Infinity-norm threshold on the per-unit mismatch.
    pub tolerance: f64,
    /// Iteration limit of each solver pass.
    pub max_iter: usize,
    pub control_q: QControl,
    /// Re-solves allowed after reactive-limit conversions.
    pub max_q_passes: usize,
    pub initialize_with_existing_solution: bool,
    pub multi_core: bool,
    pub verbose: bool,
}

impl Default for PowerFlowConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::NewtonRaphson,
            robust: false,
            tolerance: 1e-6,
            max_iter: 100,
            control_q: QControl::Off,
            max_q_passes: 10,
            initialize_with_existing_solution: false,
            multi_core: false,
            verbose: false,
        }
    }
}

impl PowerFlowConfig {
    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_q_control(mut self, control_q: QControl) -> Self {
        self.control_q = control_q;
        self
    }

    pub fn with_max_q_passes(mut self, passes: usize) -> Self {
        self.max_q_passes = passes;
        self
    }

    pub fn with_existing_solution(mut self, reuse: bool) -> Self {
        self.initialize_with_existing_solution = reuse;
        self
    }

    pub fn with_multi_core(mut self, multi_core: bool) -> Self {
        self.multi_core = multi_core;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iter == 0 {
            return Err(ModelError::InvalidConfig("max_iter must be at least 1".into()));
        }
        Ok(())
    }

    /// Level for per-iteration traces.
    pub(crate) fn trace_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}
