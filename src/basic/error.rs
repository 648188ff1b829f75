use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural problems with a network or a configuration.
///
/// These are raised before any iteration starts and are never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("network has no buses")]
    EmptyNetwork,
    #[error("base power must be positive and finite, got {0}")]
    InvalidBasePower(f64),
    #[error("no slack bus designated")]
    NoSlackBus,
    #[error("more than one slack bus designated (buses {0:?})")]
    MultipleSlackBuses(Vec<usize>),
    #[error("{element} '{name}' references unknown bus {bus}")]
    UnknownBus {
        element: &'static str,
        name: String,
        bus: usize,
    },
    #[error("branch '{0}' connects a bus to itself")]
    SelfLoop(String),
    #[error("branch '{0}' has zero series impedance")]
    DegenerateBranch(String),
    #[error("{element} '{name}': {reason}")]
    InvalidParameter {
        element: &'static str,
        name: String,
        reason: String,
    },
    #[error("initial voltage has {got} entries but the network has {expected} buses")]
    InitialStateMismatch { expected: usize, got: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ModelError {
    pub(crate) fn invalid(
        element: &'static str,
        name: &str,
        reason: impl Into<String>,
    ) -> Self {
        ModelError::InvalidParameter {
            element,
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Why a solve ended without converging.
///
/// A failed solve is a reported outcome carried inside the result, not an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FailureReason {
    #[error("iteration limit reached")]
    MaxIterations,
    #[error("non-finite values in the voltage state")]
    NonFinite,
    #[error("singular Jacobian")]
    SingularJacobian,
    #[error("reactive-limit retry budget exhausted")]
    LimitRetryExhausted,
    #[error("cancelled")]
    Cancelled,
}

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    Failed(FailureReason),
}

impl SolveStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolveStatus::Converged)
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            SolveStatus::Converged => None,
            SolveStatus::Failed(reason) => Some(*reason),
        }
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Converged => write!(f, "converged"),
            SolveStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
