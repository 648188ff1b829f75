use std::sync::atomic::AtomicBool;

use nalgebra::DVector;
use num_complex::Complex64;
use rayon::prelude::*;

use super::config::{PowerFlowConfig, QControl, SolverMethod};
use super::init::{BusType, classify_buses, initial_voltage, make_s_bus};
use super::mismatch::StateIndex;
use super::qlim::enforce_q_limits;
use super::result_extract::{PowerFlowResult, SolvedState, assemble_result};
use crate::basic::error::{FailureReason, ModelError, SolveStatus};
use crate::basic::lmpf::levenberg_marquardt_pf;
use crate::basic::newtonpf::{PassContext, PassOutcome, newton_pf};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::basic::system::{Network, make_y_bus};

/// Power-flow entry points on a network.
pub trait RunPF {
    /// Solves from a flat start.
    fn run_pf(&self, config: &PowerFlowConfig) -> Result<PowerFlowResult, ModelError>;

    /// Solves, starting from `previous` when
    /// `config.initialize_with_existing_solution` is set.
    fn run_pf_from(
        &self,
        config: &PowerFlowConfig,
        previous: Option<&PowerFlowResult>,
    ) -> Result<PowerFlowResult, ModelError>;
}

impl RunPF for Network {
    fn run_pf(&self, config: &PowerFlowConfig) -> Result<PowerFlowResult, ModelError> {
        run_pf_with_solver::<DefaultSolver>(self, config, None, None)
    }

    fn run_pf_from(
        &self,
        config: &PowerFlowConfig,
        previous: Option<&PowerFlowResult>,
    ) -> Result<PowerFlowResult, ModelError> {
        run_pf_with_solver::<DefaultSolver>(self, config, previous.map(|r| &r.v), None)
    }
}

/// Full solve with an explicit linear solver.
///
/// Runs solver passes until one converges with every PV bus inside its
/// reactive limits, re-solving from the last voltages after each round of
/// PV to PQ conversions when `config.control_q` is `Direct`.
///
/// # Parameters
///
/// * `net` - Network to solve; validated before anything else.
/// * `config` - Method, tolerances and limits for the whole solve.
/// * `previous` - Starting voltages, used only with
///   `config.initialize_with_existing_solution`.
/// * `cancel` - Flag checked between iterations; when set the solve stops
///   with [`FailureReason::Cancelled`].
///
/// # Returns
///
/// `Err` for structural problems, detected before the first iteration.
/// Everything else, including non-convergence and cancellation, is reported
/// through the status of the returned result.
pub fn run_pf_with_solver<S: Solve + Default>(
    net: &Network,
    config: &PowerFlowConfig,
    previous: Option<&DVector<Complex64>>,
    cancel: Option<&AtomicBool>,
) -> Result<PowerFlowResult, ModelError> {
    config.validate()?;
    net.validate()?;
    let adm = make_y_bus(net, config.multi_core)?;
    let (mut cls, injections) = classify_buses(net)?;
    let mut s_bus = make_s_bus(net, &cls, &injections);

    let start = match previous {
        Some(prev) if config.initialize_with_existing_solution => Some(prev),
        _ => None,
    };
    let mut v = initial_voltage(&cls, start)?;

    let mut solver = S::default();
    let mut iterations = 0;
    let mut history = Vec::new();
    let mut violations = Vec::new();
    let mut passes = 0;
    let status = loop {
        solver.reset();
        let index = StateIndex::new(&cls);
        let ctx = PassContext {
            y_bus: &adm.y_bus,
            s_bus: &s_bus,
            index: &index,
            config,
            cancel,
        };
        let outcome = solve_pass(&ctx, &v, &mut solver);
        iterations += outcome.iterations;
        history.extend(outcome.history);
        v = outcome.v;
        if !outcome.status.is_converged() {
            log::warn!(
                "power flow '{}' did not converge after {iterations} iterations: {}",
                net.name,
                outcome.status
            );
            break outcome.status;
        }
        if config.control_q == QControl::Off {
            break SolveStatus::Converged;
        }

        let found = enforce_q_limits(&adm.y_bus, &v, &mut s_bus, &mut cls, &injections);
        if found.is_empty() {
            break SolveStatus::Converged;
        }
        violations.extend(found);
        passes += 1;
        if passes > config.max_q_passes {
            log::warn!(
                "power flow '{}': reactive limits still violated after {} re-solves",
                net.name,
                config.max_q_passes
            );
            break SolveStatus::Failed(FailureReason::LimitRetryExhausted);
        }
        log::info!(
            "re-solving with {} PV buses (classification version {})",
            cls.count(BusType::PV),
            cls.version()
        );
    };

    log::debug!("power flow '{}': {status} in {iterations} iterations", net.name);
    Ok(assemble_result(
        net,
        &adm,
        SolvedState {
            v,
            cls: &cls,
            injections: &injections,
            status,
            iterations,
            history,
            violations,
        },
    ))
}

/// One solver pass with the configured method and optional fallback.
fn solve_pass<S: Solve + Default>(
    ctx: &PassContext,
    v: &DVector<Complex64>,
    solver: &mut S,
) -> PassOutcome {
    match ctx.config.method {
        SolverMethod::LevenbergMarquardt => levenberg_marquardt_pf(ctx, v, solver),
        SolverMethod::NewtonRaphson => {
            let nr = newton_pf(ctx, v, solver);
            let retry = ctx.config.robust
                && matches!(nr.status, SolveStatus::Failed(reason) if reason != FailureReason::Cancelled);
            if !retry {
                return nr;
            }
            log::warn!(
                "Newton-Raphson {} after {} iterations, retrying with Levenberg-Marquardt",
                nr.status,
                nr.iterations
            );
            let mut lm = levenberg_marquardt_pf(ctx, v, &mut S::default());
            lm.iterations += nr.iterations;
            let mut history = nr.history;
            history.append(&mut lm.history);
            lm.history = history;
            lm
        }
    }
}

/// Solves independent networks, in parallel when `config.multi_core` is set.
///
/// Each network gets its own state; results come back in input order.
pub fn run_pf_batch(
    nets: &[Network],
    config: &PowerFlowConfig,
) -> Vec<Result<PowerFlowResult, ModelError>> {
    if config.multi_core {
        nets.par_iter().map(|net| net.run_pf(config)).collect()
    } else {
        nets.iter().map(|net| net.run_pf(config)).collect()
    }
}
