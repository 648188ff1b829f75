use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use rayon::prelude::*;

use super::dsbus_dv::dSbus_dV;
use super::error::{FailureReason, SolveStatus};
use super::powerflow::config::PowerFlowConfig;
use super::powerflow::mismatch::{StateIndex, apply_step, evaluate};
use super::solver::Solve;

/// Read-only inputs shared by every iteration of one solver pass.
pub(crate) struct PassContext<'a> {
    pub y_bus: &'a CscMatrix<Complex64>,
    pub s_bus: &'a DVector<Complex64>,
    pub index: &'a StateIndex,
    pub config: &'a PowerFlowConfig,
    pub cancel: Option<&'a AtomicBool>,
}

impl PassContext<'_> {
    pub fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Outcome of one solver pass.
#[derive(Debug, Clone)]
pub(crate) struct PassOutcome {
    pub v: DVector<Complex64>,
    pub iterations: usize,
    pub status: SolveStatus,
    /// Mismatch norm at the start and after every iteration.
    pub history: Vec<f64>,
}

impl PassOutcome {
    fn new(
        v: DVector<Complex64>,
        iterations: usize,
        status: SolveStatus,
        history: Vec<f64>,
    ) -> Self {
        Self {
            v,
            iterations,
            status,
            history,
        }
    }
}

/// Newton-Raphson pass: solve `J dx = F` and step `x -= dx` until `‖F‖∞ < tol`.
///
/// The voltage at `v_init` is evaluated first, so a state that already
/// satisfies the tolerance converges with zero iterations.
///
/// # Parameters
///
/// * `ctx` - Admittance, schedule, state layout and options for this pass.
/// * `v_init` - Starting voltages; Slack and PV magnitudes are kept as given.
/// * `solver` - Linear solver for the correction step.
///
/// # Returns
///
/// The last voltages with the pass status. A non-finite mismatch ends the
/// pass with [`FailureReason::NonFinite`]; an empty Jacobian row or column,
/// or a failed factorization, with [`FailureReason::SingularJacobian`].
pub(crate) fn newton_pf<S: Solve>(
    ctx: &PassContext,
    v_init: &DVector<Complex64>,
    solver: &mut S,
) -> PassOutcome {
    let PassContext {
        y_bus,
        s_bus,
        index,
        config,
        ..
    } = *ctx;
    let mut v = v_init.clone();
    let mut v_m = v.map(|e| e.norm());
    let mut v_a = v.map(|e| e.arg());
    let mut history = Vec::new();
    let mut iterations = 0;

    loop {
        let mis = evaluate(y_bus, &v, s_bus, index);
        history.push(mis.norm);
        log::log!(
            config.trace_level(),
            "NR iteration {iterations}: max mismatch {:.3e}",
            mis.norm
        );
        let status = if !mis.is_finite() {
            Some(SolveStatus::Failed(FailureReason::NonFinite))
        } else if mis.norm < config.tolerance {
            Some(SolveStatus::Converged)
        } else if iterations >= config.max_iter {
            Some(SolveStatus::Failed(FailureReason::MaxIterations))
        } else if ctx.cancelled() {
            Some(SolveStatus::Failed(FailureReason::Cancelled))
        } else {
            None
        };
        if let Some(status) = status {
            return PassOutcome::new(v, iterations, status, history);
        }

        let jacobian = build_jacobian(y_bus, &v, index, config.multi_core);
        if let Some(line) = structurally_singular(&jacobian) {
            log::warn!("Jacobian {line} is identically zero");
            let status = SolveStatus::Failed(FailureReason::SingularJacobian);
            return PassOutcome::new(v, iterations, status, history);
        }

        let mut dx = mis.f;
        if let Err(err) = solver.solve(&jacobian, dx.as_mut_slice()) {
            log::warn!("NR linear solve failed: {err}");
            let status = SolveStatus::Failed(FailureReason::SingularJacobian);
            return PassOutcome::new(v, iterations, status, history);
        }
        apply_step(&mut v_a, &mut v_m, &dx, index, &mut v);
        iterations += 1;
    }
}

/// Reduced real Jacobian of `[P(pvpq); Q(pq)]` with respect to `[θ(pvpq); |V|(pq)]`.
///
/// Entries are placed through the bus-to-position maps of `index`; buses
/// without a position are dropped.
pub(crate) fn build_jacobian(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    index: &StateIndex,
    multi_core: bool,
) -> CscMatrix<f64> {
    let n = index.n_state();
    let (ds_dvm, ds_dva) = dSbus_dV(y_bus, v, multi_core);

    let place = |(i, j, dva, dvm): (usize, usize, Complex64, Complex64)| {
        let (pi, qi) = (index.p_pos[i], index.q_pos[i]);
        let (pj, qj) = (index.p_pos[j], index.q_pos[j]);
        [
            pi.zip(pj).map(|(r, c)| (r, c, dva.re)),
            pi.zip(qj).map(|(r, c)| (r, c, dvm.re)),
            qi.zip(pj).map(|(r, c)| (r, c, dva.im)),
            qi.zip(qj).map(|(r, c)| (r, c, dvm.im)),
        ]
    };
    // both derivative matrices come from the same triplets, so their patterns match
    let pairs = ds_dva
        .triplet_iter()
        .zip(ds_dvm.values())
        .map(|((i, j, dva), dvm)| (i, j, *dva, *dvm));
    let entries: Vec<(usize, usize, f64)> = if multi_core {
        pairs
            .collect::<Vec<_>>()
            .into_par_iter()
            .flat_map_iter(|e| place(e).into_iter().flatten())
            .collect()
    } else {
        pairs.flat_map(|e| place(e).into_iter().flatten()).collect()
    };

    let mut jac = CooMatrix::new(n, n);
    for (r, c, x) in entries {
        jac.push(r, c, x);
    }
    CscMatrix::from(&jac)
}

/// Names the first row or column of `jac` without a nonzero entry.
pub(crate) fn structurally_singular(jac: &CscMatrix<f64>) -> Option<String> {
    let mut row_seen = vec![false; jac.nrows()];
    for j in 0..jac.ncols() {
        let col = jac.col(j);
        let mut any = false;
        for (&i, x) in col.row_indices().iter().zip(col.values()) {
            if *x != 0.0 {
                row_seen[i] = true;
                any = true;
            }
        }
        if !any {
            return Some(format!("column {j}"));
        }
    }
    row_seen
        .iter()
        .position(|seen| !seen)
        .map(|i| format!("row {i}"))
}
