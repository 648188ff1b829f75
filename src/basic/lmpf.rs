use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::error::{FailureReason, SolveStatus};
use super::newtonpf::{PassContext, PassOutcome, build_jacobian};
use super::powerflow::mismatch::{Mismatch, apply_step, evaluate};
use super::solver::Solve;

const LAMBDA_SCALE: f64 = 1e-3;
const LAMBDA_FACTOR: f64 = 10.0;
const LAMBDA_MAX: f64 = 1e16;

/// Levenberg-Marquardt pass on `½‖F‖²`.
///
/// Each iteration solves `(JᵀJ + λI) dx = JᵀF` and tries `x -= dx`. An
/// accepted step (lower cost) divides λ by ten and refreshes the Jacobian; a
/// rejected one multiplies λ by ten and retries from the same state. Both
/// count as iterations. λ starts at `1e-3 · max diag(JᵀJ)`.
///
/// The damping keeps the system solvable when `J` has empty rows or columns,
/// so unlike Newton-Raphson this pass never reports a singular Jacobian.
pub(crate) fn levenberg_marquardt_pf<S: Solve>(
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
    let n = index.n_state();
    let mut v = v_init.clone();
    let mut v_m = v.map(|e| e.norm());
    let mut v_a = v.map(|e| e.arg());
    let mut mis = evaluate(y_bus, &v, s_bus, index);
    let mut history = vec![mis.norm];
    let mut iterations = 0;
    let mut lambda: Option<f64> = None;
    let mut normal: Option<(CscMatrix<f64>, DVector<f64>)> = None;

    let finish = |v, iterations, reason: Option<FailureReason>, history| {
        let status = reason.map_or(SolveStatus::Converged, SolveStatus::Failed);
        PassOutcome {
            v,
            iterations,
            status,
            history,
        }
    };

    loop {
        log::log!(
            config.trace_level(),
            "LM iteration {iterations}: max mismatch {:.3e}, lambda {:.1e}",
            mis.norm,
            lambda.unwrap_or_default()
        );
        if !mis.is_finite() {
            return finish(v, iterations, Some(FailureReason::NonFinite), history);
        }
        if mis.norm < config.tolerance {
            return finish(v, iterations, None, history);
        }
        if iterations >= config.max_iter {
            return finish(v, iterations, Some(FailureReason::MaxIterations), history);
        }
        if ctx.cancelled() {
            return finish(v, iterations, Some(FailureReason::Cancelled), history);
        }

        let (jtj, jtf) = match normal.take() {
            Some(sys) => sys,
            None => {
                let jac = build_jacobian(y_bus, &v, index, config.multi_core);
                let jt = jac.transpose();
                let jtf = &jt * &mis.f;
                (&jt * &jac, jtf)
            }
        };
        let lam = *lambda.get_or_insert_with(|| initial_lambda(&jtj));
        let system = &jtj + &(CscMatrix::identity(n) * lam);

        let mut dx = jtf.clone();
        iterations += 1;
        if let Err(err) = solver.solve(&system, dx.as_mut_slice()) {
            log::debug!("LM linear solve failed ({err}), raising damping");
            lambda = Some(raise(lam));
            normal = Some((jtj, jtf));
            history.push(mis.norm);
            continue;
        }

        let (mut va_t, mut vm_t, mut v_t) = (v_a.clone(), v_m.clone(), v.clone());
        apply_step(&mut va_t, &mut vm_t, &dx, index, &mut v_t);
        let trial: Mismatch = evaluate(y_bus, &v_t, s_bus, index);

        if trial.is_finite() && trial.cost() < mis.cost() {
            (v_a, v_m, v, mis) = (va_t, vm_t, v_t, trial);
            lambda = Some(lam / LAMBDA_FACTOR);
        } else {
            lambda = Some(raise(lam));
            normal = Some((jtj, jtf));
        }
        history.push(mis.norm);
    }
}

fn raise(lambda: f64) -> f64 {
    (lambda * LAMBDA_FACTOR).min(LAMBDA_MAX)
}

fn initial_lambda(jtj: &CscMatrix<f64>) -> f64 {
    let max_diag = jtj
        .triplet_iter()
        .filter(|(i, j, _)| i == j)
        .map(|(_, _, x)| x.abs())
        .fold(0.0, f64::max);
    if max_diag > 0.0 {
        LAMBDA_SCALE * max_diag
    } else {
        LAMBDA_SCALE
    }
}
