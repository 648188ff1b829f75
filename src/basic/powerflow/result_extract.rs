use nalgebra::DVector;
use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::init::{BusClassification, BusInjection, BusType};
use super::mismatch::power_injection;
use super::qlim::LimitViolation;
use crate::basic::error::SolveStatus;
use crate::basic::system::{AdmittanceMatrices, Network};

/// Terminal quantities of one branch, per unit.
///
/// Powers and currents are measured flowing into the branch at each end, so
/// `loss = s_from + s_to`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchFlow {
    pub s_from: Complex64,
    pub s_to: Complex64,
    pub i_from: Complex64,
    pub i_to: Complex64,
    pub loss: Complex64,
    /// Largest terminal apparent power relative to `sn_mva`, in percent.
    pub loading_percent: Option<f64>,
}

/// Output of one generator, per unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorDispatch {
    pub p: f64,
    pub q: f64,
}

/// Everything a solve produces, converged or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerFlowResult {
    /// Final voltage phasors, full precision.
    pub v: DVector<Complex64>,
    /// Calculated injection `V ∘ conj(Ybus V)` per bus.
    pub s_calc: DVector<Complex64>,
    pub branches: Vec<BranchFlow>,
    pub generators: Vec<GeneratorDispatch>,
    pub total_loss: Complex64,
    pub bus_types: Vec<BusType>,
    pub classification_version: u64,
    pub limit_violations: Vec<LimitViolation>,
    pub status: SolveStatus,
    pub converged: bool,
    /// Iterations summed over every solver pass.
    pub iterations: usize,
    /// Mismatch norm per iteration, all passes concatenated.
    pub mismatch_history: Vec<f64>,
}

impl PowerFlowResult {
    pub fn vm(&self) -> Vec<f64> {
        self.v.iter().map(|v| v.norm()).collect()
    }

    pub fn va_degree(&self) -> Vec<f64> {
        self.v.iter().map(|v| v.arg().to_degrees()).collect()
    }
}

/// Solver-side state handed to the assembler.
pub(crate) struct SolvedState<'a> {
    pub v: DVector<Complex64>,
    pub cls: &'a BusClassification,
    pub injections: &'a [BusInjection],
    pub status: SolveStatus,
    pub iterations: usize,
    pub history: Vec<f64>,
    pub violations: Vec<LimitViolation>,
}

/// Derives branch flows, losses and generator dispatch from the final voltages.
pub(crate) fn assemble_result(
    net: &Network,
    adm: &AdmittanceMatrices,
    state: SolvedState,
) -> PowerFlowResult {
    let v = &state.v;
    let s_calc = power_injection(&adm.y_bus, v);
    let branches = branch_flows(net, adm, v);
    let total_loss = branches.iter().map(|b| b.loss).sum();
    let generators = dispatch_generators(net, state.injections, &s_calc);

    PowerFlowResult {
        s_calc,
        branches,
        generators,
        total_loss,
        bus_types: state.cls.types().to_vec(),
        classification_version: state.cls.version(),
        limit_violations: state.violations,
        converged: state.status.is_converged(),
        status: state.status,
        iterations: state.iterations,
        mismatch_history: state.history,
        v: state.v,
    }
}

pub fn branch_flows(
    net: &Network,
    adm: &AdmittanceMatrices,
    v: &DVector<Complex64>,
) -> Vec<BranchFlow> {
    let i_f = &adm.y_f * v;
    let i_t = &adm.y_t * v;
    net.branches
        .iter()
        .enumerate()
        .map(|(k, br)| {
            if !br.in_service {
                return BranchFlow {
                    s_from: Complex64::zero(),
                    s_to: Complex64::zero(),
                    i_from: Complex64::zero(),
                    i_to: Complex64::zero(),
                    loss: Complex64::zero(),
                    loading_percent: None,
                };
            }
            let s_from = v[br.from] * i_f[k].conj();
            let s_to = v[br.to] * i_t[k].conj();
            let loading_percent = br.sn_mva.map(|sn| {
                s_from.norm().max(s_to.norm()) * net.s_base_mva / sn * 100.0
            });
            BranchFlow {
                s_from,
                s_to,
                i_from: i_f[k],
                i_to: i_t[k],
                loss: s_from + s_to,
                loading_percent,
            }
        })
        .collect()
}

/// Splits the calculated bus injections over the generators.
///
/// Generators without voltage control keep their scheduled output. At each
/// bus the controlling generators share the remaining reactive output in
/// proportion to their reactive range (evenly when a range is unbounded or
/// empty). At the slack bus one generator takes the balance: the first
/// controlling one, or the first in service when none controls the voltage,
/// in which case it also absorbs the reactive residual.
fn dispatch_generators(
    net: &Network,
    injections: &[BusInjection],
    s_calc: &DVector<Complex64>,
) -> Vec<GeneratorDispatch> {
    let mut out: Vec<GeneratorDispatch> = net
        .generators
        .iter()
        .map(|g| match (g.in_service, g.vm_setpoint) {
            (false, _) => GeneratorDispatch { p: 0.0, q: 0.0 },
            (true, None) => GeneratorDispatch { p: g.p, q: g.q },
            (true, Some(_)) => GeneratorDispatch { p: g.p, q: 0.0 },
        })
        .collect();

    for (bus, inj) in injections.iter().enumerate() {
        let at_bus: Vec<usize> = (0..net.generators.len())
            .filter(|&k| net.generators[k].bus == bus && net.generators[k].in_service)
            .collect();
        let ctrl: Vec<usize> = at_bus
            .iter()
            .copied()
            .filter(|&k| net.generators[k].is_voltage_controlling())
            .collect();
        let q_total = s_calc[bus].im + net.buses[bus].q_load;

        if inj.n_controlling > 0 {
            let q_ctrl = q_total - inj.q_fixed;
            let range = inj.q_max - inj.q_min;
            let count = ctrl.len() as f64;
            for &k in &ctrl {
                let g = &net.generators[k];
                let (lo, hi) = (g.q_min_or_unbounded(), g.q_max_or_unbounded());
                out[k].q = if range.is_finite() && range > 0.0 {
                    lo + (q_ctrl - inj.q_min) * (hi - lo) / range
                } else if inj.q_min.is_finite() {
                    lo + (q_ctrl - inj.q_min) / count
                } else {
                    q_ctrl / count
                };
            }
        }

        if !net.buses[bus].is_slack {
            continue;
        }
        let Some(&taker) = ctrl.first().or(at_bus.first()) else {
            continue;
        };
        let others = at_bus.iter().filter(|&&k| k != taker);
        let p_others: f64 = others.clone().map(|&k| net.generators[k].p).sum();
        out[taker].p = s_calc[bus].re + net.buses[bus].p_load - p_others;
        if ctrl.is_empty() {
            let q_others: f64 = others.map(|&k| net.generators[k].q).sum();
            out[taker].q = q_total - q_others;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::powerflow::config::PowerFlowConfig;
    use crate::basic::powerflow::init::classify_buses;
    use crate::basic::powerflow::systems::RunPF;
    use crate::basic::system::{Branch, Bus, Generator, make_y_bus};

    fn net() -> Network {
        let mut net = Network::new("res", 100.0);
        net.add_bus(Bus::new("s", 110.0).slack(1.0));
        net.add_bus(Bus::new("b", 110.0).with_load(0.4, 0.1));
        net.add_branch(
            Branch::new("sb", 0, 1, 0.02, 0.2)
                .with_shunt(0.001, 0.03)
                .with_rating(50.0),
        );
        net.add_branch(Branch::new("spare", 0, 1, 0.02, 0.2));
        net.branches[1].in_service = false;
        net.add_generator(
            Generator::new("g1", 0, 0.0)
                .with_voltage(1.0)
                .with_q_limits(-1.0, 1.0),
        );
        net.add_generator(
            Generator::new("g2", 0, 0.0)
                .with_voltage(1.0)
                .with_q_limits(-3.0, 3.0),
        );
        net.add_generator(Generator::new("fixed", 0, 0.05).with_q(0.01));
        net
    }

    fn voltages() -> DVector<Complex64> {
        DVector::from_vec(vec![
            Complex64::new(1.0, 0.0),
            Complex64::from_polar(0.95, -0.08),
        ])
    }

    #[test]
    fn test_branch_loss_matches_impedance_loss() {
        let n = net();
        let adm = make_y_bus(&n, false).unwrap();
        let v = voltages();
        let flows = branch_flows(&n, &adm, &v);
        let br = &n.branches[0];
        let i_series = (v[0] - v[1]) * br.series_admittance();
        let shunt = 0.5 * Complex64::new(br.g, br.b);
        let expected = i_series.norm_sqr() * Complex64::new(br.r, br.x)
            + (v[0].norm_sqr() + v[1].norm_sqr()) * shunt.conj();
        assert!((flows[0].loss - expected).norm() < 1e-12);
        assert_eq!(flows[1].loss, Complex64::zero());
        assert!(flows[0].loading_percent.is_some_and(|l| l > 0.0));
    }

    #[test]
    fn test_dispatch_split() {
        let n = net();
        let (cls, inj) = classify_buses(&n).unwrap();
        let adm = make_y_bus(&n, false).unwrap();
        let v = voltages();
        let s_calc = power_injection(&adm.y_bus, &v);
        let gens = dispatch_generators(&n, &inj, &s_calc);
        assert_eq!(cls.bus_type(0), BusType::Slack);

        let q_total = s_calc[0].im - 0.01;
        assert!((gens[0].q + gens[1].q - q_total).abs() < 1e-12);
        // share follows the reactive range: 2 of 8 for g1
        assert!((gens[0].q - (-1.0 + (q_total + 4.0) * 0.25)).abs() < 1e-12);
        assert!((gens[0].p + 0.05 - s_calc[0].re).abs() < 1e-12);
        assert_eq!(gens[1].p, 0.0);
        assert_eq!(gens[2].p, 0.05);
        assert_eq!(gens[2].q, 0.01);
    }

    #[test]
    fn test_slack_without_voltage_control_takes_balance() {
        let mut n = Network::new("grid", 100.0);
        n.add_bus(Bus::new("s", 20.0).slack(1.0).with_load(0.02, 0.01));
        n.add_bus(Bus::new("b", 20.0).with_load(0.5, 0.1));
        n.add_branch(Branch::new("sb", 0, 1, 0.01, 0.05));
        n.add_generator(Generator::new("grid", 0, 0.0));
        n.add_generator(Generator::new("diesel", 0, 0.1).with_q(0.03));
        let res = n.run_pf(&PowerFlowConfig::default()).unwrap();
        assert!(res.converged);

        let p: f64 = res.generators.iter().map(|g| g.p).sum();
        let q: f64 = res.generators.iter().map(|g| g.q).sum();
        assert!((p - (res.s_calc[0].re + 0.02)).abs() < 1e-12);
        assert!((q - (res.s_calc[0].im + 0.01)).abs() < 1e-12);
        // the whole system is supplied from the slack bus
        assert!(res.generators[0].p > 0.4);
        assert_eq!(res.generators[1].p, 0.1);
        assert_eq!(res.generators[1].q, 0.03);
    }
}
