use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::init::{BusClassification, BusInjection, BusType};
use super::mismatch::power_injection;

/// Which reactive bound a PV bus hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitSide {
    Lower,
    Upper,
}

/// A PV bus converted to PQ by reactive-limit enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub bus: usize,
    /// Controlled reactive output implied by the converged voltages.
    pub q_gen: f64,
    /// The bound it was clamped to.
    pub q_bound: f64,
    pub side: LimitSide,
}

/// Checks the reactive output of every PV bus against its aggregated limits.
///
/// The output is the calculated injection minus the fixed part of the
/// schedule, `Im(S_calc) - Im(S_bus)`. Violators are demoted to PQ and their
/// scheduled injection gains the violated bound. Returns the conversions
/// made; an empty list means the state is admissible.
///
/// Must only be called between solver passes. The caller re-solves with the
/// updated classification, warm-starting from `v`.
pub fn enforce_q_limits(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    s_bus: &mut DVector<Complex64>,
    cls: &mut BusClassification,
    injections: &[BusInjection],
) -> Vec<LimitViolation> {
    let s_calc = power_injection(y_bus, v);
    let mut violations = Vec::new();
    for bus in cls.buses_of(BusType::PV) {
        let q_gen = s_calc[bus].im - s_bus[bus].im;
        let lim = &injections[bus];
        let (q_bound, side) = if q_gen > lim.q_max {
            (lim.q_max, LimitSide::Upper)
        } else if q_gen < lim.q_min {
            (lim.q_min, LimitSide::Lower)
        } else {
            continue;
        };
        if cls.demote_to_pq(bus) {
            s_bus[bus].im += q_bound;
            log::info!(
                "bus {bus}: reactive output {q_gen:.6} outside [{:.6}, {:.6}], converted to PQ at {q_bound:.6}",
                lim.q_min,
                lim.q_max
            );
            violations.push(LimitViolation {
                bus,
                q_gen,
                q_bound,
                side,
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::powerflow::init::{classify_buses, make_s_bus};
    use crate::basic::system::make_y_bus;
    use crate::testcases::{pv_three_bus, pv_three_bus_with_q_limits};

    /// Converged voltages of the three-bus case without limits.
    fn solved_voltage() -> DVector<Complex64> {
        DVector::from_vec(vec![
            Complex64::new(1.0, 0.0),
            Complex64::from_polar(1.0012149684, 0.1869f64.to_radians()),
            Complex64::from_polar(1.025, 2.9317f64.to_radians()),
        ])
    }

    #[test]
    fn test_within_limits_is_untouched() {
        let net = pv_three_bus();
        let (mut cls, inj) = classify_buses(&net).unwrap();
        let y = make_y_bus(&net, false).unwrap();
        let mut s = make_s_bus(&net, &cls, &inj);
        let before = s.clone();
        let out = enforce_q_limits(&y.y_bus, &solved_voltage(), &mut s, &mut cls, &inj);
        assert!(out.is_empty());
        assert_eq!(s, before);
        assert_eq!(cls.version(), 0);
    }

    #[test]
    fn test_upper_violation_demotes() {
        let net = pv_three_bus_with_q_limits(-2.5, 0.01);
        let (mut cls, inj) = classify_buses(&net).unwrap();
        let y = make_y_bus(&net, false).unwrap();
        let mut s = make_s_bus(&net, &cls, &inj);
        let out = enforce_q_limits(&y.y_bus, &solved_voltage(), &mut s, &mut cls, &inj);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bus, 2);
        assert_eq!(out[0].side, LimitSide::Upper);
        assert!((out[0].q_gen - 0.019353).abs() < 1e-4);
        assert_eq!(cls.bus_type(2), BusType::PQ);
        assert!((s[2].im - 0.01).abs() < 1e-12);
        // a second call has no PV bus left to check
        assert!(enforce_q_limits(&y.y_bus, &solved_voltage(), &mut s, &mut cls, &inj).is_empty());
        assert_eq!(cls.bus_type(2), BusType::PQ);
    }

    #[test]
    fn test_lower_violation_demotes() {
        let net = pv_three_bus_with_q_limits(0.05, 0.5);
        let (mut cls, inj) = classify_buses(&net).unwrap();
        let y = make_y_bus(&net, false).unwrap();
        let mut s = make_s_bus(&net, &cls, &inj);
        let out = enforce_q_limits(&y.y_bus, &solved_voltage(), &mut s, &mut cls, &inj);
        assert_eq!(out[0].side, LimitSide::Lower);
        assert!((s[2].im - 0.05).abs() < 1e-12);
    }
}
