use derive_more::Display;
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::basic::error::ModelError;
use crate::basic::system::Network;

/// Control type of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum BusType {
    #[display("Slack")]
    Slack,
    #[display("PV")]
    PV,
    #[display("PQ")]
    PQ,
}

/// Generator data aggregated per bus.
///
/// `q_min`/`q_max` sum the limits of the voltage-controlling generators;
/// `q_fixed` sums the reactive output of the others.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusInjection {
    pub p_gen: f64,
    pub q_fixed: f64,
    pub q_min: f64,
    pub q_max: f64,
    pub n_controlling: usize,
}

impl Default for BusInjection {
    fn default() -> Self {
        Self {
            p_gen: 0.0,
            q_fixed: 0.0,
            q_min: 0.0,
            q_max: 0.0,
            n_controlling: 0,
        }
    }
}

impl BusInjection {
    /// A voltage-controlling bus whose reactive range is a single point.
    pub fn is_clamped(&self) -> bool {
        self.n_controlling > 0 && self.q_min >= self.q_max
    }
}

/// Per-bus control types with a version counter bumped on every change.
///
/// Only [`demote_to_pq`](Self::demote_to_pq) mutates it, and only in the PV to PQ
/// direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusClassification {
    types: Vec<BusType>,
    vm_setpoints: Vec<Option<f64>>,
    demoted: Vec<bool>,
    version: u64,
}

impl BusClassification {
    pub fn types(&self) -> &[BusType] {
        &self.types
    }

    pub fn bus_type(&self, bus: usize) -> BusType {
        self.types[bus]
    }

    /// Voltage magnitude setpoint of a PV or Slack bus.
    pub fn vm_setpoint(&self, bus: usize) -> Option<f64> {
        self.vm_setpoints[bus]
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// True for buses converted from PV by reactive-limit enforcement.
    pub fn is_demoted(&self, bus: usize) -> bool {
        self.demoted[bus]
    }

    pub fn buses_of(&self, kind: BusType) -> Vec<usize> {
        (0..self.types.len())
            .filter(|&i| self.types[i] == kind)
            .collect()
    }

    pub fn count(&self, kind: BusType) -> usize {
        self.types.iter().filter(|t| **t == kind).count()
    }

    /// Converts a PV bus to PQ. Returns false for any other bus type.
    pub fn demote_to_pq(&mut self, bus: usize) -> bool {
        if self.types[bus] != BusType::PV {
            return false;
        }
        self.types[bus] = BusType::PQ;
        self.demoted[bus] = true;
        self.version += 1;
        true
    }
}

/// Assigns Slack, PV or PQ to every bus.
///
/// A bus flagged `is_slack` becomes Slack; a bus with a voltage-controlling
/// generator and a non-degenerate reactive range becomes PV; all others are PQ.
/// When several generators on one bus disagree on the setpoint the first wins.
pub fn classify_buses(
    net: &Network,
) -> Result<(BusClassification, Vec<BusInjection>), ModelError> {
    let n = net.n_bus();
    let slacks: Vec<usize> = (0..n).filter(|&i| net.buses[i].is_slack).collect();
    match slacks.len() {
        0 => return Err(ModelError::NoSlackBus),
        1 => {}
        _ => return Err(ModelError::MultipleSlackBuses(slacks)),
    }

    let mut injections = vec![BusInjection::default(); n];
    let mut setpoints: Vec<Option<f64>> = vec![None; n];
    for g in net.generators.iter().filter(|g| g.in_service) {
        let inj = &mut injections[g.bus];
        inj.p_gen += g.p;
        let Some(vm) = g.vm_setpoint else {
            inj.q_fixed += g.q;
            continue;
        };
        inj.q_min += g.q_min_or_unbounded();
        inj.q_max += g.q_max_or_unbounded();
        inj.n_controlling += 1;
        match setpoints[g.bus] {
            None => setpoints[g.bus] = Some(vm),
            Some(first) if (first - vm).abs() > f64::EPSILON => log::warn!(
                "generator '{}' setpoint {vm} ignored, bus '{}' already regulated to {first}",
                g.name,
                net.buses[g.bus].name
            ),
            Some(_) => {}
        }
    }

    let mut types = vec![BusType::PQ; n];
    for i in 0..n {
        if net.buses[i].is_slack {
            types[i] = BusType::Slack;
            setpoints[i] = setpoints[i].or(Some(net.buses[i].vm_pu));
        } else if injections[i].n_controlling > 0 && !injections[i].is_clamped() {
            types[i] = BusType::PV;
        } else {
            setpoints[i] = None;
        }
    }

    let cls = BusClassification {
        types,
        vm_setpoints: setpoints,
        demoted: vec![false; n],
        version: 0,
    };
    log::debug!(
        "classified {n} buses: {} PV, {} PQ",
        cls.count(BusType::PV),
        cls.count(BusType::PQ)
    );
    Ok((cls, injections))
}

/// Scheduled complex injection (generation minus load) per bus.
///
/// For PV and Slack buses the imaginary part holds only the fixed reactive
/// injection; the controlled part is a free variable. A clamped controlling
/// bus injects its single admissible value.
pub fn make_s_bus(
    net: &Network,
    cls: &BusClassification,
    injections: &[BusInjection],
) -> DVector<Complex64> {
    DVector::from_iterator(
        net.n_bus(),
        net.buses.iter().zip(injections).enumerate().map(|(i, (bus, inj))| {
            let mut q = inj.q_fixed - bus.q_load;
            if cls.bus_type(i) == BusType::PQ && inj.is_clamped() {
                q += inj.q_min;
            }
            Complex64::new(inj.p_gen - bus.p_load, q)
        }),
    )
}

/// Starting voltages: flat start, or `previous` when given, with every
/// Slack and PV magnitude forced to its setpoint and the Slack angle to zero.
pub fn initial_voltage(
    cls: &BusClassification,
    previous: Option<&DVector<Complex64>>,
) -> Result<DVector<Complex64>, ModelError> {
    let n = cls.len();
    let mut v = match previous {
        Some(prev) if prev.len() != n => {
            return Err(ModelError::InitialStateMismatch {
                expected: n,
                got: prev.len(),
            });
        }
        Some(prev) if prev.iter().all(|x| x.is_finite() && x.norm() > 0.0) => prev.clone(),
        Some(_) => {
            log::warn!("previous solution has zero or non-finite voltages, using flat start");
            DVector::from_element(n, Complex64::new(1.0, 0.0))
        }
        None => DVector::from_element(n, Complex64::new(1.0, 0.0)),
    };
    for i in 0..n {
        match (cls.bus_type(i), cls.vm_setpoint(i)) {
            (BusType::Slack, Some(vm)) => v[i] = Complex64::new(vm, 0.0),
            (BusType::PV, Some(vm)) => v[i] = Complex64::from_polar(vm, v[i].arg()),
            _ => {}
        }
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::system::{Branch, Bus, Generator};

    fn net() -> Network {
        let mut net = Network::new("cls", 100.0);
        net.add_bus(Bus::new("slack", 110.0).slack(1.02));
        net.add_bus(Bus::new("pv", 110.0).with_load(0.2, 0.1));
        net.add_bus(Bus::new("pq", 110.0).with_load(0.5, 0.2));
        net.add_branch(Branch::new("l1", 0, 1, 0.01, 0.1));
        net.add_branch(Branch::new("l2", 1, 2, 0.01, 0.1));
        net.add_generator(
            Generator::new("g1", 1, 0.3)
                .with_voltage(1.01)
                .with_q_limits(-0.5, 0.5),
        );
        net.add_generator(
            Generator::new("g2", 1, 0.1)
                .with_voltage(1.01)
                .with_q_limits(-0.1, 0.2),
        );
        net.add_generator(Generator::new("sg", 2, 0.05).with_q(0.02));
        net
    }

    #[test]
    fn test_classify() {
        let (cls, inj) = classify_buses(&net()).unwrap();
        assert_eq!(cls.types(), &[BusType::Slack, BusType::PV, BusType::PQ]);
        assert_eq!(cls.buses_of(BusType::Slack), vec![0]);
        assert_eq!(cls.vm_setpoint(0), Some(1.02));
        assert_eq!(cls.vm_setpoint(1), Some(1.01));
        assert_eq!(cls.vm_setpoint(2), None);
        assert_eq!(inj[1].n_controlling, 2);
        assert!((inj[1].q_min + 0.6).abs() < 1e-12);
        assert!((inj[1].q_max - 0.7).abs() < 1e-12);
        assert!((inj[1].p_gen - 0.4).abs() < 1e-12);
        assert!((inj[2].q_fixed - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_slack_count() {
        let mut n = net();
        n.buses[0].is_slack = false;
        assert_eq!(classify_buses(&n).unwrap_err(), ModelError::NoSlackBus);
        let mut n = net();
        n.buses[2].is_slack = true;
        assert_eq!(
            classify_buses(&n).unwrap_err(),
            ModelError::MultipleSlackBuses(vec![0, 2])
        );
    }

    #[test]
    fn test_slack_generator_setpoint_and_clamped_bus() {
        let mut n = net();
        n.add_generator(Generator::new("ext", 0, 0.0).with_voltage(1.05));
        n.generators[0].q_min = Some(0.1);
        n.generators[0].q_max = Some(0.1);
        n.generators[1].q_min = Some(0.0);
        n.generators[1].q_max = Some(0.0);
        let (cls, inj) = classify_buses(&n).unwrap();
        assert_eq!(cls.vm_setpoint(0), Some(1.05));
        assert_eq!(cls.bus_type(1), BusType::PQ);
        let s = make_s_bus(&n, &cls, &inj);
        assert!((s[1].re - 0.2).abs() < 1e-12);
        assert!((s[1].im - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_s_bus() {
        let n = net();
        let (cls, inj) = classify_buses(&n).unwrap();
        let s = make_s_bus(&n, &cls, &inj);
        assert!((s[1] - Complex64::new(0.2, -0.1)).norm() < 1e-12);
        assert!((s[2] - Complex64::new(-0.45, -0.18)).norm() < 1e-12);
    }

    #[test]
    fn test_demotion_is_one_way() {
        let (mut cls, _) = classify_buses(&net()).unwrap();
        assert!(cls.demote_to_pq(1));
        assert_eq!(cls.version(), 1);
        assert!(cls.is_demoted(1));
        assert!(!cls.demote_to_pq(1));
        assert!(!cls.demote_to_pq(0));
        assert_eq!(cls.version(), 1);
        assert_eq!(cls.bus_type(0), BusType::Slack);
    }

    #[test]
    fn test_initial_voltage() {
        let (cls, _) = classify_buses(&net()).unwrap();
        let v = initial_voltage(&cls, None).unwrap();
        assert_eq!(v[0], Complex64::new(1.02, 0.0));
        assert!((v[1].norm() - 1.01).abs() < 1e-15);
        assert_eq!(v[2], Complex64::new(1.0, 0.0));

        let prev = DVector::from_vec(vec![
            Complex64::from_polar(0.9, 0.3),
            Complex64::from_polar(0.95, -0.1),
            Complex64::from_polar(0.97, -0.2),
        ]);
        let v = initial_voltage(&cls, Some(&prev)).unwrap();
        assert_eq!(v[0], Complex64::new(1.02, 0.0));
        assert!((v[1].arg() + 0.1).abs() < 1e-12);
        assert!((v[1].norm() - 1.01).abs() < 1e-12);
        assert_eq!(v[2], prev[2]);

        let short = DVector::from_element(2, Complex64::new(1.0, 0.0));
        assert!(matches!(
            initial_voltage(&cls, Some(&short)),
            Err(ModelError::InitialStateMismatch { expected: 3, got: 2 })
        ));
    }
}
