use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::init::{BusClassification, BusType};

/// Maps buses to positions in the reduced state and mismatch vectors.
///
/// State layout: `[θ(pvpq); |V|(pq)]`. Mismatch layout: `[P(pvpq); Q(pq)]`.
/// Both lists are in ascending bus order.
#[derive(Debug, Clone, PartialEq)]
pub struct StateIndex {
    pub pvpq: Vec<usize>,
    pub pq: Vec<usize>,
    /// bus -> row/column of its angle (P equation)
    pub(crate) p_pos: Vec<Option<usize>>,
    /// bus -> row/column of its magnitude (Q equation)
    pub(crate) q_pos: Vec<Option<usize>>,
}

impl StateIndex {
    pub fn new(cls: &BusClassification) -> Self {
        let n = cls.len();
        let pvpq: Vec<usize> = (0..n)
            .filter(|&i| cls.bus_type(i) != BusType::Slack)
            .collect();
        let pq = cls.buses_of(BusType::PQ);
        let mut p_pos = vec![None; n];
        let mut q_pos = vec![None; n];
        for (k, &i) in pvpq.iter().enumerate() {
            p_pos[i] = Some(k);
        }
        for (k, &i) in pq.iter().enumerate() {
            q_pos[i] = Some(pvpq.len() + k);
        }
        Self {
            pvpq,
            pq,
            p_pos,
            q_pos,
        }
    }

    pub fn n_state(&self) -> usize {
        self.pvpq.len() + self.pq.len()
    }
}

/// Calculated complex injection `V ∘ conj(Ybus V)`.
pub fn power_injection(y_bus: &CscMatrix<Complex64>, v: &DVector<Complex64>) -> DVector<Complex64> {
    let i_bus = y_bus * v;
    v.component_mul(&i_bus.conjugate())
}

/// Reduced mismatch at a trial voltage.
#[derive(Debug, Clone)]
pub struct Mismatch {
    /// `[ΔP(pvpq); ΔQ(pq)]`, calculated minus scheduled.
    pub f: DVector<f64>,
    /// Infinity norm of `f`.
    pub norm: f64,
}

impl Mismatch {
    /// Half the squared Euclidean norm; the objective minimised by Levenberg-Marquardt.
    pub fn cost(&self) -> f64 {
        0.5 * self.f.norm_squared()
    }

    pub fn is_finite(&self) -> bool {
        self.norm.is_finite()
    }
}

pub fn evaluate(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    s_bus: &DVector<Complex64>,
    index: &StateIndex,
) -> Mismatch {
    let mis = power_injection(y_bus, v) - s_bus;
    let f = assemble_f(&mis, index);
    let norm = if f.is_empty() {
        0.0
    } else if f.iter().any(|x| !x.is_finite()) {
        f64::NAN
    } else {
        f.amax()
    };
    Mismatch { f, norm }
}

#[inline(always)]
fn assemble_f(mis: &DVector<Complex64>, index: &StateIndex) -> DVector<f64> {
    let p = index.pvpq.iter().map(|&i| mis[i].re);
    let q = index.pq.iter().map(|&i| mis[i].im);
    DVector::from_iterator(index.n_state(), p.chain(q))
}

/// Writes a reduced state correction back into the polar voltage state.
///
/// Slack entries and PV magnitudes are left untouched.
pub(crate) fn apply_step(
    va: &mut DVector<f64>,
    vm: &mut DVector<f64>,
    dx: &DVector<f64>,
    index: &StateIndex,
    v: &mut DVector<Complex64>,
) {
    let npvpq = index.pvpq.len();
    for (k, &i) in index.pvpq.iter().enumerate() {
        va[i] -= dx[k];
    }
    for (k, &i) in index.pq.iter().enumerate() {
        vm[i] -= dx[npvpq + k];
    }
    for &i in &index.pvpq {
        v[i] = Complex64::from_polar(vm[i], va[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::powerflow::init::{classify_buses, make_s_bus};
    use crate::basic::system::{Branch, Bus, Generator, Network, make_y_bus};

    fn net() -> Network {
        let mut net = Network::new("mis", 100.0);
        net.add_bus(Bus::new("a", 110.0).with_load(0.3, 0.1));
        net.add_bus(Bus::new("b", 110.0).slack(1.0));
        net.add_bus(Bus::new("c", 110.0).with_load(0.2, 0.05));
        net.add_branch(Branch::new("ab", 0, 1, 0.01, 0.1));
        net.add_branch(Branch::new("bc", 1, 2, 0.01, 0.1));
        net.add_generator(Generator::new("g", 2, 0.4).with_voltage(1.0));
        net
    }

    #[test]
    fn test_state_index() {
        let (cls, _) = classify_buses(&net()).unwrap();
        let idx = StateIndex::new(&cls);
        assert_eq!(idx.pvpq, vec![0, 2]);
        assert_eq!(idx.pq, vec![0]);
        assert_eq!(idx.n_state(), 3);
        assert_eq!(idx.p_pos, vec![Some(0), None, Some(1)]);
        assert_eq!(idx.q_pos, vec![Some(2), None, None]);
    }

    #[test]
    fn test_flat_start_mismatch() {
        let n = net();
        let (cls, inj) = classify_buses(&n).unwrap();
        let idx = StateIndex::new(&cls);
        let y = make_y_bus(&n, false).unwrap();
        let s = make_s_bus(&n, &cls, &inj);
        let v = DVector::from_element(3, Complex64::new(1.0, 0.0));
        let m = evaluate(&y.y_bus, &v, &s, &idx);
        // no flow at flat start, so the mismatch is minus the schedule
        assert!((m.f[0] - 0.3).abs() < 1e-12);
        assert!((m.f[1] + 0.2).abs() < 1e-12);
        assert!((m.f[2] - 0.1).abs() < 1e-12);
        assert!((m.norm - 0.3).abs() < 1e-12);
        assert!((m.cost() - 0.5 * (0.09 + 0.04 + 0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_apply_step_keeps_fixed_entries() {
        let (cls, _) = classify_buses(&net()).unwrap();
        let idx = StateIndex::new(&cls);
        let mut v = DVector::from_vec(vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(1.0, 0.0),
        ]);
        let mut vm = v.map(|e| e.norm());
        let mut va = v.map(|e| e.arg());
        let dx = DVector::from_vec(vec![0.1, -0.2, 0.05]);
        apply_step(&mut va, &mut vm, &dx, &idx, &mut v);
        assert_eq!(v[1], Complex64::new(1.0, 0.0));
        assert!((v[0].arg() + 0.1).abs() < 1e-12);
        assert!((v[0].norm() - 0.95).abs() < 1e-12);
        assert!((v[2].arg() - 0.2).abs() < 1e-12);
        assert!((v[2].norm() - 1.0).abs() < 1e-12);
    }
}
