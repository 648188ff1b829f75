use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::network::{Branch, Network};
use crate::basic::error::ModelError;

/// π-model contribution of one branch to the bus admittance matrix.
///
/// `[I_f; I_t] = [[y_ff, y_ft]; [y_tf, y_tt]] * [V_f; V_t]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchStamp {
    pub from: usize,
    pub to: usize,
    pub y_ff: Complex64,
    pub y_ft: Complex64,
    pub y_tf: Complex64,
    pub y_tt: Complex64,
}

impl Branch {
    /// Series admittance `1 / (r + jx)`.
    pub fn series_admittance(&self) -> Complex64 {
        Complex64::new(self.r, self.x).inv()
    }

    pub fn stamp(&self) -> BranchStamp {
        let y_s = self.series_admittance();
        let y_sh = Complex64::new(self.g, self.b);
        let t = Complex64::from_polar(self.tap, self.shift_deg.to_radians());
        let y_tt = y_s + y_sh * 0.5;
        BranchStamp {
            from: self.from,
            to: self.to,
            y_ff: y_tt / (t * t.conj()),
            y_ft: -y_s / t.conj(),
            y_tf: -y_s / t,
            y_tt,
        }
    }
}

/// Bus admittance matrix plus the branch-to-terminal-current matrices.
///
/// `y_f * V` gives the current entering each branch at its `from` end,
/// `y_t * V` the current at its `to` end. Rows of out-of-service branches are empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmittanceMatrices {
    pub y_bus: CscMatrix<Complex64>,
    pub y_f: CscMatrix<Complex64>,
    pub y_t: CscMatrix<Complex64>,
}

/// Builds `Ybus`, `Yf` and `Yt` for the network.
///
/// Every diagonal entry of `Ybus` is stored, even when it is zero, so the
/// derivative matrices always share its pattern.
/// `multi_core` computes branch stamps on the rayon pool; the assembly order
/// and therefore the result are the same either way.
pub fn make_y_bus(net: &Network, multi_core: bool) -> Result<AdmittanceMatrices, ModelError> {
    let n = net.n_bus();
    let nbr = net.branches.len();
    net.branches.iter().try_for_each(|br| br.check(n))?;

    let stamp = |(k, br): (usize, &Branch)| br.in_service.then(|| (k, br.stamp()));
    let stamps: Vec<(usize, BranchStamp)> = if multi_core {
        net.branches.par_iter().enumerate().filter_map(stamp).collect()
    } else {
        net.branches.iter().enumerate().filter_map(stamp).collect()
    };

    let mut y_bus = CooMatrix::new(n, n);
    let mut y_f = CooMatrix::new(nbr, n);
    let mut y_t = CooMatrix::new(nbr, n);
    for (i, bus) in net.buses.iter().enumerate() {
        y_bus.push(i, i, Complex64::new(bus.g_shunt, bus.b_shunt));
    }
    for (k, s) in &stamps {
        y_bus.push(s.from, s.from, s.y_ff);
        y_bus.push(s.from, s.to, s.y_ft);
        y_bus.push(s.to, s.from, s.y_tf);
        y_bus.push(s.to, s.to, s.y_tt);

        y_f.push(*k, s.from, s.y_ff);
        y_f.push(*k, s.to, s.y_ft);
        y_t.push(*k, s.from, s.y_tf);
        y_t.push(*k, s.to, s.y_tt);
    }
    log::debug!(
        "admittance matrix: {n} buses, {} of {nbr} branches in service",
        stamps.len()
    );

    Ok(AdmittanceMatrices {
        y_bus: CscMatrix::from(&y_bus),
        y_f: CscMatrix::from(&y_f),
        y_t: CscMatrix::from(&y_t),
    })
}

/// Returns true when `y` equals its transpose within `tol`.
pub fn is_symmetric(y: &CscMatrix<Complex64>, tol: f64) -> bool {
    let yt = y.transpose();
    let diff = y - &yt;
    diff.values().iter().all(|v| v.norm() <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::system::network::Bus;
    use nalgebra::DMatrix;
    use num_traits::Zero;

    fn net() -> Network {
        let mut net = Network::new("t", 100.0);
        net.add_bus(Bus::new("a", 110.0).slack(1.0));
        net.add_bus(Bus::new("b", 110.0).with_shunt(0.0, 0.02));
        net.add_bus(Bus::new("c", 20.0));
        net.add_branch(Branch::new("ab", 0, 1, 0.01, 0.1).with_shunt(0.0, 0.04));
        net.add_branch(Branch::new("bc", 1, 2, 0.002, 0.08).with_shunt(0.001, -0.003));
        net
    }

    #[test]
    fn test_pi_model_stamps() {
        let n = net();
        let y = make_y_bus(&n, false).unwrap();
        let dense = DMatrix::from(&y.y_bus);
        let ys_ab = Complex64::new(0.01, 0.1).inv();
        let ys_bc = Complex64::new(0.002, 0.08).inv();

        assert!((dense[(0, 1)] + ys_ab).norm() < 1e-12);
        assert!((dense[(1, 2)] + ys_bc).norm() < 1e-12);
        assert!(dense[(0, 2)].norm() == 0.0);

        let y11 = ys_ab
            + Complex64::new(0.0, 0.02)
            + ys_bc
            + Complex64::new(0.0, 0.02)
            + Complex64::new(0.0005, -0.0015);
        assert!((dense[(1, 1)] - y11).norm() < 1e-12);
        assert!(is_symmetric(&y.y_bus, 1e-12));
    }

    #[test]
    fn test_tap_and_shift() {
        let mut n = net();
        n.branches[1] = n.branches[1].clone().with_tap(1.05, 30.0);
        let y = make_y_bus(&n, false).unwrap();
        assert!(!is_symmetric(&y.y_bus, 1e-9));

        let s = n.branches[1].stamp();
        let ys = n.branches[1].series_admittance();
        let t = Complex64::from_polar(1.05, 30f64.to_radians());
        assert!((s.y_ft * t.conj() + ys).norm() < 1e-12);
        assert!((s.y_tf * t + ys).norm() < 1e-12);
        assert!((s.y_ff * 1.05 * 1.05 - s.y_tt).norm() < 1e-12);
    }

    #[test]
    fn test_branch_current_matrices() {
        let n = net();
        let y = make_y_bus(&n, false).unwrap();
        assert_eq!(y.y_f.nrows(), 2);
        let yf = DMatrix::from(&y.y_f);
        let yt = DMatrix::from(&y.y_t);
        let s = n.branches[0].stamp();
        assert_eq!(yf[(0, 0)], s.y_ff);
        assert_eq!(yf[(0, 1)], s.y_ft);
        assert_eq!(yt[(0, 0)], s.y_tf);
        assert_eq!(yt[(0, 1)], s.y_tt);
    }

    #[test]
    fn test_out_of_service_and_diagonal() {
        let mut n = net();
        n.branches[1].in_service = false;
        let y = make_y_bus(&n, false).unwrap();
        let dense = DMatrix::from(&y.y_bus);
        assert_eq!(dense[(2, 2)], Complex64::zero());
        // bus c keeps a stored (zero) diagonal
        assert_eq!(y.y_bus.col(2).nnz(), 1);
        assert!(DMatrix::from(&y.y_f).row(1).iter().all(|v| v.is_zero()));
    }

    #[test]
    fn test_errors() {
        let mut n = net();
        n.add_branch(Branch::new("short", 0, 2, 0.0, 0.0));
        assert_eq!(
            make_y_bus(&n, false).unwrap_err(),
            ModelError::DegenerateBranch("short".into())
        );
        let mut n = net();
        n.add_branch(Branch::new("far", 0, 9, 0.1, 0.1));
        assert!(matches!(
            make_y_bus(&n, false),
            Err(ModelError::UnknownBus { .. })
        ));
    }

    #[test]
    fn test_multi_core_identical() {
        let n = net();
        let a = make_y_bus(&n, false).unwrap();
        let b = make_y_bus(&n, true).unwrap();
        assert_eq!(a.y_bus, b.y_bus);
        assert_eq!(a.y_f, b.y_f);
    }
}
