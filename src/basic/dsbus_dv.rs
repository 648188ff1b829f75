use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use rayon::prelude::*;

/// Partial derivatives of the complex bus injections with respect to voltage
/// magnitudes and angles.
///
/// With `I = Ybus V` and `Vnorm = V / |V|`:
///
/// * `dS/d|V| = diag(V) conj(Ybus diag(Vnorm)) + conj(diag(I)) diag(Vnorm)`
/// * `dS/dθ   = j diag(V) conj(diag(I) - Ybus diag(V))`
///
/// Both results share the pattern of `y_bus` plus its diagonal, so the entries
/// are produced column by column from the stored `y_bus` entries. With
/// `multi_core` the columns are processed on the rayon pool.
///
/// Reference: R. D. Zimmerman, "AC Power Flows, Generalized OPF Costs and
/// their Derivatives using Complex Matrix Notation", MATPOWER Technical Note 2, 2010.
#[allow(non_snake_case)]
pub fn dSbus_dV(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    multi_core: bool,
) -> (CscMatrix<Complex64>, CscMatrix<Complex64>) {
    let n = v.len();
    let i_bus = y_bus * v;
    let v_norm = v.map(|e| {
        let m = e.norm();
        if m > 0.0 { e / m } else { Complex64::new(1.0, 0.0) }
    });

    let column = |j: usize| -> Vec<(usize, usize, Complex64, Complex64)> {
        let col = y_bus.col(j);
        let mut out: Vec<_> = col
            .row_indices()
            .iter()
            .zip(col.values())
            .map(|(&i, y)| {
                let d_vm = v[i] * (y * v_norm[j]).conj();
                let d_va = -Complex64::i() * v[i] * (y * v[j]).conj();
                (i, j, d_vm, d_va)
            })
            .collect();
        out.push((
            j,
            j,
            i_bus[j].conj() * v_norm[j],
            Complex64::i() * v[j] * i_bus[j].conj(),
        ));
        out
    };
    let entries: Vec<_> = if multi_core {
        (0..n).into_par_iter().flat_map_iter(column).collect()
    } else {
        (0..n).flat_map(column).collect()
    };

    let mut d_vm = CooMatrix::new(n, n);
    let mut d_va = CooMatrix::new(n, n);
    for (i, j, dm, da) in entries {
        d_vm.push(i, j, dm);
        d_va.push(i, j, da);
    }
    (CscMatrix::from(&d_vm), CscMatrix::from(&d_va))
}
