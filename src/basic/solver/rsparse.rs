use nalgebra_sparse::CscMatrix;
use rsparse::{
    data::{Numeric, Sprs, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{LinearSolveError, Solve, check_finite, check_square};

/// Sparse LU from rsparse with a cached column ordering.
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
}

impl Solve for RSparseSolver {
    /// Solves `P A Q = L U` by permuted forward and back substitution.
    ///
    /// # Parameters
    ///
    /// * `a` - Square matrix, copied into rsparse's own storage.
    /// * `b` - Right-hand side, overwritten with the solution.
    ///
    /// # Returns
    ///
    /// [`LinearSolveError::Numeric`] when the LU factorization fails,
    /// [`LinearSolveError::Singular`] when the solution is not finite.
    fn solve(&mut self, a: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), LinearSolveError> {
        let n = check_square(a)?;
        let a = Sprs {
            m: n,
            n,
            i: a.row_indices().to_vec(),
            p: a.col_offsets().iter().map(|&v| v as isize).collect(),
            x: a.values().to_vec(),
            nzmax: a.nnz(),
        };
        if self.symbolic.is_none() || self.x.len() != n {
            self.symbolic = Some(sqr(&a, 1, false));
            self.x = vec![0.0; n];
        }
        let Some(s) = self.symbolic.as_mut() else {
            return Err(LinearSolveError::Symbolic);
        };
        let num = lu(&a, s, 1e-6).map_err(|_| LinearSolveError::Numeric)?;
        ipvec(&num.pinv, b, &mut self.x); // x = P*b
        lsolve(&num.l, &mut self.x); // x = L\x
        usolve(&num.u, &mut self.x); // x = U\x
        ipvec(&s.q, &self.x, b); // b = Q*x
        check_finite(b)
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(p) => {
            for (k, v) in b.iter().enumerate() {
                x[p[k] as usize] = *v;
            }
        }
        None => x.copy_from_slice(b),
    }
}
