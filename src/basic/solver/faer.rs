use faer::{
    MatMut,
    linalg::solvers::Solve as FaerSolve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};
use nalgebra_sparse::CscMatrix;

use super::{LinearSolveError, Solve, check_finite, check_square};

/// Sparse LU from faer. The symbolic analysis is reused until [`Solve::reset`].
#[derive(Default)]
pub struct FaerSolver {
    symbolic: Option<SymbolicLu<usize>>,
}

impl Solve for FaerSolver {
    /// Factorizes `a` with faer's sparse LU and solves in place.
    ///
    /// # Parameters
    ///
    /// * `a` - Square matrix; its pattern must match the cached symbolic analysis.
    /// * `b` - Right-hand side, overwritten with the solution.
    ///
    /// # Returns
    ///
    /// [`LinearSolveError::Symbolic`] or [`LinearSolveError::Numeric`] when a
    /// factorization step fails, [`LinearSolveError::Singular`] when the
    /// solution is not finite.
    fn solve(&mut self, a: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), LinearSolveError> {
        let n = check_square(a)?;
        let s = SymbolicSparseColMatRef::new_checked(n, n, a.col_offsets(), None, a.row_indices());
        let mat = SparseColMatRef::new(s, a.values());
        let symbolic = match self.symbolic.take() {
            Some(symbolic) => symbolic,
            None => SymbolicLu::try_new(s).map_err(|_| LinearSolveError::Symbolic)?,
        };
        let lu = Lu::try_new_with_symbolic(symbolic.clone(), mat)
            .map_err(|_| LinearSolveError::Numeric)?;
        self.symbolic = Some(symbolic);

        lu.solve_in_place(MatMut::from_column_major_slice_mut(b, n, 1));
        check_finite(b)
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}
