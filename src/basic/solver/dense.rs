use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use super::{LinearSolveError, Solve, check_finite, check_square};

/// Dense LU from nalgebra. Always available; suited to small systems.
#[derive(Debug, Default)]
pub struct DenseSolver;

impl Solve for DenseSolver {
    /// Densifies `a` and solves with partial-pivoting LU.
    ///
    /// # Parameters
    ///
    /// * `a` - Square matrix.
    /// * `b` - Right-hand side of length `a.nrows()`, overwritten with the solution.
    ///
    /// # Returns
    ///
    /// [`LinearSolveError::Singular`] when the LU has a zero pivot or the
    /// solution is not finite.
    fn solve(&mut self, a: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), LinearSolveError> {
        let n = check_square(a)?;
        if b.len() != n {
            return Err(LinearSolveError::Numeric);
        }
        let lu = DMatrix::from(a).lu();
        let rhs = DVector::from_column_slice(b);
        let x = lu.solve(&rhs).ok_or(LinearSolveError::Singular)?;
        check_finite(x.as_slice())?;
        b.copy_from_slice(x.as_slice());
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    #[test]
    fn test_dense_solve() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 4.0);
        coo.push(0, 1, 1.0);
        coo.push(1, 0, 2.0);
        coo.push(1, 1, 3.0);
        let a = CscMatrix::from(&coo);
        let mut b = [1.0, 2.0];
        DenseSolver.solve(&a, &mut b).unwrap();
        assert!((b[0] - 0.1).abs() < 1e-12);
        assert!((b[1] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_singular() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 1.0);
        coo.push(1, 0, 1.0);
        let a = CscMatrix::from(&coo);
        let mut b = [1.0, 2.0];
        assert_eq!(
            DenseSolver.solve(&a, &mut b),
            Err(LinearSolveError::Singular)
        );
    }
}
