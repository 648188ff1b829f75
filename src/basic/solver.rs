use nalgebra_sparse::CscMatrix;
use thiserror::Error;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

mod dense;
pub use dense::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

#[cfg(all(not(feature = "faer"), not(feature = "rsparse")))]
pub type DefaultSolver = DenseSolver;

/// Failure of a linear solve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinearSolveError {
    #[error("matrix is not square ({0}x{1})")]
    NotSquare(usize, usize),
    #[error("symbolic factorization failed")]
    Symbolic,
    #[error("numeric factorization failed")]
    Numeric,
    #[error("matrix is singular")]
    Singular,
}

/// A trait for solving sparse linear systems `A x = b`.
pub trait Solve {
    /// Solves the system in place.
    ///
    /// Implementations may cache a symbolic factorization keyed on the sparsity
    /// pattern of the first matrix they see; call [`reset`](Self::reset)
    /// before passing a matrix with a different pattern.
    ///
    /// # Parameters
    ///
    /// * `a` - Square coefficient matrix in compressed sparse column form.
    /// * `b` - Right-hand side on entry, solution on success.
    ///
    /// # Returns
    ///
    /// `Ok(())` when `b` holds a finite solution. On error the contents of
    /// `b` are unspecified.
    fn solve(&mut self, a: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), LinearSolveError>;

    /// Drops any cached symbolic factorization.
    fn reset(&mut self);
}

pub(crate) fn check_square(a: &CscMatrix<f64>) -> Result<usize, LinearSolveError> {
    if a.nrows() != a.ncols() {
        return Err(LinearSolveError::NotSquare(a.nrows(), a.ncols()));
    }
    Ok(a.nrows())
}

pub(crate) fn check_finite(x: &[f64]) -> Result<(), LinearSolveError> {
    if x.iter().any(|v| !v.is_finite()) {
        return Err(LinearSolveError::Singular);
    }
    Ok(())
}
