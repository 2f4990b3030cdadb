//! Bound linear-solver capability and the reference back-ends.
//!
//! The Newton interface never does linear algebra itself. It hands the Newton
//! system to a [`LinearSolver`], classified as:
//! - [`SolverType::Direct`]: factors the explicit matrix `A = I − γJ` in `setup`
//!   and solves with it; tolerances are ignored.
//! - [`SolverType::MatrixFree`]: never sees a matrix; it applies the operator and
//!   the preconditioner through a [`NewtonSystem`] and iterates to a tolerance.
//!
//! Two implementations ship with the crate: [`DenseLu`] (faer full-pivot LU) and
//! [`GmresSolver`] (restarted GMRES).

use crate::core::traits::Real;
use crate::error::LsError;
use crate::preconditioner::PrecSide;
use crate::utils::convergence::SolveStats;
use faer::Mat;

/// Classification of a bound solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverType {
    /// Requires an explicit operator.
    Direct,
    /// Requires only the operator's action on vectors.
    MatrixFree,
}

/// Operator action and preconditioner exposed to a matrix-free solver.
pub trait NewtonSystem<T> {
    /// z ← (I − γJ) v
    fn atimes(&mut self, v: &[T], z: &mut [T]) -> Result<(), LsError>;
    /// Solve P z = r to tolerance `tol`; copies `r` when nothing is bound.
    fn psolve(&mut self, r: &[T], z: &mut [T], tol: T, side: PrecSide) -> Result<(), LsError>;
    /// Whether a preconditioner is bound.
    fn preconditioned(&self) -> bool;
}

/// Common interface for any direct or iterative solver.
pub trait LinearSolver<T: Real>: Send {
    fn solver_type(&self) -> SolverType;

    /// Size the solver for systems of dimension `n`; called once when the
    /// solver is bound to a context.
    fn initialize(&mut self, _n: usize) -> Result<(), LsError> {
        Ok(())
    }

    /// Prepare for subsequent solves. Direct solvers receive the Newton matrix;
    /// matrix-free solvers receive `None`.
    fn setup(&mut self, a: Option<&Mat<T>>) -> Result<(), LsError>;

    /// Solve `A x = b` to tolerance `tol`, writing the result into `x`.
    /// Returns iteration stats (including convergence info).
    fn solve(
        &mut self,
        a: Option<&Mat<T>>,
        sys: &mut dyn NewtonSystem<T>,
        b: &[T],
        x: &mut [T],
        tol: T,
    ) -> Result<SolveStats<T>, LsError>;

    /// Iterations performed by the most recent `solve`, including one that
    /// failed part way through.
    fn num_iters(&self) -> usize {
        0
    }

    /// Real and integer workspace held by the solver.
    fn workspace(&self) -> (usize, usize) {
        (0, 0)
    }
}

pub mod direct_lu;
pub use direct_lu::DenseLu;

pub mod gmres;
pub use gmres::{GmresSolver, Preconditioning};
