//! Direct dense solver using Faer's full-pivot LU.
//!
//! `setup` factors the Newton matrix once; every `solve` until the next
//! `setup` reuses the cached factorization. The tolerance argument is ignored
//! and the reported iteration count is zero.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::LsError;
use crate::matrix::DenseOperator;
use crate::solver::{LinearSolver, NewtonSystem, SolverType};
use crate::utils::convergence::SolveStats;
use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

/// LU solver using full pivoting from Faer.
///
/// Stores the LU factorization of the last `setup` for reuse.
pub struct DenseLu {
    /// Cached LU factorization (if computed)
    factor: Option<FullPivLu<f64>>,
    n: usize,
}

impl DenseLu {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        DenseLu { factor: None, n: 0 }
    }

    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }
}

impl Default for DenseLu {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver<f64> for DenseLu {
    fn solver_type(&self) -> SolverType {
        SolverType::Direct
    }

    fn initialize(&mut self, n: usize) -> Result<(), LsError> {
        self.n = n;
        Ok(())
    }

    fn setup(&mut self, a: Option<&Mat<f64>>) -> Result<(), LsError> {
        let a = a.ok_or_else(|| LsError::IllInput("dense LU requires an explicit operator".into()))?;
        if a.nrows() != a.ncols() {
            return Err(LsError::Operator(format!(
                "Newton matrix is {}x{}, expected square",
                a.nrows(),
                a.ncols()
            )));
        }
        if !a.all_finite() {
            return Err(LsError::Operator("Newton matrix has non-finite entries".into()));
        }
        // Overwrites any previous factor
        self.factor = Some(FullPivLu::new(a.as_ref()));
        self.n = a.nrows();
        Ok(())
    }

    fn solve(
        &mut self,
        a: Option<&Mat<f64>>,
        _sys: &mut dyn NewtonSystem<f64>,
        b: &[f64],
        x: &mut [f64],
        _tol: f64,
    ) -> Result<SolveStats<f64>, LsError> {
        let factor = self
            .factor
            .as_ref()
            .ok_or_else(|| LsError::Solver("solve called before factorization".into()))?;
        if b.len() != self.n || x.len() != self.n {
            return Err(LsError::IllInput(format!(
                "vector length {} does not match factored dimension {}",
                b.len(),
                self.n
            )));
        }
        // Solve into scratch so a singular factor leaves `x` untouched
        let n = x.len();
        let mut sol = b.to_vec();
        let sol_mat = MatMut::from_column_major_slice_mut(&mut sol[..], n, 1);
        factor.solve_in_place_with_conj(Conj::No, sol_mat);
        if sol.iter().any(|si| !si.is_finite()) {
            return Err(LsError::Solver("singular Newton matrix".into()));
        }
        x.copy_from_slice(&sol);
        let residual = match a {
            Some(a) => {
                let mut r = vec![0.0; n];
                a.matvec(&*x, &mut r[..]);
                r.iter_mut().zip(b).for_each(|(ri, &bi)| *ri = bi - *ri);
                ().norm(&r[..])
            }
            None => 0.0,
        };
        Ok(SolveStats::direct(residual))
    }

    fn workspace(&self) -> (usize, usize) {
        // LU factors plus row and column permutations
        (self.n * self.n, 2 * self.n)
    }
}
