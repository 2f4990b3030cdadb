//! Matrix-free restarted GMRES (Saad §6.4)
//!
//! The Newton matrix `A = I − γJ` is only available through its action, so the
//! Arnoldi process calls [`NewtonSystem::atimes`] and, when a preconditioner is
//! bound, [`NewtonSystem::psolve`]. The tolerance comes from the Newton
//! interface on every solve and is absolute in the 2-norm of the
//! (left-preconditioned, if applicable) residual.
//!
//! # Features
//! - Left, right, or no preconditioning
//! - Double (iterative) Gram-Schmidt orthogonalization
//! - Happy breakdown detection for early termination
//! - Givens rotations for the least-squares update
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4

use crate::core::traits::{InnerProduct, Real};
use crate::core::wrappers::axpy;
use crate::error::LsError;
use crate::preconditioner::PrecSide;
use crate::solver::{LinearSolver, NewtonSystem, SolverType};
use crate::utils::convergence::{Convergence, SolveStats};
use faer::Mat;

/// Preconditioning mode for GMRES (none, left, or right)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Preconditioning {
    None,
    Left,
    Right,
}

/// GMRES solver with restart and preconditioning options.
pub struct GmresSolver<T> {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Number of restarts allowed after the first cycle
    pub max_restarts: usize,
    /// Side used when a preconditioner is bound
    pub preconditioning: Preconditioning,
    n: usize,
    iters: usize,
    _scalar: std::marker::PhantomData<T>,
}

impl<T: Real> GmresSolver<T> {
    pub fn new(restart: usize, max_restarts: usize) -> Self {
        Self {
            restart: restart.max(1),
            max_restarts,
            preconditioning: Preconditioning::Left,
            n: 0,
            iters: 0,
            _scalar: std::marker::PhantomData,
        }
    }

    /// Set the preconditioning mode (left, right, or none).
    pub fn with_preconditioning(mut self, mode: Preconditioning) -> Self {
        self.preconditioning = mode;
        self
    }

    /// Maximum number of linear iterations per solve.
    pub fn max_iters(&self) -> usize {
        self.restart * (self.max_restarts + 1)
    }

    /// w ← op(v), where op folds the preconditioner in on the configured side.
    fn apply_operator(
        sys: &mut dyn NewtonSystem<T>,
        mode: Preconditioning,
        v: &[T],
        w: &mut [T],
        work: &mut [T],
        tol: T,
    ) -> Result<(), LsError> {
        match mode {
            Preconditioning::None => sys.atimes(v, w),
            Preconditioning::Left => {
                sys.atimes(v, work)?;
                sys.psolve(work, w, tol, PrecSide::Left)
            }
            Preconditioning::Right => {
                sys.psolve(v, work, tol, PrecSide::Right)?;
                sys.atimes(work, w)
            }
        }
    }

    /// r ← b − A x, preconditioned on the left when requested.
    fn residual(
        sys: &mut dyn NewtonSystem<T>,
        mode: Preconditioning,
        b: &[T],
        x: &[T],
        r: &mut [T],
        work: &mut [T],
        tol: T,
    ) -> Result<(), LsError> {
        sys.atimes(x, work)?;
        work.iter_mut().zip(b).for_each(|(wi, &bi)| *wi = bi - *wi);
        if mode == Preconditioning::Left {
            sys.psolve(work, r, tol, PrecSide::Left)
        } else {
            r.copy_from_slice(work);
            Ok(())
        }
    }

    /// Apply Givens rotations to Hessenberg matrix and update g vector.
    fn apply_givens_and_update_g(h: &mut [Vec<T>], g: &mut [T], cs: &mut [T], sn: &mut [T], j: usize, epsilon: T) {
        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let h_kk = h[j][j];
        let h_k1k = h[j + 1][j];
        let r = (h_kk * h_kk + h_k1k * h_k1k).sqrt();
        if r.abs() < epsilon {
            cs[j] = T::one();
            sn[j] = T::zero();
        } else {
            cs[j] = h_kk / r;
            sn[j] = h_k1k / r;
        }
        h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
        h[j + 1][j] = T::zero();
        let temp = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = temp;
    }

    /// Solve upper-triangular system Hy = g for y, with zero-pivot protection.
    fn back_substitution(h: &[Vec<T>], g: &[T], y: &mut [T], m: usize, epsilon: T) {
        for i in (0..m).rev() {
            y[i] = g[i];
            for j in (i + 1)..m {
                y[i] = y[i] - h[i][j] * y[j];
            }
            if h[i][i].abs() > epsilon {
                y[i] = y[i] / h[i][i];
            } else {
                y[i] = T::zero();
            }
        }
    }
}

impl<T: Real> LinearSolver<T> for GmresSolver<T> {
    fn solver_type(&self) -> SolverType {
        SolverType::MatrixFree
    }

    fn initialize(&mut self, n: usize) -> Result<(), LsError> {
        self.n = n;
        Ok(())
    }

    fn setup(&mut self, _a: Option<&Mat<T>>) -> Result<(), LsError> {
        Ok(())
    }

    fn solve(
        &mut self,
        _a: Option<&Mat<T>>,
        sys: &mut dyn NewtonSystem<T>,
        b: &[T],
        x: &mut [T],
        tol: T,
    ) -> Result<SolveStats<T>, LsError> {
        let n = b.len();
        if x.len() != n {
            return Err(LsError::IllInput(format!(
                "solution length {} does not match right-hand side length {}",
                x.len(),
                n
            )));
        }
        self.n = n;
        self.iters = 0;
        let ip = ();
        let mode = if sys.preconditioned() { self.preconditioning } else { Preconditioning::None };
        let conv = Convergence { tol, max_iters: self.max_iters() };
        let epsilon = T::from_f64(1e-14).unwrap_or_else(T::epsilon);
        let m = self.restart;

        x.iter_mut().for_each(|xi| *xi = T::zero());
        let mut work = vec![T::zero(); n];
        // x0 = 0, so r0 = b
        let mut r = b.to_vec();
        if mode == Preconditioning::Left {
            sys.psolve(b, &mut r, tol, PrecSide::Left)?;
        }
        let mut beta = ip.norm(&r[..]);
        let mut stats = SolveStats { iterations: 0, final_residual: beta, converged: beta <= tol };
        if stats.converged {
            return Ok(stats);
        }

        let mut total = 0usize;
        for _cycle in 0..=self.max_restarts {
            let mut v_basis: Vec<Vec<T>> = Vec::with_capacity(m + 1);
            v_basis.push(r.iter().map(|&ri| ri / beta).collect());
            let mut h = vec![vec![T::zero(); m]; m + 1];
            let mut g = vec![T::zero(); m + 1];
            g[0] = beta;
            let mut cs = vec![T::zero(); m];
            let mut sn = vec![T::zero(); m];
            let mut k = 0;
            let mut breakdown = false;

            for j in 0..m {
                let mut w = vec![T::zero(); n];
                Self::apply_operator(sys, mode, &v_basis[j], &mut w, &mut work, tol)?;
                // Modified Gram-Schmidt, applied twice
                for _pass in 0..2 {
                    for (i, vi) in v_basis.iter().enumerate().take(j + 1) {
                        let hij = ip.dot(&w[..], &vi[..]);
                        h[i][j] = h[i][j] + hij;
                        axpy(-hij, vi, &mut w);
                    }
                }
                let h_next = ip.norm(&w[..]);
                h[j + 1][j] = h_next;
                Self::apply_givens_and_update_g(&mut h, &mut g, &mut cs, &mut sn, j, epsilon);
                k = j + 1;
                total += 1;
                self.iters = total;

                let res = g[j + 1].abs();
                if !res.is_finite() {
                    return Err(LsError::Solver("GMRES residual is not finite".into()));
                }
                let (stop, s) = conv.check(res, total);
                stats = s;
                if stop {
                    break;
                }
                // Happy breakdown: the Krylov space is invariant
                if h_next <= epsilon * beta {
                    breakdown = true;
                    break;
                }
                v_basis.push(w.iter().map(|&wi| wi / h_next).collect());
            }

            let mut y = vec![T::zero(); k];
            Self::back_substitution(&h, &g, &mut y, k, epsilon);
            let mut correction = vec![T::zero(); n];
            for (yi, vi) in y.iter().zip(&v_basis) {
                axpy(*yi, vi, &mut correction);
            }
            if mode == Preconditioning::Right {
                sys.psolve(&correction, &mut work, tol, PrecSide::Right)?;
                axpy(T::one(), &work, x);
            } else {
                axpy(T::one(), &correction, x);
            }

            if stats.converged || total >= conv.max_iters {
                log::trace!("gmres: {} iterations, residual {:e}", total, stats.final_residual);
                return Ok(stats);
            }

            Self::residual(sys, mode, b, x, &mut r, &mut work, tol)?;
            beta = ip.norm(&r[..]);
            stats.final_residual = beta;
            if beta <= tol {
                stats.converged = true;
                return Ok(stats);
            }
            if breakdown {
                return Err(LsError::Solver(format!(
                    "GMRES stagnated at residual {:e} after breakdown",
                    beta
                )));
            }
        }
        Ok(stats)
    }

    fn num_iters(&self) -> usize {
        self.iters
    }

    fn workspace(&self) -> (usize, usize) {
        let m = self.restart;
        (self.n * (m + 4) + (m + 1) * m + 3 * m + 1, 0)
    }
}
