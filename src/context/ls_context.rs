//! The Newton linear-solver context.
//!
//! An `LsContext` sits between the integrator's Newton iteration and a bound
//! [`LinearSolver`]. The stepper calls [`LsContext::setup`] once per
//! linearization and [`LsContext::solve`] once per Newton correction; the
//! context decides whether the Jacobian data may be reused, builds the Newton
//! matrix `A = I − γJ` for direct solvers or the operator action for
//! matrix-free ones, scales the tolerance and keeps the statistics.
//!
//! # Usage
//!
//! 1. Construct with [`LsContext::new`], binding a solver and, for direct
//!    solvers, an `n × n` operator container.
//! 2. Optionally install callbacks or change thresholds (`set_*` or
//!    [`LsContext::configure`]).
//! 3. Call `setup` and `solve` from the Newton iteration.
//!
//! The same type serves forward and backward problems; the [`Role`] tag
//! records which.

use std::fmt;

use bitflags::bitflags;
use faer::Mat;

use super::backward::Which;
use crate::config::options::{DEFAULT_EPLIFAC, LsOption};
use crate::core::point::LsPoint;
use crate::core::traits::{OdeRhs, Real};
use crate::error::{CallbackResult, LsError, LsStatus};
use crate::jacobian::{JacFn, JacTimesFn, JacTimesSetupFn, JacobianPolicy, RhsFn};
use crate::matrix::{DenseOperator, dense_zeros};
use crate::preconditioner::{PrecBinding, PrecSetupFn, PrecSide, PrecSolveFn};
use crate::solver::{LinearSolver, NewtonSystem, SolverType};
use crate::utils::stats::{LsCounter, LsStats};

/// Kind of a backward problem's linear solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackwardKind {
    /// Callbacks see the forward state only.
    Plain,
    /// Callbacks also see the forward sensitivities.
    SensitivityDependent,
}

/// Which problem a context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Forward,
    Backward { which: Which, kind: BackwardKind },
}

impl Role {
    /// Only sensitivity-dependent backward contexts see forward sensitivities.
    pub fn exposes_sens(&self) -> bool {
        matches!(self, Role::Backward { kind: BackwardKind::SensitivityDependent, .. })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Forward => f.write_str("forward"),
            Role::Backward { which, .. } => write!(f, "backward[{}]", which.0),
        }
    }
}

bitflags! {
    /// What a successful `setup` recomputed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SetupFlags: u8 {
        /// The Jacobian data was recomputed at this point.
        const JAC_REFRESHED = 1;
        /// The preconditioner setup reported recomputing its Jacobian data.
        const PREC_REFRESHED = 1 << 1;
    }
}

/// Linear-solver context for one (forward or backward) problem.
pub struct LsContext<T: Real> {
    n: usize,
    role: Role,
    solver: Box<dyn LinearSolver<T>>,
    solver_type: SolverType,
    /// Newton matrix handed to direct solvers
    a: Option<Mat<T>>,
    /// Cached Jacobian the Newton matrix is built from
    saved_j: Option<Mat<T>>,
    jac: JacobianPolicy<T>,
    prec: PrecBinding<T>,
    gamma: T,
    eplifac: T,
    stats: LsStats,
    last_status: LsStatus,
}

impl<T: Real> LsContext<T> {
    /// Bind `solver` to a forward problem of dimension `n`.
    ///
    /// Direct solvers need an `n × n` operator container `a`; matrix-free
    /// solvers take none.
    pub fn new(n: usize, solver: Box<dyn LinearSolver<T>>, a: Option<Mat<T>>) -> Result<Self, LsError> {
        Self::with_role(n, solver, a, Role::Forward)
    }

    pub(crate) fn with_role(
        n: usize,
        mut solver: Box<dyn LinearSolver<T>>,
        a: Option<Mat<T>>,
        role: Role,
    ) -> Result<Self, LsError> {
        let solver_type = solver.solver_type();
        let (a, saved_j) = match (solver_type, a) {
            (SolverType::Direct, Some(a)) => {
                if !a.is_square_of(n) {
                    return Err(LsError::IllInput(format!(
                        "operator is {}x{}, expected {n}x{n}",
                        a.nrows(),
                        a.ncols()
                    )));
                }
                n.checked_mul(n)
                    .ok_or_else(|| LsError::MemFail(format!("{n}x{n} Jacobian does not fit in memory")))?;
                (Some(a), Some(dense_zeros(n, n)))
            }
            (SolverType::Direct, None) => {
                return Err(LsError::IllInput("direct solver requires an operator".into()));
            }
            (SolverType::MatrixFree, Some(_)) => {
                return Err(LsError::IllInput("matrix-free solver takes no operator".into()));
            }
            (SolverType::MatrixFree, None) => (None, None),
        };
        let jac = JacobianPolicy::new(n)?;
        solver.initialize(n)?;
        log::debug!("{role}: bound {solver_type:?} linear solver, n = {n}");
        Ok(LsContext {
            n,
            role,
            solver,
            solver_type,
            a,
            saved_j,
            jac,
            prec: PrecBinding::new(),
            gamma: T::zero(),
            eplifac: default_eplifac(),
            stats: LsStats::default(),
            last_status: LsStatus::Success,
        })
    }

    /// Zero the statistics and forget the cached Jacobian. Callbacks and
    /// thresholds are kept.
    pub fn reinitialize(&mut self) {
        self.stats.reset();
        self.jac.reset();
        self.gamma = T::zero();
        self.last_status = LsStatus::Success;
    }

    /// Install a user Jacobian (direct solvers only).
    pub fn set_jac_fn<F>(&mut self, f: F) -> Result<(), LsError>
    where
        F: for<'a> FnMut(&LsPoint<'a, T>, &mut Mat<T>) -> CallbackResult + Send + 'static,
    {
        self.install_jac_fn(Some(Box::new(f)))
    }

    /// Go back to the difference-quotient Jacobian.
    pub fn clear_jac_fn(&mut self) -> Result<(), LsError> {
        self.install_jac_fn(None)
    }

    fn install_jac_fn(&mut self, f: Option<JacFn<T>>) -> Result<(), LsError> {
        if self.solver_type != SolverType::Direct {
            return Err(LsError::IllInput("a Jacobian callback needs a direct solver".into()));
        }
        if self.jac.set_jac_fn(f) {
            log::warn!("{}: replacing previously installed Jacobian callback", self.role);
        }
        Ok(())
    }

    /// Install a user Jacobian-times-vector product with an optional setup
    /// hook (matrix-free solvers only).
    pub fn set_jac_times<S, A>(&mut self, setup: Option<S>, apply: A) -> Result<(), LsError>
    where
        S: for<'a> FnMut(&LsPoint<'a, T>) -> CallbackResult + Send + 'static,
        A: for<'a> FnMut(&LsPoint<'a, T>, &[T], &mut [T]) -> CallbackResult + Send + 'static,
    {
        let setup = setup.map(|s| Box::new(s) as JacTimesSetupFn<T>);
        self.install_jac_times(setup, Some(Box::new(apply)))
    }

    /// Go back to the difference-quotient product.
    pub fn clear_jac_times(&mut self) -> Result<(), LsError> {
        self.install_jac_times(None, None)
    }

    fn install_jac_times(
        &mut self,
        setup: Option<JacTimesSetupFn<T>>,
        apply: Option<JacTimesFn<T>>,
    ) -> Result<(), LsError> {
        if self.solver_type != SolverType::MatrixFree {
            return Err(LsError::IllInput("a Jacobian-times-vector callback needs a matrix-free solver".into()));
        }
        if setup.is_some() && apply.is_none() {
            return Err(LsError::IllInput("Jacobian-times-vector setup given without a product".into()));
        }
        if self.jac.set_jac_times(setup, apply) {
            log::warn!("{}: replacing previously installed Jacobian-times-vector callback", self.role);
        }
        Ok(())
    }

    /// Right-hand side used by the difference-quotient product instead of
    /// the one passed to `solve`.
    pub fn set_jac_times_rhs_fn<F>(&mut self, f: F) -> Result<(), LsError>
    where
        F: FnMut(T, &[T], &mut [T]) -> CallbackResult + Send + 'static,
    {
        self.install_jac_times_rhs(Some(Box::new(f)))
    }

    fn install_jac_times_rhs(&mut self, f: Option<RhsFn<T>>) -> Result<(), LsError> {
        if self.solver_type != SolverType::MatrixFree {
            return Err(LsError::IllInput("a difference-quotient RHS needs a matrix-free solver".into()));
        }
        self.jac.set_jac_times_rhs(f);
        Ok(())
    }

    /// Bind both preconditioner hooks, or remove preconditioning with two `None`s.
    pub fn set_preconditioner<S, P>(&mut self, setup: Option<S>, solve: Option<P>) -> Result<(), LsError>
    where
        S: for<'a> FnMut(&LsPoint<'a, T>, bool, T) -> CallbackResult<bool> + Send + 'static,
        P: for<'a> FnMut(&LsPoint<'a, T>, &[T], &mut [T], T, T, PrecSide) -> CallbackResult + Send + 'static,
    {
        let setup = setup.map(|s| Box::new(s) as PrecSetupFn<T>);
        let solve = solve.map(|p| Box::new(p) as PrecSolveFn<T>);
        self.install_preconditioner(setup, solve)
    }

    fn install_preconditioner(
        &mut self,
        setup: Option<PrecSetupFn<T>>,
        solve: Option<PrecSolveFn<T>>,
    ) -> Result<(), LsError> {
        if self.solver_type != SolverType::MatrixFree {
            return Err(LsError::IllInput("preconditioning needs a matrix-free solver".into()));
        }
        self.prec.bind(setup, solve)
    }

    /// Linear tolerance factor; values outside `(0, 1]` select the default.
    pub fn set_eps_lin(&mut self, eplifac: T) {
        self.eplifac = if eplifac > T::zero() && eplifac <= T::one() {
            eplifac
        } else {
            if eplifac != T::zero() {
                log::warn!("{}: eplifac {:e} outside (0, 1], using {DEFAULT_EPLIFAC}", self.role, eplifac);
            }
            default_eplifac()
        };
    }

    /// Setups allowed to reuse one Jacobian; `0` selects the default.
    pub fn set_max_steps_between_jac(&mut self, msbj: i64) -> Result<(), LsError> {
        self.jac.set_msbj(msbj)
    }

    /// Relative gamma change that forces a refresh; non-positive selects
    /// the default.
    pub fn set_gamma_drift_max(&mut self, dgmax: T) {
        self.jac.set_dgmax(dgmax);
    }

    /// Apply one option.
    pub fn configure(&mut self, opt: LsOption<T>) -> Result<(), LsError> {
        log::trace!("{}: configure {:?}", self.role, opt);
        match opt {
            LsOption::JacFn(f) => self.install_jac_fn(f),
            LsOption::MaxStepsBetweenJac(m) => self.set_max_steps_between_jac(m),
            LsOption::EpsLin(e) => {
                self.set_eps_lin(e);
                Ok(())
            }
            LsOption::GammaDriftMax(d) => {
                self.set_gamma_drift_max(d);
                Ok(())
            }
            LsOption::Preconditioner { setup, solve } => self.install_preconditioner(setup, solve),
            LsOption::JacTimes { setup, apply } => self.install_jac_times(setup, apply),
            LsOption::JacTimesRhs(f) => self.install_jac_times_rhs(f),
        }
    }

    /// Prepare the bound solver for Newton corrections at `p`.
    ///
    /// `hint` is the stepper's belief that the cached Jacobian is still
    /// usable; `false` forces a refresh. Forward sensitivities in `p` reach
    /// the callbacks only when [`Role::exposes_sens`] holds.
    pub fn setup(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        gamma: T,
        hint: bool,
    ) -> Result<SetupFlags, LsError> {
        let hidden;
        let p = if p.sens.is_some() && !self.role.exposes_sens() {
            hidden = LsPoint { sens: None, ..*p };
            &hidden
        } else {
            p
        };
        let result = self.setup_inner(rhs, p, gamma, hint);
        self.last_status = LsStatus::from(&result);
        result
    }

    fn setup_inner(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        gamma: T,
        hint: bool,
    ) -> Result<SetupFlags, LsError> {
        self.check_len("state", p.y.len())?;
        self.check_len("rhs value", p.fy.len())?;
        self.gamma = gamma;
        let refresh = self.jac.needs_refresh(gamma, hint);
        if !refresh {
            self.jac.mark_reused();
        }
        // Staleness is only committed once every stage has succeeded; any
        // failure forces a refresh on the next setup.
        match self.setup_stages(rhs, p, gamma, refresh) {
            Ok(mut flags) => {
                if refresh {
                    self.jac.mark_refreshed(p.t, gamma);
                    flags |= SetupFlags::JAC_REFRESHED;
                    log::debug!("{}: Jacobian refreshed at t = {:e}, gamma = {:e}", self.role, p.t, gamma);
                }
                Ok(flags)
            }
            Err(e) => {
                self.jac.invalidate();
                log::debug!("{}: setup failed at t = {:e}: {e}", self.role, p.t);
                Err(e)
            }
        }
    }

    fn setup_stages(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        gamma: T,
        refresh: bool,
    ) -> Result<SetupFlags, LsError> {
        let mut flags = SetupFlags::empty();
        match self.solver_type {
            SolverType::Direct => {
                let (Some(a), Some(j)) = (self.a.as_mut(), self.saved_j.as_mut()) else {
                    return Err(LsError::Operator("direct context has no Newton matrix".into()));
                };
                if refresh {
                    self.stats.jac_evals += 1;
                    self.jac.refresh(rhs, p, j, &mut self.stats)?;
                }
                a.assign_from(j);
                a.scale_add_identity(-gamma);
                if !a.all_finite() {
                    return Err(LsError::Operator(format!("Newton matrix at gamma = {gamma:e} is not finite")));
                }
                self.solver.setup(Some(&*a))?;
            }
            SolverType::MatrixFree => {
                if refresh {
                    self.jac.setup_jtimes(p, &mut self.stats)?;
                }
                if self.prec.is_active() {
                    let jcur = self.prec.setup(p, !refresh, gamma, &mut self.stats)?;
                    if jcur {
                        flags |= SetupFlags::PREC_REFRESHED;
                    }
                    log::debug!("{}: preconditioner set up at t = {:e}, jcur = {jcur}", self.role, p.t);
                }
                self.solver.setup(None)?;
            }
        }
        Ok(flags)
    }

    /// Solve `(I − γJ) x = b` to `eplifac · tol`.
    pub fn solve(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        b: &[T],
        x: &mut [T],
        tol: T,
    ) -> Result<(), LsError> {
        let hidden;
        let p = if p.sens.is_some() && !self.role.exposes_sens() {
            hidden = LsPoint { sens: None, ..*p };
            &hidden
        } else {
            p
        };
        let result = self.solve_inner(rhs, p, b, x, tol);
        self.last_status = LsStatus::from(&result);
        result
    }

    fn solve_inner(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        b: &[T],
        x: &mut [T],
        tol: T,
    ) -> Result<(), LsError> {
        self.check_len("right-hand side", b.len())?;
        self.check_len("solution", x.len())?;
        self.check_len("state", p.y.len())?;
        let delta = self.eplifac * tol;
        log::trace!("{}: solve at t = {:e}, delta = {:e}", self.role, p.t, delta);
        if self.solver_type == SolverType::MatrixFree {
            x.iter_mut().for_each(|xi| *xi = T::zero());
        }

        let mut sys = NewtonOperator {
            rhs,
            point: p,
            gamma: self.gamma,
            jac: &mut self.jac,
            prec: &mut self.prec,
            stats: &mut self.stats,
        };
        let out = match self.solver.solve(self.a.as_ref(), &mut sys, b, x, delta) {
            Ok(out) => out,
            Err(e) => {
                self.stats.lin_iters += self.solver.num_iters() as u64;
                return Err(e);
            }
        };

        self.stats.lin_iters += out.iterations as u64;
        if !out.converged {
            self.stats.lin_conv_fails += 1;
            let residual = out.final_residual.to_f64().unwrap_or(f64::NAN);
            log::warn!(
                "{}: linear solve missed delta = {:e} after {} iterations (residual {:e})",
                self.role,
                delta,
                out.iterations,
                residual
            );
            return Err(LsError::LinConvFail { iterations: out.iterations, residual });
        }
        log::trace!("{}: {} linear iterations", self.role, out.iterations);
        Ok(())
    }

    fn check_len(&self, what: &str, len: usize) -> Result<(), LsError> {
        if len == self.n {
            Ok(())
        } else {
            Err(LsError::IllInput(format!("{what} has length {len}, expected {}", self.n)))
        }
    }

    /// Real and integer workspace: the context's own storage plus the solver's.
    pub fn workspace(&self) -> (usize, usize) {
        let mats = self.a.as_ref().map_or(0, |a| a.nrows() * a.ncols())
            + self.saved_j.as_ref().map_or(0, |j| j.nrows() * j.ncols());
        let (srw, siw) = self.solver.workspace();
        (mats + self.jac.workspace() + srw, siw)
    }

    pub fn stats(&self) -> &LsStats {
        &self.stats
    }

    pub fn counter(&self, counter: LsCounter) -> u64 {
        self.stats.get(counter)
    }

    pub fn num_jac_evals(&self) -> u64 {
        self.stats.jac_evals
    }

    pub fn num_prec_evals(&self) -> u64 {
        self.stats.prec_evals
    }

    pub fn num_prec_solves(&self) -> u64 {
        self.stats.prec_solves
    }

    pub fn num_lin_iters(&self) -> u64 {
        self.stats.lin_iters
    }

    pub fn num_lin_conv_fails(&self) -> u64 {
        self.stats.lin_conv_fails
    }

    pub fn num_jt_setup_evals(&self) -> u64 {
        self.stats.jt_setup_evals
    }

    pub fn num_jtimes_evals(&self) -> u64 {
        self.stats.jtimes_evals
    }

    pub fn num_rhs_evals(&self) -> u64 {
        self.stats.rhs_evals
    }

    /// Status of the most recent `setup` or `solve`.
    pub fn last_status(&self) -> LsStatus {
        self.last_status
    }

    pub(crate) fn record_status(&mut self, status: LsStatus) {
        self.last_status = status;
    }

    /// Whether the latest setup recomputed the Jacobian data.
    pub fn jac_current(&self) -> bool {
        self.jac.jac_current()
    }

    pub fn steps_since_jac(&self) -> u64 {
        self.jac.steps_since_jac()
    }

    /// Time of the last Jacobian refresh, if any since (re)initialization.
    pub fn jac_time(&self) -> Option<T> {
        self.jac.jac_time()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn solver_type(&self) -> SolverType {
        self.solver_type
    }

    pub fn gamma(&self) -> T {
        self.gamma
    }

    pub fn eps_lin(&self) -> T {
        self.eplifac
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

fn default_eplifac<T: Real>() -> T {
    T::from_f64(DEFAULT_EPLIFAC).unwrap_or_else(T::one)
}

/// The Newton operator `I − γJ` and the preconditioner, seen by a
/// matrix-free solver.
struct NewtonOperator<'s, 'p, T: Real> {
    rhs: &'s mut dyn OdeRhs<T>,
    point: &'s LsPoint<'p, T>,
    gamma: T,
    jac: &'s mut JacobianPolicy<T>,
    prec: &'s mut PrecBinding<T>,
    stats: &'s mut LsStats,
}

impl<T: Real> NewtonSystem<T> for NewtonOperator<'_, '_, T> {
    fn atimes(&mut self, v: &[T], z: &mut [T]) -> Result<(), LsError> {
        self.jac.apply(&mut *self.rhs, self.point, v, z, self.stats)?;
        for (zi, &vi) in z.iter_mut().zip(v) {
            *zi = vi - self.gamma * *zi;
        }
        Ok(())
    }

    fn psolve(&mut self, r: &[T], z: &mut [T], tol: T, side: PrecSide) -> Result<(), LsError> {
        self.prec.solve(self.point, r, z, self.gamma, tol, side, self.stats)
    }

    fn preconditioned(&self) -> bool {
        self.prec.is_active()
    }
}
