//! Linear solvers of backward (adjoint) problems.
//!
//! The `AdjointRegistry` is an arena of backward problems addressed by a
//! [`Which`] handle. Each problem may own one [`LsContext`], tagged
//! [`Role::Backward`], that runs the same setup/solve protocol as the forward
//! context. Before every setup or solve the registry asks the
//! [`ForwardTrajectory`] for the forward state at the backward time and hands
//! it to the callbacks through [`LsPoint::forward`]. Sensitivity-dependent
//! contexts additionally see the forward sensitivities in [`LsPoint::sens`];
//! plain contexts never do, whatever point they are handed.
//!
//! Any call naming a `which` without a registered linear solver fails with
//! [`LsError::NoAdjoint`] before touching any state.

use std::sync::Arc;

use faer::Mat;

use super::ls_context::{BackwardKind, LsContext, Role, SetupFlags};
use crate::config::options::LsOption;
use crate::core::point::LsPoint;
use crate::core::traits::Real;
use crate::core::wrappers::try_zeroed;
use crate::error::{CallbackResult, LsError, LsStatus};
use crate::preconditioner::PrecSide;
use crate::solver::LinearSolver;
use crate::utils::stats::LsStats;

/// Handle of a backward problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Which(pub usize);

/// Source of the forward solution during the backward sweep.
pub trait ForwardTrajectory<T>: Send + Sync {
    /// Number of forward sensitivity vectors available.
    fn num_sens(&self) -> usize;

    /// Write the forward state at `t` into `y` and, when requested, the
    /// forward sensitivities into `sens`.
    fn state_at(&self, t: T, y: &mut [T], sens: Option<&mut [Vec<T>]>) -> CallbackResult;
}

/// Backward right-hand side `(t, y, yS, yB, yBdot)`.
pub type BackwardRhsFn<T> = Box<dyn FnMut(T, &[T], Option<&[Vec<T>]>, &[T], &mut [T]) -> CallbackResult + Send>;

/// Linear solver of one backward problem, with its forward-state buffers.
pub struct BackwardLinearSolver<T: Real> {
    ctx: LsContext<T>,
    kind: BackwardKind,
    y_fwd: Vec<T>,
    sens: Vec<Vec<T>>,
    fetch_sens: bool,
}

impl<T: Real> BackwardLinearSolver<T> {
    pub fn context(&self) -> &LsContext<T> {
        &self.ctx
    }

    pub fn kind(&self) -> BackwardKind {
        self.kind
    }
}

struct BackwardProblem<T: Real> {
    n: usize,
    rhs: Option<BackwardRhsFn<T>>,
    rhs_needs_sens: bool,
    ls: Option<BackwardLinearSolver<T>>,
}

/// Arena of backward problems and their linear solvers.
pub struct AdjointRegistry<T: Real> {
    n_fwd: usize,
    trajectory: Arc<dyn ForwardTrajectory<T>>,
    problems: Vec<BackwardProblem<T>>,
}

impl<T: Real> AdjointRegistry<T> {
    /// Registry for a forward problem of dimension `n_fwd`.
    pub fn new(n_fwd: usize, trajectory: Arc<dyn ForwardTrajectory<T>>) -> Self {
        AdjointRegistry { n_fwd, trajectory, problems: Vec::new() }
    }

    /// Create an uninitialised backward problem.
    pub fn create_backward(&mut self) -> Which {
        self.problems.push(BackwardProblem { n: 0, rhs: None, rhs_needs_sens: false, ls: None });
        Which(self.problems.len() - 1)
    }

    pub fn num_backward(&self) -> usize {
        self.problems.len()
    }

    /// Initialise `which` with dimension `n` and a RHS that does not depend
    /// on the forward sensitivities.
    pub fn init_backward<F>(&mut self, which: Which, n: usize, mut rhs: F) -> Result<(), LsError>
    where
        F: FnMut(T, &[T], &[T], &mut [T]) -> CallbackResult + Send + 'static,
    {
        let boxed: BackwardRhsFn<T> = Box::new(move |t: T, y: &[T], _sens: Option<&[Vec<T>]>, yb: &[T], ybdot: &mut [T]| rhs(t, y, yb, ybdot));
        self.install_rhs(which, n, boxed, false)
    }

    /// Initialise `which` with a RHS that depends on the forward sensitivities.
    pub fn init_backward_sens<F>(&mut self, which: Which, n: usize, mut rhs: F) -> Result<(), LsError>
    where
        F: FnMut(T, &[T], &[Vec<T>], &[T], &mut [T]) -> CallbackResult + Send + 'static,
    {
        if self.problems.get(which.0).is_none() {
            return Err(LsError::NoAdjoint(which.0));
        }
        if self.trajectory.num_sens() == 0 {
            return Err(LsError::IllInput("forward trajectory carries no sensitivities".into()));
        }
        let boxed: BackwardRhsFn<T> = Box::new(move |t: T, y: &[T], sens: Option<&[Vec<T>]>, yb: &[T], ybdot: &mut [T]| {
            rhs(t, y, sens.unwrap_or(&[]), yb, ybdot)
        });
        self.install_rhs(which, n, boxed, true)
    }

    fn install_rhs(&mut self, which: Which, n: usize, rhs: BackwardRhsFn<T>, needs_sens: bool) -> Result<(), LsError> {
        let prob = self.problems.get_mut(which.0).ok_or(LsError::NoAdjoint(which.0))?;
        if prob.ls.as_ref().is_some_and(|ls| ls.ctx.len() != n) {
            log::warn!("backward[{}]: dimension changed to {n}, dropping its linear solver", which.0);
            prob.ls = None;
        }
        prob.n = n;
        prob.rhs = Some(rhs);
        prob.rhs_needs_sens = needs_sens;
        if let Some(ls) = prob.ls.as_mut() {
            if needs_sens && ls.sens.is_empty() {
                ls.sens = sens_buffers(self.trajectory.num_sens(), self.n_fwd)?;
            }
            ls.fetch_sens = needs_sens || ls.kind == BackwardKind::SensitivityDependent;
        }
        Ok(())
    }

    /// Attach a linear solver to `which`, replacing any previous one.
    pub fn set_linear_solver_b(
        &mut self,
        which: Which,
        kind: BackwardKind,
        solver: Box<dyn LinearSolver<T>>,
        a: Option<Mat<T>>,
    ) -> Result<(), LsError> {
        let num_sens = self.trajectory.num_sens();
        let n_fwd = self.n_fwd;
        let prob = self.problems.get_mut(which.0).ok_or(LsError::NoAdjoint(which.0))?;
        if prob.rhs.is_none() {
            return Err(LsError::BackwardMemNull(which.0));
        }
        if kind == BackwardKind::SensitivityDependent && num_sens == 0 {
            return Err(LsError::IllInput(
                "sensitivity-dependent linear solver needs forward sensitivities".into(),
            ));
        }
        let ctx = LsContext::with_role(prob.n, solver, a, Role::Backward { which, kind })?;
        let fetch_sens = kind == BackwardKind::SensitivityDependent || prob.rhs_needs_sens;
        let y_fwd = try_zeroed(n_fwd).map_err(|e| LsError::MemFail(e.to_string()))?;
        let sens = if fetch_sens { sens_buffers(num_sens, n_fwd)? } else { Vec::new() };
        if prob.ls.is_some() {
            log::warn!("backward[{}]: replacing linear solver", which.0);
        }
        prob.ls = Some(BackwardLinearSolver { ctx, kind, y_fwd, sens, fetch_sens });
        Ok(())
    }

    fn ls(&self, which: Which) -> Result<&BackwardLinearSolver<T>, LsError> {
        self.problems
            .get(which.0)
            .and_then(|p| p.ls.as_ref())
            .ok_or(LsError::NoAdjoint(which.0))
    }

    fn ls_mut(&mut self, which: Which) -> Result<&mut BackwardLinearSolver<T>, LsError> {
        self.problems
            .get_mut(which.0)
            .and_then(|p| p.ls.as_mut())
            .ok_or(LsError::NoAdjoint(which.0))
    }

    pub fn backward_solver(&self, which: Which) -> Result<&BackwardLinearSolver<T>, LsError> {
        self.ls(which)
    }

    pub fn context_b(&self, which: Which) -> Result<&LsContext<T>, LsError> {
        Ok(&self.ls(which)?.ctx)
    }

    fn context_b_mut(&mut self, which: Which) -> Result<&mut LsContext<T>, LsError> {
        Ok(&mut self.ls_mut(which)?.ctx)
    }

    pub fn set_jac_fn_b<F>(&mut self, which: Which, f: F) -> Result<(), LsError>
    where
        F: for<'a> FnMut(&LsPoint<'a, T>, &mut Mat<T>) -> CallbackResult + Send + 'static,
    {
        self.context_b_mut(which)?.set_jac_fn(f)
    }

    pub fn set_eps_lin_b(&mut self, which: Which, eplifac: T) -> Result<(), LsError> {
        self.context_b_mut(which)?.set_eps_lin(eplifac);
        Ok(())
    }

    pub fn set_max_steps_between_jac_b(&mut self, which: Which, msbj: i64) -> Result<(), LsError> {
        self.context_b_mut(which)?.set_max_steps_between_jac(msbj)
    }

    pub fn set_preconditioner_b<S, P>(&mut self, which: Which, setup: Option<S>, solve: Option<P>) -> Result<(), LsError>
    where
        S: for<'a> FnMut(&LsPoint<'a, T>, bool, T) -> CallbackResult<bool> + Send + 'static,
        P: for<'a> FnMut(&LsPoint<'a, T>, &[T], &mut [T], T, T, PrecSide) -> CallbackResult + Send + 'static,
    {
        self.context_b_mut(which)?.set_preconditioner(setup, solve)
    }

    pub fn set_jac_times_b<S, A>(&mut self, which: Which, setup: Option<S>, apply: A) -> Result<(), LsError>
    where
        S: for<'a> FnMut(&LsPoint<'a, T>) -> CallbackResult + Send + 'static,
        A: for<'a> FnMut(&LsPoint<'a, T>, &[T], &mut [T]) -> CallbackResult + Send + 'static,
    {
        self.context_b_mut(which)?.set_jac_times(setup, apply)
    }

    pub fn configure_b(&mut self, which: Which, opt: LsOption<T>) -> Result<(), LsError> {
        self.context_b_mut(which)?.configure(opt)
    }

    pub fn reinit_b(&mut self, which: Which) -> Result<(), LsError> {
        self.context_b_mut(which)?.reinitialize();
        Ok(())
    }

    pub fn stats_b(&self, which: Which) -> Result<&LsStats, LsError> {
        Ok(self.context_b(which)?.stats())
    }

    pub fn workspace_b(&self, which: Which) -> Result<(usize, usize), LsError> {
        let ls = self.ls(which)?;
        let (rw, iw) = ls.ctx.workspace();
        Ok((rw + ls.y_fwd.len() + ls.sens.iter().map(Vec::len).sum::<usize>(), iw))
    }

    pub fn last_status_b(&self, which: Which) -> Result<LsStatus, LsError> {
        Ok(self.context_b(which)?.last_status())
    }

    /// Borrow backward problem `which` for setups and solves.
    pub fn step_b(&mut self, which: Which) -> Result<BackwardStep<'_, T>, LsError> {
        let trajectory = &*self.trajectory;
        let prob = self.problems.get_mut(which.0).ok_or(LsError::NoAdjoint(which.0))?;
        let BackwardProblem { rhs, ls, .. } = prob;
        let ls = ls.as_mut().ok_or(LsError::NoAdjoint(which.0))?;
        let rhs = rhs.as_mut().ok_or(LsError::BackwardMemNull(which.0))?;
        Ok(BackwardStep { which, trajectory, rhs, ls })
    }

    /// Newton setup of backward problem `which` at backward time `t`.
    pub fn setup_b(
        &mut self,
        which: Which,
        t: T,
        yb: &[T],
        fyb: &[T],
        gamma: T,
        hint: bool,
    ) -> Result<SetupFlags, LsError> {
        self.step_b(which)?.setup(t, yb, fyb, gamma, hint)
    }

    /// Newton solve of backward problem `which` at backward time `t`.
    #[allow(clippy::too_many_arguments)]
    pub fn solve_b(
        &mut self,
        which: Which,
        t: T,
        yb: &[T],
        fyb: &[T],
        b: &[T],
        x: &mut [T],
        tol: T,
    ) -> Result<(), LsError> {
        self.step_b(which)?.solve(t, yb, fyb, b, x, tol)
    }

    /// Run `f` on every backward problem that has a linear solver, in
    /// parallel on the rayon pool.
    #[cfg(feature = "rayon")]
    pub fn par_for_each_b<F, R>(&mut self, f: F) -> Vec<(Which, R)>
    where
        F: Fn(&mut BackwardStep<'_, T>) -> R + Sync + Send,
        R: Send,
    {
        use rayon::prelude::*;
        let trajectory = &*self.trajectory;
        self.problems
            .par_iter_mut()
            .enumerate()
            .filter_map(|(i, p)| BackwardStep::of(Which(i), trajectory, p))
            .map(|mut step| {
                let r = f(&mut step);
                (step.which, r)
            })
            .collect()
    }

    /// Run `f` on every backward problem that has a linear solver.
    #[cfg(not(feature = "rayon"))]
    pub fn par_for_each_b<F, R>(&mut self, f: F) -> Vec<(Which, R)>
    where
        F: Fn(&mut BackwardStep<'_, T>) -> R,
    {
        let trajectory = &*self.trajectory;
        self.problems
            .iter_mut()
            .enumerate()
            .filter_map(|(i, p)| BackwardStep::of(Which(i), trajectory, p))
            .map(|mut step| {
                let r = f(&mut step);
                (step.which, r)
            })
            .collect()
    }
}

/// One backward problem borrowed from the registry.
///
/// Every setup and solve first loads the forward state at the backward time
/// from the trajectory, so callbacks always see `LsPoint::forward`.
pub struct BackwardStep<'a, T: Real> {
    which: Which,
    trajectory: &'a dyn ForwardTrajectory<T>,
    rhs: &'a mut BackwardRhsFn<T>,
    ls: &'a mut BackwardLinearSolver<T>,
}

impl<'a, T: Real> BackwardStep<'a, T> {
    fn of(which: Which, trajectory: &'a dyn ForwardTrajectory<T>, prob: &'a mut BackwardProblem<T>) -> Option<Self> {
        match prob {
            BackwardProblem { rhs: Some(rhs), ls: Some(ls), .. } => Some(BackwardStep { which, trajectory, rhs, ls }),
            _ => None,
        }
    }

    pub fn which(&self) -> Which {
        self.which
    }

    pub fn context(&self) -> &LsContext<T> {
        &self.ls.ctx
    }

    pub fn setup(&mut self, t: T, yb: &[T], fyb: &[T], gamma: T, hint: bool) -> Result<SetupFlags, LsError> {
        self.ls.load_forward(self.trajectory, t)?;
        let BackwardLinearSolver { ctx, y_fwd, sens, fetch_sens, .. } = &mut *self.ls;
        let rhs = &mut *self.rhs;
        let sens_avail: Option<&[Vec<T>]> = if *fetch_sens { Some(&sens[..]) } else { None };
        let point = LsPoint { t, y: yb, fy: fyb, forward: Some(&y_fwd[..]), sens: sens_avail };
        let mut rhs_b = |tt: T, y: &[T], ydot: &mut [T]| -> CallbackResult { rhs(tt, &y_fwd[..], sens_avail, y, ydot) };
        ctx.setup(&mut rhs_b, &point, gamma, hint)
    }

    pub fn solve(&mut self, t: T, yb: &[T], fyb: &[T], b: &[T], x: &mut [T], tol: T) -> Result<(), LsError> {
        self.ls.load_forward(self.trajectory, t)?;
        let BackwardLinearSolver { ctx, y_fwd, sens, fetch_sens, .. } = &mut *self.ls;
        let rhs = &mut *self.rhs;
        let sens_avail: Option<&[Vec<T>]> = if *fetch_sens { Some(&sens[..]) } else { None };
        let point = LsPoint { t, y: yb, fy: fyb, forward: Some(&y_fwd[..]), sens: sens_avail };
        let mut rhs_b = |tt: T, y: &[T], ydot: &mut [T]| -> CallbackResult { rhs(tt, &y_fwd[..], sens_avail, y, ydot) };
        ctx.solve(&mut rhs_b, &point, b, x, tol)
    }
}

impl<T: Real> BackwardLinearSolver<T> {
    fn load_forward(&mut self, traj: &dyn ForwardTrajectory<T>, t: T) -> Result<(), LsError> {
        let sens = if self.fetch_sens { Some(&mut self.sens[..]) } else { None };
        if traj.state_at(t, &mut self.y_fwd, sens).is_err() {
            let err = LsError::Trajectory(t.to_f64().unwrap_or(f64::NAN));
            self.ctx.record_status(err.status());
            return Err(err);
        }
        Ok(())
    }
}

fn sens_buffers<T: Real>(ns: usize, n: usize) -> Result<Vec<Vec<T>>, LsError> {
    (0..ns)
        .map(|_| try_zeroed(n).map_err(|e| LsError::MemFail(e.to_string())))
        .collect()
}
