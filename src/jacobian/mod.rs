//! Jacobian reuse policy and evaluation.
//!
//! [`JacobianPolicy`] owns the user Jacobian and Jacobian-times-vector
//! callbacks, decides when the cached Jacobian data must be recomputed, and
//! falls back to difference quotients ([`dq`]) when no callback is bound.
//!
//! The cached data is refreshed when any of these holds:
//! - this is the first setup since (re)initialization,
//! - the stepper says the Jacobian may be stale (`hint == false`),
//! - `msbj` setups have reused it,
//! - `gamma` moved by more than `dgmax` relative to the value it was built with.

pub mod dq;

use crate::config::options::{DEFAULT_DGMAX, DEFAULT_MSBJ};
use crate::core::point::LsPoint;
use crate::core::traits::{OdeRhs, Real};
use crate::core::wrappers::try_zeroed;
use crate::error::{CallbackResult, LsError};
use crate::matrix::DenseOperator;
use crate::utils::stats::LsStats;
use faer::Mat;

/// User Jacobian: fill `J = ∂f/∂y` at the point. `J` arrives zeroed.
pub type JacFn<T> = Box<dyn for<'a> FnMut(&LsPoint<'a, T>, &mut Mat<T>) -> CallbackResult + Send>;

/// Jacobian-times-vector setup, run when the Jacobian data is refreshed.
pub type JacTimesSetupFn<T> = Box<dyn for<'a> FnMut(&LsPoint<'a, T>) -> CallbackResult + Send>;

/// Jacobian-times-vector product `jv ← J v`.
pub type JacTimesFn<T> = Box<dyn for<'a> FnMut(&LsPoint<'a, T>, &[T], &mut [T]) -> CallbackResult + Send>;

/// Alternative right-hand side used only by the difference-quotient product.
pub type RhsFn<T> = Box<dyn FnMut(T, &[T], &mut [T]) -> CallbackResult + Send>;

pub struct JacobianPolicy<T> {
    jac_fn: Option<JacFn<T>>,
    jt_setup: Option<JacTimesSetupFn<T>>,
    jt_apply: Option<JacTimesFn<T>>,
    jt_rhs: Option<RhsFn<T>>,
    ytemp: Vec<T>,
    ftemp: Vec<T>,
    msbj: u64,
    dgmax: T,
    saved_gamma: T,
    steps_since_jac: u64,
    first_call: bool,
    jac_current: bool,
    t_jac: Option<T>,
}

impl<T: Real> JacobianPolicy<T> {
    /// Policy for a problem of dimension `n`, with default thresholds.
    pub fn new(n: usize) -> Result<Self, LsError> {
        let ytemp = try_zeroed(n).map_err(|e| LsError::MemFail(e.to_string()))?;
        let ftemp = try_zeroed(n).map_err(|e| LsError::MemFail(e.to_string()))?;
        Ok(JacobianPolicy {
            jac_fn: None,
            jt_setup: None,
            jt_apply: None,
            jt_rhs: None,
            ytemp,
            ftemp,
            msbj: DEFAULT_MSBJ,
            dgmax: default_dgmax(),
            saved_gamma: T::zero(),
            steps_since_jac: 0,
            first_call: true,
            jac_current: false,
            t_jac: None,
        })
    }

    /// Install or remove the user Jacobian. Returns whether one was replaced.
    pub fn set_jac_fn(&mut self, f: Option<JacFn<T>>) -> bool {
        std::mem::replace(&mut self.jac_fn, f).is_some()
    }

    /// Install or remove the user product. Returns whether one was replaced.
    pub fn set_jac_times(&mut self, setup: Option<JacTimesSetupFn<T>>, apply: Option<JacTimesFn<T>>) -> bool {
        self.jt_setup = setup;
        std::mem::replace(&mut self.jt_apply, apply).is_some()
    }

    pub fn set_jac_times_rhs(&mut self, f: Option<RhsFn<T>>) {
        self.jt_rhs = f;
    }

    pub fn has_user_jac(&self) -> bool {
        self.jac_fn.is_some()
    }

    pub fn has_user_jtimes(&self) -> bool {
        self.jt_apply.is_some()
    }

    /// `0` restores the default; negative values are rejected.
    pub fn set_msbj(&mut self, msbj: i64) -> Result<(), LsError> {
        self.msbj = match msbj {
            m if m < 0 => {
                return Err(LsError::IllInput(format!("max steps between Jacobians must be >= 0, got {m}")));
            }
            0 => DEFAULT_MSBJ,
            m => m as u64,
        };
        Ok(())
    }

    /// Non-positive values restore the default.
    pub fn set_dgmax(&mut self, dgmax: T) {
        self.dgmax = if dgmax > T::zero() { dgmax } else { default_dgmax() };
    }

    pub fn msbj(&self) -> u64 {
        self.msbj
    }

    pub fn dgmax(&self) -> T {
        self.dgmax
    }

    pub fn jac_current(&self) -> bool {
        self.jac_current
    }

    pub fn steps_since_jac(&self) -> u64 {
        self.steps_since_jac
    }

    pub fn jac_time(&self) -> Option<T> {
        self.t_jac
    }

    /// Whether the setup at `gamma` must recompute the Jacobian data.
    pub fn needs_refresh(&self, gamma: T, hint: bool) -> bool {
        if self.first_call || !hint || self.steps_since_jac >= self.msbj {
            return true;
        }
        if self.saved_gamma == T::zero() {
            return gamma != T::zero();
        }
        (gamma / self.saved_gamma - T::one()).abs() > self.dgmax
    }

    /// Record a successful refresh at time `t` and `gamma`.
    pub fn mark_refreshed(&mut self, t: T, gamma: T) {
        self.first_call = false;
        self.steps_since_jac = 0;
        self.saved_gamma = gamma;
        self.jac_current = true;
        self.t_jac = Some(t);
    }

    /// Record a setup that reused the cached data.
    pub fn mark_reused(&mut self) {
        self.steps_since_jac += 1;
        self.jac_current = false;
    }

    /// A refresh failed; the cached data is no longer trusted.
    pub fn invalidate(&mut self) {
        self.jac_current = false;
        self.first_call = true;
    }

    /// Back to the state right after construction; callbacks are kept.
    pub fn reset(&mut self) {
        self.saved_gamma = T::zero();
        self.steps_since_jac = 0;
        self.first_call = true;
        self.jac_current = false;
        self.t_jac = None;
    }

    /// Recompute `jac` at the point, from the user callback or by
    /// difference quotients of `rhs`.
    pub fn refresh(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        jac: &mut Mat<T>,
        stats: &mut LsStats,
    ) -> Result<(), LsError> {
        jac.zero_entries();
        match self.jac_fn.as_mut() {
            Some(f) => f(p, jac).map_err(LsError::JacFunc)?,
            None => dq::dq_jac(rhs, p, jac, &mut self.ytemp, &mut self.ftemp, stats)?,
        }
        if !jac.all_finite() {
            return Err(LsError::Operator(format!("Jacobian at t = {:e} has non-finite entries", p.t)));
        }
        Ok(())
    }

    /// Run the user product setup, if any.
    pub fn setup_jtimes(&mut self, p: &LsPoint<'_, T>, stats: &mut LsStats) -> Result<(), LsError> {
        if let Some(f) = self.jt_setup.as_mut() {
            stats.jt_setup_evals += 1;
            f(p).map_err(LsError::JacTimesSetup)?;
        }
        Ok(())
    }

    /// `jv ← J v` through the user product or a difference quotient.
    pub fn apply(
        &mut self,
        rhs: &mut dyn OdeRhs<T>,
        p: &LsPoint<'_, T>,
        v: &[T],
        jv: &mut [T],
        stats: &mut LsStats,
    ) -> Result<(), LsError> {
        stats.jtimes_evals += 1;
        if let Some(f) = self.jt_apply.as_mut() {
            return f(p, v, jv).map_err(LsError::ATimes);
        }
        let f: &mut dyn OdeRhs<T> = match self.jt_rhs.as_mut() {
            Some(alt) => alt,
            None => rhs,
        };
        dq::dq_jtimes(f, p, v, jv, &mut self.ytemp, stats)
    }

    /// Real words held by the policy.
    pub fn workspace(&self) -> usize {
        self.ytemp.len() + self.ftemp.len()
    }
}

fn default_dgmax<T: Real>() -> T {
    T::from_f64(DEFAULT_DGMAX).unwrap_or_else(T::zero)
}
