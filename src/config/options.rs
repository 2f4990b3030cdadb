//! Options for a linear-solver context.
//!
//! This module provides the documented defaults and the `LsOption` enum,
//! which sets one option of an [`LsContext`](crate::context::LsContext) through
//! [`configure`](crate::context::LsContext::configure). The available options
//! are the user Jacobian, the Jacobian reuse thresholds, the inexact-Newton
//! tolerance factor, the preconditioner hooks and the Jacobian-times-vector
//! hooks.

use crate::jacobian::{JacFn, JacTimesFn, JacTimesSetupFn, RhsFn};
use crate::preconditioner::{PrecSetupFn, PrecSolveFn};
use std::fmt;

/// Maximum number of setups that may reuse one Jacobian.
pub const DEFAULT_MSBJ: u64 = 51;

/// Factor between the nonlinear and the linear tolerance.
pub const DEFAULT_EPLIFAC: f64 = 0.05;

/// Relative change in gamma that forces a Jacobian refresh.
pub const DEFAULT_DGMAX: f64 = 0.2;

/// Attempts of the difference-quotient product before giving up.
pub const MAX_DQ_ITERS: usize = 3;

/// One option of a linear-solver context.
pub enum LsOption<T> {
    /// User Jacobian; `None` restores the difference quotient.
    JacFn(Option<JacFn<T>>),
    /// Steps between Jacobian refreshes; `0` restores the default.
    MaxStepsBetweenJac(i64),
    /// Linear tolerance factor in `(0, 1]`; other values restore the default.
    EpsLin(T),
    /// Gamma drift threshold; non-positive values restore the default.
    GammaDriftMax(T),
    /// Preconditioner hooks; both or neither.
    Preconditioner {
        setup: Option<PrecSetupFn<T>>,
        solve: Option<PrecSolveFn<T>>,
    },
    /// Jacobian-times-vector hooks; `apply == None` restores the difference quotient.
    JacTimes {
        setup: Option<JacTimesSetupFn<T>>,
        apply: Option<JacTimesFn<T>>,
    },
    /// Right-hand side used by the difference-quotient product.
    JacTimesRhs(Option<RhsFn<T>>),
}

impl<T: fmt::Debug> fmt::Debug for LsOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LsOption::JacFn(j) => write!(f, "JacFn(bound: {})", j.is_some()),
            LsOption::MaxStepsBetweenJac(m) => write!(f, "MaxStepsBetweenJac({m})"),
            LsOption::EpsLin(e) => write!(f, "EpsLin({e:?})"),
            LsOption::GammaDriftMax(d) => write!(f, "GammaDriftMax({d:?})"),
            LsOption::Preconditioner { setup, solve } => {
                write!(f, "Preconditioner(setup: {}, solve: {})", setup.is_some(), solve.is_some())
            }
            LsOption::JacTimes { setup, apply } => {
                write!(f, "JacTimes(setup: {}, apply: {})", setup.is_some(), apply.is_some())
            }
            LsOption::JacTimesRhs(r) => write!(f, "JacTimesRhs(bound: {})", r.is_some()),
        }
    }
}
