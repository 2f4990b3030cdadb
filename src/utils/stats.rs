//! Counters kept by every linear-solver context.

use std::fmt;

/// Names one counter of [`LsStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LsCounter {
    JacEvals,
    PrecEvals,
    PrecSolves,
    LinIters,
    LinConvFails,
    JacTimesSetupEvals,
    JacTimesEvals,
    RhsEvals,
}

/// Monotonic counters of one context, reset only by (re)initialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LsStats {
    /// Jacobian evaluations (user or difference quotient).
    pub jac_evals: u64,
    /// Preconditioner setup calls.
    pub prec_evals: u64,
    /// Preconditioner solve calls.
    pub prec_solves: u64,
    /// Linear iterations.
    pub lin_iters: u64,
    /// Linear solves that did not reach their tolerance.
    pub lin_conv_fails: u64,
    /// Jacobian-times-vector setup calls.
    pub jt_setup_evals: u64,
    /// Jacobian-times-vector products.
    pub jtimes_evals: u64,
    /// RHS evaluations spent on difference quotients.
    pub rhs_evals: u64,
}

impl LsStats {
    pub fn get(&self, counter: LsCounter) -> u64 {
        match counter {
            LsCounter::JacEvals => self.jac_evals,
            LsCounter::PrecEvals => self.prec_evals,
            LsCounter::PrecSolves => self.prec_solves,
            LsCounter::LinIters => self.lin_iters,
            LsCounter::LinConvFails => self.lin_conv_fails,
            LsCounter::JacTimesSetupEvals => self.jt_setup_evals,
            LsCounter::JacTimesEvals => self.jtimes_evals,
            LsCounter::RhsEvals => self.rhs_evals,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = LsStats::default();
    }

    /// Whether every counter is zero.
    pub fn is_zero(&self) -> bool {
        *self == LsStats::default()
    }
}

impl fmt::Display for LsStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jac={} psetup={} psolve={} liniters={} convfails={} jtsetup={} jtimes={} rhs={}",
            self.jac_evals,
            self.prec_evals,
            self.prec_solves,
            self.lin_iters,
            self.lin_conv_fails,
            self.jt_setup_evals,
            self.jtimes_evals,
            self.rhs_evals
        )
    }
}
