//! Error and status types for stiffls.
//!
//! Every fallible operation returns [`LsError`]. Each variant maps to exactly one
//! [`LsStatus`], the small integer code an integrator branches on. User callbacks
//! report failures through [`CallbackError`], which distinguishes transient
//! problems (the stepper may retry with a fresh Jacobian or a smaller step) from
//! permanent ones.

use std::fmt;
use thiserror::Error;

/// Failure signalled by a user callback.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    /// Transient failure; the caller may retry with adjusted state or step.
    #[error("recoverable")]
    Retryable,
    /// Permanent failure; the current step attempt must be abandoned.
    #[error("unrecoverable")]
    Fatal,
}

impl CallbackError {
    pub fn is_retryable(self) -> bool {
        matches!(self, CallbackError::Retryable)
    }
}

/// Result returned by user callbacks.
pub type CallbackResult<R = ()> = Result<R, CallbackError>;

// Unified error type for stiffls

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LsError {
    #[error("linear solver context is unusable after a failed initialization")]
    MemNull,
    #[error("no linear solver has been attached")]
    LsMemNull,
    #[error("illegal input: {0}")]
    IllInput(String),
    #[error("workspace allocation failed: {0}")]
    MemFail(String),
    #[error("Jacobian evaluation failed ({0})")]
    JacFunc(CallbackError),
    #[error("operator failure: {0}")]
    Operator(String),
    #[error("linear solver failure: {0}")]
    Solver(String),
    #[error("preconditioner setup failed ({0})")]
    PrecSetup(CallbackError),
    #[error("preconditioner solve failed ({0})")]
    PrecSolve(CallbackError),
    #[error("Jacobian-times-vector product failed ({0})")]
    ATimes(CallbackError),
    #[error("Jacobian-times-vector setup failed ({0})")]
    JacTimesSetup(CallbackError),
    #[error("linear iteration stopped after {iterations} iterations with residual {residual:e}")]
    LinConvFail { iterations: usize, residual: f64 },
    #[error("forward trajectory unavailable at t = {0:e}")]
    Trajectory(f64),
    #[error("backward problem {0} has no linear solver registered")]
    NoAdjoint(usize),
    #[error("backward problem {0} has not been initialized")]
    BackwardMemNull(usize),
}

impl LsError {
    /// The status code this failure reports.
    pub fn status(&self) -> LsStatus {
        use CallbackError::{Fatal, Retryable};
        match self {
            LsError::MemNull => LsStatus::MemNull,
            LsError::LsMemNull => LsStatus::LsMemNull,
            LsError::IllInput(_) => LsStatus::IllInput,
            LsError::MemFail(_) => LsStatus::MemFail,
            LsError::JacFunc(Retryable) => LsStatus::JacFuncRecoverable,
            LsError::JacFunc(Fatal) => LsStatus::JacFuncUnrecoverable,
            LsError::Operator(_) => LsStatus::OperatorFail,
            LsError::Solver(_) => LsStatus::SolverFail,
            LsError::PrecSetup(Retryable) => LsStatus::PrecSetupRecoverable,
            LsError::PrecSetup(Fatal) => LsStatus::PrecSetupUnrecoverable,
            LsError::PrecSolve(Retryable) => LsStatus::PrecSolveRecoverable,
            LsError::PrecSolve(Fatal) => LsStatus::PrecSolveUnrecoverable,
            LsError::ATimes(Retryable) => LsStatus::ATimesRecoverable,
            LsError::ATimes(Fatal) => LsStatus::ATimesUnrecoverable,
            LsError::JacTimesSetup(Retryable) => LsStatus::JacTimesSetupRecoverable,
            LsError::JacTimesSetup(Fatal) => LsStatus::JacTimesSetupUnrecoverable,
            LsError::LinConvFail { .. } => LsStatus::LinConvFail,
            LsError::Trajectory(_) => LsStatus::TrajectoryFail,
            LsError::NoAdjoint(_) => LsStatus::NoAdjoint,
            LsError::BackwardMemNull(_) => LsStatus::BackwardMemNull,
        }
    }

    /// Whether the stepper may retry (refresh the Jacobian or cut the step).
    pub fn is_recoverable(&self) -> bool {
        self.status().is_recoverable()
    }

    /// The integer code of [`LsError::status`].
    pub fn code(&self) -> i32 {
        self.status().code()
    }
}

/// Status codes of the linear-solver interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LsStatus {
    Success,
    MemNull,
    LsMemNull,
    IllInput,
    MemFail,
    JacFuncUnrecoverable,
    JacFuncRecoverable,
    OperatorFail,
    SolverFail,
    PrecSetupRecoverable,
    PrecSetupUnrecoverable,
    PrecSolveRecoverable,
    PrecSolveUnrecoverable,
    ATimesRecoverable,
    ATimesUnrecoverable,
    JacTimesSetupRecoverable,
    JacTimesSetupUnrecoverable,
    LinConvFail,
    TrajectoryFail,
    NoAdjoint,
    BackwardMemNull,
}

impl LsStatus {
    /// Every status, in code order.
    pub const ALL: [LsStatus; 21] = [
        LsStatus::Success,
        LsStatus::MemNull,
        LsStatus::LsMemNull,
        LsStatus::IllInput,
        LsStatus::MemFail,
        LsStatus::JacFuncUnrecoverable,
        LsStatus::JacFuncRecoverable,
        LsStatus::OperatorFail,
        LsStatus::SolverFail,
        LsStatus::PrecSetupRecoverable,
        LsStatus::PrecSetupUnrecoverable,
        LsStatus::PrecSolveRecoverable,
        LsStatus::PrecSolveUnrecoverable,
        LsStatus::ATimesRecoverable,
        LsStatus::ATimesUnrecoverable,
        LsStatus::JacTimesSetupRecoverable,
        LsStatus::JacTimesSetupUnrecoverable,
        LsStatus::LinConvFail,
        LsStatus::TrajectoryFail,
        LsStatus::NoAdjoint,
        LsStatus::BackwardMemNull,
    ];

    pub fn code(self) -> i32 {
        match self {
            LsStatus::Success => 0,
            LsStatus::MemNull => -1,
            LsStatus::LsMemNull => -2,
            LsStatus::IllInput => -3,
            LsStatus::MemFail => -4,
            LsStatus::JacFuncUnrecoverable => -6,
            LsStatus::JacFuncRecoverable => -7,
            LsStatus::OperatorFail => -8,
            LsStatus::SolverFail => -9,
            LsStatus::PrecSetupRecoverable => -10,
            LsStatus::PrecSetupUnrecoverable => -11,
            LsStatus::PrecSolveRecoverable => -12,
            LsStatus::PrecSolveUnrecoverable => -13,
            LsStatus::ATimesRecoverable => -14,
            LsStatus::ATimesUnrecoverable => -15,
            LsStatus::JacTimesSetupRecoverable => -16,
            LsStatus::JacTimesSetupUnrecoverable => -17,
            LsStatus::LinConvFail => -18,
            LsStatus::TrajectoryFail => -19,
            LsStatus::NoAdjoint => -101,
            LsStatus::BackwardMemNull => -102,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// Human-readable name of the status.
    pub fn name(self) -> &'static str {
        match self {
            LsStatus::Success => "LS_SUCCESS",
            LsStatus::MemNull => "LS_MEM_NULL",
            LsStatus::LsMemNull => "LS_LMEM_NULL",
            LsStatus::IllInput => "LS_ILL_INPUT",
            LsStatus::MemFail => "LS_MEM_FAIL",
            LsStatus::JacFuncUnrecoverable => "LS_JACFUNC_UNRECVR",
            LsStatus::JacFuncRecoverable => "LS_JACFUNC_RECVR",
            LsStatus::OperatorFail => "LS_OPERATOR_FAIL",
            LsStatus::SolverFail => "LS_SOLVER_FAIL",
            LsStatus::PrecSetupRecoverable => "LS_PSET_FAIL_RECVR",
            LsStatus::PrecSetupUnrecoverable => "LS_PSET_FAIL_UNRECVR",
            LsStatus::PrecSolveRecoverable => "LS_PSOLVE_FAIL_RECVR",
            LsStatus::PrecSolveUnrecoverable => "LS_PSOLVE_FAIL_UNRECVR",
            LsStatus::ATimesRecoverable => "LS_ATIMES_FAIL_RECVR",
            LsStatus::ATimesUnrecoverable => "LS_ATIMES_FAIL_UNRECVR",
            LsStatus::JacTimesSetupRecoverable => "LS_JTSETUP_FAIL_RECVR",
            LsStatus::JacTimesSetupUnrecoverable => "LS_JTSETUP_FAIL_UNRECVR",
            LsStatus::LinConvFail => "LS_CONV_FAIL",
            LsStatus::TrajectoryFail => "LS_TRAJECTORY_FAIL",
            LsStatus::NoAdjoint => "LS_NO_ADJ",
            LsStatus::BackwardMemNull => "LS_LMEMB_NULL",
        }
    }

    /// Failures the Newton/step-size controller is expected to retry.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            LsStatus::JacFuncRecoverable
                | LsStatus::PrecSetupRecoverable
                | LsStatus::PrecSolveRecoverable
                | LsStatus::ATimesRecoverable
                | LsStatus::JacTimesSetupRecoverable
                | LsStatus::LinConvFail
        )
    }
}

impl fmt::Display for LsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&LsError> for LsStatus {
    fn from(e: &LsError) -> Self {
        e.status()
    }
}

impl<R> From<&Result<R, LsError>> for LsStatus {
    fn from(r: &Result<R, LsError>) -> Self {
        match r {
            Ok(_) => LsStatus::Success,
            Err(e) => e.status(),
        }
    }
}

/// Name of a raw status code, `"NONE"` when the code is unknown.
pub fn status_name(code: i64) -> &'static str {
    i32::try_from(code)
        .ok()
        .and_then(LsStatus::from_code)
        .map_or("NONE", LsStatus::name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique_and_round_trip() {
        let codes: HashSet<i32> = LsStatus::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), LsStatus::ALL.len());
        for s in LsStatus::ALL {
            assert_eq!(LsStatus::from_code(s.code()), Some(s));
        }
        let names: HashSet<&str> = LsStatus::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), LsStatus::ALL.len());
    }

    #[test]
    fn unknown_code_has_no_name() {
        assert_eq!(status_name(-5), "NONE");
        assert_eq!(status_name(i64::MAX), "NONE");
        assert_eq!(status_name(-7), "LS_JACFUNC_RECVR");
    }

    #[test]
    fn callback_severity_selects_code() {
        assert_eq!(LsError::JacFunc(CallbackError::Retryable).code(), -7);
        assert_eq!(LsError::JacFunc(CallbackError::Fatal).code(), -6);
        assert!(LsError::PrecSolve(CallbackError::Retryable).is_recoverable());
        assert!(!LsError::Solver("zero pivot".into()).is_recoverable());
        assert!(LsError::LinConvFail { iterations: 5, residual: 1.0 }.is_recoverable());
    }
}
