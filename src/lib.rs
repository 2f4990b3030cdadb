//! stiffls: Newton linear-solver interface for implicit ODE integrators
//!
//! This crate sits between the Newton iteration of a stiff (BDF-type)
//! integrator and a direct or matrix-free linear solver. It decides when the
//! Jacobian may be reused, builds the Newton system `(I − γJ) x = b`, scales
//! the linear tolerance from the nonlinear one, manages preconditioning and
//! Jacobian-times-vector products, and keeps per-context statistics, for the
//! forward problem and for any number of backward (adjoint) problems.

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod jacobian;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use crate::core::*;
pub use error::*;
pub use jacobian::{JacFn, JacTimesFn, JacTimesSetupFn, JacobianPolicy, RhsFn};
pub use matrix::*;
pub use preconditioner::*;
pub use solver::*;
pub use utils::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
