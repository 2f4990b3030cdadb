//! Convergence bookkeeping and statistics.

pub mod convergence;
pub mod stats;

pub use convergence::{Convergence, SolveStats};
pub use stats::{LsCounter, LsStats};
