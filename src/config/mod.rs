//! Configuration surface and documented defaults.

pub mod options;
pub use options::{DEFAULT_DGMAX, DEFAULT_EPLIFAC, DEFAULT_MSBJ, LsOption, MAX_DQ_ITERS};
