//! Core traits, the Newton point and vector kernels.

pub mod point;
pub mod traits;
pub mod wrappers;

pub use point::LsPoint;
pub use traits::{InnerProduct, MatVec, OdeRhs, Real};
