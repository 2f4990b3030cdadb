//! Matrix module: the dense operator container.

pub mod dense;
pub use dense::{DenseOperator, dense_zeros};
