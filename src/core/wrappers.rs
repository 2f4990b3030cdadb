//! Vector kernels and faer bindings for the core traits.
//!
//! The integrator's state vectors are plain slices. This module supplies the
//! handful of operations the interface needs on them (dot, 2-norm, linear
//! combinations) and the matrix-vector product for the dense `faer::Mat`
//! operator. With the `rayon` feature the reductions run in parallel.

use crate::core::traits::{InnerProduct, MatVec, Real};
use faer::Mat;

/// Dense matrix-vector product for `faer::Mat`.
impl<T: Real> MatVec<[T]> for Mat<T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        assert_eq!(self.nrows(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.ncols(), x.len(), "Input vector x has incorrect length");
        for (i, yi) in y.iter_mut().enumerate() {
            let mut acc = T::zero();
            for (j, &xj) in x.iter().enumerate() {
                acc = acc + self[(i, j)] * xj;
            }
            *yi = acc;
        }
    }
}

/// Inner product and norm for slices, with optional Rayon parallelism.
impl<T: Real> InnerProduct<[T]> for () {
    type Scalar = T;

    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.par_iter()
                .zip(y.par_iter())
                .map(|(xi, yi)| *xi * *yi)
                .reduce(|| T::zero(), |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .zip(y.iter())
                .map(|(xi, yi)| *xi * *yi)
                .fold(T::zero(), |acc, v| acc + v)
        }
    }

    fn norm(&self, x: &[T]) -> T {
        self.dot(x, x).sqrt()
    }
}

/// z ← a·x + b·y
pub fn linear_sum<T: Real>(a: T, x: &[T], b: T, y: &[T], z: &mut [T]) {
    debug_assert_eq!(x.len(), z.len());
    debug_assert_eq!(y.len(), z.len());
    for ((zi, &xi), &yi) in z.iter_mut().zip(x).zip(y) {
        *zi = a * xi + b * yi;
    }
}

/// y ← y + a·x
pub fn axpy<T: Real>(a: T, x: &[T], y: &mut [T]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = *yi + a * xi;
    }
}

/// x ← c·x
pub fn scale<T: Real>(c: T, x: &mut [T]) {
    x.iter_mut().for_each(|xi| *xi = c * *xi);
}

/// Reserve a zeroed work vector without aborting on allocation failure.
pub(crate) fn try_zeroed<T: Real>(n: usize) -> Result<Vec<T>, std::collections::TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)?;
    v.resize(n, T::zero());
    Ok(v)
}
