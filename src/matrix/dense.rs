//! Dense operator container on top of Faer.
//!
//! Direct solvers receive the Newton matrix `A = I − γJ` in a `faer::Mat<T>`.
//! The `DenseOperator` trait adds the few in-place updates the interface needs
//! to build `A` from the cached Jacobian without reallocating.

use crate::core::traits::Real;
use faer::Mat;

/// In-place operations on the dense Newton-matrix container.
pub trait DenseOperator<T> {
    /// Set every entry to zero.
    fn zero_entries(&mut self);
    /// Overwrite `self` with `other` (same shape).
    fn assign_from(&mut self, other: &Self);
    /// A ← c·A + I
    fn scale_add_identity(&mut self, c: T);
    /// Whether every entry is finite.
    fn all_finite(&self) -> bool;
    /// Whether the container is `n × n`.
    fn is_square_of(&self, n: usize) -> bool;
}

impl<T: Real> DenseOperator<T> for Mat<T> {
    fn zero_entries(&mut self) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] = T::zero();
            }
        }
    }

    fn assign_from(&mut self, other: &Self) {
        assert_eq!(self.nrows(), other.nrows(), "row count mismatch");
        assert_eq!(self.ncols(), other.ncols(), "column count mismatch");
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] = other[(i, j)];
            }
        }
    }

    fn scale_add_identity(&mut self, c: T) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                let v = c * self[(i, j)];
                self[(i, j)] = if i == j { v + T::one() } else { v };
            }
        }
    }

    fn all_finite(&self) -> bool {
        (0..self.ncols()).all(|j| (0..self.nrows()).all(|i| self[(i, j)].is_finite()))
    }

    fn is_square_of(&self, n: usize) -> bool {
        self.nrows() == n && self.ncols() == n
    }
}

/// Zero-filled `nrows × ncols` matrix.
pub fn dense_zeros<T: Real>(nrows: usize, ncols: usize) -> Mat<T> {
    Mat::from_fn(nrows, ncols, |_, _| T::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newton_matrix_from_jacobian() {
        let j = Mat::from_fn(2, 2, |i, k| (i * 2 + k) as f64 + 1.0);
        let mut a = dense_zeros::<f64>(2, 2);
        a.assign_from(&j);
        a.scale_add_identity(-0.5);
        assert_eq!(a[(0, 0)], 0.5);
        assert_eq!(a[(0, 1)], -1.0);
        assert_eq!(a[(1, 0)], -1.5);
        assert_eq!(a[(1, 1)], -1.0);
        assert!(a.all_finite());
        a[(1, 0)] = f64::NAN;
        assert!(!a.all_finite());
        a.zero_entries();
        assert!(a.is_square_of(2));
        assert_eq!(a[(1, 0)], 0.0);
    }
}
