//! Core numeric traits for stiffls.

use crate::error::CallbackResult;
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, LowerExp};

/// Floating-point scalar used by every context and solver.
pub trait Real: Float + FromPrimitive + Debug + LowerExp + Send + Sync + 'static {}

impl Real for f32 {}
impl Real for f64 {}

/// Matrix–vector product: y ← A x.
pub trait MatVec<V: ?Sized> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V);
}

/// Inner products & norms.
pub trait InnerProduct<V: ?Sized> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Right-hand side of the ODE system `y' = f(t, y)`.
///
/// The difference-quotient Jacobian and Jacobian-times-vector approximations
/// evaluate it at perturbed states.
pub trait OdeRhs<T> {
    /// Write `f(t, y)` into `ydot`.
    fn eval(&mut self, t: T, y: &[T], ydot: &mut [T]) -> CallbackResult;
}

impl<T, F> OdeRhs<T> for F
where
    F: FnMut(T, &[T], &mut [T]) -> CallbackResult,
{
    fn eval(&mut self, t: T, y: &[T], ydot: &mut [T]) -> CallbackResult {
        self(t, y, ydot)
    }
}
