//! The Newton point handed to every user callback.

/// State at which the Newton system is linearized.
///
/// `y` and `fy` belong to the problem being solved (the backward state in
/// adjoint mode). `forward` carries the reconstructed forward state for
/// backward problems and `sens` the forward sensitivities, set only for
/// sensitivity-dependent backward contexts.
#[derive(Clone, Copy, Debug)]
pub struct LsPoint<'a, T> {
    pub t: T,
    pub y: &'a [T],
    pub fy: &'a [T],
    pub forward: Option<&'a [T]>,
    pub sens: Option<&'a [Vec<T>]>,
}

impl<'a, T: Copy> LsPoint<'a, T> {
    /// Point of a forward problem.
    pub fn new(t: T, y: &'a [T], fy: &'a [T]) -> Self {
        LsPoint { t, y, fy, forward: None, sens: None }
    }

    /// Problem dimension.
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}
