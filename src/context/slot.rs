//! The integrator's forward linear-solver slot.

use faer::Mat;

use super::ls_context::LsContext;
use crate::core::traits::Real;
use crate::error::{LsError, LsStatus};
use crate::solver::LinearSolver;

enum SlotState<T: Real> {
    Empty,
    /// Initialization ran out of memory; the slot stays unusable until a
    /// later attach succeeds.
    Failed,
    Ready(LsContext<T>),
}

/// Holds the single forward context of an integrator and reports misuse
/// (no solver attached, failed attach) with the matching status.
pub struct LinearSolverSlot<T: Real> {
    state: SlotState<T>,
}

impl<T: Real> LinearSolverSlot<T> {
    pub fn new() -> Self {
        LinearSolverSlot { state: SlotState::Empty }
    }

    /// Bind a solver to the forward problem, replacing any previous context.
    ///
    /// An allocation failure leaves the slot unusable; invalid input leaves it
    /// unchanged.
    pub fn attach(&mut self, n: usize, solver: Box<dyn LinearSolver<T>>, a: Option<Mat<T>>) -> Result<(), LsError> {
        match LsContext::new(n, solver, a) {
            Ok(ctx) => {
                if matches!(self.state, SlotState::Ready(_)) {
                    log::warn!("forward: replacing attached linear solver");
                }
                self.state = SlotState::Ready(ctx);
                Ok(())
            }
            Err(e @ LsError::MemFail(_)) => {
                self.state = SlotState::Failed;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, SlotState::Ready(_))
    }

    pub fn get(&self) -> Result<&LsContext<T>, LsError> {
        match &self.state {
            SlotState::Ready(ctx) => Ok(ctx),
            SlotState::Failed => Err(LsError::MemNull),
            SlotState::Empty => Err(LsError::LsMemNull),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut LsContext<T>, LsError> {
        match &mut self.state {
            SlotState::Ready(ctx) => Ok(ctx),
            SlotState::Failed => Err(LsError::MemNull),
            SlotState::Empty => Err(LsError::LsMemNull),
        }
    }

    /// Last status of the context, or the misuse status of the slot.
    pub fn status(&self) -> LsStatus {
        match self.get() {
            Ok(ctx) => ctx.last_status(),
            Err(e) => e.status(),
        }
    }

    /// Take the context out, leaving the slot empty.
    pub fn detach(&mut self) -> Option<LsContext<T>> {
        match std::mem::replace(&mut self.state, SlotState::Empty) {
            SlotState::Ready(ctx) => Some(ctx),
            _ => None,
        }
    }
}

impl<T: Real> Default for LinearSolverSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
