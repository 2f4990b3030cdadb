//! Preconditioner binding for matrix-free Newton solves.
//!
//! The user supplies a setup hook, called from the Newton setup with the
//! current point and `gamma`, and a solve hook `P z = r`, called by the Krylov
//! solver through [`crate::solver::NewtonSystem::psolve`]. Both or neither must
//! be bound. With nothing bound, setup is a no-op and solve is the identity.

use crate::core::point::LsPoint;
use crate::error::{CallbackResult, LsError};
use crate::utils::stats::LsStats;

/// Which side of the operator the preconditioner is applied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecSide {
    Left,
    Right,
}

/// Preconditioner setup: `(point, jok, gamma) -> jcur`.
///
/// `jok` is true when the Jacobian-related data may be reused; the hook
/// returns whether it recomputed that data.
pub type PrecSetupFn<T> = Box<dyn for<'a> FnMut(&LsPoint<'a, T>, bool, T) -> CallbackResult<bool> + Send>;

/// Preconditioner solve: `(point, r, z, gamma, delta, side)`.
pub type PrecSolveFn<T> =
    Box<dyn for<'a> FnMut(&LsPoint<'a, T>, &[T], &mut [T], T, T, PrecSide) -> CallbackResult + Send>;

struct PrecHooks<T> {
    setup: PrecSetupFn<T>,
    solve: PrecSolveFn<T>,
}

/// Optional pair of preconditioner hooks.
pub struct PrecBinding<T> {
    hooks: Option<PrecHooks<T>>,
}

impl<T: Copy> PrecBinding<T> {
    pub fn new() -> Self {
        PrecBinding { hooks: None }
    }

    /// Bind both hooks, or remove the binding when both are `None`.
    pub fn bind(&mut self, setup: Option<PrecSetupFn<T>>, solve: Option<PrecSolveFn<T>>) -> Result<(), LsError> {
        match (setup, solve) {
            (Some(setup), Some(solve)) => {
                self.hooks = Some(PrecHooks { setup, solve });
                Ok(())
            }
            (None, None) => {
                self.hooks = None;
                Ok(())
            }
            (Some(_), None) => Err(LsError::IllInput("preconditioner setup given without a solve".into())),
            (None, Some(_)) => Err(LsError::IllInput("preconditioner solve given without a setup".into())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.hooks.is_some()
    }

    /// Run the setup hook. Returns the hook's `jcur`, or `false` when unbound.
    pub fn setup(&mut self, p: &LsPoint<'_, T>, jok: bool, gamma: T, stats: &mut LsStats) -> Result<bool, LsError> {
        let Some(hooks) = self.hooks.as_mut() else {
            return Ok(false);
        };
        stats.prec_evals += 1;
        (hooks.setup)(p, jok, gamma).map_err(LsError::PrecSetup)
    }

    /// Solve `P z = r`; copies `r` into `z` when unbound.
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        p: &LsPoint<'_, T>,
        r: &[T],
        z: &mut [T],
        gamma: T,
        delta: T,
        side: PrecSide,
        stats: &mut LsStats,
    ) -> Result<(), LsError> {
        match self.hooks.as_mut() {
            Some(hooks) => {
                stats.prec_solves += 1;
                (hooks.solve)(p, r, z, gamma, delta, side).map_err(LsError::PrecSolve)
            }
            None => {
                z.copy_from_slice(r);
                Ok(())
            }
        }
    }
}

impl<T: Copy> Default for PrecBinding<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;

    fn point<'a>(y: &'a [f64], fy: &'a [f64]) -> LsPoint<'a, f64> {
        LsPoint::new(0.0, y, fy)
    }

    fn jacobi_hooks(d: f64) -> (PrecSetupFn<f64>, PrecSolveFn<f64>) {
        let setup: PrecSetupFn<f64> = Box::new(|_p, jok, _gamma| Ok(!jok));
        let solve: PrecSolveFn<f64> = Box::new(move |_p, r, z, _g, _d, _s| {
            for (zi, ri) in z.iter_mut().zip(r) {
                *zi = ri / d;
            }
            Ok(())
        });
        (setup, solve)
    }

    #[test]
    fn unbound_is_identity_and_free() {
        let mut pb = PrecBinding::<f64>::new();
        let mut stats = LsStats::default();
        let (y, fy) = ([1.0, 2.0], [0.0, 0.0]);
        let p = point(&y, &fy);
        assert!(!pb.setup(&p, true, 0.1, &mut stats).unwrap());
        let mut z = [0.0; 2];
        pb.solve(&p, &[3.0, 4.0], &mut z, 0.1, 1e-3, PrecSide::Left, &mut stats).unwrap();
        assert_eq!(z, [3.0, 4.0]);
        assert!(stats.is_zero());
    }

    #[test]
    fn bound_hooks_are_counted() {
        let mut pb = PrecBinding::<f64>::new();
        let (s, v) = jacobi_hooks(2.0);
        pb.bind(Some(s), Some(v)).unwrap();
        assert!(pb.is_active());
        let mut stats = LsStats::default();
        let (y, fy) = ([1.0, 2.0], [0.0, 0.0]);
        let p = point(&y, &fy);
        assert!(pb.setup(&p, false, 0.1, &mut stats).unwrap());
        let mut z = [0.0; 2];
        pb.solve(&p, &[2.0, 4.0], &mut z, 0.1, 1e-3, PrecSide::Right, &mut stats).unwrap();
        assert_eq!(z, [1.0, 2.0]);
        assert_eq!(stats.prec_evals, 1);
        assert_eq!(stats.prec_solves, 1);

        pb.bind(None, None).unwrap();
        assert!(!pb.is_active());
    }

    #[test]
    fn one_sided_binding_is_rejected() {
        let mut pb = PrecBinding::<f64>::new();
        let (s, v) = jacobi_hooks(1.0);
        assert!(matches!(pb.bind(Some(s), None), Err(LsError::IllInput(_))));
        assert!(matches!(pb.bind(None, Some(v)), Err(LsError::IllInput(_))));
        assert!(!pb.is_active());
    }

    #[test]
    fn hook_failures_keep_their_class() {
        let mut pb = PrecBinding::<f64>::new();
        let setup: PrecSetupFn<f64> = Box::new(|_p, _j, _g| Err(CallbackError::Retryable));
        let solve: PrecSolveFn<f64> = Box::new(|_p, _r, _z, _g, _d, _s| Err(CallbackError::Fatal));
        pb.bind(Some(setup), Some(solve)).unwrap();
        let mut stats = LsStats::default();
        let (y, fy) = ([1.0], [0.0]);
        let p = point(&y, &fy);
        let err = pb.setup(&p, true, 1.0, &mut stats).unwrap_err();
        assert_eq!(err, LsError::PrecSetup(CallbackError::Retryable));
        assert!(err.is_recoverable());
        let mut z = [0.0];
        let err = pb.solve(&p, &[1.0], &mut z, 1.0, 1.0, PrecSide::Left, &mut stats).unwrap_err();
        assert_eq!(err, LsError::PrecSolve(CallbackError::Fatal));
        assert!(!err.is_recoverable());
    }
}
