//! Context module for stiffls.
//!
//! Contexts tie a bound linear solver to the Newton iteration of one problem
//! and hold everything that outlives a single solve: callbacks, thresholds,
//! the cached Jacobian and statistics.
//!
//! Modules:
//! - [`ls_context`]: `LsContext`, the setup/solve bridge shared by forward and backward problems.
//! - [`slot`]: `LinearSolverSlot`, the integrator's single forward context.
//! - [`backward`]: `AdjointRegistry`, the arena of backward contexts.
//!
//! # Example
//! ```rust
//! use stiffls::{CallbackResult, DenseLu, LsContext, LsPoint, dense_zeros};
//!
//! let mut ctx = LsContext::<f64>::new(2, Box::new(DenseLu::new()), Some(dense_zeros(2, 2))).unwrap();
//! let mut rhs = |_t: f64, y: &[f64], f: &mut [f64]| -> CallbackResult {
//!     f[0] = -y[0];
//!     f[1] = -2.0 * y[1];
//!     Ok(())
//! };
//! let (y, fy) = ([1.0, 1.0], [-1.0, -2.0]);
//! let p = LsPoint::new(0.0, &y, &fy);
//! ctx.setup(&mut rhs, &p, 0.1, false).unwrap();
//! let mut x = [0.0; 2];
//! ctx.solve(&mut rhs, &p, &[1.1, 1.2], &mut x, 1e-6).unwrap();
//! assert!((x[0] - 1.0).abs() < 1e-6 && (x[1] - 1.0).abs() < 1e-6);
//! ```

pub mod backward;
pub mod ls_context;
pub mod slot;

pub use backward::{AdjointRegistry, BackwardLinearSolver, BackwardRhsFn, BackwardStep, ForwardTrajectory, Which};
pub use ls_context::{BackwardKind, LsContext, Role, SetupFlags};
pub use slot::LinearSolverSlot;
