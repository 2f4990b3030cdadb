//! Matrix-free Newton solves: difference-quotient products, user products,
//! preconditioning and convergence failures.

use approx::assert_abs_diff_eq;
use faer::Mat;
use std::sync::{Arc, Mutex};
use stiffls::{
    CallbackError, CallbackResult, DenseLu, GmresSolver, LinearSolver, LsContext, LsError, LsPoint, LsStatus,
    NewtonSystem, PrecSide, Preconditioning, SetupFlags, SolveStats, SolverType, dense_zeros,
};

/// Iterative solver that applies the operator a fixed number of times.
struct ApplyN(usize);

impl LinearSolver<f64> for ApplyN {
    fn solver_type(&self) -> SolverType {
        SolverType::MatrixFree
    }
    fn setup(&mut self, a: Option<&Mat<f64>>) -> Result<(), LsError> {
        assert!(a.is_none());
        Ok(())
    }
    fn solve(
        &mut self,
        _a: Option<&Mat<f64>>,
        sys: &mut dyn NewtonSystem<f64>,
        b: &[f64],
        x: &mut [f64],
        _tol: f64,
    ) -> Result<SolveStats<f64>, LsError> {
        let mut z = vec![0.0; b.len()];
        for _ in 0..self.0 {
            sys.atimes(b, &mut z)?;
        }
        x.copy_from_slice(b);
        Ok(SolveStats { iterations: self.0, final_residual: 0.0, converged: true })
    }
}

/// Stiff tridiagonal diffusion-reaction RHS.
fn diffusion(_t: f64, y: &[f64], f: &mut [f64]) -> CallbackResult {
    let n = y.len();
    for i in 0..n {
        let left = if i > 0 { y[i - 1] } else { 0.0 };
        let right = if i + 1 < n { y[i + 1] } else { 0.0 };
        f[i] = 100.0 * (left - 2.0 * y[i] + right) - y[i] * y[i];
    }
    Ok(())
}

fn diffusion_jac(y: &[f64]) -> Mat<f64> {
    let n = y.len();
    Mat::from_fn(n, n, |i, j| {
        if i == j {
            -200.0 - 2.0 * y[i]
        } else if i.abs_diff(j) == 1 {
            100.0
        } else {
            0.0
        }
    })
}

#[test]
fn dq_product_costs_one_rhs_per_apply() {
    let mut ctx = LsContext::new(3, Box::new(ApplyN(4)), None).unwrap();
    let err = ctx.set_jac_fn(|_p: &LsPoint<'_, f64>, _j: &mut Mat<f64>| -> CallbackResult {
        panic!("a matrix-free context must never call a Jacobian")
    });
    assert!(matches!(err, Err(LsError::IllInput(_))));

    let mut rhs = diffusion;
    let y = [1.0, 0.5, 0.25];
    let mut fy = [0.0; 3];
    diffusion(0.0, &y, &mut fy).unwrap();
    let p = LsPoint::new(0.0, &y, &fy);
    ctx.setup(&mut rhs, &p, 0.01, false).unwrap();
    assert_eq!(ctx.num_rhs_evals(), 0);
    let mut x = [0.0; 3];
    ctx.solve(&mut rhs, &p, &[1.0, 1.0, 1.0], &mut x, 1e-4).unwrap();
    assert_eq!(ctx.num_rhs_evals(), 4);
    assert_eq!(ctx.num_jtimes_evals(), 4);
    assert_eq!(ctx.num_lin_iters(), 4);
    ctx.solve(&mut rhs, &p, &[1.0, 1.0, 1.0], &mut x, 1e-4).unwrap();
    assert_eq!(ctx.num_rhs_evals(), 8);
}

#[test]
fn user_product_bypasses_rhs() {
    let mut ctx = LsContext::new(2, Box::new(ApplyN(3)), None).unwrap();
    let setups = Arc::new(Mutex::new(0));
    let seen = Arc::clone(&setups);
    ctx.set_jac_times(
        Some(move |_p: &LsPoint<'_, f64>| -> CallbackResult {
            *seen.lock().unwrap() += 1;
            Ok(())
        }),
        |_p: &LsPoint<'_, f64>, v: &[f64], jv: &mut [f64]| -> CallbackResult {
            jv[0] = -v[0];
            jv[1] = -v[1];
            Ok(())
        },
    )
    .unwrap();
    let mut rhs = |_t: f64, _y: &[f64], _f: &mut [f64]| -> CallbackResult { panic!("rhs must not be evaluated") };
    let (y, fy) = ([1.0, 1.0], [-1.0, -1.0]);
    let p = LsPoint::new(0.0, &y, &fy);
    ctx.setup(&mut rhs, &p, 0.1, false).unwrap();
    ctx.setup(&mut rhs, &p, 0.1, true).unwrap();
    assert_eq!(*setups.lock().unwrap(), 1);
    assert_eq!(ctx.num_jt_setup_evals(), 1);
    let mut x = [0.0; 2];
    ctx.solve(&mut rhs, &p, &[1.0, 2.0], &mut x, 1e-4).unwrap();
    assert_eq!(ctx.num_jtimes_evals(), 3);
    assert_eq!(ctx.num_rhs_evals(), 0);
}

#[test]
fn preconditioned_gmres_matches_direct_solution() {
    let n = 20;
    let y: Vec<f64> = (0..n).map(|i| 1.0 + 0.1 * i as f64).collect();
    let mut fy = vec![0.0; n];
    diffusion(0.0, &y, &mut fy).unwrap();
    let gamma = 0.05;
    let b: Vec<f64> = (0..n).map(|i| ((i + 1) as f64).sin()).collect();

    // Reference: dense LU on the analytic Jacobian.
    let mut direct = LsContext::new(n, Box::new(DenseLu::new()), Some(dense_zeros(n, n))).unwrap();
    direct
        .set_jac_fn(|p: &LsPoint<'_, f64>, j: &mut Mat<f64>| -> CallbackResult {
            let exact = diffusion_jac(p.y);
            for c in 0..p.len() {
                for r in 0..p.len() {
                    j[(r, c)] = exact[(r, c)];
                }
            }
            Ok(())
        })
        .unwrap();
    let mut rhs = diffusion;
    let p = LsPoint::new(0.0, &y, &fy);
    direct.setup(&mut rhs, &p, gamma, false).unwrap();
    let mut x_ref = vec![0.0; n];
    direct.solve(&mut rhs, &p, &b, &mut x_ref, 1e-8).unwrap();

    for side in [Preconditioning::Left, Preconditioning::Right] {
        let solver = GmresSolver::<f64>::new(n, 3).with_preconditioning(side);
        let mut ctx = LsContext::new(n, Box::new(solver), None).unwrap();
        // Jacobi on the Newton matrix: diag(1 - gamma * J_ii)
        let diag = Arc::new(Mutex::new(vec![1.0; n]));
        let d_setup = Arc::clone(&diag);
        let d_solve = Arc::clone(&diag);
        let jok_seen = Arc::new(Mutex::new(Vec::new()));
        let jok_log = Arc::clone(&jok_seen);
        ctx.set_preconditioner(
            Some(move |p: &LsPoint<'_, f64>, jok: bool, gamma: f64| -> CallbackResult<bool> {
                jok_log.lock().unwrap().push(jok);
                let mut d = d_setup.lock().unwrap();
                for (i, di) in d.iter_mut().enumerate() {
                    *di = 1.0 - gamma * (-200.0 - 2.0 * p.y[i]);
                }
                Ok(true)
            }),
            Some(
                move |_p: &LsPoint<'_, f64>, r: &[f64], z: &mut [f64], _g: f64, _delta: f64, _s: PrecSide| -> CallbackResult {
                    let d = d_solve.lock().unwrap();
                    for ((zi, ri), di) in z.iter_mut().zip(r).zip(d.iter()) {
                        *zi = ri / di;
                    }
                    Ok(())
                },
            ),
        )
        .unwrap();

        let flags = ctx.setup(&mut rhs, &p, gamma, false).unwrap();
        assert!(flags.contains(SetupFlags::JAC_REFRESHED | SetupFlags::PREC_REFRESHED));
        let flags = ctx.setup(&mut rhs, &p, gamma, true).unwrap();
        assert!(!flags.contains(SetupFlags::JAC_REFRESHED));
        assert_eq!(*jok_seen.lock().unwrap(), vec![false, true]);

        let mut x = vec![0.0; n];
        ctx.solve(&mut rhs, &p, &b, &mut x, 1e-6).unwrap();
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_ref[i], epsilon = 1e-6);
        }
        assert_eq!(ctx.num_prec_evals(), 2);
        assert!(ctx.num_prec_solves() > 0);
        assert!(ctx.num_lin_iters() > 0);
        assert_eq!(ctx.num_jtimes_evals(), ctx.num_rhs_evals());
    }
}

#[test]
fn exhausted_iterations_are_a_recoverable_convergence_failure() {
    let n = 10;
    let y = vec![1.0; n];
    let mut fy = vec![0.0; n];
    diffusion(0.0, &y, &mut fy).unwrap();
    let mut ctx = LsContext::new(n, Box::new(GmresSolver::<f64>::new(1, 0)), None).unwrap();
    let mut rhs = diffusion;
    let p = LsPoint::new(0.0, &y, &fy);
    ctx.setup(&mut rhs, &p, 1.0, false).unwrap();
    let b: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -3.0 }).collect();
    let mut x = vec![0.0; n];
    let err = ctx.solve(&mut rhs, &p, &b, &mut x, 1e-12).unwrap_err();
    assert!(matches!(err, LsError::LinConvFail { iterations: 1, .. }));
    assert!(err.is_recoverable());
    assert_eq!(ctx.num_lin_conv_fails(), 1);
    assert_eq!(ctx.num_lin_iters(), 1);
    assert_eq!(ctx.last_status(), LsStatus::LinConvFail);
}

#[test]
fn callback_failures_map_to_their_codes() {
    let mut ctx = LsContext::new(2, Box::new(GmresSolver::<f64>::new(2, 0)), None).unwrap();
    ctx.set_preconditioner(
        Some(|_p: &LsPoint<'_, f64>, _jok: bool, _g: f64| -> CallbackResult<bool> { Err(CallbackError::Retryable) }),
        Some(|_p: &LsPoint<'_, f64>, r: &[f64], z: &mut [f64], _g: f64, _d: f64, _s: PrecSide| -> CallbackResult {
            z.copy_from_slice(r);
            Ok(())
        }),
    )
    .unwrap();
    let mut rhs = diffusion;
    let (y, fy) = ([1.0, 1.0], [-101.0, -101.0]);
    let p = LsPoint::new(0.0, &y, &fy);
    let err = ctx.setup(&mut rhs, &p, 0.1, false).unwrap_err();
    assert_eq!(err.status(), LsStatus::PrecSetupRecoverable);
    assert_eq!(ctx.num_prec_evals(), 1);

    ctx.set_preconditioner(
        None::<fn(&LsPoint<'_, f64>, bool, f64) -> CallbackResult<bool>>,
        None::<fn(&LsPoint<'_, f64>, &[f64], &mut [f64], f64, f64, PrecSide) -> CallbackResult>,
    )
    .unwrap();
    ctx.set_jac_times(
        None::<fn(&LsPoint<'_, f64>) -> CallbackResult>,
        |_p: &LsPoint<'_, f64>, _v: &[f64], _jv: &mut [f64]| -> CallbackResult { Err(CallbackError::Fatal) },
    )
    .unwrap();
    ctx.setup(&mut rhs, &p, 0.1, false).unwrap();
    let mut x = [0.0; 2];
    let err = ctx.solve(&mut rhs, &p, &[1.0, 1.0], &mut x, 1e-6).unwrap_err();
    assert_eq!(err.status(), LsStatus::ATimesUnrecoverable);
    assert_eq!(ctx.last_status().code(), -15);
}

#[test]
fn failed_preconditioner_setup_leaves_jacobian_stale() {
    let mut ctx = LsContext::new(2, Box::new(GmresSolver::<f64>::new(2, 0)), None).unwrap();
    let jok_seen = Arc::new(Mutex::new(Vec::new()));
    let jok_log = Arc::clone(&jok_seen);
    ctx.set_preconditioner(
        Some(move |_p: &LsPoint<'_, f64>, jok: bool, _g: f64| -> CallbackResult<bool> {
            let mut log = jok_log.lock().unwrap();
            log.push(jok);
            // The first and fourth setups fail transiently.
            if log.len() == 1 || log.len() == 4 { Err(CallbackError::Retryable) } else { Ok(!jok) }
        }),
        Some(|_p: &LsPoint<'_, f64>, r: &[f64], z: &mut [f64], _g: f64, _d: f64, _s: PrecSide| -> CallbackResult {
            z.copy_from_slice(r);
            Ok(())
        }),
    )
    .unwrap();
    let mut rhs = diffusion;
    let (y, fy) = ([1.0, 1.0], [-101.0, -101.0]);

    let err = ctx.setup(&mut rhs, &LsPoint::new(0.0, &y, &fy), 0.1, true).unwrap_err();
    assert_eq!(err.status(), LsStatus::PrecSetupRecoverable);
    assert!(!ctx.jac_current());
    assert_eq!(ctx.jac_time(), None);

    let flags = ctx.setup(&mut rhs, &LsPoint::new(1.0, &y, &fy), 0.1, true).unwrap();
    assert!(flags.contains(SetupFlags::JAC_REFRESHED | SetupFlags::PREC_REFRESHED));
    assert!(ctx.jac_current());
    assert_eq!(ctx.jac_time(), Some(1.0));

    let flags = ctx.setup(&mut rhs, &LsPoint::new(2.0, &y, &fy), 0.1, true).unwrap();
    assert!(flags.is_empty());
    assert_eq!(ctx.steps_since_jac(), 1);

    // A refresh whose preconditioner setup fails is not committed.
    ctx.setup(&mut rhs, &LsPoint::new(3.0, &y, &fy), 0.1, false).unwrap_err();
    assert!(!ctx.jac_current());
    assert_eq!(ctx.jac_time(), Some(1.0));

    let flags = ctx.setup(&mut rhs, &LsPoint::new(4.0, &y, &fy), 0.1, true).unwrap();
    assert!(flags.contains(SetupFlags::JAC_REFRESHED));
    assert!(ctx.jac_current());
    assert_eq!(ctx.jac_time(), Some(4.0));
    assert_eq!(*jok_seen.lock().unwrap(), vec![false, false, true, false, false]);
    assert_eq!(ctx.num_prec_evals(), 5);
}

#[test]
fn iterations_before_a_failure_are_counted() {
    let n = 4;
    let mut ctx = LsContext::new(n, Box::new(GmresSolver::<f64>::new(n, 0)), None).unwrap();
    let calls = Arc::new(Mutex::new(0));
    let seen = Arc::clone(&calls);
    ctx.set_jac_times(
        None::<fn(&LsPoint<'_, f64>) -> CallbackResult>,
        move |_p: &LsPoint<'_, f64>, v: &[f64], jv: &mut [f64]| -> CallbackResult {
            let mut calls = seen.lock().unwrap();
            *calls += 1;
            if *calls == 3 {
                return Err(CallbackError::Retryable);
            }
            for (i, (o, vi)) in jv.iter_mut().zip(v).enumerate() {
                *o = -(i as f64 + 1.0) * vi;
            }
            Ok(())
        },
    )
    .unwrap();
    let mut rhs = diffusion;
    let (y, fy) = (vec![1.0; n], vec![0.0; n]);
    let p = LsPoint::new(0.0, &y, &fy);
    ctx.setup(&mut rhs, &p, 1.0, false).unwrap();
    let mut x = vec![0.0; n];
    let err = ctx.solve(&mut rhs, &p, &[1.0, 1.0, 1.0, 1.0], &mut x, 1e-12).unwrap_err();
    assert_eq!(err.status(), LsStatus::ATimesRecoverable);
    assert_eq!(ctx.num_lin_iters(), 2);
    assert_eq!(ctx.num_lin_conv_fails(), 0);
}

#[test]
fn workspace_is_known_before_the_first_solve() {
    let n = 8;
    let ctx = LsContext::new(n, Box::new(GmresSolver::<f64>::new(3, 1)), None).unwrap();
    let (lenrw, _) = ctx.workspace();
    assert!(lenrw >= n * (3 + 4));
}
