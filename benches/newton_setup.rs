use criterion::{Criterion, black_box, criterion_group, criterion_main};
use faer::Mat;
use stiffls::{CallbackResult, DenseLu, GmresSolver, LsContext, LsPoint, dense_zeros};

fn diffusion(_t: f64, y: &[f64], f: &mut [f64]) -> CallbackResult {
    let n = y.len();
    for i in 0..n {
        let left = if i > 0 { y[i - 1] } else { 0.0 };
        let right = if i + 1 < n { y[i + 1] } else { 0.0 };
        f[i] = 100.0 * (left - 2.0 * y[i] + right) - y[i] * y[i];
    }
    Ok(())
}

fn bench_newton_setup(c: &mut Criterion) {
    let n = 100;
    let y: Vec<f64> = (0..n).map(|i| 1.0 + (i as f64).sin()).collect();
    let mut fy = vec![0.0; n];
    diffusion(0.0, &y, &mut fy).unwrap();
    let b: Vec<f64> = (0..n).map(|i| (i as f64).cos()).collect();
    let mut x = vec![0.0; n];
    let p = LsPoint::new(0.0, &y, &fy);
    let mut rhs = diffusion;

    c.bench_function("dq Jacobian + LU", |ben| {
        let mut ctx = LsContext::new(n, Box::new(DenseLu::new()), Some(dense_zeros(n, n))).unwrap();
        ben.iter(|| {
            ctx.setup(&mut rhs, black_box(&p), 0.01, false).unwrap();
            ctx.solve(&mut rhs, &p, black_box(&b), &mut x, 1e-6).unwrap();
        })
    });

    c.bench_function("user Jacobian + LU", |ben| {
        let mut ctx = LsContext::new(n, Box::new(DenseLu::new()), Some(dense_zeros(n, n))).unwrap();
        ctx.set_jac_fn(|p: &LsPoint<'_, f64>, j: &mut Mat<f64>| -> CallbackResult {
            let n = p.len();
            for i in 0..n {
                j[(i, i)] = -200.0 - 2.0 * p.y[i];
                if i > 0 {
                    j[(i, i - 1)] = 100.0;
                }
                if i + 1 < n {
                    j[(i, i + 1)] = 100.0;
                }
            }
            Ok(())
        })
        .unwrap();
        ben.iter(|| {
            ctx.setup(&mut rhs, black_box(&p), 0.01, false).unwrap();
            ctx.solve(&mut rhs, &p, black_box(&b), &mut x, 1e-6).unwrap();
        })
    });

    c.bench_function("matrix-free GMRES", |ben| {
        let mut ctx = LsContext::new(n, Box::new(GmresSolver::<f64>::new(30, 5)), None).unwrap();
        ben.iter(|| {
            ctx.setup(&mut rhs, black_box(&p), 0.01, false).unwrap();
            ctx.solve(&mut rhs, &p, black_box(&b), &mut x, 1e-6).unwrap();
        })
    });
}

criterion_group!(benches, bench_newton_setup);
criterion_main!(benches);
