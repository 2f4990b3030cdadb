//! Difference-quotient approximations of the Jacobian and of J·v.
//!
//! Both charge every RHS evaluation they make to `rhs_evals`.

use crate::config::options::MAX_DQ_ITERS;
use crate::core::point::LsPoint;
use crate::core::traits::{InnerProduct, OdeRhs, Real};
use crate::core::wrappers::linear_sum;
use crate::error::LsError;
use crate::utils::stats::LsStats;
use faer::Mat;

/// Dense Jacobian by forward differences, one column per RHS evaluation.
///
/// Column `j` uses the increment `sqrt(eps)·max(|y_j|, 1)`. `ytemp` and
/// `ftemp` are length-`n` scratch vectors.
pub fn dq_jac<T: Real>(
    rhs: &mut dyn OdeRhs<T>,
    p: &LsPoint<'_, T>,
    jac: &mut Mat<T>,
    ytemp: &mut [T],
    ftemp: &mut [T],
    stats: &mut LsStats,
) -> Result<(), LsError> {
    let n = p.len();
    let srur = T::epsilon().sqrt();
    ytemp.copy_from_slice(p.y);
    for j in 0..n {
        let yj = ytemp[j];
        let inc = srur * yj.abs().max(T::one());
        ytemp[j] = yj + inc;
        stats.rhs_evals += 1;
        let evaluated = rhs.eval(p.t, ytemp, ftemp);
        ytemp[j] = yj;
        evaluated.map_err(LsError::JacFunc)?;
        let inc_inv = T::one() / inc;
        for i in 0..n {
            jac[(i, j)] = (ftemp[i] - p.fy[i]) * inc_inv;
        }
    }
    Ok(())
}

/// Directional-difference product `Jv ≈ (f(y + σv) − f(y)) / σ`.
///
/// `σ = sqrt(eps)·(1 + ‖y‖) / max(‖v‖, sqrt(eps))`. A retryable RHS failure
/// shrinks `σ` by 4 and tries again, up to [`MAX_DQ_ITERS`] attempts.
pub fn dq_jtimes<T: Real>(
    rhs: &mut dyn OdeRhs<T>,
    p: &LsPoint<'_, T>,
    v: &[T],
    jv: &mut [T],
    ytemp: &mut [T],
    stats: &mut LsStats,
) -> Result<(), LsError> {
    let ip = ();
    let srur = T::epsilon().sqrt();
    let vnorm = ip.norm(v).max(srur);
    let mut sigma = srur * (T::one() + ip.norm(p.y)) / vnorm;
    let quarter = T::from_f64(0.25).unwrap_or_else(T::one);
    let mut attempt = 1;
    loop {
        linear_sum(T::one(), p.y, sigma, v, ytemp);
        stats.rhs_evals += 1;
        match rhs.eval(p.t, ytemp, jv) {
            Ok(()) => break,
            Err(e) if e.is_retryable() && attempt < MAX_DQ_ITERS => {
                log::trace!("dq jtimes: retrying with sigma {:e}", sigma * quarter);
                sigma = sigma * quarter;
                attempt += 1;
            }
            Err(e) => return Err(LsError::ATimes(e)),
        }
    }
    let sig_inv = T::one() / sigma;
    for (jvi, &fyi) in jv.iter_mut().zip(p.fy) {
        *jvi = (*jvi - fyi) * sig_inv;
    }
    Ok(())
}
