//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria for a linear solve.
///
/// The tolerance is absolute: the Newton interface already scales it from
/// the nonlinear tolerance before handing it to the solver.
#[derive(Clone, Debug)]
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

/// Outcome of one linear solve as reported by the bound solver.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: num_traits::Float> SolveStats<T> {
    /// Stats of a direct solve: no iterations, converged.
    pub fn direct(final_residual: T) -> Self {
        SolveStats { iterations: 0, final_residual, converged: true }
    }
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let converged = res_norm <= self.tol;
        let stop = converged || i >= self.max_iters;
        (
            stop,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_on_tolerance_or_budget() {
        let conv = Convergence { tol: 1e-3, max_iters: 10 };
        let (stop, s) = conv.check(1e-4, 2);
        assert!(stop && s.converged);
        let (stop, s) = conv.check(1.0, 10);
        assert!(stop && !s.converged);
        let (stop, _) = conv.check(1.0, 3);
        assert!(!stop);
    }
}
