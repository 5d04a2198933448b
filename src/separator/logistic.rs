//! Weighted logistic regression by damped Newton iterations.
//!
//! Minimizes, over `(beta, b)`:
//!
//! ```text
//! 0.5 * |beta|^2 + C * sum_i w_i * ln(1 + exp(-y_i * (beta . x_i + b)))
//! ```
//!
//! with `y_i` in {+1, -1}. The bias is unregularized apart from a tiny
//! ridge that keeps the Hessian invertible when the data is perfectly
//! separated. Each Newton step solves the (d+1)-dimensional system with a
//! full-pivot LU and backtracks by halving until the objective decreases,
//! so the fit is deterministic for fixed inputs.

use ndarray::{s, Array1, Array2};

use crate::error::Result;
use crate::linalg::{sigmoid, solve_lu};
use crate::separator::{check_fit_inputs, LinearSeparator, SeparatorTrainer};

const BIAS_RIDGE: f64 = 1e-10;

/// Weighted L2-regularized logistic regression trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticTrainer {
    c: f64,
    max_iter: usize,
    tol: f64,
}

impl LogisticTrainer {
    /// New trainer with inverse regularization strength `c`.
    pub fn new(c: f64) -> Self {
        Self {
            c,
            max_iter: 100,
            tol: 1e-6,
        }
    }

    fn objective(&self, x: &Array2<f64>, y: &Array1<f64>, w: &Array1<f64>, z: &Array1<f64>) -> f64 {
        let d = x.ncols();
        let beta = z.slice(s![..d]);
        let f = x.dot(&beta) + z[d];
        let mut loss = 0.5 * beta.dot(&beta);
        for i in 0..x.nrows() {
            loss += self.c * w[i].max(0.0) * log1p_exp_neg(y[i] * f[i]);
        }
        loss
    }
}

impl Default for LogisticTrainer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SeparatorTrainer for LogisticTrainer {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &Array1<f64>,
    ) -> Result<LinearSeparator> {
        check_fit_inputs(x, y, weights)?;
        let n = x.nrows();
        let d = x.ncols();

        // z = [beta; bias]
        let mut z = Array1::<f64>::zeros(d + 1);
        let mut loss = self.objective(x, y, weights, &z);

        for _ in 0..self.max_iter {
            let beta = z.slice(s![..d]).to_owned();
            let f = x.dot(&beta) + z[d];

            let mut grad = Array1::<f64>::zeros(d + 1);
            grad.slice_mut(s![..d]).assign(&beta);

            let mut hess = Array2::<f64>::zeros((d + 1, d + 1));
            for i in 0..d {
                hess[[i, i]] = 1.0;
            }
            hess[[d, d]] = BIAS_RIDGE;

            for i in 0..n {
                let w = weights[i].max(0.0);
                if w == 0.0 {
                    continue;
                }
                let p = sigmoid(f[i]);
                // d/dz of the log-loss term; sigma(-t) = 1 - sigma(t).
                let g = self.c * w * y[i] * sigmoid(-y[i] * f[i]);
                let h = self.c * w * p * (1.0 - p);
                for a in 0..=d {
                    let xa = if a < d { x[[i, a]] } else { 1.0 };
                    grad[a] -= g * xa;
                    for b in a..=d {
                        let xb = if b < d { x[[i, b]] } else { 1.0 };
                        hess[[a, b]] += h * xa * xb;
                    }
                }
            }
            for a in 0..=d {
                for b in (a + 1)..=d {
                    hess[[b, a]] = hess[[a, b]];
                }
            }

            let grad_norm = grad.iter().fold(0.0f64, |m, g| m.max(g.abs()));
            if grad_norm < self.tol {
                break;
            }

            let step = solve_lu(&hess, &grad)?;
            let mut alpha = 1.0;
            let mut improved = false;
            for _ in 0..20 {
                let candidate = &z - &(&step * alpha);
                let candidate_loss = self.objective(x, y, weights, &candidate);
                if candidate_loss <= loss {
                    z = candidate;
                    loss = candidate_loss;
                    improved = true;
                    break;
                }
                alpha *= 0.5;
            }
            if !improved {
                break;
            }
        }

        Ok(LinearSeparator {
            weights: z.slice(s![..d]).to_owned(),
            bias: z[d],
        })
    }
}

/// ln(1 + exp(-t)) without overflow for large |t|.
fn log1p_exp_neg(t: f64) -> f64 {
    if t > 0.0 {
        (-t).exp().ln_1p()
    } else {
        -t + t.exp().ln_1p()
    }
}
