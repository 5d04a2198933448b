//! Weighted linear SVM with squared hinge loss.
//!
//! Primal objective, `y_i` in {+1, -1}:
//!
//! ```text
//! 0.5 * |beta|^2 + C * sum_i w_i * max(0, 1 - y_i * (beta . x_i + b))^2
//! ```
//!
//! Solved by the same damped Newton scheme as the logistic trainer, with
//! the Hessian assembled over the active set (samples violating the unit
//! margin). Samples sitting on or inside the margin at the solution are
//! the support set, which the support-vector initializer clusters.

use ndarray::{s, Array1, Array2};

use crate::error::Result;
use crate::linalg::solve_lu;
use crate::separator::{check_fit_inputs, LinearSeparator, SeparatorTrainer};

const BIAS_RIDGE: f64 = 1e-10;
const SUPPORT_TOL: f64 = 1e-6;

/// Weighted squared-hinge linear SVM trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct SvmTrainer {
    c: f64,
    max_iter: usize,
    tol: f64,
}

impl SvmTrainer {
    /// New trainer with inverse regularization strength `c`.
    pub fn new(c: f64) -> Self {
        Self {
            c,
            max_iter: 50,
            tol: 1e-6,
        }
    }

    /// Fit and also report the support set: indices with
    /// `y_i * margin_i <= 1 + tol`, falling back to the single worst-margin
    /// sample if nothing is on the margin.
    pub fn fit_with_support(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &Array1<f64>,
    ) -> Result<(LinearSeparator, Vec<usize>)> {
        check_fit_inputs(x, y, weights)?;
        let n = x.nrows();
        let d = x.ncols();

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
                let slack = 1.0 - y[i] * f[i];
                if w == 0.0 || slack <= 0.0 {
                    continue;
                }
                let g = 2.0 * self.c * w * slack * y[i];
                let h = 2.0 * self.c * w;
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

        let separator = LinearSeparator {
            weights: z.slice(s![..d]).to_owned(),
            bias: z[d],
        };
        let margins = separator.margins(x);
        let mut support: Vec<usize> = (0..n)
            .filter(|&i| y[i] * margins[i] <= 1.0 + SUPPORT_TOL)
            .collect();
        if support.is_empty() {
            let mut worst = 0;
            for i in 1..n {
                if y[i] * margins[i] < y[worst] * margins[worst] {
                    worst = i;
                }
            }
            support.push(worst);
        }
        Ok((separator, support))
    }

    fn objective(&self, x: &Array2<f64>, y: &Array1<f64>, w: &Array1<f64>, z: &Array1<f64>) -> f64 {
        let d = x.ncols();
        let beta = z.slice(s![..d]);
        let f = x.dot(&beta) + z[d];
        let mut loss = 0.5 * beta.dot(&beta);
        for i in 0..x.nrows() {
            let slack = (1.0 - y[i] * f[i]).max(0.0);
            loss += self.c * w[i].max(0.0) * slack * slack;
        }
        loss
    }
}

impl Default for SvmTrainer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SeparatorTrainer for SvmTrainer {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &Array1<f64>,
    ) -> Result<LinearSeparator> {
        self.fit_with_support(x, y, weights).map(|(sep, _)| sep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_separable_line() {
        let x = array![[-2.0], [-1.0], [1.0], [2.0]];
        let y = array![-1.0, -1.0, 1.0, 1.0];
        let w = array![1.0, 1.0, 1.0, 1.0];
        let sep = SvmTrainer::new(1.0).fit(&x, &y, &w).unwrap();
        let m = sep.margins(&x);
        for i in 0..4 {
            assert!(m[i] * y[i] > 0.0);
        }
    }

    #[test]
    fn test_support_set_is_the_margin_points() {
        // With a tight margin the interior points at +-3 clear 1 easily
        // and only the +-1 pair stays in the support set.
        let x = array![[-3.0], [-1.0], [1.0], [3.0]];
        let y = array![-1.0, -1.0, 1.0, 1.0];
        let w = array![1.0, 1.0, 1.0, 1.0];
        let (_, support) = SvmTrainer::new(10.0).fit_with_support(&x, &y, &w).unwrap();
        assert_eq!(support, vec![1, 2]);
    }

    #[test]
    fn test_support_never_empty() {
        let x = array![[-5.0], [5.0]];
        let y = array![-1.0, 1.0];
        let w = array![1.0, 1.0];
        let (_, support) = SvmTrainer::new(100.0).fit_with_support(&x, &y, &w).unwrap();
        assert!(!support.is_empty());
    }

    #[test]
    fn test_two_dimensional_separation() {
        let x = array![
            [-1.0, -1.0],
            [-1.5, 0.5],
            [1.0, 1.0],
            [1.5, -0.5],
        ];
        let y = array![-1.0, -1.0, 1.0, 1.0];
        let w = array![1.0, 1.0, 1.0, 1.0];
        let sep = SvmTrainer::new(1.0).fit(&x, &y, &w).unwrap();
        let m = sep.margins(&x);
        for i in 0..4 {
            assert!(m[i] * y[i] > 0.0);
        }
    }
}
