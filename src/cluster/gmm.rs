//! Gaussian mixture clustering with retained parameters.
//!
//! Fits K Gaussian components by expectation-maximization:
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, Σₖ)
//! ```
//!
//! The E-step computes responsibilities `γₙₖ = P(z=k | xₙ)`, the M-step
//! re-estimates `πₖ`, `μₖ`, `Σₖ` from them, and iteration stops when the
//! mean log-likelihood moves less than `tol`.
//!
//! Two covariance families are supported: [`Covariance::Spherical`] keeps
//! one variance per component (`Σₖ = σₖ² I`), [`Covariance::Full`] keeps a
//! complete matrix per component, factored by Cholesky for evaluation.
//! Covariances are regularized by `reg_covar` on the diagonal so small
//! clusters cannot collapse to singular.
//!
//! As with k-means, fitting is split in two entry points: [`Gmm::fit`]
//! seeds the means at random distinct rows, [`Gmm::fit_from`] seeds them
//! at caller-provided rows and is fully deterministic. Both start from
//! hard nearest-mean responsibilities. The fitted [`GmmFit`] retains its
//! parameters so unseen samples can be scored.

use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand::seq::index::sample;

use super::traits::{ClusterPredict, SoftClusterPredict};
use crate::error::{Error, Result};
use crate::linalg::{argmax, squared_distance};

const RESP_FLOOR: f64 = 1e-10;

/// Covariance family of a Gaussian mixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Covariance {
    /// One shared variance per component.
    Spherical,
    /// A full covariance matrix per component.
    Full,
}

/// Gaussian mixture trainer.
#[derive(Debug, Clone)]
pub struct Gmm {
    k: usize,
    covariance: Covariance,
    max_iter: usize,
    tol: f64,
    reg_covar: f64,
    seed: Option<u64>,
}

impl Gmm {
    /// Create a new trainer for `k` components with spherical covariance.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            covariance: Covariance::Spherical,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: None,
        }
    }

    /// Set the covariance family.
    pub fn with_covariance(mut self, covariance: Covariance) -> Self {
        self.covariance = covariance;
        self
    }

    /// Set maximum EM iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance on the mean log-likelihood.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fit with means seeded at `k` distinct random rows of `x`.
    pub fn fit(&self, x: &Array2<f64>) -> Result<GmmFit> {
        self.check(x)?;
        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };
        let picks = sample(&mut rng, x.nrows(), self.k);
        let mut means = Array2::zeros((self.k, x.ncols()));
        for (c, idx) in picks.into_iter().enumerate() {
            means.row_mut(c).assign(&x.row(idx));
        }
        self.em(x, means)
    }

    /// Fit with means seeded at the given rows. Fully deterministic.
    pub fn fit_from(&self, x: &Array2<f64>, means: &Array2<f64>) -> Result<GmmFit> {
        self.check(x)?;
        if means.nrows() != self.k {
            return Err(Error::DimensionMismatch {
                expected: self.k,
                found: means.nrows(),
            });
        }
        if means.ncols() != x.ncols() {
            return Err(Error::DimensionMismatch {
                expected: x.ncols(),
                found: means.ncols(),
            });
        }
        self.em(x, means.clone())
    }

    fn check(&self, x: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 || self.k > x.nrows() {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: x.nrows(),
            });
        }
        Ok(())
    }

    fn em(&self, x: &Array2<f64>, seed_means: Array2<f64>) -> Result<GmmFit> {
        let mut resp = one_hot_nearest(x, &seed_means);
        let mut params = self.m_step(x, &resp, &seed_means)?;
        let mut prev_ll = f64::NEG_INFINITY;

        for _ in 0..self.max_iter {
            let (new_resp, ll) = params.responsibilities(x)?;
            resp = new_resp;
            let next = self.m_step(x, &resp, &params.means)?;
            params = next;
            if (ll - prev_ll).abs() < self.tol {
                break;
            }
            prev_ll = ll;
        }
        Ok(params)
    }

    /// Re-estimate weights, means and covariances from responsibilities.
    /// A component whose responsibility mass is near zero keeps its
    /// previous mean and gets a unit covariance.
    fn m_step(
        &self,
        x: &Array2<f64>,
        resp: &Array2<f64>,
        prev_means: &Array2<f64>,
    ) -> Result<GmmFit> {
        let n = x.nrows();
        let d = x.ncols();
        let k = self.k;

        let resp_sum: Vec<f64> = (0..k).map(|c| resp.column(c).sum()).collect();

        let mut weights = Array1::zeros(k);
        for c in 0..k {
            weights[c] = resp_sum[c] / n as f64;
        }

        let mut means = Array2::zeros((k, d));
        for c in 0..k {
            if resp_sum[c] > RESP_FLOOR {
                for i in 0..n {
                    for j in 0..d {
                        means[[c, j]] += resp[[i, c]] * x[[i, j]];
                    }
                }
                for j in 0..d {
                    means[[c, j]] /= resp_sum[c];
                }
            } else {
                means.row_mut(c).assign(&prev_means.row(c));
            }
        }

        let cov = match self.covariance {
            Covariance::Spherical => {
                let mut vars = Array1::from_elem(k, 1.0);
                for c in 0..k {
                    if resp_sum[c] > RESP_FLOOR {
                        let mut acc = 0.0;
                        for i in 0..n {
                            acc += resp[[i, c]] * squared_distance(&x.row(i), &means.row(c));
                        }
                        vars[c] = (acc / (resp_sum[c] * d as f64)).max(self.reg_covar);
                    }
                }
                CovarianceParams::Spherical(vars)
            }
            Covariance::Full => {
                let mut comps = Vec::with_capacity(k);
                for c in 0..k {
                    let mut sigma = Array2::zeros((d, d));
                    if resp_sum[c] > RESP_FLOOR {
                        for i in 0..n {
                            for a in 0..d {
                                let da = x[[i, a]] - means[[c, a]];
                                for b in 0..=a {
                                    sigma[[a, b]] += resp[[i, c]] * da * (x[[i, b]] - means[[c, b]]);
                                }
                            }
                        }
                        for a in 0..d {
                            for b in 0..=a {
                                sigma[[a, b]] /= resp_sum[c];
                                sigma[[b, a]] = sigma[[a, b]];
                            }
                        }
                    } else {
                        for a in 0..d {
                            sigma[[a, a]] = 1.0;
                        }
                    }
                    for a in 0..d {
                        sigma[[a, a]] += self.reg_covar;
                    }

                    let mut jitter = self.reg_covar;
                    let comp = loop {
                        if let Some((chol, logdet)) = cholesky(&sigma) {
                            break FullComponent { chol, logdet };
                        }
                        jitter *= 10.0;
                        if jitter > 1.0 {
                            return Err(Error::Other(format!(
                                "component {c} covariance is not positive definite"
                            )));
                        }
                        for a in 0..d {
                            sigma[[a, a]] += jitter;
                        }
                    };
                    comps.push(comp);
                }
                CovarianceParams::Full(comps)
            }
        };

        Ok(GmmFit {
            weights,
            means,
            cov,
        })
    }
}

/// Fitted Gaussian mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct GmmFit {
    weights: Array1<f64>,
    means: Array2<f64>,
    cov: CovarianceParams,
}

#[derive(Debug, Clone, PartialEq)]
enum CovarianceParams {
    Spherical(Array1<f64>),
    Full(Vec<FullComponent>),
}

#[derive(Debug, Clone, PartialEq)]
struct FullComponent {
    /// Lower Cholesky factor of the covariance.
    chol: Array2<f64>,
    logdet: f64,
}

impl GmmFit {
    /// Component means, one row per component.
    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    fn check_dims(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.means.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.means.ncols(),
                found: x.ncols(),
            });
        }
        Ok(())
    }

    /// E-step: responsibilities plus the mean log-likelihood of `x`.
    fn responsibilities(&self, x: &Array2<f64>) -> Result<(Array2<f64>, f64)> {
        self.check_dims(x)?;
        let n = x.nrows();
        let k = self.means.nrows();
        let mut resp = Array2::zeros((n, k));
        let mut log_probs = vec![0.0; k];
        let mut total_ll = 0.0;

        for i in 0..n {
            let point = x.row(i);
            for (c, lp) in log_probs.iter_mut().enumerate() {
                *lp = if self.weights[c] > 0.0 {
                    self.weights[c].ln() + self.log_density(&point, c)
                } else {
                    f64::NEG_INFINITY
                };
            }
            let log_sum = logsumexp(&log_probs);
            total_ll += log_sum;
            for c in 0..k {
                resp[[i, c]] = (log_probs[c] - log_sum).exp();
            }
        }
        Ok((resp, total_ll / n as f64))
    }

    fn log_density(&self, point: &ArrayView1<'_, f64>, c: usize) -> f64 {
        let d = point.len() as f64;
        let mut lp = -0.5 * d * (2.0 * std::f64::consts::PI).ln();
        match &self.cov {
            CovarianceParams::Spherical(vars) => {
                let var = vars[c];
                lp -= 0.5 * d * var.ln();
                lp -= 0.5 * squared_distance(point, &self.means.row(c)) / var;
            }
            CovarianceParams::Full(comps) => {
                let comp = &comps[c];
                let diff = point - &self.means.row(c);
                lp -= 0.5 * comp.logdet;
                lp -= 0.5 * mahalanobis_sq(&comp.chol, &diff);
            }
        }
        lp
    }
}

impl ClusterPredict for GmmFit {
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| argmax(row.iter().copied()))
            .collect())
    }

    fn n_clusters(&self) -> usize {
        self.means.nrows()
    }
}

impl SoftClusterPredict for GmmFit {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.responsibilities(x)?.0)
    }
}

/// Hard assignment of each row to its nearest mean, as one-hot rows.
fn one_hot_nearest(x: &Array2<f64>, means: &Array2<f64>) -> Array2<f64> {
    let mut resp = Array2::zeros((x.nrows(), means.nrows()));
    for (i, point) in x.rows().into_iter().enumerate() {
        let nearest = argmax(
            (0..means.nrows()).map(|c| -squared_distance(&point, &means.row(c))),
        );
        resp[[i, nearest]] = 1.0;
    }
    resp
}

/// Lower Cholesky factor and log-determinant, or `None` if the matrix is
/// not positive definite.
fn cholesky(a: &Array2<f64>) -> Option<(Array2<f64>, f64)> {
    let d = a.nrows();
    let mut l = Array2::zeros((d, d));
    let mut logdet = 0.0;
    for i in 0..d {
        for j in 0..=i {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if s <= 0.0 {
                    return None;
                }
                l[[i, j]] = s.sqrt();
                logdet += s.ln();
            } else {
                l[[i, j]] = s / l[[j, j]];
            }
        }
    }
    Some((l, logdet))
}

/// Squared Mahalanobis distance given the lower Cholesky factor: solve
/// `L z = diff` by forward substitution and return `‖z‖²`.
fn mahalanobis_sq(chol: &Array2<f64>, diff: &Array1<f64>) -> f64 {
    let d = diff.len();
    let mut z = vec![0.0; d];
    for i in 0..d {
        let mut s = diff[i];
        for k in 0..i {
            s -= chol[[i, k]] * z[k];
        }
        z[i] = s / chol[[i, i]];
    }
    z.iter().map(|v| v * v).sum()
}

/// Log-sum-exp for numerical stability.
fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}
