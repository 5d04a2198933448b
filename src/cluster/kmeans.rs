//! K-means clustering with retained centers.
//!
//! Lloyd's algorithm minimizing within-cluster sum of squares, seeded
//! either by k-means++ (random path, used by the model-delegated and
//! support-vector initializers and by the consensus embedding) or by
//! caller-provided centers (deterministic path, used every expectation
//! step, seeded at the projected cluster barycenters).
//!
//! Unlike a fit-and-forget partitioner, the fitted [`KmeansFit`] keeps its
//! centers so membership can be re-derived for unseen samples: `predict`
//! is nearest-center, `predict_proba` is the inverse-squared-distance
//! score `1 / (dist^2 + 1e-5)` normalized per row.

use ndarray::Array2;
use rand::prelude::*;

use super::traits::{ClusterPredict, SoftClusterPredict};
use crate::error::{Error, Result};
use crate::linalg::squared_distance;

const PROBA_EPS: f64 = 1e-5;

/// K-means trainer.
#[derive(Debug, Clone)]
pub struct Kmeans {
    k: usize,
    max_iter: usize,
    tol: f64,
    seed: Option<u64>,
}

impl Kmeans {
    /// Create a new trainer for `k` clusters.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 100,
            tol: 1e-4,
            seed: None,
        }
    }

    /// Set maximum Lloyd iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance on the squared center shift.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fit with k-means++ initialization.
    pub fn fit(&self, x: &Array2<f64>) -> Result<KmeansFit> {
        self.check(x)?;
        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };
        let centers = self.init_centers(x, &mut rng);
        self.lloyd(x, centers, Some(&mut rng))
    }

    /// Fit from the given centers (one row per cluster). Fully
    /// deterministic: an emptied cluster keeps its previous center.
    pub fn fit_from(&self, x: &Array2<f64>, centers: &Array2<f64>) -> Result<KmeansFit> {
        self.check(x)?;
        if centers.nrows() != self.k {
            return Err(Error::DimensionMismatch {
                expected: self.k,
                found: centers.nrows(),
            });
        }
        if centers.ncols() != x.ncols() {
            return Err(Error::DimensionMismatch {
                expected: x.ncols(),
                found: centers.ncols(),
            });
        }
        self.lloyd(x, centers.clone(), None)
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

    /// k-means++ seeding: first center uniform, each next proportional to
    /// the squared distance to the nearest chosen center.
    fn init_centers(&self, x: &Array2<f64>, rng: &mut impl Rng) -> Array2<f64> {
        let n = x.nrows();
        let d = x.ncols();
        let mut centers = Array2::zeros((self.k, d));

        let first = rng.random_range(0..n);
        centers.row_mut(0).assign(&x.row(first));

        for i in 1..self.k {
            let mut distances: Vec<f64> = Vec::with_capacity(n);
            for j in 0..n {
                let point = x.row(j);
                let min_dist = (0..i)
                    .map(|c| squared_distance(&point, &centers.row(c)))
                    .fold(f64::MAX, f64::min);
                distances.push(min_dist);
            }

            let total: f64 = distances.iter().sum();
            if total == 0.0 {
                let idx = rng.random_range(0..n);
                centers.row_mut(i).assign(&x.row(idx));
                continue;
            }

            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = 0;
            for (j, &dist) in distances.iter().enumerate() {
                cumsum += dist;
                if cumsum >= threshold {
                    selected = j;
                    break;
                }
            }
            centers.row_mut(i).assign(&x.row(selected));
        }

        centers
    }

    fn lloyd(
        &self,
        x: &Array2<f64>,
        mut centers: Array2<f64>,
        mut reinit: Option<&mut Box<dyn RngCore>>,
    ) -> Result<KmeansFit> {
        let n = x.nrows();
        let d = x.ncols();
        let mut labels = vec![0usize; n];

        for _ in 0..self.max_iter {
            for (i, label) in labels.iter_mut().enumerate() {
                let point = x.row(i);
                let mut best_cluster = 0;
                let mut best_dist = f64::MAX;
                for k in 0..self.k {
                    let dist = squared_distance(&point, &centers.row(k));
                    if dist < best_dist {
                        best_dist = dist;
                        best_cluster = k;
                    }
                }
                *label = best_cluster;
            }

            let mut new_centers = Array2::zeros((self.k, d));
            let mut counts = vec![0usize; self.k];
            for i in 0..n {
                let k = labels[i];
                for j in 0..d {
                    new_centers[[k, j]] += x[[i, j]];
                }
                counts[k] += 1;
            }
            for k in 0..self.k {
                if counts[k] > 0 {
                    for j in 0..d {
                        new_centers[[k, j]] /= counts[k] as f64;
                    }
                } else if let Some(rng) = reinit.as_deref_mut() {
                    let idx = rng.random_range(0..n);
                    new_centers.row_mut(k).assign(&x.row(idx));
                } else {
                    new_centers.row_mut(k).assign(&centers.row(k));
                }
            }

            let shift: f64 = centers
                .iter()
                .zip(new_centers.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            centers = new_centers;
            if shift < self.tol {
                break;
            }
        }

        let mut inertia = 0.0;
        for i in 0..n {
            let point = x.row(i);
            inertia += (0..self.k)
                .map(|k| squared_distance(&point, &centers.row(k)))
                .fold(f64::MAX, f64::min);
        }

        Ok(KmeansFit { centers, inertia })
    }
}

/// Fitted k-means model.
#[derive(Debug, Clone, PartialEq)]
pub struct KmeansFit {
    centers: Array2<f64>,
    inertia: f64,
}

impl KmeansFit {
    /// Cluster centers, one row per cluster.
    pub fn centers(&self) -> &Array2<f64> {
        &self.centers
    }

    /// Within-cluster sum of squares of the training data.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    fn check_dims(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.centers.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.centers.ncols(),
                found: x.ncols(),
            });
        }
        Ok(())
    }
}

impl ClusterPredict for KmeansFit {
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        self.check_dims(x)?;
        let mut labels = Vec::with_capacity(x.nrows());
        for point in x.rows() {
            let mut best_cluster = 0;
            let mut best_dist = f64::MAX;
            for k in 0..self.centers.nrows() {
                let dist = squared_distance(&point, &self.centers.row(k));
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = k;
                }
            }
            labels.push(best_cluster);
        }
        Ok(labels)
    }

    fn n_clusters(&self) -> usize {
        self.centers.nrows()
    }
}

impl SoftClusterPredict for KmeansFit {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_dims(x)?;
        let k = self.centers.nrows();
        let mut proba = Array2::zeros((x.nrows(), k));
        for (i, point) in x.rows().into_iter().enumerate() {
            let mut total = 0.0;
            for c in 0..k {
                let score = 1.0 / (squared_distance(&point, &self.centers.row(c)) + PROBA_EPS);
                proba[[i, c]] = score;
                total += score;
            }
            for c in 0..k {
                proba[[i, c]] /= total;
            }
        }
        Ok(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.1],
            [10.0, 10.0],
            [10.1, 10.1],
        ]
    }

    #[test]
    fn test_kmeans_basic() {
        let fit = Kmeans::new(2).with_seed(42).fit(&two_blobs()).unwrap();
        let labels = fit.predict(&two_blobs()).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn test_kmeans_deterministic_with_seed() {
        let a = Kmeans::new(2).with_seed(42).fit(&two_blobs()).unwrap();
        let b = Kmeans::new(2).with_seed(42).fit(&two_blobs()).unwrap();
        assert_eq!(a.centers(), b.centers());
    }

    #[test]
    fn test_kmeans_fit_from_recovers_blob_means() {
        let seeds = array![[1.0, 1.0], [9.0, 9.0]];
        let fit = Kmeans::new(2).fit_from(&two_blobs(), &seeds).unwrap();
        let c = fit.centers();
        assert!((c[[0, 0]] - 0.05).abs() < 1e-9);
        assert!((c[[1, 0]] - 10.05).abs() < 1e-9);
    }

    #[test]
    fn test_kmeans_predict_proba_rows_sum_to_one() {
        let fit = Kmeans::new(2).with_seed(7).fit(&two_blobs()).unwrap();
        let q = fit.predict_proba(&two_blobs()).unwrap();
        for i in 0..q.nrows() {
            let s: f64 = q.row(i).sum();
            assert!((s - 1.0).abs() < 1e-9);
        }
        // Near its own blob the membership is close to certain.
        assert!(q[[0, fit.predict(&two_blobs()).unwrap()[0]]] > 0.99);
    }

    #[test]
    fn test_kmeans_predict_new_data() {
        let fit = Kmeans::new(2).with_seed(42).fit(&two_blobs()).unwrap();
        let queries = array![[0.2, -0.1], [9.8, 10.3]];
        let labels = fit.predict(&queries).unwrap();
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn test_kmeans_k_equals_n() {
        let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let fit = Kmeans::new(3).with_seed(42).fit(&x).unwrap();
        let labels = fit.predict(&x).unwrap();
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_kmeans_empty_input_error() {
        let x = Array2::<f64>::zeros((0, 2));
        assert!(Kmeans::new(2).fit(&x).is_err());
    }

    #[test]
    fn test_kmeans_k_larger_than_n_error() {
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        assert!(matches!(
            Kmeans::new(5).fit(&x),
            Err(Error::InvalidClusterCount { requested: 5, n_items: 2 })
        ));
    }

    #[test]
    fn test_kmeans_fit_from_bad_center_shape() {
        let seeds = array![[1.0], [9.0]];
        assert!(Kmeans::new(2).fit_from(&two_blobs(), &seeds).is_err());
    }
}
