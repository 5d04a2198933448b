//! Clustering backends for subtype discovery.
//!
//! Clustering runs in three places: every expectation step re-clusters the
//! positive samples in the current discriminative subspace, the consensus
//! stage clusters a spectral embedding, and two of the membership
//! initializers delegate to a clusterer. All of them go through the types
//! here.
//!
//! ## Hard vs soft membership
//!
//! **Hard clustering** assigns each sample to exactly one cluster. **Soft
//! clustering** gives each sample a probability distribution over clusters,
//! which is what the EM loop consumes: a positive sample near a subtype
//! boundary should pull on both separators, not be forced to a side.
//!
//! K-means is hard by construction, so its soft view is derived from
//! inverse squared distances to the centers. The Gaussian mixture is soft
//! natively through its responsibilities.
//!
//! ## Seeded refits
//!
//! Both backends split fitting in two entry points. `fit` seeds randomly
//! (k-means++ or random distinct rows) and is used where no prior state
//! exists. `fit_from` seeds at caller-provided centers and is fully
//! deterministic; the EM loop uses it every iteration, seeded at the
//! projected cluster barycenters, so cluster identities stay stable from
//! one iteration to the next.
//!
//! ## Usage
//!
//! ```rust
//! use facet::cluster::{ClusterPredict, Kmeans, SoftClusterPredict};
//! use ndarray::array;
//!
//! let data = array![
//!     [0.0, 0.0],
//!     [0.1, 0.1],
//!     [10.0, 10.0],
//!     [10.1, 10.1],
//! ];
//!
//! let fit = Kmeans::new(2).with_seed(42).fit(&data).unwrap();
//! let labels = fit.predict(&data).unwrap();
//! assert_eq!(labels[0], labels[1]);
//! assert_ne!(labels[0], labels[2]);
//!
//! // proba[[i, k]] = membership of sample i in cluster k
//! let proba = fit.predict_proba(&data).unwrap();
//! assert!(proba[[0, labels[0]]] > 0.99);
//! ```

mod gmm;
mod kmeans;
mod traits;

use std::str::FromStr;

use ndarray::Array2;

use crate::error::{Error, Result};

pub use gmm::{Covariance, Gmm, GmmFit};
pub use kmeans::{Kmeans, KmeansFit};
pub use traits::{ClusterPredict, SoftClusterPredict};

/// Clustering strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clustering {
    /// K-means on the projected samples.
    Kmeans,
    /// Gaussian mixture with one variance per component.
    SphericalGmm,
    /// Gaussian mixture with a full covariance matrix per component.
    FullGmm,
}

impl FromStr for Clustering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "k_means" => Ok(Clustering::Kmeans),
            "spherical_gaussian_mixture" => Ok(Clustering::SphericalGmm),
            "full_gaussian_mixture" => Ok(Clustering::FullGmm),
            other => Err(Error::UnknownStrategy {
                role: "clustering",
                name: other.to_string(),
            }),
        }
    }
}

/// A clustering strategy bound to a cluster count, ready to fit.
#[derive(Debug, Clone)]
pub(crate) enum ClusterFitter {
    Kmeans(Kmeans),
    Gmm(Gmm),
}

impl ClusterFitter {
    pub(crate) fn from_strategy(strategy: Clustering, k: usize) -> Self {
        match strategy {
            Clustering::Kmeans => ClusterFitter::Kmeans(Kmeans::new(k)),
            Clustering::SphericalGmm => ClusterFitter::Gmm(Gmm::new(k)),
            Clustering::FullGmm => {
                ClusterFitter::Gmm(Gmm::new(k).with_covariance(Covariance::Full))
            }
        }
    }

    /// Fit with the backend's own random initialization.
    pub(crate) fn fit_random(&self, x: &Array2<f64>, seed: u64) -> Result<ClusterModel> {
        match self {
            ClusterFitter::Kmeans(t) => {
                Ok(ClusterModel::Kmeans(t.clone().with_seed(seed).fit(x)?))
            }
            ClusterFitter::Gmm(t) => Ok(ClusterModel::Gmm(t.clone().with_seed(seed).fit(x)?)),
        }
    }

    /// Fit seeded at the given centers. Deterministic.
    pub(crate) fn fit_from(&self, x: &Array2<f64>, centers: &Array2<f64>) -> Result<ClusterModel> {
        match self {
            ClusterFitter::Kmeans(t) => Ok(ClusterModel::Kmeans(t.fit_from(x, centers)?)),
            ClusterFitter::Gmm(t) => Ok(ClusterModel::Gmm(t.fit_from(x, centers)?)),
        }
    }
}

/// A fitted clustering of either backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterModel {
    Kmeans(KmeansFit),
    Gmm(GmmFit),
}

impl ClusterModel {
    /// Cluster centers (k-means) or component means (Gaussian mixture).
    pub fn centers(&self) -> &Array2<f64> {
        match self {
            ClusterModel::Kmeans(fit) => fit.centers(),
            ClusterModel::Gmm(fit) => fit.means(),
        }
    }
}

impl ClusterPredict for ClusterModel {
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        match self {
            ClusterModel::Kmeans(fit) => fit.predict(x),
            ClusterModel::Gmm(fit) => fit.predict(x),
        }
    }

    fn n_clusters(&self) -> usize {
        match self {
            ClusterModel::Kmeans(fit) => fit.n_clusters(),
            ClusterModel::Gmm(fit) => fit.n_clusters(),
        }
    }
}

impl SoftClusterPredict for ClusterModel {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            ClusterModel::Kmeans(fit) => fit.predict_proba(x),
            ClusterModel::Gmm(fit) => fit.predict_proba(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_clustering_from_str() {
        assert_eq!("k_means".parse::<Clustering>().unwrap(), Clustering::Kmeans);
        assert_eq!(
            "spherical_gaussian_mixture".parse::<Clustering>().unwrap(),
            Clustering::SphericalGmm
        );
        assert_eq!(
            "full_gaussian_mixture".parse::<Clustering>().unwrap(),
            Clustering::FullGmm
        );
    }

    #[test]
    fn test_clustering_from_str_unknown() {
        let err = "dbscan".parse::<Clustering>().unwrap_err();
        assert!(matches!(err, Error::UnknownStrategy { role: "clustering", .. }));
    }

    #[test]
    fn test_fitter_dispatch_fit_from() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]];
        let seeds = array![[1.0, 1.0], [9.0, 9.0]];
        for strategy in [Clustering::Kmeans, Clustering::SphericalGmm, Clustering::FullGmm] {
            let model = ClusterFitter::from_strategy(strategy, 2)
                .fit_from(&x, &seeds)
                .unwrap();
            assert_eq!(model.n_clusters(), 2);
            let labels = model.predict(&x).unwrap();
            assert_eq!(labels[0], labels[1]);
            assert_ne!(labels[0], labels[2]);
        }
    }

    #[test]
    fn test_model_soft_membership_rows_sum_to_one() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]];
        let model = ClusterFitter::from_strategy(Clustering::SphericalGmm, 2)
            .fit_random(&x, 42)
            .unwrap();
        let proba = model.predict_proba(&x).unwrap();
        for i in 0..proba.nrows() {
            assert!((proba.row(i).sum() - 1.0).abs() < 1e-6);
        }
    }
}
