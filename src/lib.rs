//! # facet
//!
//! Subtype discovery inside a labeled class. The target class is modeled
//! as the union of K linear half-spaces (the faces of a convex polytope):
//! each face gets its own max-margin separator against the rest of the
//! data, and an EM loop alternates refitting those separators with
//! re-clustering the target samples in the low-dimensional subspace the
//! separator directions span. Independent restarts are fused by spectral
//! consensus, and one final refit locks the deployed model.
//!
//! ```
//! use facet::{Clustering, FacetClassifier, Weighting};
//! use ndarray::array;
//!
//! # fn main() -> facet::Result<()> {
//! // two positive blobs, one negative blob
//! let x = array![
//!     [5.0, 5.1],
//!     [5.1, 4.9],
//!     [4.9, 5.2],
//!     [5.2, 5.0],
//!     [5.0, -5.0],
//!     [5.2, -4.8],
//!     [4.8, -5.1],
//!     [5.1, -5.2],
//!     [-5.0, 0.1],
//!     [-5.1, -0.2],
//!     [-4.9, 0.0],
//!     [-5.0, 0.3],
//! ];
//! let y = vec![1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0];
//!
//! let model = FacetClassifier::new(2)
//!     .with_clustering(Clustering::Kmeans)
//!     .with_negative_weighting(Weighting::Uniform)
//!     .with_n_consensus(1)
//!     .with_seed(7)
//!     .fit(&x, &y)?;
//!
//! // negatives have no subtype
//! let subtypes = model.predict_subtypes(&x)?;
//! assert!(subtypes[0].is_some());
//! assert_eq!(subtypes[8], None);
//! # Ok(())
//! # }
//! ```

pub mod cluster;
mod classifier;
mod consensus;
mod em;
/// Error types used across `facet`.
pub mod error;
mod init;
mod linalg;
pub mod metrics;
mod model;
pub mod separator;

#[cfg(test)]
mod classifier_tests;

pub use classifier::FacetClassifier;
pub use cluster::{
    ClusterModel, ClusterPredict, Clustering, Covariance, Gmm, GmmFit, Kmeans, KmeansFit,
    SoftClusterPredict,
};
pub use consensus::Consensus;
pub use em::Weighting;
pub use error::{Error, Result};
pub use init::{BatchSelect, Initialization};
pub use metrics::{accuracy, ari};
pub use model::FacetModel;
pub use separator::{
    LinearSeparator, LogisticTrainer, Maximization, SeparatorTrainer, SvmTrainer,
};
