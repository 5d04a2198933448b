//! Fitted-model prediction traits.

use ndarray::Array2;

use crate::error::Result;

/// Hard cluster predictions from a fitted model.
pub trait ClusterPredict {
    /// Nearest/most-likely cluster per row of `x`.
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>>;

    /// Number of clusters the model was fit with.
    fn n_clusters(&self) -> usize;
}

/// Soft membership predictions from a fitted model.
pub trait SoftClusterPredict: ClusterPredict {
    /// Membership matrix for `x`: entry (i, k) is the probability that
    /// row i belongs to cluster k. Every row sums to 1.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;
}
