//! Fitted model artifacts and inference.
//!
//! [`FacetModel`] is everything `fit` deploys: the per-cluster separators,
//! the orthonormal basis of the discriminative subspace, the per-cluster
//! barycenters in that subspace, the retained clustering model, and the
//! per-restart snapshots that back the bagged inference path. All
//! prediction entry points live here and none of them mutate the model.
//!
//! Classification combines the per-cluster margins with the sample's soft
//! subtype membership, so a query is scored against the separator of the
//! subtype it most plausibly belongs to. Subtype predictions are
//! `Option<usize>`: a sample classified (or known) to be outside the
//! target class has no subtype.

use ndarray::{Array1, Array2};

use crate::cluster::{ClusterModel, ClusterPredict, Clustering, SoftClusterPredict};
use crate::consensus::cross_similarity;
use crate::error::{Error, Result};
use crate::linalg::{argmax, sigmoid, squared_distance};
use crate::separator::LinearSeparator;

const PROBA_EPS: f64 = 1e-5;

/// One restart's retained projection and clustering model, kept for the
/// bagged inference path.
#[derive(Debug, Clone)]
pub(crate) struct RestartArtifacts {
    pub(crate) basis: Array2<f64>,
    pub(crate) model: ClusterModel,
}

/// A fitted subtype-discovery model.
#[derive(Debug, Clone)]
pub struct FacetModel {
    pub(crate) separators: Vec<LinearSeparator>,
    pub(crate) basis: Array2<f64>,
    pub(crate) barycenters: Array2<f64>,
    pub(crate) model: Option<ClusterModel>,
    pub(crate) clustering: Clustering,
    pub(crate) assignment: Vec<usize>,
    pub(crate) positives: Vec<usize>,
    pub(crate) restarts: Vec<RestartArtifacts>,
    pub(crate) consensus_assignments: Array2<usize>,
    pub(crate) target_label: usize,
}

impl FacetModel {
    /// Number of subtype clusters.
    pub fn n_clusters(&self) -> usize {
        self.separators.len()
    }

    /// The deployed per-cluster separators.
    pub fn separators(&self) -> &[LinearSeparator] {
        &self.separators
    }

    /// Orthonormal basis of the discriminative subspace, one row per
    /// basis vector.
    pub fn basis(&self) -> &Array2<f64> {
        &self.basis
    }

    /// Per-cluster barycenters: projected-space means for K >= 2, the
    /// feature-space positive mean for K = 1.
    pub fn barycenters(&self) -> &Array2<f64> {
        &self.barycenters
    }

    /// Final subtype assignment of the training positives.
    pub fn training_assignment(&self) -> &[usize] {
        &self.assignment
    }

    /// Row indices of the positive samples in the training set.
    pub fn positive_indices(&self) -> &[usize] {
        &self.positives
    }

    /// The original label designated as the target (subdivided) class.
    pub fn target_label(&self) -> usize {
        self.target_label
    }

    /// Raw signed margin of every sample against every cluster separator.
    pub fn margins(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_features(x)?;
        let mut margins = Array2::zeros((x.nrows(), self.n_clusters()));
        for (cluster, separator) in self.separators.iter().enumerate() {
            margins.column_mut(cluster).assign(&separator.margins(x));
        }
        Ok(margins)
    }

    /// Class probabilities, one row per sample, one column per original
    /// label. Each sample's per-cluster margins are blended by its soft
    /// subtype membership, scaled by the batch maximum when that maximum
    /// is positive, and squashed through a sigmoid.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let margins = self.margins(x)?;
        let membership = self.predict_subtype_proba(x)?;
        let n = x.nrows();
        let k = self.n_clusters();

        let mut combined = Array1::zeros(n);
        for i in 0..n {
            combined[i] = (0..k).map(|c| membership[[i, c]] * margins[[i, c]]).sum();
        }
        let max = combined.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let scale = if max > 0.0 { max } else { 1.0 };

        let mut proba = Array2::zeros((n, 2));
        for i in 0..n {
            let p = sigmoid(combined[i] / scale);
            proba[[i, self.target_label]] = p;
            proba[[i, 1 - self.target_label]] = 1.0 - p;
        }
        Ok(proba)
    }

    /// Hard class labels in the original encoding.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| argmax(row.iter().copied()))
            .collect())
    }

    /// Soft subtype membership of every sample, evaluated in the deployed
    /// subspace. Mixtures answer through the retained model; k-means uses
    /// inverse squared distance to the deployed barycenters.
    pub fn predict_subtype_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_features(x)?;
        let n = x.nrows();
        let k = self.n_clusters();
        if k == 1 {
            return Ok(Array2::ones((n, 1)));
        }

        let x_proj = x.dot(&self.basis.t());
        match self.clustering {
            Clustering::Kmeans => {
                let mut q = Array2::zeros((n, k));
                for i in 0..n {
                    let row = x_proj.row(i);
                    for (c, center) in self.barycenters.rows().into_iter().enumerate() {
                        q[[i, c]] = 1.0 / (squared_distance(&row, &center) + PROBA_EPS);
                    }
                }
                for mut row in q.rows_mut() {
                    let total = row.sum();
                    row.mapv_inplace(|v| v / total);
                }
                Ok(q)
            }
            Clustering::SphericalGmm | Clustering::FullGmm => {
                let model = self.model.as_ref().ok_or_else(|| {
                    Error::Other("no clustering model retained for mixture inference".to_string())
                })?;
                model.predict_proba(&x_proj)
            }
        }
    }

    /// Hard subtype per sample; `None` for samples classified as not the
    /// target class.
    pub fn predict_subtypes(&self, x: &Array2<f64>) -> Result<Vec<Option<usize>>> {
        let labels = self.predict(x)?;
        self.subtypes_with_labels(x, labels.iter().copied())
    }

    /// Hard subtype per sample with the class labels already known;
    /// `None` for samples whose given label is not the target class.
    pub fn predict_subtypes_given(
        &self,
        x: &Array2<f64>,
        y: &[usize],
    ) -> Result<Vec<Option<usize>>> {
        if y.len() != x.nrows() {
            return Err(Error::DimensionMismatch {
                expected: x.nrows(),
                found: y.len(),
            });
        }
        self.subtypes_with_labels(x, y.iter().copied())
    }

    fn subtypes_with_labels(
        &self,
        x: &Array2<f64>,
        labels: impl Iterator<Item = usize>,
    ) -> Result<Vec<Option<usize>>> {
        let proba = self.predict_subtype_proba(x)?;
        Ok(labels
            .zip(proba.rows())
            .map(|(label, row)| {
                if label == self.target_label {
                    Some(argmax(row.iter().copied()))
                } else {
                    None
                }
            })
            .collect())
    }

    /// Bagged subtype membership: re-predict each query under every
    /// retained restart, measure its agreement with each training positive
    /// across restarts, and average the agreement within each final
    /// consensus cluster.
    pub fn predict_subtype_proba_bagged(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_features(x)?;
        let n = x.nrows();
        let k = self.n_clusters();
        if k == 1 || self.restarts.is_empty() {
            return self.predict_subtype_proba(x);
        }

        let mut query_assignments = Array2::zeros((n, self.restarts.len()));
        for (c, artifacts) in self.restarts.iter().enumerate() {
            let x_proj = x.dot(&artifacts.basis.t());
            let labels = artifacts.model.predict(&x_proj)?;
            for (i, &label) in labels.iter().enumerate() {
                query_assignments[[i, c]] = label;
            }
        }

        let sim = cross_similarity(&query_assignments, &self.consensus_assignments);
        let mut q = Array2::zeros((n, k));
        for cluster in 0..k {
            let members: Vec<usize> = (0..self.assignment.len())
                .filter(|&j| self.assignment[j] == cluster)
                .collect();
            if members.is_empty() {
                continue;
            }
            for i in 0..n {
                let mean = members.iter().map(|&j| sim[[i, j]]).sum::<f64>() / members.len() as f64;
                q[[i, cluster]] = mean;
            }
        }
        for mut row in q.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|v| v / total);
            } else {
                row.fill(1.0 / k as f64);
            }
        }
        Ok(q)
    }

    /// Outside-polytope evidence per sample: shifted margins m + 1 clipped
    /// below at zero and summed, with a mean-shifted-margin fallback when
    /// no cluster speaks for the sample, squashed through a sigmoid.
    pub fn polytope_class_score(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let margins = self.margins(x)?;
        let k = self.n_clusters();
        Ok(margins
            .rows()
            .into_iter()
            .map(|row| {
                let shifted: Vec<f64> = row.iter().map(|&m| m + 1.0).collect();
                let evidence = if shifted.iter().all(|&s| s <= 0.0) {
                    shifted.iter().sum::<f64>() / k as f64
                } else {
                    shifted.iter().filter(|&&s| s > 0.0).sum()
                };
                sigmoid(evidence)
            })
            .collect())
    }

    fn check_features(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.basis.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.basis.ncols(),
                found: x.ncols(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Kmeans;
    use ndarray::array;

    fn toy_model() -> FacetModel {
        FacetModel {
            separators: vec![
                LinearSeparator {
                    weights: array![1.0, 1.0],
                    bias: 0.0,
                },
                LinearSeparator {
                    weights: array![1.0, -1.0],
                    bias: 0.0,
                },
            ],
            basis: array![[1.0, 0.0], [0.0, 1.0]],
            barycenters: array![[5.0, 5.0], [5.0, -5.0]],
            model: None,
            clustering: Clustering::Kmeans,
            assignment: vec![0, 0, 1, 1],
            positives: vec![0, 1, 2, 3],
            restarts: vec![],
            consensus_assignments: Array2::zeros((4, 0)),
            target_label: 1,
        }
    }

    #[test]
    fn test_margins_per_cluster() {
        let model = toy_model();
        let x = array![[5.0, 5.0], [-5.0, 0.0]];
        let margins = model.margins(&x).unwrap();
        assert!((margins[[0, 0]] - 10.0).abs() < 1e-12);
        assert!((margins[[0, 1]] - 0.0).abs() < 1e-12);
        assert!((margins[[1, 0]] + 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_predict_separates_classes() {
        let model = toy_model();
        let x = array![[5.0, 5.0], [5.0, -5.0], [-5.0, 0.0]];
        let labels = model.predict(&x).unwrap();
        assert_eq!(labels[0], 1);
        assert_eq!(labels[1], 1);
        assert_eq!(labels[2], 0);

        let proba = model.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(proba[[0, 1]] > 0.5);
        assert!(proba[[2, 0]] > 0.5);
    }

    #[test]
    fn test_subtype_proba_nearest_barycenter() {
        let model = toy_model();
        let x = array![[5.0, 5.0], [5.0, -5.0]];
        let proba = model.predict_subtype_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(proba[[0, 0]] > 0.99);
        assert!(proba[[1, 1]] > 0.99);
    }

    #[test]
    fn test_predict_subtypes_none_outside_target() {
        let model = toy_model();
        let x = array![[5.0, 5.0], [5.0, -5.0], [-5.0, 0.0]];
        let subtypes = model.predict_subtypes(&x).unwrap();
        assert_eq!(subtypes, vec![Some(0), Some(1), None]);

        let given = model
            .predict_subtypes_given(&x, &[1, 0, 1])
            .unwrap();
        assert_eq!(given[0], Some(0));
        assert_eq!(given[1], None);
        assert!(given[2].is_some());
    }

    #[test]
    fn test_polytope_score_inside_vs_outside() {
        let model = toy_model();
        let x = array![[5.0, 5.0], [-5.0, 0.0]];
        let scores = model.polytope_class_score(&x).unwrap();
        assert!(scores[0] > 0.5);
        assert!(scores[1] < 0.5);
    }

    #[test]
    fn test_bagged_membership_from_restart_agreement() {
        let train = array![[5.0, 5.0], [5.1, 4.9], [5.0, -5.0], [4.9, -5.1]];
        let fit = Kmeans::new(2).with_seed(0).fit(&train).unwrap();
        let training_labels = fit.predict(&train).unwrap();

        let mut model = toy_model();
        model.assignment = training_labels.clone();
        model.restarts = vec![
            RestartArtifacts {
                basis: array![[1.0, 0.0], [0.0, 1.0]],
                model: ClusterModel::Kmeans(fit.clone()),
            },
            RestartArtifacts {
                basis: array![[1.0, 0.0], [0.0, 1.0]],
                model: ClusterModel::Kmeans(fit),
            },
        ];
        let mut consensus = Array2::zeros((4, 2));
        for (i, &label) in training_labels.iter().enumerate() {
            consensus[[i, 0]] = label;
            consensus[[i, 1]] = label;
        }
        model.consensus_assignments = consensus;

        let proba = model
            .predict_subtype_proba_bagged(&array![[5.0, 5.0], [5.0, -5.0]])
            .unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        // each query agrees with exactly one training blob in every restart
        assert!((proba[[0, training_labels[0]]] - 1.0).abs() < 1e-12);
        assert!((proba[[1, training_labels[2]]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_feature_dimension_checked() {
        let model = toy_model();
        let x = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            model.margins(&x),
            Err(Error::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }
}
