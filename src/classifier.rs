//! Classifier configuration and fit orchestration.
//!
//! [`FacetClassifier`] is a builder: `new(n_clusters)` plus `with_*`
//! setters, validated once at the top of [`FacetClassifier::fit`]. A fit
//! derives the polytope labels (target class +1, everything else -1),
//! runs `n_consensus` independently seeded EM restarts, fuses their
//! assignments with the configured consensus strategy, and locks the
//! deployed artifacts with one final EM pass seeded at the consensus
//! labels. `n_clusters == 1` skips all of that: a single separator on
//! uniform weights is the whole model.
//!
//! Randomness is reproducible end to end: every restart, the fusion, and
//! the final refit draw their seeds up front from one master stream, so a
//! fixed `with_seed` fixes the entire fit.

use std::collections::HashMap;

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use tracing::debug;

use crate::cluster::{ClusterFitter, Clustering};
use crate::consensus::{direction_consensus, spectral_consensus, Consensus};
use crate::em::{apply_weighting, Checkpoint, EmOutcome, EmRunner, Weighting};
use crate::error::{Error, Result};
use crate::init::{Initialization, Initializer};
use crate::linalg::gram_schmidt;
use crate::model::{FacetModel, RestartArtifacts};
use crate::separator::{Maximization, SeparatorFitter, SeparatorTrainer};

/// Subtype-discovery classifier configuration.
#[derive(Debug, Clone)]
pub struct FacetClassifier {
    n_clusters: usize,
    n_consensus: usize,
    n_iterations: usize,
    stability_threshold: f64,
    noise_tolerance: f64,
    c: f64,
    clustering: Clustering,
    maximization: Maximization,
    initialization: Initialization,
    negative_weighting: Weighting,
    positive_weighting: Weighting,
    consensus: Consensus,
    target_label: usize,
    label_mapping: Option<HashMap<usize, usize>>,
    seed: Option<u64>,
}

impl FacetClassifier {
    /// Configuration with `n_clusters` subtype clusters and defaults for
    /// everything else.
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            n_consensus: 10,
            n_iterations: 10,
            stability_threshold: 0.9,
            noise_tolerance: 10.0,
            c: 1.0,
            clustering: Clustering::SphericalGmm,
            maximization: Maximization::Logistic,
            initialization: Initialization::Clustering,
            negative_weighting: Weighting::Soft,
            positive_weighting: Weighting::Hard,
            consensus: Consensus::Spectral,
            target_label: 1,
            label_mapping: None,
            seed: None,
        }
    }

    /// Number of independent EM restarts fused by consensus.
    pub fn with_n_consensus(mut self, n_consensus: usize) -> Self {
        self.n_consensus = n_consensus;
        self
    }

    /// EM iteration cap per restart.
    pub fn with_n_iterations(mut self, n_iterations: usize) -> Self {
        self.n_iterations = n_iterations;
        self
    }

    /// ARI between successive assignments above which a restart stops.
    pub fn with_stability_threshold(mut self, threshold: f64) -> Self {
        self.stability_threshold = threshold;
        self
    }

    /// Gram-Schmidt acceptance tolerance: an orthogonalized direction is
    /// kept once its norm exceeds the reciprocal of this value.
    pub fn with_noise_tolerance(mut self, tolerance: f64) -> Self {
        self.noise_tolerance = tolerance;
        self
    }

    /// Separator regularization strength.
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    /// Clustering backend for the expectation step.
    pub fn with_clustering(mut self, clustering: Clustering) -> Self {
        self.clustering = clustering;
        self
    }

    /// Separator trainer for the maximization step.
    pub fn with_maximization(mut self, maximization: Maximization) -> Self {
        self.maximization = maximization;
        self
    }

    /// Membership seeding strategy.
    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.initialization = initialization;
        self
    }

    /// Weighting policy for negative-sample membership rows.
    pub fn with_negative_weighting(mut self, weighting: Weighting) -> Self {
        self.negative_weighting = weighting;
        self
    }

    /// Weighting policy for positive-sample membership rows.
    pub fn with_positive_weighting(mut self, weighting: Weighting) -> Self {
        self.positive_weighting = weighting;
        self
    }

    /// Restart-fusion strategy.
    pub fn with_consensus(mut self, consensus: Consensus) -> Self {
        self.consensus = consensus;
        self
    }

    /// Which original label is the class being subdivided.
    pub fn with_target_label(mut self, target_label: usize) -> Self {
        self.target_label = target_label;
        self
    }

    /// Merge original labels before fitting; labels absent from the map
    /// pass through unchanged.
    pub fn with_label_mapping(mut self, mapping: HashMap<usize, usize>) -> Self {
        self.label_mapping = Some(mapping);
        self
    }

    /// Master seed; fixes every random draw of the fit.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fit on `x` with original labels `y` and return the deployed model.
    pub fn fit(&self, x: &Array2<f64>, y: &[usize]) -> Result<FacetModel> {
        self.validate(x, y)?;

        let mapped = self.mapped_labels(y);
        if mapped.iter().any(|&label| label > 1) {
            return Err(Error::InvalidParameter {
                name: "y",
                message: "labels must be 0 or 1 after mapping",
            });
        }
        let y_signed: Array1<f64> = mapped
            .iter()
            .map(|&label| if label == self.target_label { 1.0 } else { -1.0 })
            .collect();
        let positives: Vec<usize> = (0..mapped.len())
            .filter(|&i| mapped[i] == self.target_label)
            .collect();
        let negatives: Vec<usize> = (0..mapped.len())
            .filter(|&i| mapped[i] != self.target_label)
            .collect();
        if positives.is_empty() || negatives.is_empty() {
            return Err(Error::InvalidParameter {
                name: "y",
                message: "both classes must be present",
            });
        }
        if self.n_clusters > positives.len() {
            return Err(Error::InvalidClusterCount {
                requested: self.n_clusters,
                n_items: positives.len(),
            });
        }

        if self.n_clusters == 1 {
            return self.fit_single_cluster(x, &y_signed, &positives);
        }

        let mut master = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        self.fit_multi_cluster(x, &y_signed, &positives, &negatives, &mut master)
    }

    fn validate(&self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(Error::EmptyInput);
        }
        if y.len() != x.nrows() {
            return Err(Error::DimensionMismatch {
                expected: x.nrows(),
                found: y.len(),
            });
        }
        if self.n_clusters == 0 {
            return Err(Error::InvalidParameter {
                name: "n_clusters",
                message: "must be at least 1",
            });
        }
        if self.n_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "n_iterations",
                message: "must be at least 1",
            });
        }
        if self.n_consensus == 0 {
            return Err(Error::InvalidParameter {
                name: "n_consensus",
                message: "must be at least 1",
            });
        }
        if !(0.0..=1.0).contains(&self.stability_threshold) {
            return Err(Error::InvalidParameter {
                name: "stability_threshold",
                message: "must lie in [0, 1]",
            });
        }
        if self.noise_tolerance <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "noise_tolerance",
                message: "must be positive",
            });
        }
        if self.c <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "c",
                message: "must be positive",
            });
        }
        if self.target_label > 1 {
            return Err(Error::InvalidParameter {
                name: "target_label",
                message: "must be 0 or 1",
            });
        }
        if let Initialization::BatchedDpp { batch_size, .. } = self.initialization {
            if batch_size == 0 {
                return Err(Error::InvalidParameter {
                    name: "batch_size",
                    message: "must be at least 1",
                });
            }
        }
        Ok(())
    }

    fn mapped_labels(&self, y: &[usize]) -> Vec<usize> {
        match &self.label_mapping {
            Some(mapping) => y
                .iter()
                .map(|label| mapping.get(label).copied().unwrap_or(*label))
                .collect(),
            None => y.to_vec(),
        }
    }

    /// One separator on uniform weights is the whole model; no subspace
    /// beyond the separator direction, no clustering.
    fn fit_single_cluster(
        &self,
        x: &Array2<f64>,
        y_signed: &Array1<f64>,
        positives: &[usize],
    ) -> Result<FacetModel> {
        let trainer = SeparatorFitter::from_strategy(self.maximization, self.c);
        let weights = Array1::ones(x.nrows());
        let separator = trainer.fit(x, y_signed, &weights)?;

        let mut direction = Array2::zeros((1, x.ncols()));
        direction.row_mut(0).assign(&separator.weights);
        let basis = gram_schmidt(&direction, self.noise_tolerance);
        if basis.nrows() == 0 {
            return Err(Error::Other(
                "separator direction is degenerate, no basis to deploy".to_string(),
            ));
        }

        let mean_positive = x
            .select(Axis(0), positives)
            .mean_axis(Axis(0))
            .ok_or(Error::EmptyInput)?;
        let mut barycenters = Array2::zeros((1, x.ncols()));
        barycenters.row_mut(0).assign(&mean_positive);

        Ok(FacetModel {
            separators: vec![separator],
            basis,
            barycenters,
            model: None,
            clustering: self.clustering,
            assignment: vec![0; positives.len()],
            positives: positives.to_vec(),
            restarts: Vec::new(),
            consensus_assignments: Array2::zeros((positives.len(), 1)),
            target_label: self.target_label,
        })
    }

    fn fit_multi_cluster(
        &self,
        x: &Array2<f64>,
        y_signed: &Array1<f64>,
        positives: &[usize],
        negatives: &[usize],
        master: &mut StdRng,
    ) -> Result<FacetModel> {
        let n = x.nrows();
        let k = self.n_clusters;
        let separator = SeparatorFitter::from_strategy(self.maximization, self.c);
        let clusterer = ClusterFitter::from_strategy(self.clustering, k);
        let initializer = Initializer::new(self.initialization, k, self.c, clusterer.clone());
        let runner = EmRunner {
            x,
            y_signed,
            positives,
            negatives,
            k,
            n_iterations: self.n_iterations,
            stability_threshold: self.stability_threshold,
            noise_tolerance: self.noise_tolerance,
            negative_weighting: self.negative_weighting,
            positive_weighting: self.positive_weighting,
            separator: &separator,
            clusterer: &clusterer,
            initializer: &initializer,
        };

        // all seeds drawn up front so the restart loop order is the only
        // consumer of the master stream
        let restart_seeds: Vec<u64> = (0..self.n_consensus).map(|_| master.random()).collect();
        let fusion_seed: u64 = master.random();
        let refit_seed: u64 = master.random();

        let mut consensus_assignments = Array2::zeros((positives.len(), self.n_consensus));
        let mut restarts = Vec::with_capacity(self.n_consensus);
        let mut pooled_directions: Vec<Array1<f64>> = Vec::with_capacity(self.n_consensus * k);
        let mut last_outcome: Option<EmOutcome> = None;

        for (restart, &restart_seed) in restart_seeds.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(restart_seed);
            let (mut s, assignment) =
                initializer.initialize(x, y_signed, positives, negatives, &mut rng)?;
            apply_weighting(&mut s, negatives, self.negative_weighting, k);
            apply_weighting(&mut s, positives, self.positive_weighting, k);
            let outcome = runner.run(s, assignment, 1.0, &mut rng)?;
            debug!(restart, iterations = outcome.iterations, "restart complete");

            for (i, &cluster) in outcome.assignment.iter().enumerate() {
                consensus_assignments[[i, restart]] = cluster;
            }
            for sep in &outcome.checkpoint.separators {
                pooled_directions.push(sep.weights.clone());
            }
            restarts.push(RestartArtifacts {
                basis: outcome.checkpoint.basis.clone(),
                model: outcome.checkpoint.model.clone(),
            });
            last_outcome = Some(outcome);
        }
        let last_outcome = last_outcome.ok_or(Error::InvalidParameter {
            name: "n_consensus",
            message: "must be at least 1",
        })?;

        let (assignment, checkpoint) = if self.n_consensus > 1 {
            let consensus_labels = match self.consensus {
                Consensus::Spectral => spectral_consensus(&consensus_assignments, k, fusion_seed)?,
                Consensus::DirectionBasis => {
                    let mut directions =
                        Array2::zeros((pooled_directions.len(), x.ncols()));
                    for (row, direction) in pooled_directions.iter().enumerate() {
                        directions.row_mut(row).assign(direction);
                    }
                    direction_consensus(x, positives, &directions, k, fusion_seed)?
                }
            };

            // refit from the fused labels: fresh matrix, positives one-hot
            // at their consensus cluster
            let mut s = Array2::from_elem((n, k), 1.0 / k as f64);
            for (&row, &label) in positives.iter().zip(consensus_labels.iter()) {
                s.row_mut(row).fill(0.0);
                s[[row, label]] = 1.0;
            }
            apply_weighting(&mut s, negatives, self.negative_weighting, k);
            apply_weighting(&mut s, positives, self.positive_weighting, k);

            let mut rng = StdRng::seed_from_u64(refit_seed);
            let refit = runner.run(s, consensus_labels, 0.0, &mut rng)?;
            (refit.assignment, refit.checkpoint)
        } else {
            (last_outcome.assignment, last_outcome.checkpoint)
        };

        debug!(consistency = checkpoint.consistency, "deployed artifacts locked");
        let barycenters = final_barycenters(x, positives, &assignment, &checkpoint, k);

        Ok(FacetModel {
            separators: checkpoint.separators,
            basis: checkpoint.basis,
            barycenters,
            model: Some(checkpoint.model),
            clustering: self.clustering,
            assignment,
            positives: positives.to_vec(),
            restarts,
            consensus_assignments,
            target_label: self.target_label,
        })
    }
}

/// Per-cluster mean projected positive vector under the final assignment;
/// a cluster that ended up with no members keeps the clustering model's
/// center.
fn final_barycenters(
    x: &Array2<f64>,
    positives: &[usize],
    assignment: &[usize],
    checkpoint: &Checkpoint,
    k: usize,
) -> Array2<f64> {
    let x_proj = x.dot(&checkpoint.basis.t());
    let b = checkpoint.basis.nrows();
    let mut barycenters = Array2::zeros((k, b));
    for cluster in 0..k {
        let members: Vec<usize> = positives
            .iter()
            .enumerate()
            .filter(|&(slot, _)| assignment[slot] == cluster)
            .map(|(_, &row)| row)
            .collect();
        if members.is_empty() {
            barycenters
                .row_mut(cluster)
                .assign(&checkpoint.model.centers().row(cluster));
            continue;
        }
        let mut mean = Array1::zeros(b);
        for &row in &members {
            mean += &x_proj.row(row);
        }
        mean /= members.len() as f64;
        barycenters.row_mut(cluster).assign(&mean);
    }
    barycenters
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let x = array![
            [5.0, 5.1],
            [5.1, 4.9],
            [4.9, 5.2],
            [5.2, 5.0],
            [5.0, -5.0],
            [5.2, -4.8],
            [4.8, -5.1],
            [5.1, -5.2],
            [-5.0, 0.1],
            [-5.1, -0.2],
            [-4.9, 0.0],
            [-5.0, 0.3],
        ];
        let y = vec![1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0];
        (x, y)
    }

    #[test]
    fn test_rejects_empty_input() {
        let x = Array2::zeros((0, 2));
        assert!(matches!(
            FacetClassifier::new(2).fit(&x, &[]),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_rejects_label_length_mismatch() {
        let (x, _) = blobs();
        assert!(matches!(
            FacetClassifier::new(2).fit(&x, &[1, 0]),
            Err(Error::DimensionMismatch {
                expected: 12,
                found: 2
            })
        ));
    }

    #[test]
    fn test_rejects_invalid_stability_threshold() {
        let (x, y) = blobs();
        let result = FacetClassifier::new(2)
            .with_stability_threshold(1.5)
            .fit(&x, &y);
        assert!(matches!(
            result,
            Err(Error::InvalidParameter {
                name: "stability_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_single_class() {
        let (x, _) = blobs();
        let y = vec![1; 12];
        assert!(matches!(
            FacetClassifier::new(2).fit(&x, &y),
            Err(Error::InvalidParameter { name: "y", .. })
        ));
    }

    #[test]
    fn test_rejects_more_clusters_than_positives() {
        let (x, y) = blobs();
        assert!(matches!(
            FacetClassifier::new(9).fit(&x, &y),
            Err(Error::InvalidClusterCount {
                requested: 9,
                n_items: 8
            })
        ));
    }

    #[test]
    fn test_rejects_labels_outside_binary_encoding() {
        let (x, mut y) = blobs();
        y[0] = 2;
        assert!(matches!(
            FacetClassifier::new(2).fit(&x, &y),
            Err(Error::InvalidParameter { name: "y", .. })
        ));
    }

    #[test]
    fn test_label_mapping_merges_before_fit() {
        let (x, mut y) = blobs();
        y[0] = 2;
        y[4] = 2;
        let mapping = HashMap::from([(2, 1)]);
        let model = FacetClassifier::new(2)
            .with_label_mapping(mapping)
            .with_clustering(Clustering::Kmeans)
            .with_n_consensus(1)
            .with_negative_weighting(Weighting::Uniform)
            .with_seed(3)
            .fit(&x, &y)
            .unwrap();
        // merged rows count as positives
        assert_eq!(model.positive_indices().len(), 8);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let (x, y) = blobs();
        let result = FacetClassifier::new(2)
            .with_initialization(Initialization::BatchedDpp {
                batch_size: 0,
                select: crate::init::BatchSelect::Farthest,
            })
            .fit(&x, &y);
        assert!(matches!(
            result,
            Err(Error::InvalidParameter {
                name: "batch_size",
                ..
            })
        ));
    }
}
