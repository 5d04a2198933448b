//! Multi-restart consensus fusion.
//!
//! Independent EM restarts label the positive samples with arbitrary
//! cluster numbers, so their assignments can only be compared through
//! co-occurrence: two samples agree in a restart when that restart gives
//! them the same label, whatever the label is. The similarity matrix of
//! agreement fractions is label-permutation-invariant by construction,
//! and fusing restarts reduces to clustering that matrix:
//!
//! 1. normalize the affinity as `D^{-1/2} S D^{-1/2}`;
//! 2. embed each sample as its row in the top-K eigenvector columns,
//!    row-normalized (Ng, Jordan, Weiss 2001);
//! 3. k-means on the embedding.
//!
//! The [`Consensus::DirectionBasis`] variant skips the vote matrix and
//! instead pools every restart's separator directions, reduces them to K
//! principal components, and k-means the positive samples projected onto
//! those components. It helps when restarts disagree so much that the
//! vote matrix carries no block structure.

use std::str::FromStr;

use ndarray::{Array2, Axis};

use crate::cluster::{ClusterPredict, Kmeans};
use crate::error::{Error, Result};
use crate::linalg::{normalize_rows, symmetric_eigen_desc};

/// Restart-fusion strategy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// Spectral clustering of the co-occurrence similarity matrix.
    Spectral,
    /// K-means over the principal components of the pooled separator
    /// directions.
    DirectionBasis,
}

impl FromStr for Consensus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spectral" => Ok(Consensus::Spectral),
            "direction_basis" => Ok(Consensus::DirectionBasis),
            other => Err(Error::UnknownStrategy {
                role: "consensus",
                name: other.to_string(),
            }),
        }
    }
}

/// Agreement fractions between all pairs of assignment rows.
///
/// `assignments` is n_samples x n_restarts; entry (i, j) of the result is
/// the fraction of restart columns in which rows i and j share a label.
pub(crate) fn similarity_matrix(assignments: &Array2<usize>) -> Array2<f64> {
    cross_similarity(assignments, assignments)
}

/// Agreement fractions between query assignment rows and training
/// assignment rows. Both matrices must have one column per restart.
pub(crate) fn cross_similarity(
    queries: &Array2<usize>,
    training: &Array2<usize>,
) -> Array2<f64> {
    debug_assert_eq!(queries.ncols(), training.ncols());
    let restarts = queries.ncols();
    let mut sim = Array2::zeros((queries.nrows(), training.nrows()));
    for (i, q) in queries.rows().into_iter().enumerate() {
        for (j, t) in training.rows().into_iter().enumerate() {
            let agreements = q.iter().zip(t.iter()).filter(|(a, b)| a == b).count();
            sim[[i, j]] = agreements as f64 / restarts as f64;
        }
    }
    sim
}

/// Fuse restart assignments into one K-clustering of the samples.
pub(crate) fn spectral_consensus(
    assignments: &Array2<usize>,
    k: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    let sim = similarity_matrix(assignments);
    spectral_cut(&sim, k, seed)
}

fn spectral_cut(affinity: &Array2<f64>, k: usize, seed: u64) -> Result<Vec<usize>> {
    let n = affinity.nrows();
    if n == 0 {
        return Err(Error::EmptyInput);
    }
    if k == 0 || k > n {
        return Err(Error::InvalidClusterCount {
            requested: k,
            n_items: n,
        });
    }

    let degrees: Vec<f64> = affinity
        .rows()
        .into_iter()
        .map(|row| row.sum())
        .collect();
    let mut normalized = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            let scale = (degrees[i] * degrees[j]).sqrt();
            if scale > 1e-12 {
                normalized[[i, j]] = affinity[[i, j]] / scale;
            }
        }
    }

    let (_, vectors) = symmetric_eigen_desc(&normalized)?;
    let mut embedding = Array2::zeros((n, k));
    for j in 0..k {
        embedding.column_mut(j).assign(&vectors.column(j));
    }
    let embedding = normalize_rows(&embedding);
    best_kmeans_labels(&embedding, k, seed)
}

/// Project the positive samples onto the top-K principal components of
/// the pooled separator directions and k-means them there.
pub(crate) fn direction_consensus(
    x: &Array2<f64>,
    positives: &[usize],
    directions: &Array2<f64>,
    k: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    if directions.nrows() == 0 {
        return Err(Error::EmptyInput);
    }
    let unit = normalize_rows(directions);
    let mean = unit.mean_axis(Axis(0)).ok_or(Error::EmptyInput)?;
    let centered = &unit - &mean;
    let denom = (unit.nrows() - 1).max(1) as f64;
    let covariance = centered.t().dot(&centered) / denom;

    let (_, vectors) = symmetric_eigen_desc(&covariance)?;
    let d = covariance.nrows();
    let m = k.min(d);
    let mut components = Array2::zeros((d, m));
    for j in 0..m {
        components.column_mut(j).assign(&vectors.column(j));
    }

    let embedded = x.select(Axis(0), positives).dot(&components);
    best_kmeans_labels(&embedded, k, seed)
}

/// Seeded k-means restarts with the best within-cluster scatter. A single
/// k-means++ draw can still pick an unlucky first center on small
/// problems.
fn best_kmeans_labels(x: &Array2<f64>, k: usize, seed: u64) -> Result<Vec<usize>> {
    let first = Kmeans::new(k).with_seed(seed).fit(x)?;
    let mut best_inertia = first.inertia();
    let mut best_labels = first.predict(x)?;
    for t in 1..4u64 {
        let fit = Kmeans::new(k).with_seed(seed.wrapping_add(t)).fit(x)?;
        if fit.inertia() < best_inertia {
            best_inertia = fit.inertia();
            best_labels = fit.predict(x)?;
        }
    }
    Ok(best_labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ari;
    use ndarray::array;

    #[test]
    fn test_similarity_matrix_agreement_fractions() {
        let assignments = array![[0usize, 1, 0], [0, 1, 0], [1, 0, 0], [1, 0, 1]];
        let sim = similarity_matrix(&assignments);

        assert_eq!(sim.dim(), (4, 4));
        assert!((sim[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((sim[[0, 1]] - 1.0).abs() < 1e-12);
        assert!((sim[[0, 2]] - 1.0 / 3.0).abs() < 1e-12);
        assert!((sim[[2, 3]] - 2.0 / 3.0).abs() < 1e-12);
        assert!((sim[[3, 0]] - sim[[0, 3]]).abs() < 1e-12);
    }

    #[test]
    fn test_cross_similarity_rectangular() {
        let training = array![[0usize, 0], [1, 1]];
        let queries = array![[0usize, 1], [1, 1], [0, 0]];
        let sim = cross_similarity(&queries, &training);

        assert_eq!(sim.dim(), (3, 2));
        assert!((sim[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((sim[[1, 1]] - 1.0).abs() < 1e-12);
        assert!((sim[[2, 1]] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_spectral_consensus_recovers_stable_split() {
        // three restarts agree on the partition up to label swaps
        let assignments = array![
            [0usize, 1, 0],
            [0, 1, 0],
            [0, 1, 0],
            [1, 0, 1],
            [1, 0, 1],
            [1, 0, 1],
        ];
        let labels = spectral_consensus(&assignments, 2, 7).unwrap();
        let truth = vec![0, 0, 0, 1, 1, 1];
        assert!((ari(&labels, &truth) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spectral_consensus_label_permutation_invariant() {
        let a = array![[0usize, 0], [0, 0], [1, 1], [1, 1]];
        let b = array![[1usize, 0], [1, 0], [0, 1], [0, 1]];
        let la = spectral_consensus(&a, 2, 3).unwrap();
        let lb = spectral_consensus(&b, 2, 3).unwrap();
        assert!((ari(&la, &lb) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spectral_consensus_rejects_bad_cluster_count() {
        let assignments = array![[0usize, 1], [1, 0]];
        assert!(matches!(
            spectral_consensus(&assignments, 3, 0),
            Err(Error::InvalidClusterCount {
                requested: 3,
                n_items: 2
            })
        ));
    }

    #[test]
    fn test_direction_consensus_splits_positive_blobs() {
        let x = array![
            [5.0, 5.0],
            [5.1, 4.9],
            [4.9, 5.1],
            [5.0, 5.2],
            [5.0, -5.0],
            [5.1, -4.9],
            [4.9, -5.1],
            [5.0, -5.2],
            [-5.0, 0.0],
            [-5.1, 0.1],
            [-4.9, -0.1],
            [-5.0, 0.2],
        ];
        let positives: Vec<usize> = (0..8).collect();
        // two restarts' worth of separator directions, one per blob
        let directions = array![
            [0.89, 0.45],
            [0.89, -0.45],
            [0.88, 0.46],
            [0.88, -0.46],
        ];
        let labels = direction_consensus(&x, &positives, &directions, 2, 11).unwrap();
        let truth = vec![0, 0, 0, 0, 1, 1, 1, 1];
        assert!((ari(&labels, &truth) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_consensus_from_str() {
        assert_eq!("spectral".parse::<Consensus>().unwrap(), Consensus::Spectral);
        assert_eq!(
            "direction_basis".parse::<Consensus>().unwrap(),
            Consensus::DirectionBasis
        );
        assert!(matches!(
            "majority".parse::<Consensus>(),
            Err(Error::UnknownStrategy { role: "consensus", .. })
        ));
    }
}
