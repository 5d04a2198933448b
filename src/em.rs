//! Expectation-maximization core.
//!
//! One EM run alternates two moves until the positive-sample clustering
//! stops changing:
//!
//! - **maximization**: per cluster, fit a linear separator of positives
//!   vs negatives with sample weights taken from that cluster's membership
//!   column (plus a 1e-5 floor so trainers never see an all-zero problem);
//! - **expectation**: unit-normalize the K separator directions,
//!   Gram-Schmidt them into an orthonormal basis, project every sample
//!   into that discriminative subspace, refit the clustering backend on
//!   the projected positives (seeded at the membership-weighted projected
//!   centroids so cluster identities carry over), and take the model's
//!   soft membership of all samples as the new matrix.
//!
//! After each expectation the configured weighting policies rewrite the
//! negative and positive rows, and consistency is measured as the adjusted
//! Rand index between the previous and current hard assignment of the
//! positives. The best-so-far artifacts are kept in an explicit
//! [`Checkpoint`]; when no iteration beats the floor (a normal restart's
//! floor is 1.0, which an ARI cannot exceed), the last iteration's
//! artifacts stand in, so a restart always returns a usable snapshot.
//!
//! Two degeneracy guards run at the top of every iteration: a cluster
//! whose positive weights are all zero triggers a full reseed through the
//! initializer, and a cluster whose maximum negative weight fell below 0.5
//! gets its negative weights reset to 1/K. Both are recoverable and only
//! logged at debug level.

use std::str::FromStr;

use ndarray::{Array1, Array2, Axis};
use rand::RngCore;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

use crate::cluster::{ClusterFitter, ClusterModel, SoftClusterPredict};
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::linalg::{argmax, gram_schmidt};
use crate::metrics::ari;
use crate::separator::{LinearSeparator, SeparatorFitter, SeparatorTrainer};

const WEIGHT_FLOOR: f64 = 1e-5;

/// Membership weighting policy for one side of the polytope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    /// Constant 1/K.
    Uniform,
    /// Keep the clustering model's soft membership.
    Soft,
    /// One-hot at the row argmax.
    Hard,
}

impl FromStr for Weighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(Weighting::Uniform),
            "soft" => Ok(Weighting::Soft),
            "hard" => Ok(Weighting::Hard),
            other => Err(Error::UnknownStrategy {
                role: "weighting",
                name: other.to_string(),
            }),
        }
    }
}

/// Rewrite the given rows of `s` according to the policy.
pub(crate) fn apply_weighting(s: &mut Array2<f64>, rows: &[usize], policy: Weighting, k: usize) {
    match policy {
        Weighting::Soft => {}
        Weighting::Uniform => {
            for &i in rows {
                s.row_mut(i).fill(1.0 / k as f64);
            }
        }
        Weighting::Hard => {
            for &i in rows {
                let c = argmax(s.row(i).iter().copied());
                let mut row = s.row_mut(i);
                row.fill(0.0);
                row[c] = 1.0;
            }
        }
    }
}

/// Best-so-far artifacts of one EM run.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    pub(crate) separators: Vec<LinearSeparator>,
    pub(crate) basis: Array2<f64>,
    pub(crate) model: ClusterModel,
    pub(crate) consistency: f64,
}

/// Result of one EM run.
#[derive(Debug, Clone)]
pub(crate) struct EmOutcome {
    /// Final hard cluster assignment of the positive samples, pre-policy.
    pub(crate) assignment: Vec<usize>,
    pub(crate) checkpoint: Checkpoint,
    /// Iterations actually executed (early stop included).
    pub(crate) iterations: usize,
}

/// One EM run over a fixed dataset. Borrows the problem definition; the
/// membership matrix is owned and mutated by [`EmRunner::run`].
pub(crate) struct EmRunner<'a> {
    pub(crate) x: &'a Array2<f64>,
    pub(crate) y_signed: &'a Array1<f64>,
    pub(crate) positives: &'a [usize],
    pub(crate) negatives: &'a [usize],
    pub(crate) k: usize,
    pub(crate) n_iterations: usize,
    pub(crate) stability_threshold: f64,
    pub(crate) noise_tolerance: f64,
    pub(crate) negative_weighting: Weighting,
    pub(crate) positive_weighting: Weighting,
    pub(crate) separator: &'a SeparatorFitter,
    pub(crate) clusterer: &'a ClusterFitter,
    pub(crate) initializer: &'a Initializer,
}

impl EmRunner<'_> {
    /// Run EM from the seeded membership matrix. `floor` is the initial
    /// best-consistency bound: 1.0 for normal restarts (the last iteration
    /// wins), 0.0 for the final refinement pass (the best iteration wins).
    pub(crate) fn run(
        &self,
        mut s: Array2<f64>,
        assignment: Vec<usize>,
        floor: f64,
        rng: &mut dyn RngCore,
    ) -> Result<EmOutcome> {
        let mut prev_assignment = assignment;
        let mut best: Option<Checkpoint> = None;
        let mut best_consistency = floor;
        let mut latest: Option<(Vec<LinearSeparator>, Array2<f64>, ClusterModel)> = None;
        let mut last_consistency = f64::NEG_INFINITY;
        let mut iterations = 0;

        for _ in 0..self.n_iterations {
            iterations += 1;
            self.guard_degeneracies(&mut s, &mut prev_assignment, rng)?;

            let separators = self.maximization(&s)?;
            let (basis, model, q) = self.expectation(&separators, &s)?;
            s = q;
            let new_assignment: Vec<usize> = self
                .positives
                .iter()
                .map(|&i| argmax(s.row(i).iter().copied()))
                .collect();
            apply_weighting(&mut s, self.negatives, self.negative_weighting, self.k);
            apply_weighting(&mut s, self.positives, self.positive_weighting, self.k);

            let consistency = ari(&prev_assignment, &new_assignment);
            last_consistency = consistency;
            if consistency > best_consistency {
                best_consistency = consistency;
                best = Some(Checkpoint {
                    separators: separators.clone(),
                    basis: basis.clone(),
                    model: model.clone(),
                    consistency,
                });
            }
            latest = Some((separators, basis, model));
            prev_assignment = new_assignment;
            if consistency > self.stability_threshold {
                debug!(iterations, consistency, "clustering stabilized");
                break;
            }
        }

        let checkpoint = match (best, latest) {
            (Some(checkpoint), _) => checkpoint,
            (None, Some((separators, basis, model))) => Checkpoint {
                separators,
                basis,
                model,
                consistency: last_consistency,
            },
            (None, None) => {
                return Err(Error::InvalidParameter {
                    name: "n_iterations",
                    message: "must be at least 1",
                })
            }
        };
        Ok(EmOutcome {
            assignment: prev_assignment,
            checkpoint,
            iterations,
        })
    }

    /// Reseed on positive collapse, rebalance on negative collapse.
    fn guard_degeneracies(
        &self,
        s: &mut Array2<f64>,
        assignment: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        for cluster in 0..self.k {
            if self.positives.iter().all(|&i| s[[i, cluster]] == 0.0) {
                debug!(cluster, "cluster has no positive weight left, reseeding membership");
                let (new_s, new_assignment) = self.initializer.initialize(
                    self.x,
                    self.y_signed,
                    self.positives,
                    self.negatives,
                    rng,
                )?;
                *s = new_s;
                *assignment = new_assignment;
            }
            let max_negative = self
                .negatives
                .iter()
                .map(|&i| s[[i, cluster]])
                .fold(f64::NEG_INFINITY, f64::max);
            if max_negative < 0.5 {
                debug!(cluster, "cluster negative weights collapsed, resetting to uniform");
                for &i in self.negatives {
                    s[[i, cluster]] = 1.0 / self.k as f64;
                }
            }
        }
        Ok(())
    }

    /// Per-cluster weighted separator fits, aggregated in cluster order.
    fn maximization(&self, s: &Array2<f64>) -> Result<Vec<LinearSeparator>> {
        let n = self.x.nrows();
        let fit_one = |cluster: usize| -> Result<LinearSeparator> {
            let weights = Array1::from_iter((0..n).map(|i| s[[i, cluster]] + WEIGHT_FLOOR));
            self.separator.fit(self.x, self.y_signed, &weights)
        };

        #[cfg(feature = "parallel")]
        {
            (0..self.k).into_par_iter().map(fit_one).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            (0..self.k).map(fit_one).collect()
        }
    }

    /// Re-cluster in the discriminative subspace spanned by the separator
    /// directions. Returns the basis, the fitted model, and the model's
    /// soft membership of every sample.
    fn expectation(
        &self,
        separators: &[LinearSeparator],
        s: &Array2<f64>,
    ) -> Result<(Array2<f64>, ClusterModel, Array2<f64>)> {
        let d = self.x.ncols();
        let mut directions = Array2::zeros((self.k, d));
        for (row, separator) in separators.iter().enumerate() {
            directions.row_mut(row).assign(&separator.weights);
        }

        let basis = gram_schmidt(&directions, self.noise_tolerance);
        if basis.nrows() == 0 {
            return Err(Error::Other(
                "all separator directions are degenerate, no subspace to cluster in".to_string(),
            ));
        }
        let x_proj = self.x.dot(&basis.t());

        // membership-weighted projected centroids seed the refit
        let b = basis.nrows();
        let mut centroids = Array2::zeros((self.k, b));
        for cluster in 0..self.k {
            for &i in self.positives {
                let w = s[[i, cluster]];
                for j in 0..b {
                    centroids[[cluster, j]] += w * x_proj[[i, j]];
                }
            }
        }
        centroids /= self.positives.len() as f64;

        let x_proj_pos = x_proj.select(Axis(0), self.positives);
        let model = self.clusterer.fit_from(&x_proj_pos, &centroids)?;
        let q = model.predict_proba(&x_proj)?;
        Ok((basis, model, q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Clustering;
    use crate::init::Initialization;
    use crate::separator::Maximization;
    use ndarray::array;
    use rand::prelude::*;

    struct Fixture {
        x: Array2<f64>,
        y: Array1<f64>,
        positives: Vec<usize>,
        negatives: Vec<usize>,
        separator: SeparatorFitter,
        clusterer: ClusterFitter,
        initializer: Initializer,
    }

    fn fixture() -> Fixture {
        // two positive blobs at (5, 5) and (5, -5), negatives at (-5, 0)
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
            [-5.2, -0.1],
            [-4.8, 0.2],
        ];
        let y = array![
            1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0
        ];
        let clusterer = ClusterFitter::from_strategy(Clustering::Kmeans, 2);
        Fixture {
            x,
            y,
            positives: (0..8).collect(),
            negatives: (8..14).collect(),
            separator: SeparatorFitter::from_strategy(Maximization::Logistic, 1.0),
            clusterer: clusterer.clone(),
            initializer: Initializer::new(Initialization::Clustering, 2, 1.0, clusterer),
        }
    }

    fn runner<'a>(f: &'a Fixture, n_iterations: usize, stability_threshold: f64) -> EmRunner<'a> {
        EmRunner {
            x: &f.x,
            y_signed: &f.y,
            positives: &f.positives,
            negatives: &f.negatives,
            k: 2,
            n_iterations,
            stability_threshold,
            noise_tolerance: 10.0,
            negative_weighting: Weighting::Uniform,
            positive_weighting: Weighting::Hard,
            separator: &f.separator,
            clusterer: &f.clusterer,
            initializer: &f.initializer,
        }
    }

    fn seeded_start(f: &Fixture, rng: &mut dyn RngCore) -> (Array2<f64>, Vec<usize>) {
        let (mut s, assignment) = f
            .initializer
            .initialize(&f.x, &f.y, &f.positives, &f.negatives, rng)
            .unwrap();
        apply_weighting(&mut s, &f.negatives, Weighting::Uniform, 2);
        apply_weighting(&mut s, &f.positives, Weighting::Hard, 2);
        (s, assignment)
    }

    #[test]
    fn test_em_separates_positive_blobs() {
        let f = fixture();
        let mut rng = StdRng::seed_from_u64(42);
        let (s, assignment) = seeded_start(&f, &mut rng);
        let outcome = runner(&f, 10, 0.9).run(s, assignment, 1.0, &mut rng).unwrap();

        let truth = vec![0, 0, 0, 0, 1, 1, 1, 1];
        assert!(ari(&outcome.assignment, &truth) > 0.99);
        assert_eq!(outcome.checkpoint.separators.len(), 2);
        assert!(outcome.checkpoint.basis.nrows() >= 1);
    }

    #[test]
    fn test_em_respects_iteration_cap() {
        let f = fixture();
        let mut rng = StdRng::seed_from_u64(1);
        let (s, assignment) = seeded_start(&f, &mut rng);
        // threshold 1.0 cannot be exceeded, so the cap decides
        let outcome = runner(&f, 3, 1.0).run(s, assignment, 1.0, &mut rng).unwrap();
        assert_eq!(outcome.iterations, 3);
    }

    #[test]
    fn test_em_early_stop_on_stability() {
        let f = fixture();
        let mut rng = StdRng::seed_from_u64(7);
        let (s, assignment) = seeded_start(&f, &mut rng);
        // clean blobs stabilize immediately; a zero threshold stops the run
        let outcome = runner(&f, 10, 0.0).run(s, assignment, 1.0, &mut rng).unwrap();
        assert!(outcome.iterations < 10);
    }

    #[test]
    fn test_em_reseeds_dead_cluster() {
        let f = fixture();
        let mut rng = StdRng::seed_from_u64(5);
        // cluster 1 has zero positive mass everywhere
        let n = f.x.nrows();
        let mut s = Array2::zeros((n, 2));
        for i in 0..n {
            s[[i, 0]] = 1.0;
        }
        let assignment = vec![0; f.positives.len()];
        let outcome = runner(&f, 2, 1.0).run(s, assignment, 1.0, &mut rng).unwrap();
        assert_eq!(outcome.assignment.len(), f.positives.len());
        assert!(outcome.assignment.iter().all(|&c| c < 2));
    }

    #[test]
    fn test_apply_weighting_policies() {
        let mut s = array![[0.7, 0.3], [0.2, 0.8], [0.5, 0.5]];
        let rows = vec![0, 1, 2];

        let mut hard = s.clone();
        apply_weighting(&mut hard, &rows, Weighting::Hard, 2);
        assert_eq!(hard, array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]]);

        let mut uniform = s.clone();
        apply_weighting(&mut uniform, &rows, Weighting::Uniform, 2);
        assert!(uniform.iter().all(|&v| (v - 0.5).abs() < 1e-12));

        apply_weighting(&mut s, &rows, Weighting::Soft, 2);
        assert_eq!(s, array![[0.7, 0.3], [0.2, 0.8], [0.5, 0.5]]);
    }

    #[test]
    fn test_weighting_from_str() {
        assert_eq!("soft".parse::<Weighting>().unwrap(), Weighting::Soft);
        assert_eq!("hard".parse::<Weighting>().unwrap(), Weighting::Hard);
        assert_eq!("uniform".parse::<Weighting>().unwrap(), Weighting::Uniform);
        assert!(matches!(
            "fuzzy".parse::<Weighting>(),
            Err(Error::UnknownStrategy { role: "weighting", .. })
        ));
    }
}
