//! Membership matrix seeding.
//!
//! The EM loop is a local optimizer: where the membership matrix starts
//! decides which subtype structure it can find. The strategies here trade
//! cost against diversity of the seed:
//!
//! | Strategy | Seed |
//! |---|---|
//! | `Uniform` | every row 1/K |
//! | `Dpp` | K mutually diverse positive-minus-negative directions, sampled by a determinantal point process |
//! | `BatchedDpp` | DPP over batch-averaged difference directions, measured inside the global separating hyperplane |
//! | `Clustering` | delegate to the configured clustering backend on the positive rows |
//! | `SupportVector` | cluster the support vectors of a max-margin fit on a random half of the data |
//!
//! The DPP pipeline builds the normalized Gram matrix of the difference
//! vectors and k-DPP-samples exactly K of them: elementary symmetric
//! polynomials select K eigenvector indices with probability proportional
//! to their eigenvalue products, then iterative conditioning walks the
//! selected eigenvectors down to K concrete, mutually diverse row indices.
//! Each positive sample's affinity to a sampled direction is the dot
//! product of its unit-normalized feature vector with that direction, and
//! [`proportional_assignment`] turns affinities into membership rows.
//!
//! Negative rows are left at 1/K by every strategy except `Clustering`;
//! the weighting policy overwrites them each iteration anyway.

use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use tracing::debug;

use crate::cluster::{ClusterFitter, ClusterModel, ClusterPredict, Kmeans, SoftClusterPredict};
use crate::error::{Error, Result};
use crate::linalg::{argmax, normalize_rows, symmetric_eigen_desc};
use crate::separator::{SeparatorTrainer, SvmTrainer};

const DEFAULT_BATCH: usize = 32;

/// Which neighbors of the anchor pair a batched-DPP difference vector
/// averages over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSelect {
    /// The `batch_size` samples farthest from the anchor in-hyperplane.
    Farthest,
    /// The `batch_size` samples nearest to the anchor in-hyperplane.
    Nearest,
}

impl FromStr for BatchSelect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "farthest" => Ok(BatchSelect::Farthest),
            "nearest" => Ok(BatchSelect::Nearest),
            other => Err(Error::UnknownStrategy {
                role: "batch_select",
                name: other.to_string(),
            }),
        }
    }
}

/// Membership initialization strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    Uniform,
    Dpp,
    BatchedDpp {
        batch_size: usize,
        select: BatchSelect,
    },
    Clustering,
    SupportVector,
}

impl FromStr for Initialization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(Initialization::Uniform),
            "dpp" => Ok(Initialization::Dpp),
            "batched_dpp" => Ok(Initialization::BatchedDpp {
                batch_size: DEFAULT_BATCH,
                select: BatchSelect::Farthest,
            }),
            "clustering" => Ok(Initialization::Clustering),
            "support_vector" => Ok(Initialization::SupportVector),
            other => Err(Error::UnknownStrategy {
                role: "initialization",
                name: other.to_string(),
            }),
        }
    }
}

/// An initialization strategy bound to the run configuration.
#[derive(Debug, Clone)]
pub(crate) struct Initializer {
    strategy: Initialization,
    k: usize,
    c: f64,
    clusterer: ClusterFitter,
}

impl Initializer {
    pub(crate) fn new(
        strategy: Initialization,
        k: usize,
        c: f64,
        clusterer: ClusterFitter,
    ) -> Self {
        Self {
            strategy,
            k,
            c,
            clusterer,
        }
    }

    /// Seed the membership matrix. Returns the full n x K matrix (negative
    /// rows at 1/K unless the strategy says otherwise) and the hard cluster
    /// index of each positive sample.
    pub(crate) fn initialize(
        &self,
        x: &Array2<f64>,
        y_signed: &Array1<f64>,
        positives: &[usize],
        negatives: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<(Array2<f64>, Vec<usize>)> {
        let n = x.nrows();
        let k = self.k;
        let mut s = Array2::from_elem((n, k), 1.0 / k as f64);
        if k == 1 {
            return Ok((s, vec![0; positives.len()]));
        }

        match self.strategy {
            Initialization::Uniform => {}
            Initialization::Dpp => {
                let w = difference_vectors(x, positives, negatives, rng);
                let membership = self.dpp_membership(x, positives, &w, rng)?;
                scatter_rows(&mut s, positives, &membership);
            }
            Initialization::BatchedDpp { batch_size, select } => {
                let w = self.batched_difference_vectors(
                    x, y_signed, positives, negatives, batch_size, select, rng,
                )?;
                let membership = self.dpp_membership(x, positives, &w, rng)?;
                scatter_rows(&mut s, positives, &membership);
            }
            Initialization::Clustering => {
                let x_pos = x.select(Axis(0), positives);
                let seed = rng.random::<u64>();
                let model = self.clusterer.fit_random(&x_pos, seed)?;
                let membership = match &model {
                    ClusterModel::Kmeans(_) => one_hot(&model.predict(x)?, k),
                    ClusterModel::Gmm(_) => model.predict_proba(x)?,
                };
                s.assign(&membership);
            }
            Initialization::SupportVector => {
                let half: Vec<usize> = (0..n / 2).map(|_| rng.random_range(0..n)).collect();
                let x_sub = x.select(Axis(0), &half);
                let y_sub = Array1::from_iter(half.iter().map(|&i| y_signed[i]));
                let uniform = Array1::ones(half.len());
                let (_, support) = SvmTrainer::new(self.c).fit_with_support(&x_sub, &y_sub, &uniform)?;

                let x_support = if support.len() >= k {
                    x_sub.select(Axis(0), &support)
                } else {
                    debug!(
                        support = support.len(),
                        k, "support set smaller than cluster count, clustering all samples"
                    );
                    x.clone()
                };
                let seed = rng.random::<u64>();
                let centers = Kmeans::new(k).with_seed(seed).fit(&x_support)?;
                let labels = centers.predict(&x.select(Axis(0), positives))?;
                scatter_rows(&mut s, positives, &one_hot(&labels, k));
            }
        }

        let cluster_index = positives
            .iter()
            .map(|&i| argmax(s.row(i).iter().copied()))
            .collect();
        Ok((s, cluster_index))
    }

    /// DPP pipeline over a set of candidate directions: normalized Gram,
    /// eigendecomposition, k-DPP sample, affinity, proportional assignment.
    fn dpp_membership(
        &self,
        x: &Array2<f64>,
        positives: &[usize],
        w: &Array2<f64>,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f64>> {
        let gram = normalized_gram(w);
        let (mut values, vectors) = symmetric_eigen_desc(&gram)?;
        for v in &mut values {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        let picked = sample_dpp(&values, &vectors, self.k, rng);

        let pos_norm = normalize_rows(&x.select(Axis(0), positives));
        let mut affinity = Array2::zeros((positives.len(), self.k));
        for (c, &row_idx) in picked.iter().enumerate() {
            let direction = w.row(row_idx);
            for i in 0..pos_norm.nrows() {
                affinity[[i, c]] = pos_norm.row(i).dot(&direction);
            }
        }
        Ok(proportional_assignment(&affinity))
    }

    /// One difference vector per sample, each the difference of batch means
    /// around a random positive/negative anchor pair. Distances to the
    /// anchor are measured inside the hyperplane of a single unweighted
    /// max-margin fit, so batch neighbors share a position along the
    /// class boundary rather than a distance to it.
    fn batched_difference_vectors(
        &self,
        x: &Array2<f64>,
        y_signed: &Array1<f64>,
        positives: &[usize],
        negatives: &[usize],
        batch_size: usize,
        select: BatchSelect,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f64>> {
        let n = x.nrows();
        let uniform = Array1::ones(n);
        let separator = SvmTrainer::new(self.c).fit(x, y_signed, &uniform)?;
        let direction = separator.weights;
        let norm_sq = direction.dot(&direction);

        let in_plane = |v: ArrayView1<'_, f64>| -> Array1<f64> {
            if norm_sq > 1e-12 {
                &v - &(&direction * (v.dot(&direction) / norm_sq))
            } else {
                v.to_owned()
            }
        };

        let mut w = Array2::zeros((n, x.ncols()));
        for j in 0..n {
            let anchor_pos = positives[rng.random_range(0..positives.len())];
            let anchor_neg = negatives[rng.random_range(0..negatives.len())];
            let pos_batch = batch_around(x, positives, anchor_pos, batch_size, select, &in_plane);
            let neg_batch = batch_around(x, negatives, anchor_neg, batch_size, select, &in_plane);
            let diff = mean_rows(x, &pos_batch) - mean_rows(x, &neg_batch);
            w.row_mut(j).assign(&diff);
        }
        Ok(w)
    }
}

/// One random positive-minus-negative difference vector per sample.
fn difference_vectors(
    x: &Array2<f64>,
    positives: &[usize],
    negatives: &[usize],
    rng: &mut dyn RngCore,
) -> Array2<f64> {
    let n = x.nrows();
    let mut w = Array2::zeros((n, x.ncols()));
    for j in 0..n {
        let p = positives[rng.random_range(0..positives.len())];
        let q = negatives[rng.random_range(0..negatives.len())];
        let diff = &x.row(p) - &x.row(q);
        w.row_mut(j).assign(&diff);
    }
    w
}

/// The `batch_size` members of `candidates` nearest to or farthest from
/// the anchor, by in-hyperplane distance.
fn batch_around(
    x: &Array2<f64>,
    candidates: &[usize],
    anchor: usize,
    batch_size: usize,
    select: BatchSelect,
    in_plane: &dyn Fn(ArrayView1<'_, f64>) -> Array1<f64>,
) -> Vec<usize> {
    let planar_anchor = in_plane(x.row(anchor));
    let mut by_dist: Vec<(f64, usize)> = candidates
        .iter()
        .map(|&i| {
            let diff = in_plane(x.row(i)) - &planar_anchor;
            (diff.dot(&diff).sqrt(), i)
        })
        .collect();
    by_dist.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let take = batch_size.min(by_dist.len());
    match select {
        BatchSelect::Nearest => by_dist[..take].iter().map(|t| t.1).collect(),
        BatchSelect::Farthest => by_dist[by_dist.len() - take..].iter().map(|t| t.1).collect(),
    }
}

fn mean_rows(x: &Array2<f64>, rows: &[usize]) -> Array1<f64> {
    let mut acc = Array1::zeros(x.ncols());
    for &i in rows {
        acc += &x.row(i);
    }
    acc / rows.len() as f64
}

/// Gram matrix `W Wᵀ` normalized by `√(diag ⊗ diag)`, so every
/// non-degenerate diagonal entry is 1.
fn normalized_gram(w: &Array2<f64>) -> Array2<f64> {
    let n = w.nrows();
    let mut g = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let v = w.row(i).dot(&w.row(j));
            g[[i, j]] = v;
            g[[j, i]] = v;
        }
    }
    let diag: Vec<f64> = (0..n).map(|i| g[[i, i]]).collect();
    for i in 0..n {
        for j in 0..n {
            let denom = (diag[i] * diag[j]).sqrt();
            g[[i, j]] = if denom > 1e-12 { g[[i, j]] / denom } else { 0.0 };
        }
    }
    g
}

/// Elementary symmetric polynomials `E[l][m]` of the first `m` eigenvalues,
/// degree `l` up to `k`.
fn elem_sympoly(lambda: &[f64], k: usize) -> Vec<Vec<f64>> {
    let n = lambda.len();
    let mut e = vec![vec![0.0; n + 1]; k + 1];
    for col in e[0].iter_mut() {
        *col = 1.0;
    }
    for l in 1..=k {
        for m in 1..=n {
            e[l][m] = e[l][m - 1] + lambda[m - 1] * e[l - 1][m - 1];
        }
    }
    e
}

/// Sample `k` distinct eigenvalue indices, each set weighted by the
/// product of its eigenvalues.
fn sample_k(lambda: &[f64], k: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    let e = elem_sympoly(lambda, k);
    let mut picked = Vec::with_capacity(k);
    let mut i = lambda.len();
    let mut remaining = k;
    while remaining > 0 && i > 0 {
        let marg = if i == remaining {
            1.0
        } else {
            let denom = e[remaining][i];
            if denom > 0.0 {
                lambda[i - 1] * e[remaining - 1][i - 1] / denom
            } else {
                0.0
            }
        };
        if rng.random::<f64>() < marg {
            picked.push(i - 1);
            remaining -= 1;
        }
        i -= 1;
    }
    picked
}

/// k-DPP sample of `k` distinct item indices from the eigendecomposition
/// of a normalized Gram matrix. After each selection the retained
/// eigenvectors are conditioned on it (the selected item's probability
/// mass drops to zero) and re-orthonormalized.
fn sample_dpp(
    values: &[f64],
    vectors: &Array2<f64>,
    k: usize,
    rng: &mut dyn RngCore,
) -> Vec<usize> {
    let n = vectors.nrows();
    let picked_eigen = sample_k(values, k, rng);
    let mut cols: Vec<Array1<f64>> = picked_eigen
        .iter()
        .map(|&j| vectors.column(j).to_owned())
        .collect();

    let mut chosen = vec![false; n];
    let mut items = Vec::with_capacity(k);
    for _ in 0..k {
        let probs: Vec<f64> = (0..n)
            .map(|t| cols.iter().map(|c| c[t] * c[t]).sum::<f64>())
            .collect();
        let total: f64 = probs.iter().sum();

        let mut item = if total > 1e-12 {
            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = n - 1;
            for (t, &p) in probs.iter().enumerate() {
                cumsum += p;
                if cumsum >= threshold {
                    selected = t;
                    break;
                }
            }
            selected
        } else {
            n
        };
        if item >= n || chosen[item] {
            // numerically degenerate draw: fall back to any open item
            let open: Vec<usize> = (0..n).filter(|&t| !chosen[t]).collect();
            item = open[rng.random_range(0..open.len())];
        }
        chosen[item] = true;
        items.push(item);

        if let Some(j) = (0..cols.len()).find(|&j| cols[j][item].abs() > 1e-12) {
            let vj = cols.remove(j);
            for c in cols.iter_mut() {
                let coef = c[item] / vj[item];
                *c -= &(&vj * coef);
            }
            for a in 0..cols.len() {
                for b in 0..a {
                    let coef = cols[a].dot(&cols[b]);
                    let proj = &cols[b] * coef;
                    cols[a] -= &proj;
                }
                let norm = cols[a].dot(&cols[a]).sqrt();
                if norm > 1e-12 {
                    cols[a].mapv_inplace(|v| v / norm);
                }
            }
        }
    }
    items
}

/// Affinity rows to membership rows. A cluster is admissible for a sample
/// when the affinity reaches 1; admissible clusters split the row's mass
/// proportionally to `affinity - 1` (uniformly when all sit exactly at 1).
/// A row with no admissible cluster splits its mass proportionally to
/// `1 / |affinity - 1|` instead. Every row sums to 1.
pub(crate) fn proportional_assignment(affinity: &Array2<f64>) -> Array2<f64> {
    let (n, k) = affinity.dim();
    let mut out = Array2::zeros((n, k));
    for i in 0..n {
        let shifted: Vec<f64> = (0..k).map(|c| affinity[[i, c]] - 1.0).collect();
        let admissible: Vec<usize> = (0..k).filter(|&c| shifted[c] >= 0.0).collect();
        if admissible.is_empty() {
            let inv: Vec<f64> = shifted.iter().map(|&d| 1.0 / d.abs()).collect();
            let total: f64 = inv.iter().sum();
            for c in 0..k {
                out[[i, c]] = inv[c] / total;
            }
        } else {
            let total: f64 = admissible.iter().map(|&c| shifted[c]).sum();
            if total > 0.0 {
                for &c in &admissible {
                    out[[i, c]] = shifted[c] / total;
                }
            } else {
                for &c in &admissible {
                    out[[i, c]] = 1.0 / admissible.len() as f64;
                }
            }
        }
    }
    out
}

pub(crate) fn one_hot(labels: &[usize], k: usize) -> Array2<f64> {
    let mut out = Array2::zeros((labels.len(), k));
    for (i, &c) in labels.iter().enumerate() {
        out[[i, c]] = 1.0;
    }
    out
}

fn scatter_rows(s: &mut Array2<f64>, rows: &[usize], values: &Array2<f64>) {
    for (src, &dst) in rows.iter().enumerate() {
        s.row_mut(dst).assign(&values.row(src));
    }
}
