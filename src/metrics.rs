//! Partition and classification metrics.
//!
//! Two measures back the whole crate: the Adjusted Rand Index compares two
//! hard cluster assignments (the EM loop uses it between successive
//! iterations as its stability signal, the test suite uses it against
//! ground truth), and plain accuracy scores the binary classifier.
//!
//! # References
//!
//! - Hubert & Arabie (1985). "Comparing partitions" (ARI)

use std::collections::HashMap;

/// Adjusted Rand Index between two hard assignments.
///
/// Corrected-for-chance version of the Rand Index: 0 for random agreement,
/// 1 for identical partitions (up to label permutation), negative for
/// worse-than-random.
///
/// Mismatched or empty inputs score 0.
///
/// # Example
///
/// ```rust
/// use facet::metrics::ari;
///
/// // Identical partitions under different label names.
/// let a = [0, 0, 1, 1];
/// let b = [1, 1, 0, 0];
/// assert!((ari(&a, &b) - 1.0).abs() < 1e-12);
/// ```
pub fn ari(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let n = pred.len();
    let mut joint: HashMap<(usize, usize), usize> = HashMap::new();
    let mut row_sums: HashMap<usize, usize> = HashMap::new();
    let mut col_sums: HashMap<usize, usize> = HashMap::new();

    for (&p, &t) in pred.iter().zip(truth.iter()) {
        *joint.entry((p, t)).or_insert(0) += 1;
        *row_sums.entry(p).or_insert(0) += 1;
        *col_sums.entry(t).or_insert(0) += 1;
    }

    let sum_comb_ij: f64 = joint.values().map(|&c| comb2(c) as f64).sum();
    let sum_comb_a: f64 = row_sums.values().map(|&a| comb2(a) as f64).sum();
    let sum_comb_b: f64 = col_sums.values().map(|&b| comb2(b) as f64).sum();
    let comb_n = comb2(n) as f64;

    // ARI = (index - expected) / (max - expected)
    let expected = sum_comb_a * sum_comb_b / comb_n;
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;

    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        // Both partitions degenerate the same way (e.g. single cluster).
        return 1.0;
    }

    (sum_comb_ij - expected) / denom
}

/// Fraction of predictions equal to the true labels.
///
/// Mismatched or empty inputs score 0.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.len() != y_pred.len() || y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    hits as f64 / y_true.len() as f64
}

fn comb2(n: usize) -> usize {
    if n < 2 {
        0
    } else {
        n * (n - 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ari_perfect() {
        let pred = [0, 0, 1, 1];
        let truth = [0, 0, 1, 1];
        assert!((ari(&pred, &truth) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ari_permuted_labels() {
        let pred = [2, 2, 0, 0, 1, 1];
        let truth = [0, 0, 1, 1, 2, 2];
        assert!((ari(&pred, &truth) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ari_random_is_low() {
        let pred = [0, 1, 0, 1, 0, 1, 0, 1];
        let truth = [0, 0, 0, 0, 1, 1, 1, 1];
        assert!(ari(&pred, &truth).abs() < 0.3);
    }

    #[test]
    fn test_ari_single_cluster_both() {
        let pred = [0, 0, 0, 0];
        let truth = [3, 3, 3, 3];
        assert!((ari(&pred, &truth) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ari_length_mismatch() {
        assert_eq!(ari(&[0, 1], &[0, 1, 2]), 0.0);
        assert_eq!(ari(&[], &[]), 0.0);
    }

    #[test]
    fn test_accuracy_basic() {
        let truth = [0, 1, 1, 0];
        let pred = [0, 1, 0, 0];
        assert!((accuracy(&truth, &pred) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_empty() {
        assert_eq!(accuracy(&[], &[]), 0.0);
    }
}
