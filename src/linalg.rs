//! Dense numeric kernels shared across the crate.
//!
//! Three things live here: the ordered Gram-Schmidt pass that turns a set
//! of separator directions into the discriminative-subspace basis, a
//! symmetric eigendecomposition wrapper (faer) returning eigenpairs in
//! descending eigenvalue order, and a pivoted-LU linear solve used by the
//! logistic trainer. Plus the small scalar helpers everyone needs.
//!
//! Gram-Schmidt here is deliberately order-dependent: directions are
//! processed most-mutually-distinct first, because classical Gram-Schmidt
//! on a non-square system keeps different subspaces depending on order.

use faer::prelude::*;
use faer::{Mat, Side};
use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Error, Result};

/// Orthonormal basis from a set of separator directions.
///
/// Rows of `directions` are unit-normalized first (zero rows are dropped).
/// Directions are ordered by descending distinctiveness (the mean residual
/// norm after projecting out each other direction), then run through
/// classical Gram-Schmidt. A residual is accepted while fewer than
/// two basis vectors exist if its norm clears 1e-2, afterwards only if
/// `norm * noise_tolerance > 1`. The output has at most `directions.nrows()`
/// rows and may have fewer when directions are nearly collinear.
pub fn gram_schmidt(directions: &Array2<f64>, noise_tolerance: f64) -> Array2<f64> {
    let d = directions.ncols();
    let mut units: Vec<Array1<f64>> = Vec::with_capacity(directions.nrows());
    for row in directions.rows() {
        let norm = row.dot(&row).sqrt();
        if norm > 1e-12 {
            units.push(row.mapv(|v| v / norm));
        }
    }

    if units.len() <= 1 {
        let mut basis = Array2::zeros((units.len(), d));
        if let Some(u) = units.first() {
            basis.row_mut(0).assign(u);
        }
        return basis;
    }

    // Mean residual norm against every other direction, descending.
    let mut scored: Vec<(f64, usize)> = units
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let mut total = 0.0;
            for (j, w) in units.iter().enumerate() {
                if i != j {
                    let resid = v - &(w * v.dot(w));
                    total += resid.dot(&resid).sqrt();
                }
            }
            (total / (units.len() - 1) as f64, i)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut basis: Vec<Array1<f64>> = Vec::with_capacity(units.len());
    for &(_, idx) in &scored {
        let mut w = units[idx].clone();
        for b in &basis {
            let coef = units[idx].dot(b);
            w = w - &(b * coef);
        }
        let norm = w.dot(&w).sqrt();
        let accepted = if basis.len() >= 2 {
            norm * noise_tolerance > 1.0
        } else {
            norm > 1e-2
        };
        if accepted {
            basis.push(w.mapv(|v| v / norm));
        }
    }

    let mut out = Array2::zeros((basis.len(), d));
    for (i, b) in basis.iter().enumerate() {
        out.row_mut(i).assign(b);
    }
    out
}

/// Eigendecomposition of a symmetric matrix, eigenpairs sorted by
/// descending eigenvalue. Column `j` of the returned matrix is the
/// eigenvector paired with the `j`-th returned value.
pub(crate) fn symmetric_eigen_desc(m: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>)> {
    let n = m.nrows();
    if n == 0 {
        return Err(Error::EmptyInput);
    }
    if m.ncols() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            found: m.ncols(),
        });
    }

    let mut fm = Mat::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            fm[(i, j)] = m[[i, j]];
        }
    }
    let evd = fm
        .self_adjoint_eigen(Side::Lower)
        .map_err(|_| Error::Other("symmetric eigendecomposition failed".to_string()))?;
    let s = evd.S().column_vector();
    let u = evd.U();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| s[b].partial_cmp(&s[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut values = Vec::with_capacity(n);
    let mut vectors = Array2::zeros((n, n));
    for (out_col, &src) in order.iter().enumerate() {
        values.push(s[src]);
        for row in 0..n {
            vectors[[row, out_col]] = u[(row, src)];
        }
    }
    Ok((values, vectors))
}

/// Solve `a * x = b` for square `a` via full-pivot LU.
pub(crate) fn solve_lu(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            found: a.ncols(),
        });
    }
    if b.len() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            found: b.len(),
        });
    }

    let mut am = Mat::<f64>::zeros(n, n);
    let mut bm = Mat::<f64>::zeros(n, 1);
    for i in 0..n {
        bm[(i, 0)] = b[i];
        for j in 0..n {
            am[(i, j)] = a[[i, j]];
        }
    }
    let sol = am.full_piv_lu().solve(&bm);
    Ok(Array1::from_iter((0..n).map(|i| sol[(i, 0)])))
}

/// Unit-normalize every row; rows with near-zero norm are left as zeros.
pub(crate) fn normalize_rows(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 1e-12 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub(crate) fn squared_distance(a: &ArrayView1<'_, f64>, b: &ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of the first maximum.
pub(crate) fn argmax<I>(values: I) -> usize
where
    I: IntoIterator<Item = f64>,
{
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, v) in values.into_iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}
