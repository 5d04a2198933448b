//! Per-cluster linear separators and their trainers.
//!
//! Each cluster of the positive class owns one linear decision function
//! `w . x + b`, refit at every maximization step against that cluster's
//! membership weights. Two trainers are available behind the
//! [`SeparatorTrainer`] trait and are chosen once, at configuration time,
//! through [`Maximization`]:
//!
//! - [`LogisticTrainer`]: weighted L2-regularized logistic regression,
//!   solved by damped Newton iterations.
//! - [`SvmTrainer`]: weighted squared-hinge linear SVM, solved the same
//!   way (primal Newton, LIBLINEAR-flavored).
//!
//! Both tolerate weight vectors with many exact zeros; the EM loop floors
//! weights at 1e-5 before refits so no cluster ever hands a trainer an
//! all-zero class.

mod logistic;
mod svm;

pub use logistic::LogisticTrainer;
pub use svm::SvmTrainer;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Error, Result};

/// A fitted linear decision function `w . x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSeparator {
    /// Normal of the separating hyperplane.
    pub weights: Array1<f64>,
    /// Bias term.
    pub bias: f64,
}

impl LinearSeparator {
    /// Signed margin of one sample.
    pub fn margin(&self, x: &ArrayView1<f64>) -> f64 {
        self.weights.dot(x) + self.bias
    }

    /// Signed margins for every row of `x`.
    pub fn margins(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.weights) + self.bias
    }
}

/// Trait for weighted binary linear-separator trainers.
///
/// `y` holds polytope labels in {+1, -1}; `weights` are per-sample,
/// non-negative, and may contain exact zeros.
pub trait SeparatorTrainer {
    /// Fit a separator to the weighted sample set.
    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>, weights: &Array1<f64>)
        -> Result<LinearSeparator>;
}

/// Maximization-step strategy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maximization {
    /// Weighted logistic regression.
    Logistic,
    /// Weighted squared-hinge linear SVM.
    MaxMargin,
}

impl std::str::FromStr for Maximization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logistic" => Ok(Maximization::Logistic),
            "max_margin" | "support_vector" => Ok(Maximization::MaxMargin),
            other => Err(Error::UnknownStrategy {
                role: "maximization",
                name: other.to_string(),
            }),
        }
    }
}

/// Configured separator-fitting strategy; built once per `fit` call and
/// dispatched through [`SeparatorTrainer`] from then on.
#[derive(Debug, Clone)]
pub enum SeparatorFitter {
    /// Logistic trainer.
    Logistic(LogisticTrainer),
    /// Squared-hinge SVM trainer.
    MaxMargin(SvmTrainer),
}

impl SeparatorFitter {
    /// Build the trainer for a strategy tag with regularization `c`.
    pub fn from_strategy(strategy: Maximization, c: f64) -> Self {
        match strategy {
            Maximization::Logistic => SeparatorFitter::Logistic(LogisticTrainer::new(c)),
            Maximization::MaxMargin => SeparatorFitter::MaxMargin(SvmTrainer::new(c)),
        }
    }
}

impl SeparatorTrainer for SeparatorFitter {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &Array1<f64>,
    ) -> Result<LinearSeparator> {
        match self {
            SeparatorFitter::Logistic(t) => t.fit(x, y, weights),
            SeparatorFitter::MaxMargin(t) => t.fit(x, y, weights),
        }
    }
}

pub(crate) fn check_fit_inputs(
    x: &Array2<f64>,
    y: &Array1<f64>,
    weights: &Array1<f64>,
) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(Error::EmptyInput);
    }
    if y.len() != x.nrows() {
        return Err(Error::DimensionMismatch {
            expected: x.nrows(),
            found: y.len(),
        });
    }
    if weights.len() != x.nrows() {
        return Err(Error::DimensionMismatch {
            expected: x.nrows(),
            found: weights.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_margins_shape_and_value() {
        let sep = LinearSeparator {
            weights: array![1.0, -1.0],
            bias: 0.5,
        };
        let x = array![[2.0, 1.0], [0.0, 0.0]];
        let m = sep.margins(&x);
        assert_eq!(m.len(), 2);
        assert!((m[0] - 1.5).abs() < 1e-12);
        assert!((m[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_maximization_from_str() {
        assert_eq!("logistic".parse::<Maximization>().unwrap(), Maximization::Logistic);
        assert_eq!(
            "support_vector".parse::<Maximization>().unwrap(),
            Maximization::MaxMargin
        );
        assert!(matches!(
            "perceptron".parse::<Maximization>(),
            Err(Error::UnknownStrategy { role: "maximization", .. })
        ));
    }
}
