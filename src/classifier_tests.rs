#[cfg(test)]
mod tests {
    use crate::linalg::argmax;
    use crate::{
        accuracy, ari, Clustering, Consensus, FacetClassifier, Initialization, Result, Weighting,
    };
    use ndarray::{Array2, Axis};
    use rand::prelude::*;
    use rand_distr::{Distribution, Normal};

    /// 40 negatives around (-5, 0) and two positive blobs of 20 around
    /// (5, 5) and (5, -5). Returns the data, binary labels, and the true
    /// subtype of each positive in row order.
    fn gaussian_blobs(seed: u64) -> (Array2<f64>, Vec<usize>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.3).unwrap();
        let mut sample = |cx: f64, cy: f64| [cx + noise.sample(&mut rng), cy + noise.sample(&mut rng)];

        let mut rows = Vec::with_capacity(80);
        let mut y = Vec::with_capacity(80);
        let mut subtype = Vec::with_capacity(40);
        for _ in 0..40 {
            rows.push(sample(-5.0, 0.0));
            y.push(0);
        }
        for _ in 0..20 {
            rows.push(sample(5.0, 5.0));
            y.push(1);
            subtype.push(0);
        }
        for _ in 0..20 {
            rows.push(sample(5.0, -5.0));
            y.push(1);
            subtype.push(1);
        }
        let x = Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i][j]);
        (x, y, subtype)
    }

    #[test]
    fn test_end_to_end_subtype_discovery() -> Result<()> {
        let (x, y, subtype_truth) = gaussian_blobs(42);
        let model = FacetClassifier::new(2)
            .with_clustering(Clustering::Kmeans)
            .with_negative_weighting(Weighting::Uniform)
            .with_positive_weighting(Weighting::Hard)
            .with_n_consensus(3)
            .with_n_iterations(10)
            .with_seed(11)
            .fit(&x, &y)?;

        assert!(ari(model.training_assignment(), &subtype_truth) >= 0.95);

        let (x_test, y_test, _) = gaussian_blobs(43);
        let predictions = model.predict(&x_test)?;
        assert!(accuracy(&y_test, predictions.as_slice().unwrap()) >= 0.95);
        Ok(())
    }

    #[test]
    fn test_default_configuration_separates_blobs() -> Result<()> {
        let (x, y, subtype_truth) = gaussian_blobs(7);
        let model = FacetClassifier::new(2)
            .with_n_consensus(3)
            .with_seed(5)
            .fit(&x, &y)?;

        assert!(ari(model.training_assignment(), &subtype_truth) >= 0.95);

        let proba = model.predict_subtype_proba(&x)?;
        assert_eq!(proba.dim(), (80, 2));
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_single_cluster_reduction() -> Result<()> {
        let (x, y, _) = gaussian_blobs(3);
        let model = FacetClassifier::new(1).with_seed(9).fit(&x, &y)?;

        assert_eq!(model.n_clusters(), 1);
        assert_eq!(model.separators().len(), 1);
        assert!(model.training_assignment().iter().all(|&c| c == 0));

        // the lone barycenter is the mean positive feature vector
        let positives = model.positive_indices();
        let mean = x
            .select(Axis(0), positives)
            .mean_axis(Axis(0))
            .unwrap();
        assert!((model.barycenters()[[0, 0]] - mean[0]).abs() < 1e-9);
        assert!((model.barycenters()[[0, 1]] - mean[1]).abs() < 1e-9);

        let proba = model.predict_subtype_proba(&x)?;
        assert_eq!(proba.ncols(), 1);
        assert!(proba.iter().all(|&v| v == 1.0));
        Ok(())
    }

    #[test]
    fn test_seed_reproducibility() {
        let (x, y, _) = gaussian_blobs(21);
        let fit = || {
            FacetClassifier::new(2)
                .with_clustering(Clustering::Kmeans)
                .with_negative_weighting(Weighting::Uniform)
                .with_n_consensus(3)
                .with_seed(77)
                .fit(&x, &y)
                .unwrap()
        };
        let a = fit();
        let b = fit();

        assert_eq!(a.separators(), b.separators());
        assert_eq!(a.barycenters(), b.barycenters());
        assert_eq!(a.training_assignment(), b.training_assignment());
    }

    #[test]
    fn test_dpp_initialization_end_to_end() -> Result<()> {
        let (x, y, subtype_truth) = gaussian_blobs(13);
        let model = FacetClassifier::new(2)
            .with_clustering(Clustering::Kmeans)
            .with_initialization(Initialization::Dpp)
            .with_negative_weighting(Weighting::Uniform)
            .with_n_consensus(1)
            .with_seed(29)
            .fit(&x, &y)?;
        assert!(ari(model.training_assignment(), &subtype_truth) >= 0.95);
        Ok(())
    }

    #[test]
    fn test_direction_basis_consensus_end_to_end() -> Result<()> {
        let (x, y, subtype_truth) = gaussian_blobs(17);
        let model = FacetClassifier::new(2)
            .with_clustering(Clustering::Kmeans)
            .with_negative_weighting(Weighting::Uniform)
            .with_consensus(Consensus::DirectionBasis)
            .with_n_consensus(3)
            .with_seed(31)
            .fit(&x, &y)?;
        assert!(ari(model.training_assignment(), &subtype_truth) >= 0.95);
        Ok(())
    }

    #[test]
    fn test_bagged_membership_agrees_with_assignment() -> Result<()> {
        let (x, y, _) = gaussian_blobs(23);
        let model = FacetClassifier::new(2)
            .with_clustering(Clustering::Kmeans)
            .with_negative_weighting(Weighting::Uniform)
            .with_n_consensus(3)
            .with_seed(37)
            .fit(&x, &y)?;

        let positives_x = x.select(Axis(0), model.positive_indices());
        let bagged = model.predict_subtype_proba_bagged(&positives_x)?;
        for row in bagged.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        let hard: Vec<usize> = bagged
            .rows()
            .into_iter()
            .map(|row| argmax(row.iter().copied()))
            .collect();
        assert!(ari(&hard, model.training_assignment()) >= 0.95);
        Ok(())
    }

    #[test]
    fn test_polytope_score_orders_classes() -> Result<()> {
        let (x, y, _) = gaussian_blobs(19);
        let model = FacetClassifier::new(2)
            .with_clustering(Clustering::Kmeans)
            .with_negative_weighting(Weighting::Uniform)
            .with_n_consensus(1)
            .with_seed(41)
            .fit(&x, &y)?;

        let scores = model.polytope_class_score(&x)?;
        let negative_mean = scores.slice(ndarray::s![..40]).mean().unwrap();
        let positive_mean = scores.slice(ndarray::s![40..]).mean().unwrap();
        assert!(positive_mean > 0.5);
        assert!(negative_mean < 0.5);
        Ok(())
    }

    #[test]
    fn test_predict_proba_respects_target_label_zero() -> Result<()> {
        let (x, mut y, _) = gaussian_blobs(29);
        for label in y.iter_mut() {
            *label = 1 - *label;
        }
        let model = FacetClassifier::new(2)
            .with_clustering(Clustering::Kmeans)
            .with_negative_weighting(Weighting::Uniform)
            .with_target_label(0)
            .with_n_consensus(1)
            .with_seed(47)
            .fit(&x, &y)?;

        let proba = model.predict_proba(&x)?;
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        // positives carry label 0 here, so their mass sits in column 0
        assert!(proba[[40, 0]] > 0.5);
        assert!(proba[[0, 1]] > 0.5);

        let predictions = model.predict(&x)?;
        assert_eq!(predictions[40], 0);
        assert_eq!(predictions[0], 1);
        Ok(())
    }
}
