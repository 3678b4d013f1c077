//! Regression over the forest kernel: weighted mean of training outcomes.

use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::predict::{Prediction, PredictionStrategy, predict_batch};

/// Weighted-mean estimator with the kernel-residual influence values.
pub(crate) struct RegressionPredictionStrategy<'a> {
    outcomes: &'a [f64],
}

impl<'a> RegressionPredictionStrategy<'a> {
    pub(crate) fn new(forest: &'a Forest) -> Self {
        Self {
            outcomes: &forest.outcomes,
        }
    }
}

impl PredictionStrategy for RegressionPredictionStrategy<'_> {
    fn prediction_length(&self) -> usize {
        1
    }

    fn predict(&self, _query: usize, weights: &FxHashMap<usize, f64>) -> Vec<f64> {
        let estimate: f64 = weights
            .iter()
            .map(|(&row, &weight)| weight * self.outcomes[row])
            .sum();
        vec![estimate]
    }

    fn influence(
        &self,
        _query: usize,
        weights: &FxHashMap<usize, f64>,
        estimates: &[f64],
    ) -> Option<FxHashMap<usize, f64>> {
        let estimate = estimates[0];
        Some(
            weights
                .keys()
                .map(|&row| (row, self.outcomes[row] - estimate))
                .collect(),
        )
    }
}

impl Forest {
    /// Predict every row of `data`, scoring each query with all trees.
    ///
    /// Returns one [`Prediction`] per row. Variance estimates are attached
    /// when the forest was trained with `ci_group_size > 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::QueryShapeMismatch`] when `data` has a
    /// different column count than the training data.
    #[instrument(skip_all, fields(num_queries = data.num_rows()))]
    pub fn predict(
        &self,
        data: &Data,
        num_threads: usize,
    ) -> Result<Vec<Prediction>, ForestError> {
        let strategy = RegressionPredictionStrategy::new(self);
        predict_batch(self, data, &strategy, num_threads, false)
    }

    /// Predict every training row using only the trees it was out of bag
    /// for. `data` must be the training matrix.
    ///
    /// Rows with an empty OOB set yield NaN estimates; see
    /// [`Prediction::has_estimate`].
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::QueryShapeMismatch`] when `data` has a
    /// different column count than the training data.
    #[instrument(skip_all, fields(num_queries = data.num_rows()))]
    pub fn predict_oob(
        &self,
        data: &Data,
        num_threads: usize,
    ) -> Result<Vec<Prediction>, ForestError> {
        let strategy = RegressionPredictionStrategy::new(self);
        predict_batch(self, data, &strategy, num_threads, true)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::data::Data;
    use crate::options::ForestOptions;

    fn noisy_linear_data(n: usize, seed: u64) -> Data {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let values: Vec<f64> = (0..n)
            .flat_map(|i| {
                let x = i as f64 / n as f64;
                let noise = (rng.r#gen::<f64>() - 0.5) * 0.2;
                [x, 2.0 * x + noise]
            })
            .collect();
        Data::dense(values, n, 2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
    }

    fn constant_data(n: usize, value: f64) -> Data {
        let values: Vec<f64> = (0..n)
            .flat_map(|i| [i as f64 / n as f64, value])
            .collect();
        Data::dense(values, n, 2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
    }

    #[test]
    fn recovers_linear_signal_in_sample() {
        let data = noisy_linear_data(400, 7);
        let forest = ForestOptions::new(100)
            .unwrap()
            .with_seed(42)
            .train(&data)
            .unwrap();
        let predictions = forest.predict(&data, 1).unwrap();

        // y = 2x: check a middle query where leaves are well populated.
        let query = 200;
        let truth = 2.0 * (query as f64 / 400.0);
        let estimate = predictions[query].estimates()[0];
        assert!((estimate - truth).abs() < 0.25, "estimate = {estimate}, truth = {truth}");
    }

    #[test]
    fn constant_outcome_predicts_the_constant() {
        let data = constant_data(200, 7.0);
        let forest = ForestOptions::new(50)
            .unwrap()
            .with_ci_group_size(2)
            .with_seed(42)
            .train(&data)
            .unwrap();
        let predictions = forest.predict(&data, 1).unwrap();
        for prediction in &predictions {
            assert!((prediction.estimates()[0] - 7.0).abs() < 1e-12);
            let variance = prediction.variance().expect("CIs requested");
            assert!(
                variance.is_nan() || variance.abs() < 1e-12,
                "variance = {variance}"
            );
        }
    }

    #[test]
    fn variance_positive_and_finite_for_noisy_data() {
        let data = noisy_linear_data(400, 11);
        let forest = ForestOptions::new(100)
            .unwrap()
            .with_ci_group_size(2)
            .with_seed(42)
            .train(&data)
            .unwrap();
        let predictions = forest.predict(&data, 1).unwrap();
        let variance = predictions[200].variance().expect("CIs requested");
        assert!(variance.is_finite() && variance > 0.0, "variance = {variance}");
    }

    #[test]
    fn no_variance_without_ci_groups() {
        let data = noisy_linear_data(100, 3);
        let forest = ForestOptions::new(10).unwrap().with_seed(1).train(&data).unwrap();
        let predictions = forest.predict(&data, 1).unwrap();
        assert!(predictions.iter().all(|p| p.variance().is_none()));
    }

    #[test]
    fn empty_oob_set_yields_nan() {
        let data = noisy_linear_data(100, 5);
        // Every row is in-bag for every tree, so no query has OOB trees.
        let forest = ForestOptions::new(10)
            .unwrap()
            .with_sample_fraction(1.0)
            .with_seed(1)
            .train(&data)
            .unwrap();
        let predictions = forest.predict_oob(&data, 1).unwrap();
        for prediction in &predictions {
            assert!(!prediction.has_estimate());
            assert!(prediction.estimates()[0].is_nan());
        }
    }

    #[test]
    fn oob_predictions_track_the_signal() {
        let data = noisy_linear_data(400, 13);
        let forest = ForestOptions::new(100)
            .unwrap()
            .with_seed(42)
            .train(&data)
            .unwrap();
        let predictions = forest.predict_oob(&data, 1).unwrap();
        let query = 200;
        assert!(predictions[query].has_estimate());
        let truth = 2.0 * (query as f64 / 400.0);
        let estimate = predictions[query].estimates()[0];
        assert!((estimate - truth).abs() < 0.3, "estimate = {estimate}");
    }
}
