//! Local linear regression over the forest kernel.
//!
//! For each query the kernel weights parameterize a ridge regression of the
//! training outcomes on the correction variables, centered at the query.
//! The intercept of the fit is the prediction; it removes the boundary bias
//! of the plain weighted mean when the signal has a strong linear trend.

use ndarray::{Array1, Array2, Axis};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::linalg::ldlt_solve;
use crate::predict::{Prediction, PredictionStrategy, predict_batch};

/// How the ridge penalty scales on the off-intercept diagonal of `XᵀWX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RidgeType {
    /// Each coefficient diagonal entry gains `λ · trace(M) / (p + 1)`.
    Unweighted,
    /// Each coefficient diagonal entry gains `λ` times itself.
    Covariance,
}

/// Configuration for local linear prediction.
#[derive(Debug, Clone)]
pub struct LocalLinearOptions {
    lambdas: Vec<f64>,
    ridge_type: RidgeType,
    correction_variables: Option<Vec<usize>>,
}

impl LocalLinearOptions {
    /// Create options with the given ridge penalties; one prediction is
    /// produced per penalty. Defaults: [`RidgeType::Unweighted`], all
    /// feature columns as correction variables.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::EmptyLambdas`] when `lambdas` is empty.
    pub fn new(lambdas: Vec<f64>) -> Result<Self, ForestError> {
        if lambdas.is_empty() {
            return Err(ForestError::EmptyLambdas);
        }
        Ok(Self {
            lambdas,
            ridge_type: RidgeType::Unweighted,
            correction_variables: None,
        })
    }

    /// Set the ridge penalty scaling.
    #[must_use]
    pub fn with_ridge_type(mut self, ridge_type: RidgeType) -> Self {
        self.ridge_type = ridge_type;
        self
    }

    /// Restrict the linear correction to the given feature columns.
    /// `None` (the default) uses every column except the outcome.
    #[must_use]
    pub fn with_correction_variables(mut self, correction_variables: Vec<usize>) -> Self {
        self.correction_variables = Some(correction_variables);
        self
    }

    /// Return the ridge penalties.
    #[must_use]
    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    /// Return the ridge penalty scaling.
    #[must_use]
    pub fn ridge_type(&self) -> RidgeType {
        self.ridge_type
    }

    /// Return the configured correction variables, if restricted.
    #[must_use]
    pub fn correction_variables(&self) -> Option<&[usize]> {
        self.correction_variables.as_deref()
    }
}

/// The per-query design built from the non-zero kernel weights.
struct LocalDesign {
    rows: Vec<usize>,
    weights: Array1<f64>,
    x: Array2<f64>,
    y: Array1<f64>,
}

pub(crate) struct LocalLinearPredictionStrategy<'a> {
    train: &'a Data,
    test: &'a Data,
    outcomes: &'a [f64],
    lambdas: &'a [f64],
    ridge_type: RidgeType,
    vars: Vec<usize>,
}

impl<'a> LocalLinearPredictionStrategy<'a> {
    fn new(
        forest: &'a Forest,
        train: &'a Data,
        test: &'a Data,
        options: &'a LocalLinearOptions,
        vars: Vec<usize>,
    ) -> Self {
        Self {
            train,
            test,
            outcomes: &forest.outcomes,
            lambdas: options.lambdas(),
            ridge_type: options.ridge_type(),
            vars,
        }
    }

    /// Build `X`, `Y`, and the weight vector over the kernel support,
    /// with covariates centered at the query.
    fn design(&self, query: usize, weights: &FxHashMap<usize, f64>) -> LocalDesign {
        let mut rows: Vec<usize> = weights.keys().copied().collect();
        rows.sort_unstable();
        let k = rows.len();
        let p = self.vars.len();

        let mut x = Array2::<f64>::zeros((k, p + 1));
        let mut y = Array1::<f64>::zeros(k);
        let mut w = Array1::<f64>::zeros(k);
        for (i, &row) in rows.iter().enumerate() {
            x[[i, 0]] = 1.0;
            for (j, &var) in self.vars.iter().enumerate() {
                x[[i, j + 1]] = self.train.get(row, var) - self.test.get(query, var);
            }
            y[i] = self.outcomes[row];
            w[i] = weights[&row];
        }
        LocalDesign { rows, weights: w, x, y }
    }

    /// `M = XᵀWX` and `XᵀWY` without materializing the diagonal `W`.
    fn normal_equations(&self, design: &LocalDesign) -> (Array2<f64>, Array1<f64>) {
        let weighted = &design.x * &design.weights.view().insert_axis(Axis(1));
        let m = weighted.t().dot(&design.x);
        let rhs = weighted.t().dot(&design.y);
        (m, rhs)
    }

    /// Apply one ridge penalty to a copy of `M`, off-intercept diagonal only.
    fn regularize(&self, m: &Array2<f64>, lambda: f64) -> Array2<f64> {
        let p = self.vars.len();
        let mut out = m.clone();
        match self.ridge_type {
            RidgeType::Unweighted => {
                let addition = lambda * m.diag().sum() / (p + 1) as f64;
                for j in 1..=p {
                    out[[j, j]] += addition;
                }
            }
            RidgeType::Covariance => {
                for j in 1..=p {
                    out[[j, j]] += lambda * m[[j, j]];
                }
            }
        }
        out
    }
}

impl PredictionStrategy for LocalLinearPredictionStrategy<'_> {
    fn prediction_length(&self) -> usize {
        self.lambdas.len()
    }

    fn predict(&self, query: usize, weights: &FxHashMap<usize, f64>) -> Vec<f64> {
        let design = self.design(query, weights);
        let (m, rhs) = self.normal_equations(&design);

        self.lambdas
            .iter()
            .map(|&lambda| {
                let regularized = self.regularize(&m, lambda);
                if let Some(theta) = ldlt_solve(&regularized, &rhs) {
                    return theta[0];
                }
                // Singular ridge system: try the plain least-squares solve,
                // then fall back to the weighted mean.
                if let Some(theta) = ldlt_solve(&m, &rhs) {
                    return theta[0];
                }
                design.weights.dot(&design.y)
            })
            .collect()
    }

    fn influence(
        &self,
        query: usize,
        weights: &FxHashMap<usize, f64>,
        _estimates: &[f64],
    ) -> Option<FxHashMap<usize, f64>> {
        let design = self.design(query, weights);
        let (m, rhs) = self.normal_equations(&design);
        let regularized = self.regularize(&m, self.lambdas[0]);

        let mut unit = Array1::<f64>::zeros(self.vars.len() + 1);
        unit[0] = 1.0;
        let zeta = ldlt_solve(&regularized, &unit)?;
        let theta = ldlt_solve(&regularized, &rhs)?;

        let x_zeta = design.x.dot(&zeta);
        let x_theta = design.x.dot(&theta);
        Some(
            design
                .rows
                .iter()
                .enumerate()
                .map(|(i, &row)| (row, x_zeta[i] * (design.y[i] - x_theta[i])))
                .collect(),
        )
    }
}

impl Forest {
    /// Local linear prediction of every row of `test`, with `train` the
    /// matrix the forest was trained on.
    ///
    /// Each prediction carries one estimate per configured ridge penalty.
    /// Correction variables holding missing values propagate NaN into the
    /// affected estimates.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::QueryShapeMismatch`] | `train` or `test` column count differs from training |
    /// | [`ForestError::InvalidCorrectionVariable`] | a correction variable is out of range or the outcome |
    #[instrument(skip_all, fields(num_queries = test.num_rows()))]
    pub fn local_linear_predict(
        &self,
        train: &Data,
        test: &Data,
        options: &LocalLinearOptions,
        num_threads: usize,
    ) -> Result<Vec<Prediction>, ForestError> {
        if train.num_cols() != self.num_cols {
            return Err(ForestError::QueryShapeMismatch {
                expected: self.num_cols,
                got: train.num_cols(),
            });
        }
        let vars = self.resolve_correction_variables(options)?;
        let strategy = LocalLinearPredictionStrategy::new(self, train, test, options, vars);
        predict_batch(self, test, &strategy, num_threads, false)
    }

    /// Out-of-bag local linear prediction on the training matrix.
    ///
    /// # Errors
    ///
    /// Same as [`Forest::local_linear_predict`].
    #[instrument(skip_all, fields(num_queries = data.num_rows()))]
    pub fn local_linear_predict_oob(
        &self,
        data: &Data,
        options: &LocalLinearOptions,
        num_threads: usize,
    ) -> Result<Vec<Prediction>, ForestError> {
        let vars = self.resolve_correction_variables(options)?;
        let strategy = LocalLinearPredictionStrategy::new(self, data, data, options, vars);
        predict_batch(self, data, &strategy, num_threads, true)
    }

    fn resolve_correction_variables(
        &self,
        options: &LocalLinearOptions,
    ) -> Result<Vec<usize>, ForestError> {
        match options.correction_variables() {
            Some(vars) => {
                for &var in vars {
                    if var >= self.num_cols || var == self.outcome_index {
                        return Err(ForestError::InvalidCorrectionVariable {
                            var,
                            num_cols: self.num_cols,
                        });
                    }
                }
                Ok(vars.to_vec())
            }
            None => Ok((0..self.num_cols)
                .filter(|&col| col != self.outcome_index)
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalLinearOptions, RidgeType};
    use crate::data::Data;
    use crate::error::ForestError;
    use crate::options::ForestOptions;

    fn linear_data(n: usize, slope: f64) -> Data {
        let values: Vec<f64> = (0..n)
            .flat_map(|i| {
                let x = i as f64 / n as f64;
                [x, slope * x]
            })
            .collect();
        Data::dense(values, n, 2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
    }

    #[test]
    fn empty_lambdas_error() {
        assert!(matches!(
            LocalLinearOptions::new(Vec::new()),
            Err(ForestError::EmptyLambdas)
        ));
    }

    #[test]
    fn no_correction_and_zero_lambda_matches_regression() {
        let data = linear_data(200, 2.0);
        let forest = ForestOptions::new(40).unwrap().with_seed(42).train(&data).unwrap();

        let plain = forest.predict(&data, 1).unwrap();
        let options = LocalLinearOptions::new(vec![0.0])
            .unwrap()
            .with_correction_variables(Vec::new());
        let local = forest.local_linear_predict(&data, &data, &options, 1).unwrap();

        for (a, b) in plain.iter().zip(&local) {
            assert!(
                (a.estimates()[0] - b.estimates()[0]).abs() < 1e-9,
                "{} vs {}",
                a.estimates()[0],
                b.estimates()[0]
            );
        }
    }

    #[test]
    fn one_estimate_per_lambda() {
        let data = linear_data(100, 2.0);
        let forest = ForestOptions::new(10).unwrap().with_seed(42).train(&data).unwrap();
        let options = LocalLinearOptions::new(vec![0.0, 0.1, 1.0]).unwrap();
        let predictions = forest.local_linear_predict(&data, &data, &options, 1).unwrap();
        assert!(predictions.iter().all(|p| p.estimates().len() == 3));
    }

    #[test]
    fn corrects_boundary_bias_on_linear_signal() {
        let data = linear_data(300, 3.0);
        let forest = ForestOptions::new(80)
            .unwrap()
            .with_seed(42)
            .train(&data)
            .unwrap();

        // At the upper boundary the weighted mean is pulled down; the local
        // linear fit recovers the trend.
        let query = 295;
        let truth = 3.0 * (query as f64 / 300.0);

        let plain = forest.predict(&data, 1).unwrap()[query].estimates()[0];
        let options = LocalLinearOptions::new(vec![0.0]).unwrap();
        let local =
            forest.local_linear_predict(&data, &data, &options, 1).unwrap()[query].estimates()[0];

        assert!(
            (local - truth).abs() <= (plain - truth).abs() + 1e-12,
            "local = {local}, plain = {plain}, truth = {truth}"
        );
        assert!((local - truth).abs() < 0.05, "local = {local}, truth = {truth}");
    }

    #[test]
    fn covariance_ridge_type_accepted() {
        let data = linear_data(100, 2.0);
        let forest = ForestOptions::new(10).unwrap().with_seed(42).train(&data).unwrap();
        let options = LocalLinearOptions::new(vec![0.5])
            .unwrap()
            .with_ridge_type(RidgeType::Covariance);
        let predictions = forest.local_linear_predict(&data, &data, &options, 1).unwrap();
        assert!(predictions.iter().all(|p| p.has_estimate()));
    }

    #[test]
    fn singular_design_falls_back_to_weighted_mean() {
        // A constant feature makes the centered column identically zero:
        // the ridge and plain systems are both singular.
        let values: Vec<f64> = (0..40).flat_map(|_| [5.0, 7.0]).collect();
        let data = Data::dense(values, 40, 2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap();
        let forest = ForestOptions::new(8)
            .unwrap()
            .with_ci_group_size(2)
            .with_seed(42)
            .train(&data)
            .unwrap();

        let options = LocalLinearOptions::new(vec![0.1])
            .unwrap()
            .with_ridge_type(RidgeType::Covariance);
        let predictions = forest.local_linear_predict(&data, &data, &options, 1).unwrap();
        for prediction in &predictions {
            assert!((prediction.estimates()[0] - 7.0).abs() < 1e-12);
            let variance = prediction.variance().expect("CIs requested");
            assert!(variance.is_nan(), "no CI for a singular design");
        }
    }

    #[test]
    fn invalid_correction_variable_error() {
        let data = linear_data(50, 2.0);
        let forest = ForestOptions::new(4).unwrap().train(&data).unwrap();
        let options = LocalLinearOptions::new(vec![0.1])
            .unwrap()
            .with_correction_variables(vec![1]); // the outcome column
        let err = forest.local_linear_predict(&data, &data, &options, 1).unwrap_err();
        assert!(matches!(err, ForestError::InvalidCorrectionVariable { var: 1, .. }));
    }

    #[test]
    fn oob_local_linear_tracks_signal() {
        let data = linear_data(300, 3.0);
        let forest = ForestOptions::new(80).unwrap().with_seed(42).train(&data).unwrap();
        let options = LocalLinearOptions::new(vec![0.1]).unwrap();
        let predictions = forest.local_linear_predict_oob(&data, &options, 1).unwrap();
        let query = 150;
        assert!(predictions[query].has_estimate());
        let truth = 3.0 * (query as f64 / 300.0);
        let estimate = predictions[query].estimates()[0];
        assert!((estimate - truth).abs() < 0.1, "estimate = {estimate}");
    }
}
