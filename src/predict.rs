//! Per-query weight maps and the batch prediction driver.
//!
//! Each in-scope tree routes the query to a leaf and spreads one unit of
//! mass uniformly over the leaf's prediction rows; a single normalization
//! pass makes the sparse map sum to one. The map is then handed to the
//! active prediction strategy, and the per-tree leaf memberships are
//! replayed for the half-sampling variance when CI groups are present.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rustc_hash::FxHashMap;

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::variance::half_sample_variance;

/// The result of predicting one query point.
#[derive(Debug, Clone)]
pub struct Prediction {
    estimates: Vec<f64>,
    variance: Option<f64>,
}

impl Prediction {
    pub(crate) fn new(estimates: Vec<f64>, variance: Option<f64>) -> Self {
        Self { estimates, variance }
    }

    /// A prediction for a query no tree could score (all-NaN estimates).
    pub(crate) fn empty(length: usize, with_variance: bool) -> Self {
        Self {
            estimates: vec![f64::NAN; length],
            variance: with_variance.then_some(f64::NAN),
        }
    }

    /// Return the point estimates: one value for regression, one per ridge
    /// penalty for local linear prediction.
    #[must_use]
    pub fn estimates(&self) -> &[f64] {
        &self.estimates
    }

    /// Return the variance estimate. `None` when the forest was trained
    /// without CI groups; NaN when requested but unavailable for this query.
    #[must_use]
    pub fn variance(&self) -> Option<f64> {
        self.variance
    }

    /// Return `false` when the estimates are NaN, as for an out-of-bag
    /// prediction of a row with an empty OOB set.
    #[must_use]
    pub fn has_estimate(&self) -> bool {
        self.estimates.iter().all(|e| !e.is_nan())
    }
}

/// A task-specific estimator over the forest kernel.
pub(crate) trait PredictionStrategy: Sync {
    /// Number of values per prediction.
    fn prediction_length(&self) -> usize;

    /// Point estimate from the normalized weight map.
    fn predict(&self, query: usize, weights: &FxHashMap<usize, f64>) -> Vec<f64>;

    /// Per-sample influence values feeding the half-sampling variance, or
    /// `None` when the variance cannot be computed for this query.
    fn influence(
        &self,
        query: usize,
        weights: &FxHashMap<usize, f64>,
        estimates: &[f64],
    ) -> Option<FxHashMap<usize, f64>>;
}

/// Predict every row of `test`, in parallel over queries.
///
/// When `oob` is set, each query row is scored only by the trees whose
/// out-of-bag set contains it; `test` must then be the training matrix.
pub(crate) fn predict_batch<S: PredictionStrategy>(
    forest: &Forest,
    test: &Data,
    strategy: &S,
    num_threads: usize,
    oob: bool,
) -> Result<Vec<Prediction>, ForestError> {
    if test.num_cols() != forest.num_cols() {
        return Err(ForestError::QueryShapeMismatch {
            expected: forest.num_cols(),
            got: test.num_cols(),
        });
    }

    // For OOB scoring, invert the per-tree OOB lists into a per-row list
    // of tree indices once, up front.
    let oob_trees: Option<Vec<Vec<u32>>> = if oob {
        let mut by_row: Vec<Vec<u32>> = vec![Vec::new(); test.num_rows()];
        for (tree_index, tree) in forest.trees().iter().enumerate() {
            for &row in tree.oob_samples() {
                if row < by_row.len() {
                    by_row[row].push(tree_index as u32);
                }
            }
        }
        Some(by_row)
    } else {
        None
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|source| ForestError::ThreadPool { source })?;

    let predictions = pool.install(|| {
        (0..test.num_rows())
            .into_par_iter()
            .map(|query| {
                let scope = oob_trees.as_ref().map(|rows| rows[query].as_slice());
                predict_one(forest, test, strategy, query, scope)
            })
            .collect()
    });
    Ok(predictions)
}

fn predict_one<S: PredictionStrategy>(
    forest: &Forest,
    test: &Data,
    strategy: &S,
    query: usize,
    scope: Option<&[u32]>,
) -> Prediction {
    let estimate_variance = forest.ci_group_size() > 1;

    // Leaf rows per tree, in forest order. None marks a tree that does not
    // score this query: out of scope, or an empty leaf.
    let mut leaf_rows: Vec<Option<&[usize]>> = vec![None; forest.num_trees()];
    let mut fill = |tree_index: usize| {
        let tree = &forest.trees()[tree_index];
        let leaf = tree.traverse(test, query);
        let rows = tree.leaf_samples(leaf);
        if !rows.is_empty() {
            leaf_rows[tree_index] = Some(rows);
        }
    };
    match scope {
        Some(tree_indices) => {
            for &tree_index in tree_indices {
                fill(tree_index as usize);
            }
        }
        None => {
            for tree_index in 0..forest.num_trees() {
                fill(tree_index);
            }
        }
    }

    let mut weights: FxHashMap<usize, f64> = FxHashMap::default();
    let mut total = 0.0;
    for rows in leaf_rows.iter().flatten() {
        let share = 1.0 / rows.len() as f64;
        for &row in *rows {
            *weights.entry(row).or_insert(0.0) += share;
        }
        total += 1.0;
    }
    if total == 0.0 {
        return Prediction::empty(strategy.prediction_length(), estimate_variance);
    }
    for weight in weights.values_mut() {
        *weight /= total;
    }

    let estimates = strategy.predict(query, &weights);
    let variance = estimate_variance.then(|| {
        compute_variance(forest, strategy, query, &weights, &estimates, &leaf_rows)
    });
    Prediction::new(estimates, variance)
}

/// Replay the CI-group partitioning over the per-tree leaf memberships.
fn compute_variance<S: PredictionStrategy>(
    forest: &Forest,
    strategy: &S,
    query: usize,
    weights: &FxHashMap<usize, f64>,
    estimates: &[f64],
    leaf_rows: &[Option<&[usize]>],
) -> f64 {
    let influence = match strategy.influence(query, weights, estimates) {
        Some(influence) => influence,
        None => return f64::NAN,
    };
    let psi: Vec<Option<f64>> = leaf_rows
        .iter()
        .map(|rows| {
            rows.map(|rows| {
                let sum: f64 = rows.iter().map(|row| influence[row]).sum();
                sum / rows.len() as f64
            })
        })
        .collect();
    half_sample_variance(&psi, forest.ci_group_size())
}
