//! Forest training with parallel group construction.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::data::Data;
use crate::error::ForestError;
use crate::options::{ForestOptions, SamplingOptions, TreeOptions};
use crate::sampling::RandomSampler;
use crate::tree::{Tree, TreeTrainer};

/// A trained forest: the ordered trees plus the metadata needed to route
/// queries and rebuild prediction weights.
///
/// When `ci_group_size > 1`, consecutive groups of that many trees share a
/// first-stage subsample; the grouping is what the half-sampling variance
/// estimator replays at prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub(crate) trees: Vec<Tree>,
    pub(crate) num_cols: usize,
    pub(crate) outcome_index: usize,
    pub(crate) ci_group_size: usize,
    /// Training outcomes, indexed by training row. Leaf rows reference
    /// these at prediction time, keeping a restored forest self-contained.
    pub(crate) outcomes: Vec<f64>,
}

impl Forest {
    /// Return the trees in training order.
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the column count of the training data.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Return the outcome column index.
    #[must_use]
    pub fn outcome_index(&self) -> usize {
        self.outcome_index
    }

    /// Return the CI group size the forest was trained with.
    #[must_use]
    pub fn ci_group_size(&self) -> usize {
        self.ci_group_size
    }
}

/// Resolve the configured mtry to a concrete candidate count.
pub(crate) fn resolve_mtry(
    mtry: Option<usize>,
    num_features: usize,
) -> Result<usize, ForestError> {
    let resolved = match mtry {
        Some(m) => m,
        None => (num_features as f64).sqrt().ceil() as usize,
    };
    if resolved == 0 || resolved > num_features {
        return Err(ForestError::InvalidMtry {
            mtry: resolved,
            num_features,
        });
    }
    Ok(resolved)
}

/// Train a forest. All validation runs before any tree is grown.
#[instrument(skip_all, fields(num_trees = options.num_trees, num_rows = data.num_rows()))]
pub(crate) fn train(options: &ForestOptions, data: &Data) -> Result<Forest, ForestError> {
    // --- Validate data ---
    let num_rows = data.num_rows();
    let num_cols = data.num_cols();
    if num_rows == 0 || num_cols == 0 {
        return Err(ForestError::EmptyData);
    }
    let outcome_index = data.outcome_index().ok_or(ForestError::MissingOutcome)?;

    for row in 0..num_rows {
        if !data.get(row, outcome_index).is_finite() {
            return Err(ForestError::NonFiniteOutcome { row });
        }
        for col in 0..num_cols {
            if col != outcome_index && data.get(row, col).is_infinite() {
                return Err(ForestError::InfiniteFeature { row, col });
            }
        }
    }

    // --- Validate config ---
    if !(options.alpha > 0.0 && options.alpha <= 0.25) {
        return Err(ForestError::InvalidAlpha { alpha: options.alpha });
    }
    if !(options.sample_fraction > 0.0 && options.sample_fraction <= 1.0) {
        return Err(ForestError::InvalidSampleFraction {
            sample_fraction: options.sample_fraction,
        });
    }
    if options.ci_group_size == 0 || options.num_trees % options.ci_group_size != 0 {
        return Err(ForestError::InvalidCiGroupSize {
            ci_group_size: options.ci_group_size,
            num_trees: options.num_trees,
        });
    }
    if options.min_node_size == 0 {
        return Err(ForestError::InvalidMinNodeSize {
            min_node_size: options.min_node_size,
        });
    }
    if !(options.imbalance_penalty >= 0.0) {
        return Err(ForestError::InvalidImbalancePenalty {
            imbalance_penalty: options.imbalance_penalty,
        });
    }
    let mtry = resolve_mtry(options.mtry, num_cols - 1)?;

    if !options.clusters.is_empty() && options.clusters.len() != num_rows {
        return Err(ForestError::ClusterLengthMismatch {
            expected: num_rows,
            got: options.clusters.len(),
        });
    }
    let sampling_options = Arc::new(SamplingOptions::new(
        &options.clusters,
        options.samples_per_cluster,
        options.sample_weights.clone(),
    )?);
    if !options.sample_weights.is_empty() {
        let expected = if sampling_options.clustering_enabled() {
            sampling_options.num_clusters()
        } else {
            num_rows
        };
        if options.sample_weights.len() != expected {
            return Err(ForestError::SampleWeightLengthMismatch {
                expected,
                got: options.sample_weights.len(),
            });
        }
    }

    let tree_options = TreeOptions {
        mtry,
        min_node_size: options.min_node_size,
        honesty: options.honesty,
        alpha: options.alpha,
        imbalance_penalty: options.imbalance_penalty,
        outcome_index,
    };

    info!(
        num_trees = options.num_trees,
        num_rows,
        num_features = num_cols - 1,
        mtry,
        ci_group_size = options.ci_group_size,
        honesty = options.honesty,
        "training forest"
    );

    // Group seeds come from the master RNG in task order, so the forest is
    // identical for any worker pool size.
    let num_groups = options.num_trees / options.ci_group_size;
    let mut master_rng = ChaCha8Rng::seed_from_u64(options.seed);
    let group_seeds: Vec<u64> = (0..num_groups).map(|_| master_rng.r#gen()).collect();

    let group_size = options.ci_group_size;
    let sample_fraction = options.sample_fraction;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_threads)
        .build()
        .map_err(|source| ForestError::ThreadPool { source })?;

    let groups: Vec<Vec<Tree>> = pool.install(|| {
        group_seeds
            .into_par_iter()
            .map(|seed| {
                train_group(
                    seed,
                    group_size,
                    sample_fraction,
                    data,
                    &tree_options,
                    &sampling_options,
                )
            })
            .collect()
    });
    let trees: Vec<Tree> = groups.into_iter().flatten().collect();

    debug!(num_trees_trained = trees.len(), "forest training complete");

    let outcomes: Vec<f64> = (0..num_rows).map(|row| data.get(row, outcome_index)).collect();

    Ok(Forest {
        trees,
        num_cols,
        outcome_index,
        ci_group_size: options.ci_group_size,
        outcomes,
    })
}

/// Grow one CI group. The group task owns the shared first-stage subsample;
/// each member tree draws an independent sub-subsample from it.
fn train_group(
    seed: u64,
    group_size: usize,
    sample_fraction: f64,
    data: &Data,
    tree_options: &TreeOptions,
    sampling_options: &Arc<SamplingOptions>,
) -> Vec<Tree> {
    let mut sampler = RandomSampler::new(seed, Arc::clone(sampling_options));
    let trainer = TreeTrainer::new(data, tree_options);

    if group_size == 1 {
        let drawn = sampler.sample_clusters(data.num_rows(), sample_fraction);
        return vec![trainer.train(&mut sampler, drawn)];
    }

    let shared = sampler.sample_clusters(data.num_rows(), 0.5);
    (0..group_size)
        .map(|_| {
            let (drawn, _) = sampler.subsample(&shared, sample_fraction);
            trainer.train(&mut sampler, drawn)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::resolve_mtry;
    use crate::data::Data;
    use crate::error::ForestError;
    use crate::options::ForestOptions;

    fn linear_data(n: usize) -> Data {
        let values: Vec<f64> = (0..n)
            .flat_map(|i| {
                let x = i as f64 / n as f64;
                [x, 2.0 * x]
            })
            .collect();
        Data::dense(values, n, 2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
    }

    #[test]
    fn trains_requested_number_of_trees() {
        let data = linear_data(100);
        let forest = ForestOptions::new(16).unwrap().with_seed(42).train(&data).unwrap();
        assert_eq!(forest.num_trees(), 16);
        assert_eq!(forest.num_cols(), 2);
        assert_eq!(forest.outcome_index(), 1);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let data = linear_data(100);
        let a = ForestOptions::new(8).unwrap().with_seed(99).train(&data).unwrap();
        let b = ForestOptions::new(8).unwrap().with_seed(99).train(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let data = linear_data(100);
        let a = ForestOptions::new(8).unwrap().with_seed(1).train(&data).unwrap();
        let b = ForestOptions::new(8).unwrap().with_seed(2).train(&data).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn identical_across_thread_counts() {
        let data = linear_data(100);
        let serial = ForestOptions::new(8)
            .unwrap()
            .with_seed(42)
            .with_num_threads(1)
            .train(&data)
            .unwrap();
        let parallel = ForestOptions::new(8)
            .unwrap()
            .with_seed(42)
            .with_num_threads(4)
            .train(&data)
            .unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn ci_groups_share_first_stage_subsample() {
        let data = linear_data(100);
        // At sample_fraction 0.8 each tree draws 40 of the shared 50 rows:
        // two independent draws from all 100 rows would almost surely
        // overflow a 50-row union, two nested draws cannot.
        let forest = ForestOptions::new(8)
            .unwrap()
            .with_ci_group_size(2)
            .with_sample_fraction(0.8)
            .with_seed(42)
            .train(&data)
            .unwrap();
        assert_eq!(forest.ci_group_size(), 2);
        assert_eq!(forest.num_trees(), 8);

        for pair in forest.trees().chunks_exact(2) {
            let in_bag = |tree: &crate::tree::Tree| -> Vec<usize> {
                let oob: std::collections::HashSet<usize> =
                    tree.oob_samples().iter().copied().collect();
                (0..100).filter(|r| !oob.contains(r)).collect()
            };
            assert_eq!(in_bag(&pair[0]).len(), 40);
            let union: std::collections::HashSet<usize> = in_bag(&pair[0])
                .into_iter()
                .chain(in_bag(&pair[1]))
                .collect();
            assert!(union.len() <= 50, "group draws exceed the shared half");
        }
    }

    #[test]
    fn ci_group_size_must_divide_num_trees() {
        let data = linear_data(100);
        let err = ForestOptions::new(10)
            .unwrap()
            .with_ci_group_size(3)
            .train(&data)
            .unwrap_err();
        assert!(matches!(err, ForestError::InvalidCiGroupSize { .. }));
    }

    #[test]
    fn alpha_out_of_range_error() {
        let data = linear_data(100);
        let err = ForestOptions::new(4)
            .unwrap()
            .with_alpha(0.3)
            .train(&data)
            .unwrap_err();
        assert!(matches!(err, ForestError::InvalidAlpha { .. }));
    }

    #[test]
    fn sample_fraction_out_of_range_error() {
        let data = linear_data(100);
        let err = ForestOptions::new(4)
            .unwrap()
            .with_sample_fraction(1.5)
            .train(&data)
            .unwrap_err();
        assert!(matches!(err, ForestError::InvalidSampleFraction { .. }));
    }

    #[test]
    fn mtry_too_large_error() {
        let data = linear_data(100);
        let err = ForestOptions::new(4)
            .unwrap()
            .with_mtry(Some(2))
            .train(&data)
            .unwrap_err();
        assert!(matches!(err, ForestError::InvalidMtry { mtry: 2, num_features: 1 }));
    }

    #[test]
    fn missing_outcome_error() {
        let data = Data::dense(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let err = ForestOptions::new(4).unwrap().train(&data).unwrap_err();
        assert!(matches!(err, ForestError::MissingOutcome));
    }

    #[test]
    fn empty_data_error() {
        let data = Data::dense(Vec::new(), 0, 0).unwrap();
        let err = ForestOptions::new(4).unwrap().train(&data).unwrap_err();
        assert!(matches!(err, ForestError::EmptyData));
    }

    #[test]
    fn nan_outcome_error() {
        let data = Data::dense(vec![1.0, f64::NAN], 1, 2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap();
        let err = ForestOptions::new(4).unwrap().train(&data).unwrap_err();
        assert!(matches!(err, ForestError::NonFiniteOutcome { row: 0 }));
    }

    #[test]
    fn cluster_length_mismatch_error() {
        let data = linear_data(10);
        let err = ForestOptions::new(4)
            .unwrap()
            .with_clusters(vec![0, 1], 1)
            .train(&data)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::ClusterLengthMismatch { expected: 10, got: 2 }
        ));
    }

    #[test]
    fn resolve_mtry_defaults_to_sqrt() {
        assert_eq!(resolve_mtry(None, 25).unwrap(), 5);
        assert_eq!(resolve_mtry(None, 10).unwrap(), 4);
        assert_eq!(resolve_mtry(Some(3), 10).unwrap(), 3);
        assert!(resolve_mtry(Some(11), 10).is_err());
    }
}
