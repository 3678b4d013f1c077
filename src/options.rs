//! Configuration bundles for forest training.

use rand::distributions::WeightedIndex;

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;

/// Immutable sampling configuration shared by every sampler in one forest.
///
/// Holds the optional per-unit draw weights and the cluster layout. When
/// clustering is enabled, the draw unit is the cluster and weights (if any)
/// are per cluster; otherwise the unit is the row.
#[derive(Debug, Clone)]
pub struct SamplingOptions {
    sample_weights: Vec<f64>,
    weighted_dist: Option<WeightedIndex<f64>>,
    /// Rows of each cluster, indexed by dense cluster index.
    cluster_rows: Vec<Vec<usize>>,
    /// Dense cluster index of each row; empty when clustering is disabled.
    row_clusters: Vec<usize>,
    samples_per_cluster: usize,
}

impl SamplingOptions {
    /// Build sampling options from a per-row cluster id vector (empty for no
    /// clustering) and optional draw weights (empty for uniform).
    ///
    /// Cluster ids may be arbitrary; they are mapped to dense indices in
    /// ascending id order.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::InvalidSamplesPerCluster`] | clusters given with `samples_per_cluster == 0` |
    /// | [`ForestError::InvalidSampleWeights`] | weights negative, non-finite, or all zero |
    pub fn new(
        clusters: &[usize],
        samples_per_cluster: usize,
        sample_weights: Vec<f64>,
    ) -> Result<Self, ForestError> {
        if !clusters.is_empty() && samples_per_cluster == 0 {
            return Err(ForestError::InvalidSamplesPerCluster);
        }

        let (cluster_rows, row_clusters) = if clusters.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let mut ids: Vec<usize> = clusters.to_vec();
            ids.sort_unstable();
            ids.dedup();
            let mut rows: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
            let mut row_clusters = Vec::with_capacity(clusters.len());
            for (row, id) in clusters.iter().enumerate() {
                let dense = ids.binary_search(id).unwrap_or(0);
                rows[dense].push(row);
                row_clusters.push(dense);
            }
            (rows, row_clusters)
        };

        let weighted_dist = if sample_weights.is_empty() {
            None
        } else {
            if sample_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(ForestError::InvalidSampleWeights);
            }
            Some(
                WeightedIndex::new(sample_weights.iter().copied())
                    .map_err(|_| ForestError::InvalidSampleWeights)?,
            )
        };

        Ok(Self {
            sample_weights,
            weighted_dist,
            cluster_rows,
            row_clusters,
            samples_per_cluster,
        })
    }

    /// Return `true` when a cluster layout is present.
    #[must_use]
    pub fn clustering_enabled(&self) -> bool {
        !self.cluster_rows.is_empty()
    }

    /// Return the number of clusters (0 when clustering is disabled).
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.cluster_rows.len()
    }

    /// Return the number of rows drawn per selected cluster.
    #[must_use]
    pub fn samples_per_cluster(&self) -> usize {
        self.samples_per_cluster
    }

    /// Return the per-unit draw weights (empty for uniform draws).
    #[must_use]
    pub fn sample_weights(&self) -> &[f64] {
        &self.sample_weights
    }

    pub(crate) fn weighted_dist(&self) -> Option<&WeightedIndex<f64>> {
        self.weighted_dist.as_ref()
    }

    pub(crate) fn cluster_rows(&self, cluster: usize) -> &[usize] {
        &self.cluster_rows[cluster]
    }

    pub(crate) fn row_cluster(&self, row: usize) -> usize {
        self.row_clusters[row]
    }
}

/// Immutable per-tree training parameters, resolved from [`ForestOptions`]
/// once validation has run.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    pub(crate) mtry: usize,
    pub(crate) min_node_size: usize,
    pub(crate) honesty: bool,
    pub(crate) alpha: f64,
    pub(crate) imbalance_penalty: f64,
    pub(crate) outcome_index: usize,
}

impl TreeOptions {
    /// Return the number of candidate features drawn per split.
    #[must_use]
    pub fn mtry(&self) -> usize {
        self.mtry
    }

    /// Return the minimum leaf sample count.
    #[must_use]
    pub fn min_node_size(&self) -> usize {
        self.min_node_size
    }

    /// Return whether honest splitting is enabled.
    #[must_use]
    pub fn honesty(&self) -> bool {
        self.honesty
    }

    /// Return the minimum child fraction for a legal split.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Return the imbalance penalty added to the split score.
    #[must_use]
    pub fn imbalance_penalty(&self) -> f64 {
        self.imbalance_penalty
    }

    /// Return the outcome column index.
    #[must_use]
    pub fn outcome_index(&self) -> usize {
        self.outcome_index
    }
}

/// Configuration for forest training.
///
/// Construct via [`ForestOptions::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter             | Default          |
/// |-----------------------|------------------|
/// | `ci_group_size`       | 1 (no CIs)       |
/// | `sample_fraction`     | 0.5              |
/// | `mtry`                | `None` (⌈√p⌉)    |
/// | `min_node_size`       | 5                |
/// | `honesty`             | `true`           |
/// | `alpha`               | 0.05             |
/// | `imbalance_penalty`   | 0.0              |
/// | `num_threads`         | 0 (auto)         |
/// | `seed`                | 42               |
/// | `clusters`            | empty            |
/// | `samples_per_cluster` | 0                |
/// | `sample_weights`      | empty (uniform)  |
#[derive(Debug, Clone)]
pub struct ForestOptions {
    pub(crate) num_trees: usize,
    pub(crate) ci_group_size: usize,
    pub(crate) sample_fraction: f64,
    pub(crate) mtry: Option<usize>,
    pub(crate) min_node_size: usize,
    pub(crate) honesty: bool,
    pub(crate) alpha: f64,
    pub(crate) imbalance_penalty: f64,
    pub(crate) num_threads: usize,
    pub(crate) seed: u64,
    pub(crate) clusters: Vec<usize>,
    pub(crate) samples_per_cluster: usize,
    pub(crate) sample_weights: Vec<f64>,
}

impl ForestOptions {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `num_trees` is zero.
    pub fn new(num_trees: usize) -> Result<Self, ForestError> {
        if num_trees == 0 {
            return Err(ForestError::InvalidTreeCount { num_trees });
        }
        Ok(Self {
            num_trees,
            ci_group_size: 1,
            sample_fraction: 0.5,
            mtry: None,
            min_node_size: 5,
            honesty: true,
            alpha: 0.05,
            imbalance_penalty: 0.0,
            num_threads: 0,
            seed: 42,
            clusters: Vec::new(),
            samples_per_cluster: 0,
            sample_weights: Vec::new(),
        })
    }

    // --- Setters ---

    /// Set the CI group size. Groups of this many consecutive trees share a
    /// first-stage subsample; 1 disables variance estimation.
    #[must_use]
    pub fn with_ci_group_size(mut self, ci_group_size: usize) -> Self {
        self.ci_group_size = ci_group_size;
        self
    }

    /// Set the fraction of rows (or clusters) drawn per tree.
    #[must_use]
    pub fn with_sample_fraction(mut self, sample_fraction: f64) -> Self {
        self.sample_fraction = sample_fraction;
        self
    }

    /// Set the number of candidate features per split. `None` resolves to
    /// the ceiling of the square root of the feature count.
    #[must_use]
    pub fn with_mtry(mut self, mtry: Option<usize>) -> Self {
        self.mtry = mtry;
        self
    }

    /// Set the minimum number of prediction samples per leaf.
    #[must_use]
    pub fn with_min_node_size(mut self, min_node_size: usize) -> Self {
        self.min_node_size = min_node_size;
        self
    }

    /// Enable or disable honest splitting.
    #[must_use]
    pub fn with_honesty(mut self, honesty: bool) -> Self {
        self.honesty = honesty;
        self
    }

    /// Set the minimum child fraction for a legal split, in (0, 0.25].
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the imbalance penalty added to the split score.
    #[must_use]
    pub fn with_imbalance_penalty(mut self, imbalance_penalty: f64) -> Self {
        self.imbalance_penalty = imbalance_penalty;
        self
    }

    /// Set the worker pool size. 0 uses all available cores.
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the per-row cluster ids (one entry per row) and the number of
    /// rows subsampled from each drawn cluster.
    #[must_use]
    pub fn with_clusters(mut self, clusters: Vec<usize>, samples_per_cluster: usize) -> Self {
        self.clusters = clusters;
        self.samples_per_cluster = samples_per_cluster;
        self
    }

    /// Set the per-unit draw weights (per row, or per cluster when
    /// clustering is enabled). Empty means uniform.
    #[must_use]
    pub fn with_sample_weights(mut self, sample_weights: Vec<f64>) -> Self {
        self.sample_weights = sample_weights;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Return the CI group size.
    #[must_use]
    pub fn ci_group_size(&self) -> usize {
        self.ci_group_size
    }

    /// Return the per-tree sample fraction.
    #[must_use]
    pub fn sample_fraction(&self) -> f64 {
        self.sample_fraction
    }

    /// Return the configured mtry, if set.
    #[must_use]
    pub fn mtry(&self) -> Option<usize> {
        self.mtry
    }

    /// Return the minimum leaf sample count.
    #[must_use]
    pub fn min_node_size(&self) -> usize {
        self.min_node_size
    }

    /// Return whether honest splitting is enabled.
    #[must_use]
    pub fn honesty(&self) -> bool {
        self.honesty
    }

    /// Return the minimum child fraction.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Return the imbalance penalty.
    #[must_use]
    pub fn imbalance_penalty(&self) -> f64 {
        self.imbalance_penalty
    }

    /// Return the worker pool size (0 = auto).
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Train a forest on the provided data.
    ///
    /// The data must have a designated outcome column. All configuration is
    /// validated before any tree is grown; no partial forest is returned.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyData`] | data has zero rows or columns |
    /// | [`ForestError::MissingOutcome`] | no outcome column designated |
    /// | [`ForestError::InvalidAlpha`] | `alpha` outside (0, 0.25] |
    /// | [`ForestError::InvalidSampleFraction`] | `sample_fraction` outside (0, 1] |
    /// | [`ForestError::InvalidCiGroupSize`] | `ci_group_size` is 0 or does not divide `num_trees` |
    /// | [`ForestError::InvalidMtry`] | resolved mtry outside [1, feature count] |
    /// | [`ForestError::InvalidMinNodeSize`] | `min_node_size` is 0 |
    /// | [`ForestError::InvalidImbalancePenalty`] | `imbalance_penalty` negative |
    /// | [`ForestError::NonFiniteOutcome`] | an outcome cell is NaN or infinite |
    /// | [`ForestError::InfiniteFeature`] | a feature cell is infinite |
    /// | [`ForestError::ClusterLengthMismatch`] | cluster vector length differs from row count |
    /// | [`ForestError::SampleWeightLengthMismatch`] | weight length differs from draw-unit count |
    pub fn train(&self, data: &Data) -> Result<Forest, ForestError> {
        crate::forest::train(self, data)
    }
}

#[cfg(test)]
mod tests {
    use super::{ForestOptions, SamplingOptions};
    use crate::error::ForestError;

    #[test]
    fn zero_trees_error() {
        assert!(matches!(
            ForestOptions::new(0),
            Err(ForestError::InvalidTreeCount { num_trees: 0 })
        ));
    }

    #[test]
    fn defaults_match_documentation() {
        let opts = ForestOptions::new(10).unwrap();
        assert_eq!(opts.ci_group_size(), 1);
        assert!((opts.sample_fraction() - 0.5).abs() < f64::EPSILON);
        assert_eq!(opts.mtry(), None);
        assert_eq!(opts.min_node_size(), 5);
        assert!(opts.honesty());
        assert!((opts.alpha() - 0.05).abs() < f64::EPSILON);
        assert_eq!(opts.seed(), 42);
    }

    #[test]
    fn cluster_ids_are_densified() {
        // Arbitrary ids 7 and 3 map to dense indices 1 and 0.
        let opts = SamplingOptions::new(&[7, 3, 7, 3], 2, Vec::new()).unwrap();
        assert_eq!(opts.num_clusters(), 2);
        assert_eq!(opts.cluster_rows(0), &[1, 3]);
        assert_eq!(opts.cluster_rows(1), &[0, 2]);
        assert_eq!(opts.row_cluster(0), 1);
        assert_eq!(opts.row_cluster(1), 0);
    }

    #[test]
    fn zero_samples_per_cluster_error() {
        let err = SamplingOptions::new(&[0, 1], 0, Vec::new()).unwrap_err();
        assert!(matches!(err, ForestError::InvalidSamplesPerCluster));
    }

    #[test]
    fn negative_weights_error() {
        let err = SamplingOptions::new(&[], 0, vec![1.0, -1.0]).unwrap_err();
        assert!(matches!(err, ForestError::InvalidSampleWeights));
    }

    #[test]
    fn all_zero_weights_error() {
        let err = SamplingOptions::new(&[], 0, vec![0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ForestError::InvalidSampleWeights));
    }
}
