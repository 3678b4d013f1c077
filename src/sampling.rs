//! Deterministic pseudo-random sampling for tree construction.
//!
//! Every sampler owns its own ChaCha8 generator, seeded from the forest seed
//! and the task index, so sample vectors are bit-identical across runs and
//! across worker pool sizes. All draws are without replacement.

use std::sync::Arc;

use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Poisson;

use crate::options::SamplingOptions;

/// Seeded source of in-bag draws, honest subsample splits, cluster
/// subsampling, and candidate feature draws.
#[derive(Debug)]
pub struct RandomSampler {
    rng: ChaCha8Rng,
    options: Arc<SamplingOptions>,
}

impl RandomSampler {
    /// Create a sampler with the given seed and sampling options.
    #[must_use]
    pub fn new(seed: u64, options: Arc<SamplingOptions>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            options,
        }
    }

    /// Return `true` when a cluster layout is present.
    #[must_use]
    pub fn clustering_enabled(&self) -> bool {
        self.options.clustering_enabled()
    }

    pub(crate) fn options(&self) -> &SamplingOptions {
        &self.options
    }

    /// Draw the first-stage in-bag units for one tree.
    ///
    /// When clustering is enabled the returned ids are dense cluster
    /// indices; otherwise they are row ids. Draws `floor(units * fraction)`
    /// units without replacement, weighted when draw weights are configured.
    pub fn sample_clusters(&mut self, num_rows: usize, sample_fraction: f64) -> Vec<usize> {
        let num_units = if self.options.clustering_enabled() {
            self.options.num_clusters()
        } else {
            num_rows
        };
        self.sample(num_units, sample_fraction)
    }

    fn sample(&mut self, num_units: usize, sample_fraction: f64) -> Vec<usize> {
        let num_inbag = (num_units as f64 * sample_fraction) as usize;
        if self.options.weighted_dist().is_some() {
            self.draw_weighted(num_inbag)
        } else {
            self.shuffle_and_split(num_units, num_inbag)
        }
    }

    /// Expand drawn cluster indices into row ids.
    ///
    /// Each cluster contributes `samples_per_cluster` uniformly subsampled
    /// rows, or all of its rows when the cluster is smaller than that.
    pub fn sample_from_clusters(&mut self, cluster_ids: &[usize]) -> Vec<usize> {
        let options = Arc::clone(&self.options);
        let per_cluster = options.samples_per_cluster();
        let mut rows = Vec::with_capacity(cluster_ids.len() * per_cluster);
        for &cluster in cluster_ids {
            let cluster_obs = options.cluster_rows(cluster);
            let fraction = per_cluster as f64 / cluster_obs.len() as f64;
            let (subsample, _) = self.subsample(cluster_obs, fraction.min(1.0));
            rows.extend(subsample);
        }
        rows
    }

    /// Shuffle a copy of `pool` and split it at `ceil(len * fraction)`.
    ///
    /// Returns the prefix and the remainder. Used for the honest 50/50
    /// split and for CI-group sub-subsampling.
    pub fn subsample(&mut self, pool: &[usize], sample_fraction: f64) -> (Vec<usize>, Vec<usize>) {
        let mut shuffled = pool.to_vec();
        shuffled.shuffle(&mut self.rng);
        let size = (pool.len() as f64 * sample_fraction).ceil() as usize;
        let rest = shuffled.split_off(size.min(shuffled.len()));
        (shuffled, rest)
    }

    fn shuffle_and_split(&mut self, num_units: usize, size: usize) -> Vec<usize> {
        let mut units: Vec<usize> = (0..num_units).collect();
        units.shuffle(&mut self.rng);
        units.truncate(size);
        units
    }

    fn draw_weighted(&mut self, num_samples: usize) -> Vec<usize> {
        // Rejection of repeats makes the weighted draws without replacement.
        let dist = self
            .options
            .weighted_dist()
            .expect("draw_weighted requires configured weights");
        let mut selected = vec![false; self.options.sample_weights().len()];
        let mut result = Vec::with_capacity(num_samples);
        while result.len() < num_samples {
            let draw = dist.sample(&mut self.rng);
            if !selected[draw] {
                selected[draw] = true;
                result.push(draw);
            }
        }
        result
    }

    /// Draw `num_samples` distinct integers from `[0, max)` excluding the
    /// ascending-sorted `skip` values.
    ///
    /// Dispatches to a rejection draw for sparse requests and to selection
    /// sampling for dense ones; both are uniform conditional on `skip`.
    pub fn draw(&mut self, max: usize, skip: &[usize], num_samples: usize) -> Vec<usize> {
        if num_samples < max / 2 {
            self.draw_simple(max, skip, num_samples)
        } else {
            self.draw_knuth(max, skip, num_samples)
        }
    }

    /// Rejection sampling: draw from the skip-free range and shift each
    /// draw past the skipped values.
    fn draw_simple(&mut self, max: usize, skip: &[usize], num_samples: usize) -> Vec<usize> {
        let mut selected = vec![false; max];
        let mut result = Vec::with_capacity(num_samples);
        let range = max - skip.len();
        for _ in 0..num_samples {
            loop {
                let mut draw = self.rng.gen_range(0..range);
                for &skip_value in skip {
                    if draw >= skip_value {
                        draw += 1;
                    }
                }
                if !selected[draw] {
                    selected[draw] = true;
                    result.push(draw);
                    break;
                }
            }
        }
        result
    }

    /// Knuth selection sampling (Algorithm S): one pass over the skip-free
    /// range, keeping each position with probability (needed / remaining).
    fn draw_knuth(&mut self, max: usize, skip: &[usize], num_samples: usize) -> Vec<usize> {
        let size_no_skip = max - skip.len();
        let mut result = Vec::with_capacity(num_samples);
        let mut j = 0usize;
        while result.len() < num_samples {
            let u: f64 = self.rng.r#gen();
            if (size_no_skip - j) as f64 * u >= (num_samples - result.len()) as f64 {
                j += 1;
            } else {
                let mut value = j;
                for &skip_value in skip {
                    if value >= skip_value {
                        value += 1;
                    }
                }
                result.push(value);
                j += 1;
            }
        }
        result
    }

    /// Draw a Poisson variate with the given mean.
    ///
    /// Backed by `rand_distr`, which inverts the CDF from a running product
    /// for small means and switches to normal-based rejection (PA) above
    /// a mean of about 12. Returns 0 for a non-positive mean.
    pub fn sample_poisson(&mut self, mean: f64) -> usize {
        match Poisson::new(mean) {
            Ok(dist) => dist.sample(&mut self.rng) as usize,
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::RandomSampler;
    use crate::options::SamplingOptions;

    fn plain_sampler(seed: u64) -> RandomSampler {
        let options = Arc::new(SamplingOptions::new(&[], 0, Vec::new()).unwrap());
        RandomSampler::new(seed, options)
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = plain_sampler(7);
        let mut b = plain_sampler(7);
        assert_eq!(a.sample_clusters(100, 0.5), b.sample_clusters(100, 0.5));
        assert_eq!(a.draw(50, &[], 10), b.draw(50, &[], 10));
    }

    #[test]
    fn different_seed_different_draws() {
        let mut a = plain_sampler(1);
        let mut b = plain_sampler(2);
        assert_ne!(a.sample_clusters(100, 0.5), b.sample_clusters(100, 0.5));
    }

    #[test]
    fn sample_clusters_floors_count() {
        let mut sampler = plain_sampler(42);
        let drawn = sampler.sample_clusters(101, 0.5);
        assert_eq!(drawn.len(), 50);
    }

    #[test]
    fn sampled_rows_are_distinct_and_in_range() {
        let mut sampler = plain_sampler(42);
        let mut drawn = sampler.sample_clusters(100, 0.7);
        assert_eq!(drawn.len(), 70);
        drawn.sort_unstable();
        drawn.dedup();
        assert_eq!(drawn.len(), 70);
        assert!(drawn.iter().all(|&r| r < 100));
    }

    #[test]
    fn subsample_splits_pool() {
        let mut sampler = plain_sampler(42);
        let pool: Vec<usize> = (0..11).collect();
        let (inner, outer) = sampler.subsample(&pool, 0.5);
        assert_eq!(inner.len(), 6); // ceil(11 * 0.5)
        assert_eq!(outer.len(), 5);
        let mut all: Vec<usize> = inner.iter().chain(outer.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, pool);
    }

    #[test]
    fn draw_respects_skip() {
        let mut sampler = plain_sampler(42);
        for _ in 0..20 {
            let drawn = sampler.draw(10, &[3, 7], 5);
            assert_eq!(drawn.len(), 5);
            assert!(!drawn.contains(&3) && !drawn.contains(&7), "drawn = {drawn:?}");
        }
    }

    #[test]
    fn draw_knuth_path_respects_skip() {
        // num_samples >= max / 2 forces the selection-sampling path.
        let mut sampler = plain_sampler(42);
        let mut drawn = sampler.draw(10, &[0, 5], 7);
        assert_eq!(drawn.len(), 7);
        assert!(!drawn.contains(&0) && !drawn.contains(&5));
        drawn.sort_unstable();
        drawn.dedup();
        assert_eq!(drawn.len(), 7);
    }

    #[test]
    fn draw_all_remaining_yields_complement_of_skip() {
        let mut sampler = plain_sampler(9);
        let mut drawn = sampler.draw(6, &[2], 5);
        drawn.sort_unstable();
        assert_eq!(drawn, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn weighted_draws_skip_zero_weight_units() {
        let weights = vec![1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let options = Arc::new(SamplingOptions::new(&[], 0, weights).unwrap());
        let mut sampler = RandomSampler::new(42, options);
        for _ in 0..10 {
            let drawn = sampler.sample_clusters(6, 0.5);
            assert_eq!(drawn.len(), 3);
            assert!(!drawn.contains(&1) && !drawn.contains(&4), "drawn = {drawn:?}");
        }
    }

    #[test]
    fn sample_from_clusters_caps_at_cluster_size() {
        // Cluster 0 has 2 rows, fewer than samples_per_cluster = 3.
        let clusters = vec![0, 0, 1, 1, 1, 1];
        let options = Arc::new(SamplingOptions::new(&clusters, 3, Vec::new()).unwrap());
        let mut sampler = RandomSampler::new(42, options);
        let rows = sampler.sample_from_clusters(&[0, 1]);
        let from_first = rows.iter().filter(|&&r| r < 2).count();
        let from_second = rows.iter().filter(|&&r| r >= 2).count();
        assert_eq!(from_first, 2);
        assert_eq!(from_second, 3);
    }

    #[test]
    fn poisson_zero_mean_is_zero() {
        let mut sampler = plain_sampler(42);
        assert_eq!(sampler.sample_poisson(0.0), 0);
    }

    #[test]
    fn poisson_mean_is_roughly_recovered() {
        let mut sampler = plain_sampler(42);
        let n = 2000;
        let small: f64 = (0..n).map(|_| sampler.sample_poisson(4.0) as f64).sum::<f64>() / n as f64;
        let large: f64 = (0..n).map(|_| sampler.sample_poisson(40.0) as f64).sum::<f64>() / n as f64;
        assert!((small - 4.0).abs() < 0.2, "small-mean average = {small}");
        assert!((large - 40.0).abs() < 1.0, "large-mean average = {large}");
    }
}
