//! Best-split search under the pseudo-outcome criterion.

use crate::data::Data;

/// An accepted split of one node.
#[derive(Debug, Clone)]
pub(crate) struct Split {
    /// Feature column used for the split.
    pub(crate) var: usize,
    /// Threshold: rows with `value <= threshold` go left.
    pub(crate) value: f64,
    /// Direction for rows whose split feature is missing.
    pub(crate) send_missing_left: bool,
    /// Criterion value of the split.
    pub(crate) decrease: f64,
}

/// Per-node split search over the drawn candidate features.
///
/// For candidate feature `j` every internal threshold between adjacent
/// distinct observed values is scored with
/// `(Σ_L ρ)²/|L| + (Σ_R ρ)²/|R| − penalty·(1/|L| + 1/|R|)`, subject to both
/// children holding at least `max(min_node_size, ⌈α·|S|⌉)` rows. Missing
/// values all route to one side; when present, both routings are scored.
#[derive(Debug, Clone)]
pub(crate) struct SplittingRule {
    min_node_size: usize,
    alpha: f64,
    imbalance_penalty: f64,
}

impl SplittingRule {
    pub(crate) fn new(min_node_size: usize, alpha: f64, imbalance_penalty: f64) -> Self {
        Self {
            min_node_size,
            alpha,
            imbalance_penalty,
        }
    }

    /// Find the best split with positive criterion value, or `None` when the
    /// node must become a leaf.
    ///
    /// `responses[i]` is the pseudo-outcome of `samples[i]`. Ties break
    /// toward the smaller left child; across equally scoring candidate
    /// features the earlier one in draw order wins.
    pub(crate) fn find_best_split(
        &self,
        data: &Data,
        candidates: &[usize],
        samples: &[usize],
        responses: &[f64],
    ) -> Option<Split> {
        let num_samples = samples.len();
        let min_child = self
            .min_node_size
            .max((self.alpha * num_samples as f64).ceil() as usize);
        let total_sum: f64 = responses.iter().sum();

        let mut best: Option<Split> = None;
        let mut best_left_size = 0usize;

        for &var in candidates {
            if let Some((candidate, left_size)) =
                self.best_split_on_feature(data, var, samples, responses, min_child, total_sum)
            {
                let better = match &best {
                    None => true,
                    Some(current) => {
                        candidate.decrease > current.decrease
                            || (candidate.decrease == current.decrease
                                && left_size < best_left_size)
                    }
                };
                if better {
                    best = Some(candidate);
                    best_left_size = left_size;
                }
            }
        }

        best.filter(|split| split.decrease > 0.0)
    }

    /// Best threshold on one feature, with the winning left-child size.
    fn best_split_on_feature(
        &self,
        data: &Data,
        var: usize,
        samples: &[usize],
        responses: &[f64],
        min_child: usize,
        total_sum: f64,
    ) -> Option<(Split, usize)> {
        let num_samples = samples.len();

        let mut sorted: Vec<(f64, f64)> = Vec::with_capacity(num_samples);
        let mut missing = 0usize;
        let mut missing_sum = 0.0;
        for (&row, &rho) in samples.iter().zip(responses) {
            let value = data.get(row, var);
            if value.is_nan() {
                missing += 1;
                missing_sum += rho;
            } else {
                sorted.push((value, rho));
            }
        }
        if sorted.len() < 2 {
            return None;
        }
        sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let mut best: Option<(Split, usize)> = None;
        let directions: &[bool] = if missing > 0 { &[true, false] } else { &[true] };

        for &send_missing_left in directions {
            let mut left_size = if send_missing_left { missing } else { 0 };
            let mut left_sum = if send_missing_left { missing_sum } else { 0.0 };

            for i in 0..sorted.len() - 1 {
                left_size += 1;
                left_sum += sorted[i].1;

                // No internal threshold between equal values.
                if sorted[i].0 == sorted[i + 1].0 {
                    continue;
                }
                let right_size = num_samples - left_size;
                if left_size < min_child || right_size < min_child {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let decrease = left_sum * left_sum / left_size as f64
                    + right_sum * right_sum / right_size as f64
                    - self.imbalance_penalty
                        * (1.0 / left_size as f64 + 1.0 / right_size as f64);

                let better = match &best {
                    None => true,
                    Some((current, current_left)) => {
                        decrease > current.decrease
                            || (decrease == current.decrease && left_size < *current_left)
                    }
                };
                if better {
                    best = Some((
                        Split {
                            var,
                            value: (sorted[i].0 + sorted[i + 1].0) / 2.0,
                            send_missing_left,
                            decrease,
                        },
                        left_size,
                    ));
                }
            }
        }

        best
    }
}
