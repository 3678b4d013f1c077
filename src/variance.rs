//! Half-sampling variance estimation shared by the prediction strategies.
//!
//! Trees are grown in consecutive groups that share a first-stage
//! subsample. Comparing the spread of per-group kernel averages with the
//! spread of per-tree averages separates the sampling variance of the
//! forest kernel from within-group Monte Carlo noise.

const ONE_OVER_SQRT_TWO_PI: f64 = 0.398_942_280_401_432_7;
const ONE_OVER_SQRT_TWO: f64 = 0.707_106_781_186_547_5;

/// Combine per-tree kernel averages into a debiased variance estimate.
///
/// `psi[t]` is tree `t`'s average influence value over its leaf for the
/// query, or `None` when the tree contributed no non-empty leaf. A group is
/// good only when all of its `ci_group_size` trees contributed. Returns NaN
/// when fewer than two good groups exist.
pub(crate) fn half_sample_variance(psi: &[Option<f64>], ci_group_size: usize) -> f64 {
    debug_assert!(ci_group_size > 1);
    debug_assert_eq!(psi.len() % ci_group_size, 0);

    let mut num_good_groups = 0usize;
    let mut group_sum = 0.0;
    let mut group_sum_sq = 0.0;
    let mut tree_sum = 0.0;
    let mut tree_sum_sq = 0.0;

    for group in psi.chunks_exact(ci_group_size) {
        if group.iter().any(Option::is_none) {
            continue;
        }
        num_good_groups += 1;
        let mut group_mean = 0.0;
        for value in group.iter().flatten() {
            group_mean += value;
            tree_sum += value;
            tree_sum_sq += value * value;
        }
        group_mean /= ci_group_size as f64;
        group_sum += group_mean;
        group_sum_sq += group_mean * group_mean;
    }

    if num_good_groups < 2 {
        return f64::NAN;
    }

    let m = num_good_groups as f64;
    let num_trees = m * ci_group_size as f64;
    let var_between = group_sum_sq / m - (group_sum / m) * (group_sum / m);
    let var_total = tree_sum_sq / num_trees - (tree_sum / num_trees) * (tree_sum / num_trees);
    let group_noise = (var_total - var_between) / (ci_group_size as f64 - 1.0);

    debias(var_between, group_noise, m)
}

/// Shrink the raw between-group variance toward zero.
///
/// Treats the noisy estimate `var_between - group_noise` as a normal
/// observation of the true variance and returns the posterior mean under a
/// flat prior on the non-negative half-line. The result equals the raw
/// difference when it dominates its standard error, shrinks smoothly as
/// the noise share grows, and is never negative.
pub(crate) fn debias(var_between: f64, group_noise: f64, num_good_groups: f64) -> f64 {
    let estimate = var_between - group_noise;
    let se = var_between.max(group_noise) * (2.0 / num_good_groups).sqrt();
    if se <= 0.0 {
        return estimate.max(0.0);
    }
    let z = estimate / se;
    estimate + se * normal_pdf(z) / normal_cdf(z)
}

fn normal_pdf(z: f64) -> f64 {
    ONE_OVER_SQRT_TWO_PI * (-0.5 * z * z).exp()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z * ONE_OVER_SQRT_TWO)
}

/// Complementary error function, rational approximation with relative
/// error below 1.2e-7 everywhere.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = t * (-z * z
        - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87
                                    + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
        .exp();
    if x >= 0.0 { poly } else { 2.0 - poly }
}
