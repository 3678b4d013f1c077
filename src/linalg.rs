//! LDLᵀ factorization for the small symmetric systems of the ridge solves.

use ndarray::{Array1, Array2};

/// Relative pivot tolerance below which the matrix is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solve `m * x = b` for a symmetric positive semi-definite `m` via an
/// LDLᵀ factorization without pivoting.
///
/// Returns `None` when a diagonal pivot is non-positive or vanishes
/// relative to the largest diagonal entry, i.e. the matrix is singular or
/// indefinite to working precision.
pub(crate) fn ldlt_solve(m: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = m.nrows();
    debug_assert_eq!(m.ncols(), n);
    debug_assert_eq!(b.len(), n);

    let scale = (0..n).map(|i| m[[i, i]].abs()).fold(0.0f64, f64::max);
    if !scale.is_finite() {
        return None;
    }
    let threshold = PIVOT_TOLERANCE * scale.max(1.0);

    // Lower triangle of L (unit diagonal implicit) and the diagonal D.
    let mut lower = Array2::<f64>::zeros((n, n));
    let mut diag = Array1::<f64>::zeros(n);

    for j in 0..n {
        let mut d = m[[j, j]];
        for k in 0..j {
            d -= lower[[j, k]] * lower[[j, k]] * diag[k];
        }
        if !(d > threshold) {
            return None;
        }
        diag[j] = d;
        for i in (j + 1)..n {
            let mut v = m[[i, j]];
            for k in 0..j {
                v -= lower[[i, k]] * lower[[j, k]] * diag[k];
            }
            lower[[i, j]] = v / d;
        }
    }

    // Forward solve L z = b.
    let mut x = b.clone();
    for i in 0..n {
        for k in 0..i {
            let delta = lower[[i, k]] * x[k];
            x[i] -= delta;
        }
    }
    // Diagonal solve D y = z.
    for i in 0..n {
        x[i] /= diag[i];
    }
    // Backward solve Lᵀ x = y.
    for i in (0..n).rev() {
        for k in (i + 1)..n {
            let delta = lower[[k, i]] * x[k];
            x[i] -= delta;
        }
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};

    use super::ldlt_solve;

    #[test]
    fn solves_identity() {
        let m = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let b = arr1(&[3.0, -4.0]);
        let x = ldlt_solve(&m, &b).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-12);
        assert!((x[1] + 4.0).abs() < 1e-12);
    }

    #[test]
    fn solves_known_spd_system() {
        // m = [[4, 2, 0], [2, 3, 1], [0, 1, 2]], x = [1, -1, 2]
        let m = arr2(&[[4.0, 2.0, 0.0], [2.0, 3.0, 1.0], [0.0, 1.0, 2.0]]);
        let expected = arr1(&[1.0, -1.0, 2.0]);
        let b = m.dot(&expected);
        let x = ldlt_solve(&m, &b).unwrap();
        for i in 0..3 {
            assert!((x[i] - expected[i]).abs() < 1e-10, "x[{i}] = {}", x[i]);
        }
    }

    #[test]
    fn singular_matrix_is_rejected() {
        // Rank-one matrix.
        let m = arr2(&[[1.0, 2.0], [2.0, 4.0]]);
        let b = arr1(&[1.0, 2.0]);
        assert!(ldlt_solve(&m, &b).is_none());
    }

    #[test]
    fn indefinite_matrix_is_rejected() {
        let m = arr2(&[[1.0, 0.0], [0.0, -1.0]]);
        let b = arr1(&[1.0, 1.0]);
        assert!(ldlt_solve(&m, &b).is_none());
    }

    #[test]
    fn nan_diagonal_is_rejected() {
        let m = arr2(&[[f64::NAN, 0.0], [0.0, 1.0]]);
        let b = arr1(&[1.0, 1.0]);
        assert!(ldlt_solve(&m, &b).is_none());
    }
}
