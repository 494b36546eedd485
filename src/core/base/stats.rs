use faer::MatRef;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::core::data::sparse::SparseColumns;

///////////////
// Functions //
///////////////

/// Per-row mean and population variance of a sparse genes x cells matrix.
///
/// Implicit zeros contribute to the moments; only the stored entries are
/// touched, so the cost is O(nnz + genes).
///
/// ### Params
///
/// * `mat` - The sparse matrix.
///
/// ### Returns
///
/// A tuple of (means, variances), one entry per row.
pub fn row_moments_sparse<T>(mat: &SparseColumns<T>) -> (Vec<f64>, Vec<f64>)
where
    T: Copy + Default + PartialEq + Into<f64>,
{
    let n = mat.ncol as f64;
    let mut sums = vec![0.0_f64; mat.nrow];
    let mut sq_sums = vec![0.0_f64; mat.nrow];

    for c in 0..mat.ncol {
        for (r, v) in mat.iter_col(c) {
            let v: f64 = v.into();
            sums[r] += v;
            sq_sums[r] += v * v;
        }
    }

    let means: Vec<f64> = sums.iter().map(|s| s / n).collect();
    let vars: Vec<f64> = sq_sums
        .iter()
        .zip(means.iter())
        .map(|(sq, m)| (sq / n - m * m).max(0.0))
        .collect();

    (means, vars)
}

/// Per-row means of a dense matrix.
pub fn row_means(mat: MatRef<f64>) -> Vec<f64> {
    let n = mat.ncols() as f64;
    let mut means = vec![0.0_f64; mat.nrows()];

    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            means[i] += mat[(i, j)];
        }
    }
    for m in means.iter_mut() {
        *m /= n;
    }

    means
}

/// Per-row population standard deviations of a dense matrix.
///
/// ### Params
///
/// * `mat` - The dense matrix.
/// * `means` - Pre-computed row means.
pub fn row_sds_population(mat: MatRef<f64>, means: &[f64]) -> Vec<f64> {
    let n = mat.ncols() as f64;
    let mut sq = vec![0.0_f64; mat.nrows()];

    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            let centered = mat[(i, j)] - means[i];
            sq[i] += centered * centered;
        }
    }

    sq.into_iter().map(|s| (s / n).sqrt()).collect()
}

/// Empirical p-value of an observed magnitude against a null sample, with
/// add-one correction.
///
/// `(#null >= observed + 1) / (#null + 1)` so that a p-value of exactly
/// zero is impossible even when the observation exceeds every null draw.
pub fn empirical_pval(observed: f64, null: &[f64]) -> f64 {
    let exceed = null.iter().filter(|&&v| v >= observed).count();
    (exceed + 1) as f64 / (null.len() + 1) as f64
}

/// One-sided z-test of an observed proportion against an expected one.
///
/// Used to score how strongly a component's genes are enriched for small
/// p-values over the `p0` expected by chance.
///
/// ### Params
///
/// * `successes` - Number of observed successes.
/// * `n` - Number of trials.
/// * `p0` - Expected proportion under the null.
///
/// ### Returns
///
/// A tuple of (z-score, one-sided p-value for "greater").
pub fn proportion_ztest_greater(successes: usize, n: usize, p0: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 1.0);
    }

    let p_hat = successes as f64 / n as f64;
    let se = (p0 * (1.0 - p0) / n as f64).sqrt();
    if se == 0.0 {
        return (0.0, 1.0);
    }

    let z = (p_hat - p0) / se;
    let normal = Normal::new(0.0, 1.0).unwrap();
    let p = 1.0 - normal.cdf(z);

    (z, p)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_row_moments_sparse_counts_zeros() {
        // [2 0 4]
        // [0 0 0]
        let mat =
            SparseColumns::from_triplets(2, 3, &[(0, 0, 2_u32), (0, 2, 4_u32)]).unwrap();

        let (means, vars) = row_moments_sparse(&mat);

        assert!((means[0] - 2.0).abs() < 1e-12);
        assert!((vars[0] - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(means[1], 0.0);
        assert_eq!(vars[1], 0.0);
    }

    #[test]
    fn test_row_means_and_sds() {
        let m = mat![[1.0, 3.0, 5.0], [2.0, 2.0, 2.0]];

        let means = row_means(m.as_ref());
        assert_eq!(means, vec![3.0, 2.0]);

        let sds = row_sds_population(m.as_ref(), &means);
        assert!((sds[0] - (8.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(sds[1], 0.0);
    }

    #[test]
    fn test_empirical_pval_add_one() {
        let null = vec![0.1, 0.2, 0.3, 0.4];

        // observation above every null draw still gets 1 / (n + 1)
        assert!((empirical_pval(0.9, &null) - 0.2).abs() < 1e-12);
        // observation below every null draw gets (n + 1) / (n + 1)
        assert!((empirical_pval(0.0, &null) - 1.0).abs() < 1e-12);
        assert!((empirical_pval(0.25, &null) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_proportion_ztest() {
        let (z, p) = proportion_ztest_greater(5, 100, 0.05);
        assert!(z.abs() < 1e-12);
        assert!((p - 0.5).abs() < 1e-12);

        let (z_hi, p_hi) = proportion_ztest_greater(50, 100, 0.05);
        assert!(z_hi > 10.0);
        assert!(p_hi < 1e-6);

        assert_eq!(proportion_ztest_greater(0, 0, 0.05), (0.0, 1.0));
    }
}
