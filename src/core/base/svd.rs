use faer::{Mat, MatRef};
use rand::prelude::*;
use rand_distr::Normal;

////////////////
// Structures //
////////////////

/// Truncated SVD results.
///
/// ### Fields
///
/// * `u` - Left singular vectors, `nrow x rank`.
/// * `v` - Right singular vectors, `ncol x rank`.
/// * `s` - Singular values, descending.
#[derive(Clone, Debug)]
pub struct SvdResult {
    pub u: Mat<f64>,
    pub v: Mat<f64>,
    pub s: Vec<f64>,
}

///////////////
// Functions //
///////////////

/// Exact thin SVD truncated to the leading `rank` components.
///
/// ### Params
///
/// * `x` - The input matrix.
/// * `rank` - Number of components to keep; must not exceed
///   `min(nrow, ncol)`.
pub fn thin_svd_truncated(x: MatRef<f64>, rank: usize) -> SvdResult {
    let svd = x.thin_svd().unwrap();

    let u = svd.U().submatrix(0, 0, x.nrows(), rank).to_owned();
    let v = svd.V().submatrix(0, 0, x.ncols(), rank).to_owned();
    let s: Vec<f64> = svd
        .S()
        .column_vector()
        .iter()
        .take(rank)
        .copied()
        .collect();

    SvdResult { u, v, s }
}

/// Randomised SVD truncated to the leading `rank` components.
///
/// ### Params
///
/// * `x` - The matrix on which to apply the randomised SVD.
/// * `rank` - The target rank of the approximation.
/// * `seed` - Random seed for reproducible results.
/// * `oversampling` - Additional samples beyond the target rank to improve
///   accuracy. Defaults to 10 if not specified.
/// * `n_power_iter` - Number of power iterations for better approximation
///   quality. Defaults to 2 if not specified.
///
/// ### Algorithm Details
///
/// 1. Generate a random Gaussian matrix Ω of size n × (rank + oversampling)
/// 2. Compute Y = X * Ω to capture the range of X
/// 3. Orthogonalize Y using QR decomposition to get Q
/// 4. Apply power iterations: Z = X^T * Q, then Q = QR(X * Z)
/// 5. Form B = Q^T * X and compute its SVD
/// 6. Reconstruct: U = Q * U_B, V = V_B, S = S_B
pub fn randomized_svd(
    x: MatRef<f64>,
    rank: usize,
    seed: u64,
    oversampling: Option<usize>,
    n_power_iter: Option<usize>,
) -> SvdResult {
    let nrow = x.nrows();
    let ncol = x.ncols();

    let os = oversampling.unwrap_or(10);
    let sample_size = (rank + os).min(nrow.min(ncol));
    let n_iter = n_power_iter.unwrap_or(2);

    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let omega = Mat::from_fn(ncol, sample_size, |_, _| normal.sample(&mut rng));

    let y = x * omega;

    let mut q = y.qr().compute_thin_Q();
    for _ in 0..n_iter {
        let z = x.transpose() * &q;
        q = (x * z).qr().compute_thin_Q();
    }

    let b = q.transpose() * x;
    let svd = b.thin_svd().unwrap();

    let u_full = q * svd.U();

    let u = u_full.submatrix(0, 0, nrow, rank).to_owned();
    let v = svd.V().submatrix(0, 0, ncol, rank).to_owned();
    let s: Vec<f64> = svd
        .S()
        .column_vector()
        .iter()
        .take(rank)
        .copied()
        .collect();

    SvdResult { u, v, s }
}

/// Resolve the sign ambiguity of an SVD deterministically.
///
/// For each component the entry of `v` with the largest magnitude is forced
/// positive; the matching column of `u` is flipped in step so that the
/// factorisation is unchanged. Repeated runs on identical input therefore
/// agree exactly, whichever backend produced the factors.
pub fn normalize_signs(res: &mut SvdResult) {
    let rank = res.s.len();

    for j in 0..rank {
        let mut dominant = 0.0_f64;
        for i in 0..res.v.nrows() {
            let val = res.v[(i, j)];
            if val.abs() > dominant.abs() {
                dominant = val;
            }
        }

        if dominant < 0.0 {
            for i in 0..res.v.nrows() {
                res.v[(i, j)] = -res.v[(i, j)];
            }
            for i in 0..res.u.nrows() {
                res.u[(i, j)] = -res.u[(i, j)];
            }
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn reconstruct(res: &SvdResult) -> Mat<f64> {
        let rank = res.s.len();
        let mut scaled_v = res.v.clone();
        for j in 0..rank {
            for i in 0..scaled_v.nrows() {
                scaled_v[(i, j)] *= res.s[j];
            }
        }
        &res.u * scaled_v.transpose()
    }

    #[test]
    fn test_thin_svd_reconstructs() {
        let x = mat![
            [1.0, 2.0, 0.5],
            [0.0, 1.0, -1.0],
            [3.0, 0.0, 2.0],
            [1.5, 1.0, 0.0]
        ];

        let res = thin_svd_truncated(x.as_ref(), 3);
        let back = reconstruct(&res);

        for i in 0..x.nrows() {
            for j in 0..x.ncols() {
                assert!((x[(i, j)] - back[(i, j)]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_values_descending() {
        let x = mat![
            [2.0, 0.0, 1.0],
            [0.0, 3.0, 0.0],
            [1.0, 0.0, 2.0],
            [0.5, 0.5, 0.5]
        ];

        let res = thin_svd_truncated(x.as_ref(), 3);
        for w in res.s.windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn test_randomized_svd_matches_exact_on_low_rank() {
        // rank-2 matrix, so a rank-2 sketch recovers it
        let a = mat![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, -1.0]];
        let b = mat![[1.0, 2.0, 0.0], [0.0, 1.0, 3.0]];
        let x = a * b;

        let exact = thin_svd_truncated(x.as_ref(), 2);
        let approx = randomized_svd(x.as_ref(), 2, 7, Some(4), Some(4));

        for (se, sa) in exact.s.iter().zip(approx.s.iter()) {
            assert!((se - sa).abs() < 1e-8);
        }
    }

    #[test]
    fn test_sign_normalization_is_deterministic() {
        let x = mat![
            [1.0, -2.0, 0.0],
            [2.0, 1.0, 1.0],
            [-1.0, 0.5, 3.0],
            [0.0, 1.0, -1.0]
        ];

        let mut first = thin_svd_truncated(x.as_ref(), 2);
        normalize_signs(&mut first);

        // flipping a column by hand must be undone by normalisation
        let mut flipped = first.clone();
        for i in 0..flipped.v.nrows() {
            flipped.v[(i, 0)] = -flipped.v[(i, 0)];
        }
        for i in 0..flipped.u.nrows() {
            flipped.u[(i, 0)] = -flipped.u[(i, 0)];
        }
        normalize_signs(&mut flipped);

        assert_eq!(first.u, flipped.u);
        assert_eq!(first.v, flipped.v);

        // dominant loading is positive in every component
        for j in 0..first.s.len() {
            let mut dominant = 0.0_f64;
            for i in 0..first.v.nrows() {
                if first.v[(i, j)].abs() > dominant.abs() {
                    dominant = first.v[(i, j)];
                }
            }
            assert!(dominant > 0.0);
        }
    }
}
