use faer::linalg::solvers::{PartialPivLu, Solve};
use faer::Mat;

use crate::core::base::stats::{row_means, row_sds_population};
use crate::core::data::sparse::SparseColumns;
use crate::error::{Result, ScError};

////////////////
// Structures //
////////////////

/// Parameters of the scaling stage.
///
/// ### Fields
///
/// * `clip` - Symmetric bound on the scaled values; `None` leaves them
///   unclipped. 10 is the conventional choice when clipping is wanted.
/// * `covariates` - Optional cells x p matrix of per-cell covariates to
///   regress out before scaling. Must be full rank together with the
///   intercept.
#[derive(Clone, Debug, Default)]
pub struct ScaleParams {
    pub clip: Option<f64>,
    pub covariates: Option<Mat<f64>>,
}

/// Dense scaled expression over the selected genes.
///
/// ### Fields
///
/// * `values` - Scaled expression, selected genes x cells.
/// * `gene_indices` - Row index of each scaled gene in the full matrix.
#[derive(Clone, Debug)]
pub struct ScaledMatrix {
    pub values: Mat<f64>,
    pub gene_indices: Vec<usize>,
}

impl ScaledMatrix {
    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cells(&self) -> usize {
        self.values.ncols()
    }
}

///////////////
// Functions //
///////////////

/// Centre and scale the selected genes to unit population variance.
///
/// Each gene becomes `(x - mean) / sd` across the retained cells, with the
/// population standard deviation. Genes with zero variance come out as all
/// zeros rather than NaN. When covariates are supplied, an ordinary least
/// squares fit (with intercept) per gene removes their effect first and the
/// residuals are scaled instead.
///
/// ### Params
///
/// * `norm` - Log-normalised expression, genes x cells.
/// * `genes` - Rows of `norm` to scale, typically the selected variable
///   features.
/// * `params` - Clipping and covariate options.
///
/// ### Returns
///
/// The dense scaled matrix, or `ScError::InvalidParameter` when the gene
/// list is empty, out of range, or the covariates do not match the cell
/// count.
pub fn scale_features(
    norm: &SparseColumns<f64>,
    genes: &[usize],
    params: &ScaleParams,
) -> Result<ScaledMatrix> {
    if genes.is_empty() {
        return Err(ScError::InvalidParameter(
            "no genes supplied for scaling".into(),
        ));
    }
    if let Some(&bad) = genes.iter().find(|&&g| g >= norm.nrow) {
        return Err(ScError::InvalidParameter(format!(
            "gene index {bad} out of range for {} genes",
            norm.nrow
        )));
    }

    let mut values = norm.select_rows(genes).to_dense();

    if let Some(covariates) = &params.covariates {
        regress_out(&mut values, covariates)?;
    }

    let means = row_means(values.as_ref());
    let sds = row_sds_population(values.as_ref(), &means);

    for g in 0..values.nrows() {
        for c in 0..values.ncols() {
            let v = &mut values[(g, c)];
            if sds[g] == 0.0 {
                *v = 0.0;
            } else {
                *v = (*v - means[g]) / sds[g];
                if let Some(clip) = params.clip {
                    *v = v.clamp(-clip, clip);
                }
            }
        }
    }

    Ok(ScaledMatrix {
        values,
        gene_indices: genes.to_vec(),
    })
}

/// Replace each gene's values by the residuals of an OLS fit on the
/// covariates plus an intercept.
///
/// All genes share the same design matrix, so its normal equations are
/// factorised once and solved against every gene at once.
fn regress_out(values: &mut Mat<f64>, covariates: &Mat<f64>) -> Result<()> {
    let n_cells = values.ncols();
    if covariates.nrows() != n_cells {
        return Err(ScError::InvalidParameter(format!(
            "covariate matrix has {} rows but there are {} cells",
            covariates.nrows(),
            n_cells
        )));
    }

    let p = covariates.ncols() + 1;
    let design = Mat::from_fn(n_cells, p, |i, j| {
        if j == 0 {
            1.0
        } else {
            covariates[(i, j - 1)]
        }
    });

    let xtx = design.transpose() * &design;
    let xty = design.transpose() * values.transpose();

    let lu = PartialPivLu::new(xtx.as_ref());
    let coeffs = lu.solve(&xty);
    let fitted = &design * &coeffs;

    for g in 0..values.nrows() {
        for c in 0..n_cells {
            values[(g, c)] -= fitted[(c, g)];
        }
    }

    Ok(())
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn toy_norm() -> SparseColumns<f64> {
        let dense = mat![
            [1.0, 2.0, 3.0, 4.0],
            [2.0, 2.0, 2.0, 2.0],
            [0.5, 1.5, 0.5, 1.5],
        ];
        SparseColumns::from_dense(dense.as_ref())
    }

    #[test]
    fn test_rows_have_zero_mean_unit_sd() {
        let scaled = scale_features(&toy_norm(), &[0, 2], &ScaleParams::default()).unwrap();

        assert_eq!(scaled.n_genes(), 2);
        assert_eq!(scaled.gene_indices, vec![0, 2]);

        for g in 0..2 {
            let n = scaled.n_cells() as f64;
            let mean: f64 = (0..scaled.n_cells())
                .map(|c| scaled.values[(g, c)])
                .sum::<f64>()
                / n;
            let var: f64 = (0..scaled.n_cells())
                .map(|c| (scaled.values[(g, c)] - mean).powi(2))
                .sum::<f64>()
                / n;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_variance_gene_is_all_zeros() {
        let scaled = scale_features(&toy_norm(), &[1], &ScaleParams::default()).unwrap();

        for c in 0..scaled.n_cells() {
            assert_eq!(scaled.values[(0, c)], 0.0);
        }
    }

    #[test]
    fn test_clip_is_honoured() {
        let dense = mat![[0.0, 0.0, 0.0, 0.0, 0.0, 100.0]];
        let norm = SparseColumns::from_dense(dense.as_ref());

        let params = ScaleParams {
            clip: Some(1.5),
            ..ScaleParams::default()
        };
        let scaled = scale_features(&norm, &[0], &params).unwrap();

        for c in 0..scaled.n_cells() {
            assert!(scaled.values[(0, c)].abs() <= 1.5);
        }
        assert_eq!(scaled.values[(0, 5)], 1.5);
    }

    #[test]
    fn test_covariate_regression_removes_linear_effect() {
        // gene 0 is an exact linear function of the covariate, gene 1 is not
        let cov = mat![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let dense = mat![
            [1.5, 2.0, 2.5, 3.0, 3.5],
            [1.0, 3.0, 1.0, 3.0, 1.0],
        ];
        let norm = SparseColumns::from_dense(dense.as_ref());

        let params = ScaleParams {
            clip: None,
            covariates: Some(cov),
        };
        let scaled = scale_features(&norm, &[0, 1], &params).unwrap();

        // the perfectly explained gene has zero residual variance
        for c in 0..scaled.n_cells() {
            assert!(scaled.values[(0, c)].abs() < 1e-9);
        }
        // the other gene keeps signal
        assert!((0..scaled.n_cells()).any(|c| scaled.values[(1, c)].abs() > 0.5));
    }

    #[test]
    fn test_invalid_gene_lists() {
        let norm = toy_norm();

        assert!(matches!(
            scale_features(&norm, &[], &ScaleParams::default()),
            Err(ScError::InvalidParameter(_))
        ));
        assert!(matches!(
            scale_features(&norm, &[7], &ScaleParams::default()),
            Err(ScError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_covariate_dimension_mismatch() {
        let params = ScaleParams {
            clip: None,
            covariates: Some(mat![[1.0], [2.0]]),
        };
        assert!(matches!(
            scale_features(&toy_norm(), &[0], &params),
            Err(ScError::InvalidParameter(_))
        ));
    }
}
