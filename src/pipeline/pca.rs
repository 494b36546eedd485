use faer::Mat;

use crate::core::base::svd::{normalize_signs, randomized_svd, thin_svd_truncated};
use crate::error::{Result, ScError};
use crate::pipeline::scale::ScaledMatrix;

////////////////
// Structures //
////////////////

/// Parameters of the PCA stage.
///
/// ### Fields
///
/// * `n_components` - Number of components to keep.
/// * `randomized` - Use the randomised SVD instead of the exact thin SVD.
///   Worth it on large matrices; the exact path is the default.
/// * `seed` - Seed of the randomised sketch; ignored on the exact path.
/// * `oversampling` - Extra sketch columns beyond the target rank,
///   `None` for the backend default.
/// * `n_power_iter` - Power iterations of the sketch, `None` for the
///   backend default.
#[derive(Clone, Copy, Debug)]
pub struct PcaParams {
    pub n_components: usize,
    pub randomized: bool,
    pub seed: u64,
    pub oversampling: Option<usize>,
    pub n_power_iter: Option<usize>,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            n_components: 50,
            randomized: false,
            seed: 42,
            oversampling: None,
            n_power_iter: None,
        }
    }
}

/// A dimensionality reduction of the scaled matrix.
///
/// ### Fields
///
/// * `embedding` - Cell coordinates, cells x k (left vectors scaled by the
///   singular values).
/// * `loadings` - Gene loadings, genes x k.
/// * `singular_values` - Non-negative, descending.
#[derive(Clone, Debug)]
pub struct Reduction {
    pub embedding: Mat<f64>,
    pub loadings: Mat<f64>,
    pub singular_values: Vec<f64>,
}

impl Reduction {
    pub fn n_components(&self) -> usize {
        self.singular_values.len()
    }

    /// The embedding as rows keyed by cell identifier, for export.
    ///
    /// ### Returns
    ///
    /// One `(cell id, coordinates)` pair per cell, or
    /// `ScError::InvalidParameter` when the identifier list does not match
    /// the embedding.
    pub fn embedding_rows(&self, cell_ids: &[String]) -> Result<Vec<(String, Vec<f64>)>> {
        if cell_ids.len() != self.embedding.nrows() {
            return Err(ScError::InvalidParameter(format!(
                "{} cell identifiers for an embedding of {} cells",
                cell_ids.len(),
                self.embedding.nrows()
            )));
        }

        Ok(cell_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let coords = (0..self.n_components())
                    .map(|j| self.embedding[(i, j)])
                    .collect();
                (id.clone(), coords)
            })
            .collect())
    }
}

///////////////
// Functions //
///////////////

/// Principal component analysis of the scaled matrix.
///
/// The SVD runs on the cells x genes view, so the left vectors belong to
/// cells and the right vectors to genes. The sign of each component is
/// fixed by forcing its largest-magnitude gene loading positive, flipping
/// the embedding column in step; repeated runs on identical input agree
/// bit-for-bit whichever backend computed the factors.
///
/// ### Params
///
/// * `scaled` - The scaled expression matrix.
/// * `params` - Component count and backend options.
///
/// ### Returns
///
/// The [`Reduction`], or `ScError::RankDeficiency` when more components are
/// requested than `min(genes, cells) - 1`.
pub fn run_pca(scaled: &ScaledMatrix, params: &PcaParams) -> Result<Reduction> {
    let k = params.n_components;
    if k == 0 {
        return Err(ScError::InvalidParameter(
            "n_components must be at least 1".into(),
        ));
    }

    let available = scaled.n_genes().min(scaled.n_cells()).saturating_sub(1);
    if k > available {
        return Err(ScError::RankDeficiency {
            requested: k,
            available,
        });
    }

    let x = scaled.values.transpose();

    let mut res = if params.randomized {
        randomized_svd(x, k, params.seed, params.oversampling, params.n_power_iter)
    } else {
        thin_svd_truncated(x, k)
    };
    normalize_signs(&mut res);

    let mut embedding = res.u;
    for j in 0..k {
        for i in 0..embedding.nrows() {
            embedding[(i, j)] *= res.s[j];
        }
    }

    Ok(Reduction {
        embedding,
        loadings: res.v,
        singular_values: res.s,
    })
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn toy_scaled() -> ScaledMatrix {
        // rank-2 matrix, 4 genes x 6 cells
        let a = mat![[1.0, 0.5], [-1.0, 1.0], [0.5, -2.0], [2.0, 1.5]];
        let b = mat![
            [1.0, -1.0, 0.5, 0.0, 2.0, -0.5],
            [0.0, 1.0, -1.5, 2.0, 0.5, 1.0]
        ];
        ScaledMatrix {
            values: a * b,
            gene_indices: vec![0, 1, 2, 3],
        }
    }

    #[test]
    fn test_shapes_and_order() {
        let scaled = toy_scaled();
        let params = PcaParams {
            n_components: 2,
            ..PcaParams::default()
        };

        let red = run_pca(&scaled, &params).unwrap();

        assert_eq!(red.n_components(), 2);
        assert_eq!(red.embedding.nrows(), 6);
        assert_eq!(red.embedding.ncols(), 2);
        assert_eq!(red.loadings.nrows(), 4);
        assert_eq!(red.loadings.ncols(), 2);

        for w in red.singular_values.windows(2) {
            assert!(w[0] >= w[1]);
        }
        assert!(red.singular_values.iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let scaled = toy_scaled();
        let params = PcaParams {
            n_components: 2,
            ..PcaParams::default()
        };

        let first = run_pca(&scaled, &params).unwrap();
        let second = run_pca(&scaled, &params).unwrap();

        assert_eq!(first.embedding, second.embedding);
        assert_eq!(first.loadings, second.loadings);
        assert_eq!(first.singular_values, second.singular_values);
    }

    #[test]
    fn test_sign_convention_holds() {
        let red = run_pca(
            &toy_scaled(),
            &PcaParams {
                n_components: 2,
                ..PcaParams::default()
            },
        )
        .unwrap();

        for j in 0..red.n_components() {
            let mut dominant = 0.0_f64;
            for i in 0..red.loadings.nrows() {
                if red.loadings[(i, j)].abs() > dominant.abs() {
                    dominant = red.loadings[(i, j)];
                }
            }
            assert!(dominant > 0.0);
        }
    }

    #[test]
    fn test_randomized_backend_agrees_on_low_rank() {
        let scaled = toy_scaled();
        let exact = run_pca(
            &scaled,
            &PcaParams {
                n_components: 2,
                ..PcaParams::default()
            },
        )
        .unwrap();
        let sketched = run_pca(
            &scaled,
            &PcaParams {
                n_components: 2,
                randomized: true,
                seed: 7,
                oversampling: Some(2),
                n_power_iter: Some(4),
            },
        )
        .unwrap();

        // the input is exactly rank 2, so the sketch recovers the same
        // factors and the sign convention aligns them
        for j in 0..2 {
            assert!((exact.singular_values[j] - sketched.singular_values[j]).abs() < 1e-8);
            for i in 0..exact.embedding.nrows() {
                assert!((exact.embedding[(i, j)] - sketched.embedding[(i, j)]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_rank_deficiency_is_reported() {
        let scaled = toy_scaled();

        // min(4 genes, 6 cells) - 1 = 3 components available
        let res = run_pca(
            &scaled,
            &PcaParams {
                n_components: 4,
                ..PcaParams::default()
            },
        );
        assert!(matches!(
            res,
            Err(ScError::RankDeficiency {
                requested: 4,
                available: 3
            })
        ));

        assert!(run_pca(
            &scaled,
            &PcaParams {
                n_components: 3,
                ..PcaParams::default()
            }
        )
        .is_ok());
    }

    #[test]
    fn test_embedding_rows_export() {
        let scaled = toy_scaled();
        let red = run_pca(
            &scaled,
            &PcaParams {
                n_components: 2,
                ..PcaParams::default()
            },
        )
        .unwrap();

        let ids: Vec<String> = (0..6).map(|c| format!("cell{c}")).collect();
        let rows = red.embedding_rows(&ids).unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].0, "cell0");
        assert_eq!(rows[0].1.len(), 2);
        assert_eq!(rows[3].1[1], red.embedding[(3, 1)]);

        let short: Vec<String> = vec!["only".into()];
        assert!(matches!(
            red.embedding_rows(&short),
            Err(ScError::InvalidParameter(_))
        ));
    }
}
