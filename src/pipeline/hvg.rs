use crate::core::base::loess::Loess;
use crate::core::base::stats::row_moments_sparse;
use crate::core::data::sparse::SparseColumns;
use crate::error::{Result, ScError};

////////////////
// Structures //
////////////////

/// Parameters of the variance-stabilising feature selection.
///
/// ### Fields
///
/// * `n_features` - Number of genes to flag as variable.
/// * `loess_span` - Span of the mean-variance trend fit.
/// * `loess_degree` - Polynomial degree of the trend fit (1 or 2).
/// * `clip_max` - Upper bound on the magnitude of standardised values;
///   `None` uses `10 * sqrt(n_cells)`.
#[derive(Clone, Debug)]
pub struct HvgParams {
    pub n_features: usize,
    pub loess_span: f64,
    pub loess_degree: usize,
    pub clip_max: Option<f64>,
}

impl Default for HvgParams {
    fn default() -> Self {
        Self {
            n_features: 2000,
            loess_span: 0.3,
            loess_degree: 2,
            clip_max: None,
        }
    }
}

/// Per-gene statistics produced by the selector.
///
/// ### Fields
///
/// * `mean` - Mean normalised expression across cells.
/// * `variance` - Population variance of normalised expression.
/// * `standardized_variance` - Variance after standardising by the expected
///   technical variance at the gene's expression level; 0 for genes the
///   trend fit could not cover.
/// * `selected` - Whether the gene ranks among the top `n_features`.
#[derive(Clone, Debug)]
pub struct FeatureStats {
    pub mean: f64,
    pub variance: f64,
    pub standardized_variance: f64,
    pub selected: bool,
}

///////////////
// Functions //
///////////////

/// Select highly variable genes via the vst approach.
///
/// A loess curve of log10 variance against log10 mean across all genes with
/// positive mean and variance models the expected technical variance at a
/// given expression level. Each gene's values are standardised by that
/// expectation, clipped, and the variance of the standardised values ranks
/// the genes. Ties keep the original gene order.
///
/// ### Params
///
/// * `norm` - Log-normalised expression, genes x cells.
/// * `params` - Selection parameters.
///
/// ### Returns
///
/// One [`FeatureStats`] per gene, in gene order, or `ScError::EmptyResult`
/// when no gene has positive mean and variance.
pub fn select_variable_features(
    norm: &SparseColumns<f64>,
    params: &HvgParams,
) -> Result<Vec<FeatureStats>> {
    if params.n_features == 0 {
        return Err(ScError::InvalidParameter(
            "n_features must be at least 1".into(),
        ));
    }

    let n_genes = norm.nrow;
    let n_cells = norm.ncol;
    let (means, vars) = row_moments_sparse(norm);

    let usable: Vec<usize> = (0..n_genes)
        .filter(|&g| means[g] > 0.0 && vars[g] > 0.0)
        .collect();

    if usable.is_empty() {
        return Err(ScError::EmptyResult(
            "no gene with positive mean and variance to rank".into(),
        ));
    }

    let log_means: Vec<f64> = usable.iter().map(|&g| means[g].log10()).collect();
    let log_vars: Vec<f64> = usable.iter().map(|&g| vars[g].log10()).collect();

    let trend = Loess::new(params.loess_span, params.loess_degree)?.fit(&log_means, &log_vars)?;

    // expected technical standard deviation per usable gene
    let mut expected_sd = vec![0.0_f64; n_genes];
    for (pos, &g) in usable.iter().enumerate() {
        expected_sd[g] = (10.0_f64.powf(trend.fitted[pos])).sqrt();
    }

    let clip = params
        .clip_max
        .unwrap_or_else(|| 10.0 * (n_cells as f64).sqrt());

    let standardized = standardized_variances(norm, &means, &expected_sd, clip);

    let mut ranked: Vec<usize> = (0..n_genes).collect();
    ranked.sort_by(|&a, &b| standardized[b].total_cmp(&standardized[a]));

    let n_selected = params.n_features.min(n_genes);
    let mut selected = vec![false; n_genes];
    for &g in ranked.iter().take(n_selected) {
        selected[g] = true;
    }

    Ok((0..n_genes)
        .map(|g| FeatureStats {
            mean: means[g],
            variance: vars[g],
            standardized_variance: standardized[g],
            selected: selected[g],
        })
        .collect())
}

/// Indices of the selected genes, in original gene order.
pub fn selected_indices(stats: &[FeatureStats]) -> Vec<usize> {
    stats
        .iter()
        .enumerate()
        .filter_map(|(g, s)| s.selected.then_some(g))
        .collect()
}

/// Gene indices sorted by standardised variance, descending, ties stable by
/// gene order.
pub fn ranked_indices(stats: &[FeatureStats]) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..stats.len()).collect();
    ranked.sort_by(|&a, &b| {
        stats[b]
            .standardized_variance
            .total_cmp(&stats[a].standardized_variance)
    });
    ranked
}

/////////////
// Helpers //
/////////////

/// Population variance of the clipped standardised values per gene.
///
/// One pass over the stored entries; the implicit zeros of each gene are
/// folded in analytically. Genes without an expected standard deviation
/// (trend not fitted) get 0.
fn standardized_variances(
    norm: &SparseColumns<f64>,
    means: &[f64],
    expected_sd: &[f64],
    clip: f64,
) -> Vec<f64> {
    let n_genes = norm.nrow;
    let n = norm.ncol as f64;

    let mut sum_z = vec![0.0_f64; n_genes];
    let mut sumsq_z = vec![0.0_f64; n_genes];
    let mut nnz = vec![0_usize; n_genes];

    for c in 0..norm.ncol {
        for (g, v) in norm.iter_col(c) {
            let sd = expected_sd[g];
            if sd == 0.0 {
                continue;
            }
            let z = ((v - means[g]) / sd).clamp(-clip, clip);
            sum_z[g] += z;
            sumsq_z[g] += z * z;
            nnz[g] += 1;
        }
    }

    (0..n_genes)
        .map(|g| {
            let sd = expected_sd[g];
            if sd == 0.0 {
                return 0.0;
            }
            let zeros = n - nnz[g] as f64;
            let z0 = ((0.0 - means[g]) / sd).clamp(-clip, clip);

            let total = sum_z[g] + zeros * z0;
            let total_sq = sumsq_z[g] + zeros * z0 * z0;

            let mean_z = total / n;
            (total_sq / n - mean_z * mean_z).max(0.0)
        })
        .collect()
}

///////////
// Tests //
///////////
