use faer::Mat;
use rand::prelude::*;
use rayon::prelude::*;

use crate::assert_same_dims;
use crate::core::base::stats::{empirical_pval, proportion_ztest_greater};
use crate::error::{Result, ScError};
use crate::pipeline::pca::{run_pca, PcaParams, Reduction};
use crate::pipeline::scale::ScaledMatrix;

////////////////
// Structures //
////////////////

/// Parameters of the JackStraw significance test.
///
/// ### Fields
///
/// * `num_replicates` - Number of permutation replicates, at least 1.
/// * `prop_genes` - Fraction of genes permuted per replicate, in (0, 1];
///   at least one gene is always permuted.
/// * `score_threshold` - P-value cutoff used for the per-component
///   enrichment score, in (0, 1).
/// * `seed` - Base seed; replicate `r` draws from its own
///   `StdRng::seed_from_u64(seed + r)` stream.
#[derive(Clone, Copy, Debug)]
pub struct JackStrawParams {
    pub num_replicates: usize,
    pub prop_genes: f64,
    pub score_threshold: f64,
    pub seed: u64,
}

impl Default for JackStrawParams {
    fn default() -> Self {
        Self {
            num_replicates: 100,
            prop_genes: 0.01,
            score_threshold: 0.05,
            seed: 42,
        }
    }
}

/// Outcome of the JackStraw test.
///
/// ### Fields
///
/// * `p_values` - Empirical p-value per gene and component, genes x k.
///   Add-one corrected, so never exactly zero.
/// * `fraction_significant` - Per component, the fraction of genes below
///   the score threshold.
/// * `score_z` - Per component, the one-sided z-score of that fraction
///   against the threshold expectation.
/// * `score_pval` - The matching one-sided p-value, for ranking components.
#[derive(Clone, Debug)]
pub struct SignificanceProfile {
    pub p_values: Mat<f64>,
    pub fraction_significant: Vec<f64>,
    pub score_z: Vec<f64>,
    pub score_pval: Vec<f64>,
}

impl SignificanceProfile {
    pub fn n_components(&self) -> usize {
        self.fraction_significant.len()
    }

    /// Per-component summary rows for export: component index, fraction of
    /// significant genes, enrichment p-value.
    pub fn component_summary(&self) -> Vec<(usize, f64, f64)> {
        (0..self.n_components())
            .map(|j| (j, self.fraction_significant[j], self.score_pval[j]))
            .collect()
    }
}

///////////////
// Functions //
///////////////

/// Test the components of a reduction against permutation nulls.
///
/// Each replicate permutes a fraction of the genes across cells, reruns the
/// PCA engine with the same parameters that produced `reduction`, and pools
/// the permuted genes' absolute loadings as the null sample of each
/// component. Replicates are independent and run in parallel; each owns its
/// seeded RNG, so the result does not depend on execution order.
///
/// ### Params
///
/// * `scaled` - The scaled matrix the reduction was computed from.
/// * `reduction` - The observed reduction.
/// * `pca_params` - The parameters the reduction was computed with.
/// * `params` - Replicate count, permuted fraction, threshold and seed.
///
/// ### Returns
///
/// The [`SignificanceProfile`], or `ScError::InvalidParameter` for a
/// degenerate configuration.
pub fn run_jackstraw(
    scaled: &ScaledMatrix,
    reduction: &Reduction,
    pca_params: &PcaParams,
    params: &JackStrawParams,
) -> Result<SignificanceProfile> {
    if params.num_replicates == 0 {
        return Err(ScError::InvalidParameter(
            "num_replicates must be at least 1".into(),
        ));
    }
    if !(params.prop_genes > 0.0 && params.prop_genes <= 1.0) {
        return Err(ScError::InvalidParameter(format!(
            "prop_genes must lie in (0, 1], got {}",
            params.prop_genes
        )));
    }
    if !(params.score_threshold > 0.0 && params.score_threshold < 1.0) {
        return Err(ScError::InvalidParameter(format!(
            "score_threshold must lie in (0, 1), got {}",
            params.score_threshold
        )));
    }
    if reduction.loadings.nrows() != scaled.n_genes() {
        return Err(ScError::InvalidParameter(format!(
            "reduction covers {} genes but the scaled matrix has {}",
            reduction.loadings.nrows(),
            scaled.n_genes()
        )));
    }
    if pca_params.n_components != reduction.n_components() {
        return Err(ScError::InvalidParameter(format!(
            "pca parameters request {} components but the reduction holds {}",
            pca_params.n_components,
            reduction.n_components()
        )));
    }

    let n_genes = scaled.n_genes();
    let k = reduction.n_components();
    // clamp both ends: at least one gene, never more than there are
    let n_perm = ((params.prop_genes * n_genes as f64).ceil() as usize)
        .max(1)
        .min(n_genes);

    let replicate_nulls: Vec<Vec<Vec<f64>>> = (0..params.num_replicates)
        .into_par_iter()
        .map(|r| null_loadings(scaled, reduction, pca_params, params.seed + r as u64, n_perm))
        .collect::<Result<Vec<_>>>()?;

    // pool the null samples per component
    let mut nulls: Vec<Vec<f64>> = vec![Vec::new(); k];
    for replicate in replicate_nulls {
        for (j, mut vals) in replicate.into_iter().enumerate() {
            nulls[j].append(&mut vals);
        }
    }

    let p_values = Mat::from_fn(n_genes, k, |g, j| {
        empirical_pval(reduction.loadings[(g, j)].abs(), &nulls[j])
    });

    let mut fraction_significant = Vec::with_capacity(k);
    let mut score_z = Vec::with_capacity(k);
    let mut score_pval = Vec::with_capacity(k);

    for j in 0..k {
        let significant = (0..n_genes)
            .filter(|&g| p_values[(g, j)] < params.score_threshold)
            .count();
        let (z, p) = proportion_ztest_greater(significant, n_genes, params.score_threshold);

        fraction_significant.push(significant as f64 / n_genes as f64);
        score_z.push(z);
        score_pval.push(p);
    }

    Ok(SignificanceProfile {
        p_values,
        fraction_significant,
        score_z,
        score_pval,
    })
}

/// One permutation replicate: permute `n_perm` genes, rerun the PCA and
/// return the permuted genes' absolute loadings per component.
fn null_loadings(
    scaled: &ScaledMatrix,
    reduction: &Reduction,
    pca_params: &PcaParams,
    seed: u64,
    n_perm: usize,
) -> Result<Vec<Vec<f64>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_genes = scaled.n_genes();
    let n_cells = scaled.n_cells();

    let mut indices: Vec<usize> = (0..n_genes).collect();
    let (chosen, _) = indices.partial_shuffle(&mut rng, n_perm);

    let mut perturbed = scaled.values.clone();
    let mut row = vec![0.0_f64; n_cells];
    for &g in chosen.iter() {
        for c in 0..n_cells {
            row[c] = perturbed[(g, c)];
        }
        row.shuffle(&mut rng);
        for c in 0..n_cells {
            perturbed[(g, c)] = row[c];
        }
    }

    let replicate = run_pca(
        &ScaledMatrix {
            values: perturbed,
            gene_indices: scaled.gene_indices.clone(),
        },
        pca_params,
    )?;
    assert_same_dims!(replicate.loadings, reduction.loadings);

    let k = replicate.n_components();
    let mut nulls: Vec<Vec<f64>> = vec![Vec::with_capacity(n_perm); k];
    for &g in chosen.iter() {
        for (j, null) in nulls.iter_mut().enumerate() {
            null.push(replicate.loadings[(g, j)].abs());
        }
    }

    Ok(nulls)
}

///////////
// Tests //
///////////
