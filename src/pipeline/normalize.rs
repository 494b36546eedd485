use crate::core::data::sparse::SparseColumns;
use crate::error::{Result, ScError};
use crate::pipeline::dataset::Dataset;

/// Default target library size after normalisation.
pub const DEFAULT_SCALE_FACTOR: f64 = 1e4;

/// Log-normalise the raw counts.
///
/// Each entry becomes `ln(1 + count / total * scale_factor)`, where `total`
/// is the cell's library size. Zero counts map to zero, so the output keeps
/// the sparsity pattern of the raw matrix.
///
/// ### Params
///
/// * `ds` - The dataset holding the raw counts.
/// * `scale_factor` - Common target size, must be positive.
///
/// ### Returns
///
/// The normalised matrix, or `ScError::DegenerateCell` when a cell with
/// zero total counts is still present (filter such cells first).
pub fn log_normalize(ds: &Dataset, scale_factor: f64) -> Result<SparseColumns<f64>> {
    if !(scale_factor > 0.0 && scale_factor.is_finite()) {
        return Err(ScError::InvalidParameter(format!(
            "scale factor must be positive and finite, got {scale_factor}"
        )));
    }

    let totals = ds.counts.col_sums();

    if let Some(c) = totals.iter().position(|&t| t == 0.0) {
        return Err(ScError::DegenerateCell(ds.cell_ids[c].clone()));
    }

    let counts = &ds.counts;
    let mut data = Vec::with_capacity(counts.nnz());

    for c in 0..counts.ncol {
        let factor = scale_factor / totals[c];
        for (_, v) in counts.iter_col(c) {
            data.push((v as f64 * factor).ln_1p());
        }
    }

    Ok(SparseColumns {
        data,
        row_indices: counts.row_indices.clone(),
        col_ptrs: counts.col_ptrs.clone(),
        nrow: counts.nrow,
        ncol: counts.ncol,
    })
}

///////////
// Tests //
///////////
