use faer::Mat;

use crate::error::{Result, ScError};

////////////////
// Structures //
////////////////

/// Compressed sparse column matrix, genes in rows and cells in columns.
///
/// The raw counts are stored as `SparseColumns<u32>`, the log-normalised
/// expression as `SparseColumns<f64>` with the same sparsity pattern. Row
/// indices within each column are kept sorted ascending.
///
/// ### Fields
///
/// * `data` - Non-zero values in column-major order.
/// * `row_indices` - Row index of each stored value.
/// * `col_ptrs` - Start offset of each column in `data` (length `ncol + 1`).
/// * `nrow` - Number of rows (genes).
/// * `ncol` - Number of columns (cells).
#[derive(Debug, Clone)]
pub struct SparseColumns<T> {
    pub data: Vec<T>,
    pub row_indices: Vec<usize>,
    pub col_ptrs: Vec<usize>,
    pub nrow: usize,
    pub ncol: usize,
}

impl<T> SparseColumns<T>
where
    T: Copy + Default + PartialEq,
{
    /// Build a matrix from (row, col, value) triplets.
    ///
    /// Triplets may arrive in any order. Duplicate coordinates are rejected
    /// so that malformed inputs surface early.
    ///
    /// ### Params
    ///
    /// * `nrow` - Number of rows.
    /// * `ncol` - Number of columns.
    /// * `triplets` - The coordinate entries.
    ///
    /// ### Returns
    ///
    /// The assembled matrix, or `ScError::Format` for out-of-range or
    /// duplicate coordinates.
    pub fn from_triplets(nrow: usize, ncol: usize, triplets: &[(usize, usize, T)]) -> Result<Self> {
        let mut col_counts = vec![0_usize; ncol + 1];

        for &(r, c, _) in triplets {
            if r >= nrow || c >= ncol {
                return Err(ScError::Format(format!(
                    "triplet ({r}, {c}) outside a {nrow} x {ncol} matrix"
                )));
            }
            col_counts[c + 1] += 1;
        }

        for c in 0..ncol {
            col_counts[c + 1] += col_counts[c];
        }

        let nnz = triplets.len();
        let col_ptrs = col_counts;
        let mut data = vec![T::default(); nnz];
        let mut row_indices = vec![0_usize; nnz];
        let mut next = col_ptrs[..ncol].to_vec();

        for &(r, c, v) in triplets {
            let pos = next[c];
            row_indices[pos] = r;
            data[pos] = v;
            next[c] += 1;
        }

        // sort rows within each column and catch duplicate coordinates
        for c in 0..ncol {
            let (start, end) = (col_ptrs[c], col_ptrs[c + 1]);
            let mut entries: Vec<(usize, T)> = (start..end)
                .map(|idx| (row_indices[idx], data[idx]))
                .collect();
            entries.sort_by_key(|&(r, _)| r);

            for w in entries.windows(2) {
                if w[0].0 == w[1].0 {
                    return Err(ScError::Format(format!(
                        "duplicate entry for row {}, column {c}",
                        w[0].0
                    )));
                }
            }

            for (offset, (r, v)) in entries.into_iter().enumerate() {
                row_indices[start + offset] = r;
                data[start + offset] = v;
            }
        }

        Ok(Self {
            data,
            row_indices,
            col_ptrs,
            nrow,
            ncol,
        })
    }

    /// Number of stored (non-zero) values.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Iterate over the stored entries of one column as `(row, value)`.
    pub fn iter_col(&self, col: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let start = self.col_ptrs[col];
        let end = self.col_ptrs[col + 1];
        (start..end).map(move |idx| (self.row_indices[idx], self.data[idx]))
    }

    /// Keep only the given columns, in the given order.
    ///
    /// ### Params
    ///
    /// * `cols` - Column indices to retain; relative order is preserved in
    ///   the output.
    pub fn select_columns(&self, cols: &[usize]) -> Self {
        let mut data = Vec::new();
        let mut row_indices = Vec::new();
        let mut col_ptrs = Vec::with_capacity(cols.len() + 1);

        col_ptrs.push(0_usize);

        for &c in cols {
            for (r, v) in self.iter_col(c) {
                row_indices.push(r);
                data.push(v);
            }
            col_ptrs.push(data.len());
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            nrow: self.nrow,
            ncol: cols.len(),
        }
    }

    /// Keep only the given rows, remapped to `0..rows.len()` in the given
    /// order. Column order is unchanged.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut row_map = vec![usize::MAX; self.nrow];
        for (new_r, &old_r) in rows.iter().enumerate() {
            row_map[old_r] = new_r;
        }

        let mut data = Vec::new();
        let mut row_indices = Vec::new();
        let mut col_ptrs = Vec::with_capacity(self.ncol + 1);

        col_ptrs.push(0_usize);

        for c in 0..self.ncol {
            let mut entries: Vec<(usize, T)> = self
                .iter_col(c)
                .filter_map(|(r, v)| {
                    let new_r = row_map[r];
                    (new_r != usize::MAX).then_some((new_r, v))
                })
                .collect();
            entries.sort_by_key(|&(r, _)| r);

            for (r, v) in entries {
                row_indices.push(r);
                data.push(v);
            }
            col_ptrs.push(data.len());
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            nrow: rows.len(),
            ncol: self.ncol,
        }
    }
}

impl SparseColumns<f64> {
    /// Convert a dense column-major view into sparse storage.
    pub fn from_dense(dense: faer::MatRef<f64>) -> SparseColumns<f64> {
        let nrow = dense.nrows();
        let ncol = dense.ncols();

        let mut data = Vec::new();
        let mut row_indices = Vec::new();
        let mut col_ptrs = Vec::with_capacity(ncol + 1);

        col_ptrs.push(0_usize);

        for c in 0..ncol {
            for r in 0..nrow {
                let value = dense[(r, c)];
                if value != 0.0 {
                    data.push(value);
                    row_indices.push(r);
                }
            }
            col_ptrs.push(data.len());
        }

        SparseColumns {
            data,
            row_indices,
            col_ptrs,
            nrow,
            ncol,
        }
    }
}

impl<T> SparseColumns<T>
where
    T: Copy + Default + PartialEq + Into<f64>,
{
    /// Materialise the matrix as a dense `faer` matrix of `f64`.
    pub fn to_dense(&self) -> Mat<f64> {
        let mut dense = Mat::zeros(self.nrow, self.ncol);

        for c in 0..self.ncol {
            for (r, v) in self.iter_col(c) {
                dense[(r, c)] = v.into();
            }
        }

        dense
    }

    /// Per-column sums of all stored values.
    pub fn col_sums(&self) -> Vec<f64> {
        (0..self.ncol)
            .map(|c| self.iter_col(c).map(|(_, v)| v.into()).sum())
            .collect()
    }

    /// Per-column count of stored values above zero.
    pub fn col_nnz(&self) -> Vec<usize> {
        (0..self.ncol)
            .map(|c| self.iter_col(c).filter(|&(_, v)| v.into() > 0.0).count())
            .collect()
    }
}

///////////
// Tests //
///////////
