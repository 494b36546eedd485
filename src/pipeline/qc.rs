use log::warn;
use rustc_hash::FxHashSet;

use crate::error::{Result, ScError};
use crate::pipeline::dataset::Dataset;

////////////////
// Structures //
////////////////

/// Parameters for the QC metric computation.
///
/// ### Fields
///
/// * `mito_prefix` - Gene identifier prefix marking mitochondrial genes,
///   matched case-sensitively.
#[derive(Clone, Debug)]
pub struct QcParams {
    pub mito_prefix: String,
}

impl Default for QcParams {
    fn default() -> Self {
        Self {
            mito_prefix: "MT-".to_string(),
        }
    }
}

/// Per-cell quality metrics derived from the raw count matrix.
///
/// ### Fields
///
/// * `total_counts` - Library size of each cell. Individual entries go up
///   to `u32::MAX`, so the sum needs the wider type.
/// * `detected_genes` - Number of genes with a count above zero.
/// * `mito_fraction` - Fraction of counts on mitochondrial genes, 0 for
///   cells without any counts.
#[derive(Clone, Debug)]
pub struct CellQcMetrics {
    pub total_counts: Vec<u64>,
    pub detected_genes: Vec<u32>,
    pub mito_fraction: Vec<f64>,
}

/// One side of a numeric bound.
///
/// ### Fields
///
/// * `value` - The threshold.
/// * `inclusive` - Whether the threshold itself passes.
#[derive(Clone, Copy, Debug)]
pub struct Bound {
    pub value: f64,
    pub inclusive: bool,
}

/// Optional lower/upper bounds on one metric.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl MetricRange {
    /// No bounds; every value passes.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Exclusive lower bound: `x > value`.
    pub fn greater_than(value: f64) -> Self {
        Self {
            lower: Some(Bound {
                value,
                inclusive: false,
            }),
            upper: None,
        }
    }

    /// Exclusive upper bound: `x < value`.
    pub fn less_than(value: f64) -> Self {
        Self {
            lower: None,
            upper: Some(Bound {
                value,
                inclusive: false,
            }),
        }
    }

    /// Exclusive bounds on both sides: `lo < x < hi`.
    pub fn between_exclusive(lo: f64, hi: f64) -> Self {
        Self {
            lower: Some(Bound {
                value: lo,
                inclusive: false,
            }),
            upper: Some(Bound {
                value: hi,
                inclusive: false,
            }),
        }
    }

    /// Whether `x` satisfies both configured bounds.
    pub fn contains(&self, x: f64) -> bool {
        let lower_ok = match self.lower {
            Some(b) => {
                if b.inclusive {
                    x >= b.value
                } else {
                    x > b.value
                }
            }
            None => true,
        };
        let upper_ok = match self.upper {
            Some(b) => {
                if b.inclusive {
                    x <= b.value
                } else {
                    x < b.value
                }
            }
            None => true,
        };
        lower_ok && upper_ok
    }
}

/// Bounds applied by the cell filter; a cell must satisfy all of them.
#[derive(Clone, Debug, Default)]
pub struct QcFilter {
    pub total_counts: MetricRange,
    pub detected_genes: MetricRange,
    pub mito_fraction: MetricRange,
}

///////////////
// Functions //
///////////////

/// Compute the per-cell QC metrics.
///
/// Pure function over the raw matrix; deterministic. Gene identifiers that
/// are blank or contain control characters cannot be matched against the
/// mitochondrial prefix; they are logged and treated as non-matching.
pub fn compute_qc_metrics(ds: &Dataset, params: &QcParams) -> CellQcMetrics {
    let mito_genes: FxHashSet<usize> = ds
        .gene_ids
        .iter()
        .enumerate()
        .filter_map(|(idx, id)| {
            if id.is_empty() || id.chars().any(char::is_control) {
                warn!("gene {idx} has a malformed identifier {id:?}, treated as non-mitochondrial");
                return None;
            }
            id.starts_with(&params.mito_prefix).then_some(idx)
        })
        .collect();

    let n_cells = ds.n_cells();
    let mut total_counts = vec![0_u64; n_cells];
    let mut detected_genes = vec![0_u32; n_cells];
    let mut mito_counts = vec![0_u64; n_cells];

    for c in 0..n_cells {
        for (r, v) in ds.counts.iter_col(c) {
            total_counts[c] += v as u64;
            if v > 0 {
                detected_genes[c] += 1;
            }
            if mito_genes.contains(&r) {
                mito_counts[c] += v as u64;
            }
        }
    }

    let mito_fraction: Vec<f64> = total_counts
        .iter()
        .zip(mito_counts.iter())
        .map(|(&total, &mito)| {
            if total == 0 {
                0.0
            } else {
                mito as f64 / total as f64
            }
        })
        .collect();

    CellQcMetrics {
        total_counts,
        detected_genes,
        mito_fraction,
    }
}

/// Keep only the cells passing every configured bound.
///
/// The gene set is unchanged and the relative order of the retained cells
/// is preserved. The returned dataset starts with an empty artifact
/// registry; QC metrics must be recomputed on the new cell set.
///
/// ### Returns
///
/// The filtered dataset, or `ScError::EmptyResult` when no cell passes.
pub fn filter_cells(ds: &Dataset, metrics: &CellQcMetrics, filter: &QcFilter) -> Result<Dataset> {
    let keep: Vec<usize> = (0..ds.n_cells())
        .filter(|&c| {
            filter.total_counts.contains(metrics.total_counts[c] as f64)
                && filter
                    .detected_genes
                    .contains(metrics.detected_genes[c] as f64)
                && filter.mito_fraction.contains(metrics.mito_fraction[c])
        })
        .collect();

    if keep.is_empty() {
        return Err(ScError::EmptyResult(
            "no cell passes the configured QC bounds".into(),
        ));
    }

    ds.subset_cells(&keep)
}

///////////
// Tests //
///////////
