use rustc_hash::FxHashMap;

use crate::core::data::sparse::SparseColumns;
use crate::error::{Result, ScError};
use crate::pipeline::hvg::FeatureStats;
use crate::pipeline::jackstraw::SignificanceProfile;
use crate::pipeline::pca::Reduction;
use crate::pipeline::qc::CellQcMetrics;
use crate::pipeline::scale::ScaledMatrix;

////////////////
// Structures //
////////////////

/// Closed set of derived artifacts a stage can attach to a dataset.
///
/// Replaces open-ended dynamic slot assignment with an explicit tagged
/// union, so every consumer knows exactly which shapes can exist.
#[derive(Debug, Clone)]
pub enum Artifact {
    Qc(CellQcMetrics),
    FeatureStats(Vec<FeatureStats>),
    Normalized(SparseColumns<f64>),
    Scaled(ScaledMatrix),
    Reduction(Reduction),
    Significance(SignificanceProfile),
}

/// A single-cell dataset: the raw count matrix, its identifiers and a
/// registry of named derived artifacts.
///
/// The raw matrix is created once by the loader and retained for the
/// dataset's lifetime. Stages attach artifacts under a name; filtering
/// produces a new dataset with a cell subset and an empty registry, since
/// per-cell metrics are invalidated by re-slicing.
///
/// ### Fields
///
/// * `counts` - Raw counts, genes x cells.
/// * `gene_ids` - One identifier per matrix row.
/// * `cell_ids` - One identifier per matrix column.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub counts: SparseColumns<u32>,
    pub gene_ids: Vec<String>,
    pub cell_ids: Vec<String>,
    artifacts: FxHashMap<String, Artifact>,
}

impl Dataset {
    /// Assemble a dataset, validating that the identifier lists match the
    /// matrix dimensions.
    pub fn new(
        counts: SparseColumns<u32>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self> {
        if gene_ids.len() != counts.nrow || cell_ids.len() != counts.ncol {
            return Err(ScError::Format(format!(
                "matrix is {} x {} but {} gene and {} cell identifiers were supplied",
                counts.nrow,
                counts.ncol,
                gene_ids.len(),
                cell_ids.len()
            )));
        }

        Ok(Self {
            counts,
            gene_ids,
            cell_ids,
            artifacts: FxHashMap::default(),
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrow
    }

    pub fn n_cells(&self) -> usize {
        self.counts.ncol
    }

    /// Attach (or replace) a named derived artifact.
    pub fn attach(&mut self, name: impl Into<String>, artifact: Artifact) {
        self.artifacts.insert(name.into(), artifact);
    }

    /// Look up an artifact by name.
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// Typed accessor for QC metrics.
    pub fn qc_metrics(&self, name: &str) -> Option<&CellQcMetrics> {
        match self.artifacts.get(name) {
            Some(Artifact::Qc(m)) => Some(m),
            _ => None,
        }
    }

    /// Typed accessor for feature statistics.
    pub fn feature_stats(&self, name: &str) -> Option<&[FeatureStats]> {
        match self.artifacts.get(name) {
            Some(Artifact::FeatureStats(s)) => Some(s),
            _ => None,
        }
    }

    /// Typed accessor for a normalised expression matrix.
    pub fn normalized(&self, name: &str) -> Option<&SparseColumns<f64>> {
        match self.artifacts.get(name) {
            Some(Artifact::Normalized(m)) => Some(m),
            _ => None,
        }
    }

    /// Typed accessor for a scaled expression matrix.
    pub fn scaled(&self, name: &str) -> Option<&ScaledMatrix> {
        match self.artifacts.get(name) {
            Some(Artifact::Scaled(m)) => Some(m),
            _ => None,
        }
    }

    /// Typed accessor for a dimensionality reduction.
    pub fn reduction(&self, name: &str) -> Option<&Reduction> {
        match self.artifacts.get(name) {
            Some(Artifact::Reduction(r)) => Some(r),
            _ => None,
        }
    }

    /// Typed accessor for a significance profile.
    pub fn significance(&self, name: &str) -> Option<&SignificanceProfile> {
        match self.artifacts.get(name) {
            Some(Artifact::Significance(p)) => Some(p),
            _ => None,
        }
    }

    /// New dataset restricted to the given cells, in the given order.
    ///
    /// The gene set is unchanged and the artifact registry starts empty:
    /// anything derived from the previous cell set no longer applies.
    pub fn subset_cells(&self, cells: &[usize]) -> Result<Self> {
        let counts = self.counts.select_columns(cells);
        let cell_ids = cells.iter().map(|&c| self.cell_ids[c].clone()).collect();

        Dataset::new(counts, self.gene_ids.clone(), cell_ids)
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_dataset() -> Dataset {
        let counts =
            SparseColumns::from_triplets(2, 3, &[(0, 0, 5_u32), (1, 1, 2_u32), (0, 2, 1_u32)])
                .unwrap();
        Dataset::new(
            counts,
            vec!["G1".into(), "G2".into()],
            vec!["C1".into(), "C2".into(), "C3".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_dimension_validation() {
        let counts = SparseColumns::from_triplets(2, 2, &[(0, 0, 1_u32)]).unwrap();
        let res = Dataset::new(counts, vec!["G1".into()], vec!["C1".into(), "C2".into()]);
        assert!(matches!(res, Err(ScError::Format(_))));
    }

    #[test]
    fn test_typed_accessors_reject_wrong_variant() {
        let mut ds = toy_dataset();
        ds.attach(
            "qc",
            Artifact::Qc(CellQcMetrics {
                total_counts: vec![5, 2, 1],
                detected_genes: vec![1, 1, 1],
                mito_fraction: vec![0.0, 0.0, 0.0],
            }),
        );

        assert!(ds.qc_metrics("qc").is_some());
        assert!(ds.feature_stats("qc").is_none());
        assert!(ds.qc_metrics("missing").is_none());
    }

    #[test]
    fn test_subset_cells_resets_registry() {
        let mut ds = toy_dataset();
        ds.attach(
            "qc",
            Artifact::Qc(CellQcMetrics {
                total_counts: vec![5, 2, 1],
                detected_genes: vec![1, 1, 1],
                mito_fraction: vec![0.0, 0.0, 0.0],
            }),
        );

        let sub = ds.subset_cells(&[2, 0]).unwrap();

        assert_eq!(sub.n_cells(), 2);
        assert_eq!(sub.cell_ids, vec!["C3", "C1"]);
        assert_eq!(sub.gene_ids, ds.gene_ids);
        assert!(sub.qc_metrics("qc").is_none());
    }
}
