use log::info;

use crate::error::Result;
use crate::pipeline::dataset::{Artifact, Dataset};
use crate::pipeline::hvg::{select_variable_features, selected_indices, HvgParams};
use crate::pipeline::jackstraw::{run_jackstraw, JackStrawParams};
use crate::pipeline::normalize::{log_normalize, DEFAULT_SCALE_FACTOR};
use crate::pipeline::pca::{run_pca, PcaParams};
use crate::pipeline::qc::{compute_qc_metrics, filter_cells, QcFilter, QcParams};
use crate::pipeline::scale::{scale_features, ScaleParams};

////////////////
// Structures //
////////////////

/// The full preprocessing configuration, one field per stage.
///
/// The defaults follow the usual conventions (scale factor 1e4, 2000
/// variable features, 50 components, 100 JackStraw replicates); override
/// the fields that matter for the dataset at hand.
#[derive(Clone, Debug)]
pub struct Preprocess {
    pub qc: QcParams,
    pub filter: QcFilter,
    pub scale_factor: f64,
    pub hvg: HvgParams,
    pub scale: ScaleParams,
    pub pca: PcaParams,
    pub jackstraw: JackStrawParams,
}

impl Default for Preprocess {
    fn default() -> Self {
        Self {
            qc: QcParams::default(),
            filter: QcFilter::default(),
            scale_factor: DEFAULT_SCALE_FACTOR,
            hvg: HvgParams::default(),
            scale: ScaleParams::default(),
            pca: PcaParams::default(),
            jackstraw: JackStrawParams::default(),
        }
    }
}

impl Preprocess {
    /// Run the stages strictly in order on a freshly loaded dataset.
    ///
    /// QC metrics, cell filter, log-normalisation, variable feature
    /// selection, scaling, PCA and the JackStraw test. Each artifact lands
    /// in the returned dataset's registry under its conventional name
    /// (`"qc"`, `"lognorm"`, `"feature_stats"`, `"scaled"`, `"pca"`,
    /// `"jackstraw"`). The first failing stage aborts the run.
    pub fn run(&self, ds: &Dataset) -> Result<Dataset> {
        let metrics = compute_qc_metrics(ds, &self.qc);
        let mut out = filter_cells(ds, &metrics, &self.filter)?;
        info!("qc filter retained {} of {} cells", out.n_cells(), ds.n_cells());

        // metrics are per cell set, so recompute on the survivors
        let metrics = compute_qc_metrics(&out, &self.qc);

        let norm = log_normalize(&out, self.scale_factor)?;
        info!(
            "log-normalised {} x {} at scale factor {}",
            out.n_genes(),
            out.n_cells(),
            self.scale_factor
        );

        let stats = select_variable_features(&norm, &self.hvg)?;
        let genes = selected_indices(&stats);
        info!("selected {} of {} variable genes", genes.len(), out.n_genes());

        let scaled = scale_features(&norm, &genes, &self.scale)?;

        let reduction = run_pca(&scaled, &self.pca)?;
        info!(
            "pca: {} components over {} genes x {} cells",
            reduction.n_components(),
            scaled.n_genes(),
            scaled.n_cells()
        );

        let profile = run_jackstraw(&scaled, &reduction, &self.pca, &self.jackstraw)?;
        info!(
            "jackstraw: {} replicates, {} components scored",
            self.jackstraw.num_replicates,
            profile.n_components()
        );

        out.attach("qc", Artifact::Qc(metrics));
        out.attach("lognorm", Artifact::Normalized(norm));
        out.attach("feature_stats", Artifact::FeatureStats(stats));
        out.attach("scaled", Artifact::Scaled(scaled));
        out.attach("pca", Artifact::Reduction(reduction));
        out.attach("jackstraw", Artifact::Significance(profile));

        Ok(out)
    }
}

///////////
// Tests //
///////////
