use crate::alignment::SimilarityMatrix;
use crate::basis::write_basis;
use crate::config::{Mode, MsaConfig};
use crate::decomposition::Decomposition;
use crate::error::Result;
use crate::image::store::ImageStore;
use crate::mask::Mask;
use crate::preprocessing::center_and_normalize;
use crate::range::SamplingRange;
use crate::reproject::{reproject, ReprojectionSummary};
use crate::vectorize::vectorize_range;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// What a completed run produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MsaReport {
    pub mode: Mode,
    pub total_images: usize,
    pub fitted_images: usize,
    pub active_pixels: usize,
    pub basis_images: usize,
    pub shift: f64,
    pub reprojection: Option<ReprojectionSummary>,
}

/// Runs mask building, vectorization, decomposition, basis output and the
/// optional reprojection of `input`.
///
/// The sampling range and the mask are validated before any image of
/// `input` is vectorized.
pub fn run<S: ImageStore>(
    store: &mut S,
    config: &MsaConfig,
    input: &Path,
    output: &Path,
    reprojection: Option<&Path>,
) -> Result<MsaReport> {
    let total = store.count(input)?;
    let range = SamplingRange::resolve(&config.step, total)?;
    info!(path = %input.display(), total, range = %range, "input stack");

    let mask = Mask::build(&*store, config.mask_file.as_deref(), config.mask_radius, input)?;
    let simmx = config
        .simmx
        .as_deref()
        .map(|path| SimilarityMatrix::load(&*store, path))
        .transpose()?;

    let n = range.count();
    let nval = mask.active_count();
    if n.saturating_mul(nval) > config.memory_warning_threshold {
        let megabytes = (n as f64) * (nval as f64) * 4.0 / (1u64 << 20) as f64;
        warn!(
            images = n,
            pixels = nval,
            megabytes = megabytes.round(),
            "fit pass needs a large amount of memory"
        );
    }

    info!(images = n, pixels = nval, "vectorizing");
    let mut data = vectorize_range(&*store, input, &mask, &range, simmx.as_ref())?;
    let mean = center_and_normalize(&mut data, config.normalize)?;

    let model = Decomposition::fit(config.mode, config.n_basis, &mut data, config.seed)?;
    drop(data);

    let basis_images = write_basis(store, output, &mean, &mask, &model)?;

    let reprojection = reprojection
        .map(|path| {
            reproject(
                store,
                input,
                path,
                &mask,
                simmx.as_ref(),
                &range,
                &model,
                config.reprojection_budget,
            )
        })
        .transpose()?;

    if !config.mode.is_linear() {
        warn!(
            mode = %config.mode,
            "components may not be interpretable as eigenimages because of non-linearity"
        );
    }

    Ok(MsaReport {
        mode: config.mode,
        total_images: total,
        fitted_images: n,
        active_pixels: nval,
        basis_images,
        shift: model.shift(),
        reprojection,
    })
}
