//! Projection of a whole stack into a fitted basis, one bounded chunk at a time.

use crate::alignment::SimilarityMatrix;
use crate::decomposition::Decomposition;
use crate::error::Result;
use crate::image::store::ImageStore;
use crate::image::Image;
use crate::mask::Mask;
use crate::range::SamplingRange;
use crate::vectorize::vectorize_range;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Split of `[0, total)` into contiguous chunks whose vectorized size stays
/// within an element budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    chunk: usize,
}

impl ChunkPlan {
    /// Chunk length is `budget / nval`, raised to at least 2 and capped at `total`.
    pub fn new(total: usize, nval: usize, budget: usize) -> Self {
        let per_chunk = budget / nval.max(1);
        let chunk = per_chunk.max(2).min(total);
        Self { total, chunk }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        if self.chunk == 0 {
            0
        } else {
            self.total.div_ceil(self.chunk)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Half-open `(start, end)` bounds of every chunk in order.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len()).map(move |i| {
            let start = i * self.chunk;
            (start, (start + self.chunk).min(self.total))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReprojectionSummary {
    pub images: usize,
    pub components: usize,
    pub chunk_size: usize,
    pub chunks: usize,
}

/// Projects images `0..range.stop` of `input` into `model` and writes a single
/// `(nx = components, ny = images)` image to `output`.
///
/// The fit stride is ignored here: every image up to the stop is projected.
#[allow(clippy::too_many_arguments)]
pub fn reproject<S: ImageStore>(
    store: &mut S,
    input: &Path,
    output: &Path,
    mask: &Mask,
    simmx: Option<&SimilarityMatrix>,
    range: &SamplingRange,
    model: &Decomposition,
    budget: usize,
) -> Result<ReprojectionSummary> {
    store.discard(output)?;

    let total = range.stop;
    let components = model.n_components();
    let plan = ChunkPlan::new(total, mask.active_count(), budget);
    info!(
        images = total,
        chunk_size = plan.chunk_size(),
        chunks = plan.len(),
        "reprojecting"
    );

    let mut projected = Image::new(components, total, 1);
    for (start, end) in plan.chunks() {
        let chunk_range = SamplingRange {
            start,
            stride: 1,
            stop: end,
        };
        let mut chunk = vectorize_range(&*store, input, mask, &chunk_range, simmx)?;
        model.prepare_chunk(&mut chunk);
        let scores = model.transform(&chunk)?;
        projected.insert_clip(&Image::from_matrix(&scores), (0, start, 0));
        debug!(start, end, "chunk projected");
    }

    store.write(output, 0, &projected)?;

    Ok(ReprojectionSummary {
        images: total,
        components,
        chunk_size: plan.chunk_size(),
        chunks: plan.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::preprocessing::center_and_normalize;
    use proptest::prelude::*;

    fn stack(n: usize) -> MemoryStoreFixture {
        let images: Vec<Image> = (0..n)
            .map(|i| {
                let values = (0..9)
                    .map(|p| (((p + 1) * (i + 3)) % 11) as f32 - 5.0)
                    .collect();
                Image::from_vec(3, 3, 1, values).unwrap()
            })
            .collect();
        let mut store = crate::image::store::MemoryStore::new();
        store.insert_stack("in", images);
        let mask = Mask::from_radius((3, 3, 1), 0).unwrap();
        MemoryStoreFixture { store, mask }
    }

    struct MemoryStoreFixture {
        store: crate::image::store::MemoryStore,
        mask: Mask,
    }

    fn fitted(fixture: &MemoryStoreFixture, n: usize, mode: Mode) -> Decomposition {
        let mut data = vectorize_range(
            &fixture.store,
            Path::new("in"),
            &fixture.mask,
            &SamplingRange::full(n),
            None,
        )
        .unwrap();
        center_and_normalize(&mut data, false).unwrap();
        Decomposition::fit(mode, 3, &mut data, 0).unwrap()
    }

    #[test]
    fn test_plan_for_large_stack() {
        let plan = ChunkPlan::new(10_000, 1_000_000, 250_000_000);
        assert_eq!(plan.chunk_size(), 250);
        assert_eq!(plan.len(), 40);
        assert_eq!(plan.chunks().last(), Some((9_750, 10_000)));
    }

    #[test]
    fn test_plan_edge_cases() {
        // Budget smaller than one image still moves two images at a time.
        let plan = ChunkPlan::new(5, 1_000, 10);
        assert_eq!(plan.chunk_size(), 2);
        assert_eq!(plan.chunks().collect::<Vec<_>>(), vec![(0, 2), (2, 4), (4, 5)]);

        let plan = ChunkPlan::new(1, 10, 1_000);
        assert_eq!(plan.chunk_size(), 1);
        assert_eq!(plan.len(), 1);

        let plan = ChunkPlan::new(0, 10, 1_000);
        assert!(plan.is_empty());
        assert_eq!(plan.chunks().count(), 0);
    }

    #[test]
    fn test_reprojection_shape_and_single_write() {
        let mut fixture = stack(12);
        let model = fitted(&fixture, 12, Mode::Pca);
        let summary = reproject(
            &mut fixture.store,
            Path::new("in"),
            Path::new("out"),
            &fixture.mask,
            None,
            &SamplingRange::full(12),
            &model,
            40,
        )
        .unwrap();

        assert_eq!(summary.images, 12);
        assert_eq!(summary.components, 3);
        assert_eq!(summary.chunk_size, 4);
        assert_eq!(summary.chunks, 3);
        let out = fixture.store.stack(Path::new("out")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].geometry(), (3, 12, 1));
    }

    #[test]
    fn test_reprojection_ignores_fit_stride() {
        let mut fixture = stack(10);
        let model = fitted(&fixture, 10, Mode::Pca);
        let range = SamplingRange {
            start: 2,
            stride: 3,
            stop: 8,
        };
        let summary = reproject(
            &mut fixture.store,
            Path::new("in"),
            Path::new("out"),
            &fixture.mask,
            None,
            &range,
            &model,
            1_000,
        )
        .unwrap();
        assert_eq!(summary.images, 8);
        assert_eq!(fixture.store.reads(Path::new("in")), 10 + 8);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_results_do_not_depend_on_chunk_size(budget in 1usize..200, lda in any::<bool>()) {
            let mode = if lda { Mode::Lda } else { Mode::Pca };
            let mut fixture = stack(9);
            let model = fitted(&fixture, 9, mode);
            let range = SamplingRange::full(9);

            reproject(&mut fixture.store, Path::new("in"), Path::new("whole"), &fixture.mask, None, &range, &model, usize::MAX).unwrap();
            reproject(&mut fixture.store, Path::new("in"), Path::new("chunked"), &fixture.mask, None, &range, &model, budget).unwrap();

            let whole = fixture.store.stack(Path::new("whole")).unwrap()[0].clone();
            let chunked = fixture.store.stack(Path::new("chunked")).unwrap()[0].clone();
            for (a, b) in whole.as_slice().iter().zip(chunked.as_slice()) {
                prop_assert!((a - b).abs() <= 1e-5 * (1.0 + a.abs()), "{} != {}", a, b);
            }
        }
    }
}
