//! Mean-based strategy: segments are compared by their per-band means.

use crate::error::Result;
use crate::matrix::PagedMatrix;
use crate::segment::{SegmentHandle, SegmentId, SegmentPool};
use crate::strategy::{
    DissimilarityStrategy, MergePreview, SegmentSeed, base_pixel_footprint, sanitize_score,
};

/// Feature vector: the mean of every band.
///
/// Dissimilarity is the Euclidean distance between the mean vectors divided
/// by `2·√bands`; merging takes the size-weighted average of the means.
#[derive(Debug, Clone)]
pub struct MeanStrategy {
    band_count: usize,
    min_segment_size: usize,
    /// `1 / (2·√bands)`.
    distance_scale: f64,
}

impl MeanStrategy {
    pub fn new(band_count: usize, min_segment_size: usize) -> Self {
        let distance_scale = if band_count == 0 {
            0.0
        } else {
            1.0 / (2.0 * (band_count as f64).sqrt())
        };
        MeanStrategy {
            band_count,
            min_segment_size,
            distance_scale,
        }
    }

    /// Size-weighted merge of two mean vectors into `merged`.
    pub fn merge_means(
        size_a: usize,
        means_a: &[f64],
        size_b: usize,
        means_b: &[f64],
        merged: &mut [f64],
    ) {
        let total = (size_a + size_b) as f64;
        let weight_a = size_a as f64 / total;
        let weight_b = size_b as f64 / total;
        for ((out, &a), &b) in merged.iter_mut().zip(means_a).zip(means_b) {
            *out = a * weight_a + b * weight_b;
        }
    }
}

impl DissimilarityStrategy for MeanStrategy {
    fn name(&self) -> &'static str {
        "Mean"
    }

    fn feature_vector_size(&self) -> usize {
        self.band_count
    }

    fn initialize_segment(&self, seed: &SegmentSeed, features: &mut [f64]) {
        let size = seed.size.max(1) as f64;
        for (mean, &sum) in features.iter_mut().zip(&seed.sums) {
            *mean = sum / size;
        }
    }

    fn refresh_global_state(&mut self, _pool: &SegmentPool) {}

    fn dissimilarity(
        &self,
        _ids: &mut PagedMatrix<SegmentId>,
        pool: &SegmentPool,
        a: SegmentHandle,
        b: SegmentHandle,
        preview: &mut MergePreview,
    ) -> Result<f64> {
        let seg_a = pool.segment(a);
        let seg_b = pool.segment(b);
        let means_a = pool.features(a);
        let means_b = pool.features(b);

        preview.size = seg_a.size + seg_b.size;
        preview.bbox = seg_a.bbox.union(&seg_b.bbox);
        preview.features.resize(self.band_count, 0.0);
        Self::merge_means(seg_a.size, means_a, seg_b.size, means_b, &mut preview.features);

        let squared: f64 = means_a
            .iter()
            .zip(means_b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum();

        Ok(sanitize_score(squared.sqrt() * self.distance_scale))
    }

    fn mem_usage_estimation(&self, band_count: usize, pixel_count: usize) -> usize {
        pixel_count * base_pixel_footprint(band_count, self.band_count)
    }

    fn optimal_blocks_overlap_size(&self) -> usize {
        (self.min_segment_size as f64).sqrt().ceil() as usize
    }
}
