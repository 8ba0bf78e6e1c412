//! Pluggable dissimilarity and merge strategies.
//!
//! A strategy defines the feature vector carried by each segment, how two
//! segments are compared, and what the merged segment looks like. Two
//! strategies are provided:
//!
//! - [`MeanStrategy`]: per-band mean, Euclidean distance.
//! - [`BaatzStrategy`]: Baatz multi-resolution heterogeneity, blending a color
//!   term with a shape (compactness/smoothness) term.

pub mod baatz;
pub mod mean;

pub use baatz::BaatzStrategy;
pub use mean::MeanStrategy;

use std::fmt::Debug;

use crate::error::Result;
use crate::matrix::PagedMatrix;
use crate::segment::{BoundingBox, SegmentHandle, SegmentId, SegmentPool};
use crate::segmenter::config::{SegmenterConfig, StrategyKind};

/// Aggregate pixel statistics of a newly seeded segment.
#[derive(Debug, Clone, Default)]
pub struct SegmentSeed {
    /// Pixel count.
    pub size: usize,
    pub bbox: BoundingBox,
    /// Pixel edges bordering another segment, no-data or the window border.
    pub edge_length: f64,
    /// Per-band sum of normalized pixel values.
    pub sums: Vec<f64>,
    /// Per-band sum of squared normalized pixel values.
    pub squares: Vec<f64>,
}

impl SegmentSeed {
    pub fn new(band_count: usize) -> Self {
        SegmentSeed {
            sums: vec![0.0; band_count],
            squares: vec![0.0; band_count],
            ..Self::default()
        }
    }

    /// Reset to a single pixel with the given band values.
    pub fn set_pixel(&mut self, x: usize, y: usize, values: &[f64]) {
        self.size = 1;
        self.bbox = BoundingBox::pixel(x, y);
        self.edge_length = 4.0;
        for (band, &value) in values.iter().enumerate() {
            self.sums[band] = value;
            self.squares[band] = value * value;
        }
    }

    /// Accumulate one more pixel.
    pub fn add_pixel(&mut self, x: usize, y: usize, values: &[f64]) {
        self.size += 1;
        self.bbox.include(x, y);
        for (band, &value) in values.iter().enumerate() {
            self.sums[band] += value;
            self.squares[band] += value * value;
        }
    }
}

/// What the merged segment would look like.
///
/// Filled by [`DissimilarityStrategy::dissimilarity`] and consumed by
/// [`DissimilarityStrategy::merge_into`], so the merge never recomputes the
/// features. Also carries the scratch row used while scanning ID rasters.
#[derive(Debug, Clone, Default)]
pub struct MergePreview {
    pub size: usize,
    pub bbox: BoundingBox,
    pub features: Vec<f64>,
    pub(crate) row_buffer: Vec<SegmentId>,
}

impl MergePreview {
    pub fn new(features_per_segment: usize) -> Self {
        MergePreview {
            features: vec![0.0; features_per_segment],
            ..Self::default()
        }
    }

    /// Copy another preview's merge result.
    pub fn copy_from(&mut self, other: &MergePreview) {
        self.size = other.size;
        self.bbox = other.bbox;
        self.features.clear();
        self.features.extend_from_slice(&other.features);
    }
}

/// Strategy interface used by the region-growing engine.
///
/// `dissimilarity` must be symmetric, non-negative and deterministic given its
/// inputs and the normalization state computed by the last
/// `refresh_global_state` call.
pub trait DissimilarityStrategy: Send + Debug {
    /// Strategy name, as accepted by [`StrategyKind`]'s parser.
    fn name(&self) -> &'static str;

    /// Number of features per segment.
    fn feature_vector_size(&self) -> usize;

    /// Compute the initial features of a newly seeded segment.
    fn initialize_segment(&self, seed: &SegmentSeed, features: &mut [f64]);

    /// Recompute normalization statistics over all active segments.
    fn refresh_global_state(&mut self, pool: &SegmentPool);

    /// Score two adjacent segments and fill `preview` with their union.
    fn dissimilarity(
        &self,
        ids: &mut PagedMatrix<SegmentId>,
        pool: &SegmentPool,
        a: SegmentHandle,
        b: SegmentHandle,
        preview: &mut MergePreview,
    ) -> Result<f64>;

    /// Make `survivor` the union described by `preview`.
    ///
    /// `absorbed` is left untouched; the caller retires it.
    fn merge_into(
        &self,
        pool: &mut SegmentPool,
        survivor: SegmentHandle,
        _absorbed: SegmentHandle,
        preview: &MergePreview,
    ) {
        let (segment, features) = pool.parts_mut(survivor);
        segment.size = preview.size;
        segment.bbox = preview.bbox;
        features.copy_from_slice(&preview.features);
    }

    /// Estimated bytes needed to segment `pixel_count` pixels.
    fn mem_usage_estimation(&self, band_count: usize, pixel_count: usize) -> usize;

    /// Block overlap in pixels that lets segments straddle block borders.
    fn optimal_blocks_overlap_size(&self) -> usize;
}

/// Clamp a raw score into the valid dissimilarity range.
pub(crate) fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() || score < 0.0 {
        0.0
    } else {
        score
    }
}

/// Per-pixel memory of the segment arena and the block matrices.
pub(crate) fn base_pixel_footprint(band_count: usize, features_per_segment: usize) -> usize {
    std::mem::size_of::<crate::segment::Segment>()
        + 4 * std::mem::size_of::<Option<SegmentHandle>>()
        + features_per_segment * std::mem::size_of::<f64>()
        + std::mem::size_of::<SegmentId>()
        + band_count * std::mem::size_of::<f64>()
}

/// Create the strategy selected by the configuration.
pub fn create_strategy(config: &SegmenterConfig) -> Result<Box<dyn DissimilarityStrategy>> {
    let band_count = config.bands_to_use.len();
    let strategy: Box<dyn DissimilarityStrategy> = match config.strategy {
        StrategyKind::Mean => Box::new(MeanStrategy::new(band_count, config.min_segment_size)),
        StrategyKind::Baatz => Box::new(BaatzStrategy::new(
            &config.band_weights_or_default(),
            config.color_weight,
            config.compactness_weight,
            config.min_segment_size,
        )?),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_accumulation() {
        let mut seed = SegmentSeed::new(2);
        seed.set_pixel(1, 1, &[0.5, 1.0]);
        seed.add_pixel(2, 1, &[0.25, 0.0]);

        assert_eq!(seed.size, 2);
        assert_eq!(seed.bbox.width(), 2);
        assert_eq!(seed.sums, vec![0.75, 1.0]);
        assert_eq!(seed.squares, vec![0.3125, 1.0]);
    }

    #[test]
    fn test_sanitize_score() {
        assert_eq!(sanitize_score(f64::NAN), 0.0);
        assert_eq!(sanitize_score(-1.0), 0.0);
        assert_eq!(sanitize_score(f64::INFINITY), f64::INFINITY);
        assert_eq!(sanitize_score(0.25), 0.25);
    }

    #[test]
    fn test_factory() {
        let config = SegmenterConfig::default().with_bands(vec![0, 1]);
        let mean = create_strategy(&config).unwrap();
        assert_eq!(mean.name(), "Mean");
        assert_eq!(mean.feature_vector_size(), 2);

        let config = config.with_strategy(StrategyKind::Baatz);
        let baatz = create_strategy(&config).unwrap();
        assert_eq!(baatz.name(), "Baatz");
        assert_eq!(baatz.feature_vector_size(), 3 + 3 * 2);
    }
}
