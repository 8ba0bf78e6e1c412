//! Baatz multi-resolution heterogeneity strategy.
//!
//! Feature layout per segment, for `B` bands:
//!
//! | index            | feature                        |
//! |------------------|--------------------------------|
//! | 0                | edge length                    |
//! | 1                | compactness `el / √size`       |
//! | 2                | smoothness `el / bbox perimeter` |
//! | 3 .. 3+B         | per-band sum                   |
//! | 3+B .. 3+2B      | per-band sum of squares        |
//! | 3+2B .. 3+3B     | per-band standard deviation    |
//!
//! The merge cost blends a color heterogeneity term with a shape term:
//! `color_weight · h_color + (1 − color_weight) · h_shape`, where
//! `h_shape = compactness_weight · h_compact + (1 − compactness_weight) · h_smooth`.
//! Every sub-term is rescaled with the min/max ranges observed over the
//! active segments at the start of each iteration.

use crate::error::{Result, SegmenterError};
use crate::matrix::PagedMatrix;
use crate::segment::{BoundingBox, SegmentHandle, SegmentId, SegmentPool};
use crate::strategy::{
    DissimilarityStrategy, MergePreview, SegmentSeed, base_pixel_footprint, sanitize_score,
};

const EDGE_LENGTH: usize = 0;
const COMPACTNESS: usize = 1;
const SMOOTHNESS: usize = 2;
const BAND_FEATURES: usize = 3;

#[derive(Debug, Clone)]
pub struct BaatzStrategy {
    /// Band weights, normalized to sum 1.
    band_weights: Vec<f64>,
    color_weight: f64,
    compactness_weight: f64,
    min_segment_size: usize,
    compactness_gain: f64,
    smoothness_gain: f64,
    stddev_gains: Vec<f64>,
}

impl BaatzStrategy {
    pub fn new(
        band_weights: &[f64],
        color_weight: f64,
        compactness_weight: f64,
        min_segment_size: usize,
    ) -> Result<Self> {
        if band_weights.is_empty() {
            return Err(SegmenterError::config("Baatz strategy needs at least one band weight"));
        }
        if band_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SegmenterError::config("Baatz band weights must be non-negative"));
        }
        let total: f64 = band_weights.iter().sum();
        if total <= 0.0 {
            return Err(SegmenterError::config("Baatz band weights must not all be zero"));
        }
        if !(0.0..=1.0).contains(&color_weight) || !(0.0..=1.0).contains(&compactness_weight) {
            return Err(SegmenterError::config(
                "Baatz color and compactness weights must be within [0, 1]",
            ));
        }

        Ok(BaatzStrategy {
            band_weights: band_weights.iter().map(|w| w / total).collect(),
            color_weight,
            compactness_weight,
            min_segment_size,
            compactness_gain: 1.0,
            smoothness_gain: 1.0,
            stddev_gains: vec![1.0; band_weights.len()],
        })
    }

    fn band_count(&self) -> usize {
        self.band_weights.len()
    }

    fn sum_index(&self, band: usize) -> usize {
        BAND_FEATURES + band
    }

    fn square_index(&self, band: usize) -> usize {
        BAND_FEATURES + self.band_count() + band
    }

    fn stddev_index(&self, band: usize) -> usize {
        BAND_FEATURES + 2 * self.band_count() + band
    }

    /// Incrementally maintained edge length of a segment's features.
    pub fn edge_length(features: &[f64]) -> f64 {
        features[EDGE_LENGTH]
    }

    fn shape_features(edge_length: f64, size: usize, bbox: &BoundingBox) -> (f64, f64) {
        let compactness = edge_length / (size.max(1) as f64).sqrt();
        let smoothness = edge_length / bbox.perimeter().max(1) as f64;
        (compactness, smoothness)
    }
}

fn standard_deviation(size: usize, sum: f64, square: f64) -> f64 {
    let n = size.max(1) as f64;
    let mean = sum / n;
    (square / n - mean * mean).max(0.0).sqrt()
}

fn range_gain(min: f64, max: f64) -> f64 {
    let range = max - min;
    if range.is_finite() && range > f64::EPSILON {
        1.0 / range
    } else {
        1.0
    }
}

/// Count 4-adjacent pixel pairs holding `id_a` on one side and `id_b` on the
/// other, inside `bbox`.
pub fn touching_edge_length(
    ids: &mut PagedMatrix<SegmentId>,
    bbox: &BoundingBox,
    id_a: SegmentId,
    id_b: SegmentId,
    previous: &mut Vec<SegmentId>,
) -> Result<f64> {
    let is_pair = |p: SegmentId, q: SegmentId| (p == id_a && q == id_b) || (p == id_b && q == id_a);
    let mut touching = 0usize;
    previous.clear();

    for y in bbox.y_start..bbox.y_bound {
        let row = &ids.row(y)?[bbox.x_start..bbox.x_bound];

        touching += row.windows(2).filter(|pair| is_pair(pair[0], pair[1])).count();
        if y > bbox.y_start {
            touching += previous
                .iter()
                .zip(row)
                .filter(|(up, down)| is_pair(**up, **down))
                .count();
        }

        previous.clear();
        previous.extend_from_slice(row);
    }

    Ok(touching as f64)
}

/// Edge length of segment `id` recomputed from the ID matrix.
///
/// Pixel sides facing another segment, a no-data pixel or the matrix border
/// all count.
pub fn edge_length_from_ids(ids: &mut PagedMatrix<SegmentId>, id: SegmentId) -> Result<f64> {
    let cols = ids.cols();
    let mut previous: Vec<SegmentId> = Vec::with_capacity(cols);
    let mut edges = 0usize;

    for y in 0..ids.rows() {
        let row = ids.row(y)?;
        for x in 0..cols {
            if row[x] == id {
                if x == 0 || row[x - 1] != id {
                    edges += 1;
                }
                if x + 1 == cols || row[x + 1] != id {
                    edges += 1;
                }
                if y == 0 || previous[x] != id {
                    edges += 1;
                }
            } else if y > 0 && previous[x] == id {
                edges += 1;
            }
        }
        previous.clear();
        previous.extend_from_slice(row);
    }
    edges += previous.iter().filter(|&&value| value == id).count();

    Ok(edges as f64)
}

impl DissimilarityStrategy for BaatzStrategy {
    fn name(&self) -> &'static str {
        "Baatz"
    }

    fn feature_vector_size(&self) -> usize {
        BAND_FEATURES + 3 * self.band_count()
    }

    fn initialize_segment(&self, seed: &SegmentSeed, features: &mut [f64]) {
        let (compactness, smoothness) =
            Self::shape_features(seed.edge_length, seed.size, &seed.bbox);
        features[EDGE_LENGTH] = seed.edge_length;
        features[COMPACTNESS] = compactness;
        features[SMOOTHNESS] = smoothness;

        for band in 0..self.band_count() {
            let sum = seed.sums[band];
            let square = seed.squares[band];
            features[self.sum_index(band)] = sum;
            features[self.square_index(band)] = square;
            features[self.stddev_index(band)] = standard_deviation(seed.size, sum, square);
        }
    }

    fn refresh_global_state(&mut self, pool: &SegmentPool) {
        let bands = self.band_count();
        let mut compactness = (f64::MAX, f64::MIN);
        let mut smoothness = (f64::MAX, f64::MIN);
        let mut stddevs = vec![(f64::MAX, f64::MIN); bands];

        for handle in pool.active_iter() {
            let features = pool.features(handle);
            compactness.0 = compactness.0.min(features[COMPACTNESS]);
            compactness.1 = compactness.1.max(features[COMPACTNESS]);
            smoothness.0 = smoothness.0.min(features[SMOOTHNESS]);
            smoothness.1 = smoothness.1.max(features[SMOOTHNESS]);
            for (band, range) in stddevs.iter_mut().enumerate() {
                let value = features[self.stddev_index(band)];
                range.0 = range.0.min(value);
                range.1 = range.1.max(value);
            }
        }

        self.compactness_gain = range_gain(compactness.0, compactness.1);
        self.smoothness_gain = range_gain(smoothness.0, smoothness.1);
        for (gain, range) in self.stddev_gains.iter_mut().zip(&stddevs) {
            *gain = range_gain(range.0, range.1);
        }
    }

    fn dissimilarity(
        &self,
        ids: &mut PagedMatrix<SegmentId>,
        pool: &SegmentPool,
        a: SegmentHandle,
        b: SegmentHandle,
        preview: &mut MergePreview,
    ) -> Result<f64> {
        let seg_a = pool.segment(a);
        let seg_b = pool.segment(b);
        let fa = pool.features(a);
        let fb = pool.features(b);

        let size_a = seg_a.size as f64;
        let size_b = seg_b.size as f64;
        let size = seg_a.size + seg_b.size;
        let size_union = size as f64;
        let bbox = seg_a.bbox.union(&seg_b.bbox);

        let touching =
            touching_edge_length(ids, &bbox, seg_a.id, seg_b.id, &mut preview.row_buffer)?;

        preview.size = size;
        preview.bbox = bbox;
        preview.features.resize(self.feature_vector_size(), 0.0);

        // Shape heterogeneity.
        let edge_length = fa[EDGE_LENGTH] + fb[EDGE_LENGTH] - 2.0 * touching;
        let (compactness, smoothness) = Self::shape_features(edge_length, size, &bbox);
        preview.features[EDGE_LENGTH] = edge_length;
        preview.features[COMPACTNESS] = compactness;
        preview.features[SMOOTHNESS] = smoothness;

        let h_compact = (compactness
            - (size_a * fa[COMPACTNESS] + size_b * fb[COMPACTNESS]) / size_union)
            .abs()
            * self.compactness_gain;
        let h_smooth = (smoothness
            - (size_a * fa[SMOOTHNESS] + size_b * fb[SMOOTHNESS]) / size_union)
            .abs()
            * self.smoothness_gain;
        let h_shape =
            self.compactness_weight * h_compact + (1.0 - self.compactness_weight) * h_smooth;

        // Color heterogeneity.
        let mut h_color = 0.0;
        for band in 0..self.band_count() {
            let (sum_i, square_i, stddev_i) =
                (self.sum_index(band), self.square_index(band), self.stddev_index(band));

            let sum = fa[sum_i] + fb[sum_i];
            let square = fa[square_i] + fb[square_i];
            let stddev = standard_deviation(size, sum, square);
            preview.features[sum_i] = sum;
            preview.features[square_i] = square;
            preview.features[stddev_i] = stddev;

            let weighted_inputs = (size_a * fa[stddev_i] + size_b * fb[stddev_i]) / size_union;
            h_color += self.band_weights[band]
                * (stddev - weighted_inputs).max(0.0)
                * self.stddev_gains[band];
        }

        let score = self.color_weight * h_color + (1.0 - self.color_weight) * h_shape;
        Ok(sanitize_score(score))
    }

    fn mem_usage_estimation(&self, band_count: usize, pixel_count: usize) -> usize {
        pixel_count * base_pixel_footprint(band_count, self.feature_vector_size())
    }

    fn optimal_blocks_overlap_size(&self) -> usize {
        2 * (self.min_segment_size as f64).sqrt().ceil() as usize
    }
}
