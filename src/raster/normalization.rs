//! Per-band rescaling of pixel values into `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmenterError};
use crate::raster::Raster;

/// Min/max of every selected band over the valid pixels of a raster.
///
/// A pixel is valid when none of the selected bands holds no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandNormalization {
    bands: Vec<usize>,
    min: Vec<f64>,
    max: Vec<f64>,
}

impl BandNormalization {
    /// Scan `raster` and record the value range of each band in `bands`.
    pub fn compute(raster: &dyn Raster, bands: &[usize]) -> Result<Self> {
        if let Some(&band) = bands.iter().find(|&&band| band >= raster.bands()) {
            return Err(SegmenterError::config(format!(
                "band {band} does not exist in a {}-band raster",
                raster.bands()
            )));
        }

        let mut min = vec![f64::INFINITY; bands.len()];
        let mut max = vec![f64::NEG_INFINITY; bands.len()];
        let mut values = vec![0.0; bands.len()];

        for row in 0..raster.rows() {
            for col in 0..raster.cols() {
                let mut valid = true;
                for (slot, &band) in values.iter_mut().zip(bands) {
                    *slot = raster.value(col, row, band)?;
                    valid &= !raster.is_no_data(band, *slot);
                }
                if !valid {
                    continue;
                }
                for (i, &value) in values.iter().enumerate() {
                    min[i] = min[i].min(value);
                    max[i] = max[i].max(value);
                }
            }
        }

        // All-no-data bands collapse to an empty range.
        for (lo, hi) in min.iter_mut().zip(max.iter_mut()) {
            if lo > hi {
                *lo = 0.0;
                *hi = 0.0;
            }
        }

        Ok(BandNormalization {
            bands: bands.to_vec(),
            min,
            max,
        })
    }

    /// Raster band indices, in normalized order.
    pub fn bands(&self) -> &[usize] {
        &self.bands
    }

    pub fn range(&self, index: usize) -> (f64, f64) {
        (self.min[index], self.max[index])
    }

    /// Rescale the raw values of one pixel (one per selected band) into
    /// `out`. Any no-data value turns the whole pixel into `NaN`.
    pub fn normalize(&self, raster: &dyn Raster, raw: &[f64], out: &mut [f64]) {
        let no_data = raw
            .iter()
            .zip(&self.bands)
            .any(|(&value, &band)| raster.is_no_data(band, value));
        if no_data {
            out.fill(f64::NAN);
            return;
        }

        for (i, (slot, &value)) in out.iter_mut().zip(raw).enumerate() {
            let range = self.max[i] - self.min[i];
            *slot = if range > 0.0 {
                ((value - self.min[i]) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::MemoryRaster;

    #[test]
    fn test_range_and_scaling() {
        let raster = MemoryRaster::from_fn(2, 2, 2, |col, row, band| {
            if band == 0 {
                (10 + col * 10 + row * 20) as f64
            } else {
                5.0
            }
        });
        let normalization = BandNormalization::compute(&raster, &[0, 1]).unwrap();

        assert_eq!(normalization.range(0), (10.0, 40.0));
        assert_eq!(normalization.range(1), (5.0, 5.0));

        let mut out = [0.0; 2];
        normalization.normalize(&raster, &[25.0, 5.0], &mut out);
        assert_eq!(out, [0.5, 0.0]);
    }

    #[test]
    fn test_no_data_excluded() {
        let raster = MemoryRaster::from_fn(1, 3, 1, |col, _, _| [0.0, 50.0, 100.0][col])
            .with_no_data(0, 100.0);
        let normalization = BandNormalization::compute(&raster, &[0]).unwrap();

        assert_eq!(normalization.range(0), (0.0, 50.0));

        let mut out = [0.0];
        normalization.normalize(&raster, &[100.0], &mut out);
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_unknown_band() {
        let raster = MemoryRaster::new(1, 1, 1);
        assert!(matches!(
            BandNormalization::compute(&raster, &[1]),
            Err(SegmenterError::Config(_))
        ));
    }
}
