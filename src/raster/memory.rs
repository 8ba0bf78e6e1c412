use crate::error::{Result, SegmenterError};
use crate::raster::Raster;

/// Band-interleaved raster held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRaster {
    rows: usize,
    cols: usize,
    bands: usize,
    data: Vec<f64>,
    no_data: Vec<Option<f64>>,
}

impl MemoryRaster {
    /// Raster filled with zeros.
    pub fn new(rows: usize, cols: usize, bands: usize) -> Self {
        MemoryRaster {
            rows,
            cols,
            bands,
            data: vec![0.0; rows * cols * bands],
            no_data: vec![None; bands],
        }
    }

    /// Raster whose values are `f(col, row, band)`.
    pub fn from_fn<F>(rows: usize, cols: usize, bands: usize, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> f64,
    {
        let mut raster = Self::new(rows, cols, bands);
        for row in 0..rows {
            for col in 0..cols {
                for band in 0..bands {
                    raster.data[(row * cols + col) * bands + band] = f(col, row, band);
                }
            }
        }
        raster
    }

    /// Set the no-data value of a band.
    pub fn with_no_data(mut self, band: usize, value: f64) -> Self {
        if let Some(slot) = self.no_data.get_mut(band) {
            *slot = Some(value);
        }
        self
    }

    /// All values of one band in row-major order.
    pub fn band_values(&self, band: usize) -> Vec<f64> {
        self.data
            .iter()
            .skip(band)
            .step_by(self.bands.max(1))
            .copied()
            .collect()
    }

    fn offset(&self, col: usize, row: usize, band: usize) -> Result<usize> {
        if col >= self.cols || row >= self.rows || band >= self.bands {
            return Err(SegmenterError::raster(format!(
                "pixel ({col}, {row}) band {band} outside {}x{}x{} raster",
                self.cols, self.rows, self.bands
            )));
        }
        Ok((row * self.cols + col) * self.bands + band)
    }
}

impl Raster for MemoryRaster {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn bands(&self) -> usize {
        self.bands
    }

    fn value(&self, col: usize, row: usize, band: usize) -> Result<f64> {
        Ok(self.data[self.offset(col, row, band)?])
    }

    fn set_value(&mut self, col: usize, row: usize, band: usize, value: f64) -> Result<()> {
        let offset = self.offset(col, row, band)?;
        self.data[offset] = value;
        Ok(())
    }

    fn no_data(&self, band: usize) -> Option<f64> {
        self.no_data.get(band).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_layout() {
        let raster = MemoryRaster::from_fn(2, 3, 2, |col, row, band| {
            (row * 100 + col * 10 + band) as f64
        });

        assert_eq!(raster.rows(), 2);
        assert_eq!(raster.cols(), 3);
        assert_eq!(raster.value(2, 1, 1).unwrap(), 121.0);
        assert_eq!(raster.band_values(1), vec![1.0, 11.0, 21.0, 101.0, 111.0, 121.0]);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut raster = MemoryRaster::new(2, 2, 1);

        assert!(raster.value(2, 0, 0).is_err());
        assert!(raster.value(0, 0, 1).is_err());
        assert!(matches!(
            raster.set_value(0, 5, 0, 1.0),
            Err(SegmenterError::Raster(_))
        ));
    }

    #[test]
    fn test_no_data() {
        let raster = MemoryRaster::new(1, 1, 2).with_no_data(1, -9999.0);

        assert_eq!(raster.no_data(0), None);
        assert_eq!(raster.no_data(1), Some(-9999.0));
        assert!(raster.is_no_data(1, -9999.0));
        assert!(!raster.is_no_data(0, -9999.0));
        assert!(raster.is_no_data(0, f64::NAN));
    }
}
