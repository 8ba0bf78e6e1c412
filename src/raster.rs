//! Raster access.
//!
//! The segmenter never opens files itself; it reads and writes pixels through
//! the [`Raster`] trait. [`MemoryRaster`] is a plain in-memory implementation.

pub mod memory;
pub mod normalization;

pub use memory::MemoryRaster;
pub use normalization::BandNormalization;

use crate::error::Result;

/// Pixel-level access to a multi-band raster.
///
/// Coordinates are `(col, row)` with the origin at the top-left pixel.
pub trait Raster: Send + Sync {
    fn rows(&self) -> usize;

    fn cols(&self) -> usize;

    fn bands(&self) -> usize;

    /// Read one band value.
    fn value(&self, col: usize, row: usize, band: usize) -> Result<f64>;

    /// Write one band value.
    fn set_value(&mut self, col: usize, row: usize, band: usize, value: f64) -> Result<()>;

    /// Value marking missing data in `band`, if any.
    fn no_data(&self, _band: usize) -> Option<f64> {
        None
    }

    /// Whether `value` counts as no-data for `band`.
    fn is_no_data(&self, band: usize, value: f64) -> bool {
        value.is_nan() || self.no_data(band) == Some(value)
    }
}
