//! Error types for the segmenta library.
//!
//! Every fallible operation returns [`Result`], whose error side is the
//! [`SegmenterError`] enum. Constructor helpers keep call sites short:
//!
//! ```
//! use segmenta::error::{Result, SegmenterError};
//!
//! fn check_threshold(value: f64) -> Result<()> {
//!     if !(0.0..=1.0).contains(&value) {
//!         return Err(SegmenterError::config("similarity threshold out of range"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_threshold(0.5).is_ok());
//! assert!(check_threshold(2.0).is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for segmentation operations.
#[derive(Error, Debug)]
pub enum SegmenterError {
    /// I/O errors (temporary files backing a paged matrix).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration detected before processing starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource failures (temp file creation, poisoned matrices, memory).
    #[error("Resource error: {0}")]
    Resource(String),

    /// Raster accessor errors (out of range access, size mismatch).
    #[error("Raster error: {0}")]
    Raster(String),

    /// Segment identifier space exhausted.
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// A worker thread panicked or could not be joined.
    #[error("Thread join error: {0}")]
    ThreadJoin(String),

    /// Operation cancelled through the abort flag or a progress sink.
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// JSON (de)serialization errors for configuration files.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with SegmenterError.
pub type Result<T> = std::result::Result<T, SegmenterError>;

impl SegmenterError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SegmenterError::Config(msg.into())
    }

    /// Create a new resource error.
    pub fn resource<S: Into<String>>(msg: S) -> Self {
        SegmenterError::Resource(msg.into())
    }

    /// Create a new raster error.
    pub fn raster<S: Into<String>>(msg: S) -> Self {
        SegmenterError::Raster(msg.into())
    }

    /// Create a new allocation error.
    pub fn allocation<S: Into<String>>(msg: S) -> Self {
        SegmenterError::Allocation(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SegmenterError::OperationCancelled(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SegmenterError::Other(msg.into())
    }

    /// Create a new out of bounds error.
    pub fn out_of_bounds<S: Into<String>>(msg: S) -> Self {
        Self::other(format!("Index out of bounds: {}", msg.into()))
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::other(format!("Internal error: {}", msg.into()))
    }

    /// Whether this error was caused by cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SegmenterError::OperationCancelled(_))
    }
}
