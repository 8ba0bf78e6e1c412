//! # Segmenta
//!
//! Region-growing segmentation of large multi-band rasters.
//!
//! ## Features
//!
//! - Out-of-core row matrices that spill to temporary files
//! - Pluggable dissimilarity strategies (per-band mean, Baatz heterogeneity)
//! - Best-fit and mutual best-fit merging with threshold escalation
//! - Block-parallel processing with seam stitching
//! - Cooperative cancellation and progress reporting

pub mod error;
pub mod matrix;
pub mod raster;
pub mod region_growing;
pub mod segment;
pub mod segmenter;
pub mod strategy;

pub mod prelude {
    pub use crate::error::{Result, SegmenterError};
    pub use crate::matrix::{MemoryPolicy, PagedMatrix, PagedMatrixConfig};
    pub use crate::raster::{MemoryRaster, Raster};
    pub use crate::region_growing::{EngineParams, EngineState, RegionGrowingEngine};
    pub use crate::segment::{SegmentId, SegmentIdAllocator};
    pub use crate::segmenter::{
        NoProgress, ProgressSink, SegmentationReport, SegmenterConfig, SegmenterDriver,
        StrategyKind,
    };
    pub use crate::strategy::{BaatzStrategy, DissimilarityStrategy, MeanStrategy};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
