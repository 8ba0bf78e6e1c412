//! Block scheduling and the segmentation driver.
//!
//! [`SegmenterDriver`] splits the input raster into overlapping blocks,
//! segments them on a worker pool and stitches segments across block seams.

pub mod blocks;
pub mod components;
pub mod config;
pub mod driver;
pub mod progress;
pub mod stitch;

pub use blocks::{Block, BlockLayout, Rect};
pub use components::split_disconnected;
pub use config::{SegmenterConfig, StrategyKind};
pub use driver::{SegmentationReport, SegmenterDriver};
pub use progress::{NoProgress, ProgressSink};
pub use stitch::IdUnion;
