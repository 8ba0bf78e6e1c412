//! Per-window region growing.
//!
//! The engine seeds one segment per pixel (or per label of an existing
//! partition), builds 4-neighbor adjacency and then merges each segment into
//! its most similar neighbor, raising the similarity threshold step by step
//! until a full pass at the configured ceiling merges nothing.

pub mod engine;
pub mod params;

pub use engine::{EngineState, GrowthOutcome, RegionGrowingEngine};
pub use params::EngineParams;
