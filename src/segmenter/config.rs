//! Configuration for a segmentation run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmenterError};
use crate::matrix::PagedMatrixConfig;

/// Dissimilarity strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StrategyKind {
    #[default]
    Mean,
    Baatz,
}

impl FromStr for StrategyKind {
    type Err = SegmenterError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("mean") {
            Ok(StrategyKind::Mean)
        } else if s.eq_ignore_ascii_case("baatz") {
            Ok(StrategyKind::Baatz)
        } else {
            Err(SegmenterError::config(format!("Unknown strategy name: {s}")))
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Mean => write!(f, "Mean"),
            StrategyKind::Baatz => write!(f, "Baatz"),
        }
    }
}

/// Configuration for [`SegmenterDriver`](super::SegmenterDriver).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Input band indices to segment on.
    pub bands_to_use: Vec<usize>,

    /// Dissimilarity strategy.
    pub strategy: StrategyKind,

    /// Segments below this pixel count are merged into a neighbor.
    pub min_segment_size: usize,

    /// Ceiling of the merge threshold, in `[0, 1]`.
    pub similarity_threshold: f64,

    /// Intermediate thresholds tried before the ceiling.
    pub similarity_increase_steps: u32,

    /// Process blocks on a worker pool.
    pub enable_threaded_processing: bool,

    /// Worker count. 0 uses the number of CPU cores.
    pub max_threads: usize,

    /// Split the raster into blocks.
    pub enable_block_processing: bool,

    /// Maximum pixels per block. 0 derives it from the available memory.
    pub max_block_size: usize,

    /// Block overlap as a percentage of the smaller block side.
    pub block_overlap_percent: u32,

    /// Re-grow segments across block seams after all blocks finish.
    pub enable_block_merging: bool,

    /// Only merge pairs that are each other's best neighbor.
    pub enable_mutual_best_fit: bool,

    /// Allow a segment to merge again within one iteration.
    pub enable_same_iteration_merges: bool,

    /// Per-band color weights (Baatz). Empty means equal weights.
    pub band_weights: Vec<f64>,

    /// Weight of the color term against the shape term (Baatz).
    pub color_weight: f64,

    /// Weight of compactness against smoothness (Baatz).
    pub compactness_weight: f64,

    /// Fraction of available memory blocks are sized against.
    pub max_memory_fraction: f64,

    /// Paged matrix settings for per-block pixel and ID matrices.
    pub matrix: PagedMatrixConfig,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            bands_to_use: vec![0],
            strategy: StrategyKind::Mean,
            min_segment_size: 100,
            similarity_threshold: 0.03,
            similarity_increase_steps: 2,
            enable_threaded_processing: true,
            max_threads: 0,
            enable_block_processing: true,
            max_block_size: 0,
            block_overlap_percent: 10,
            enable_block_merging: true,
            enable_mutual_best_fit: false,
            enable_same_iteration_merges: false,
            band_weights: Vec::new(),
            color_weight: 0.9,
            compactness_weight: 0.5,
            max_memory_fraction: 0.4,
            matrix: PagedMatrixConfig::default(),
        }
    }
}

impl SegmenterConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_bands(mut self, bands: Vec<usize>) -> Self {
        self.bands_to_use = bands;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_min_segment_size(mut self, size: usize) -> Self {
        self.min_segment_size = size;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_similarity_increase_steps(mut self, steps: u32) -> Self {
        self.similarity_increase_steps = steps;
        self
    }

    pub fn with_threads(mut self, enabled: bool, max_threads: usize) -> Self {
        self.enable_threaded_processing = enabled;
        self.max_threads = max_threads;
        self
    }

    pub fn with_block_processing(mut self, enabled: bool, max_block_size: usize) -> Self {
        self.enable_block_processing = enabled;
        self.max_block_size = max_block_size;
        self
    }

    pub fn with_block_overlap_percent(mut self, percent: u32) -> Self {
        self.block_overlap_percent = percent;
        self
    }

    pub fn with_block_merging(mut self, enabled: bool) -> Self {
        self.enable_block_merging = enabled;
        self
    }

    pub fn with_mutual_best_fit(mut self, enabled: bool) -> Self {
        self.enable_mutual_best_fit = enabled;
        self
    }

    pub fn with_same_iteration_merges(mut self, enabled: bool) -> Self {
        self.enable_same_iteration_merges = enabled;
        self
    }

    pub fn with_baatz_weights(
        mut self,
        band_weights: Vec<f64>,
        color_weight: f64,
        compactness_weight: f64,
    ) -> Self {
        self.band_weights = band_weights;
        self.color_weight = color_weight;
        self.compactness_weight = compactness_weight;
        self
    }

    pub fn with_matrix_config(mut self, matrix: PagedMatrixConfig) -> Self {
        self.matrix = matrix;
        self
    }

    /// Baatz band weights, with equal weights when none are configured.
    pub fn band_weights_or_default(&self) -> Vec<f64> {
        if self.band_weights.is_empty() {
            vec![1.0; self.bands_to_use.len()]
        } else {
            self.band_weights.clone()
        }
    }

    /// Number of worker threads a run will use.
    pub fn effective_threads(&self) -> usize {
        if !self.enable_threaded_processing {
            1
        } else if self.max_threads == 0 {
            num_cpus::get()
        } else {
            self.max_threads
        }
    }

    /// Check every setting against a raster with `band_count` bands.
    pub fn validate(&self, band_count: usize) -> Result<()> {
        self.validate_parameters()?;

        for (i, &band) in self.bands_to_use.iter().enumerate() {
            if band >= band_count {
                return Err(SegmenterError::config(format!(
                    "Invalid band index {band}: raster has {band_count} bands"
                )));
            }
            if self.bands_to_use[..i].contains(&band) {
                return Err(SegmenterError::config(format!("Duplicate band index {band}")));
            }
        }
        Ok(())
    }

    /// Check the settings that do not depend on the input raster.
    pub fn validate_parameters(&self) -> Result<()> {
        if self.bands_to_use.is_empty() {
            return Err(SegmenterError::config("At least one band must be selected"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SegmenterError::config(format!(
                "Similarity threshold {} outside [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.min_segment_size == 0 {
            return Err(SegmenterError::config("Minimum segment size must be at least 1"));
        }
        if self.block_overlap_percent > 50 {
            return Err(SegmenterError::config(format!(
                "Block overlap {}% exceeds 50%",
                self.block_overlap_percent
            )));
        }
        if !(self.max_memory_fraction > 0.0 && self.max_memory_fraction <= 1.0) {
            return Err(SegmenterError::config(format!(
                "Memory fraction {} outside (0, 1]",
                self.max_memory_fraction
            )));
        }

        if self.strategy == StrategyKind::Baatz {
            if !(0.0..=1.0).contains(&self.color_weight) {
                return Err(SegmenterError::config("Color weight must be within [0, 1]"));
            }
            if !(0.0..=1.0).contains(&self.compactness_weight) {
                return Err(SegmenterError::config(
                    "Compactness weight must be within [0, 1]",
                ));
            }
            if !self.band_weights.is_empty() {
                if self.band_weights.len() != self.bands_to_use.len() {
                    return Err(SegmenterError::config(format!(
                        "Expected {} band weights, got {}",
                        self.bands_to_use.len(),
                        self.band_weights.len()
                    )));
                }
                if self.band_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                    return Err(SegmenterError::config("Band weights must be non-negative"));
                }
                if self.band_weights.iter().sum::<f64>() <= 0.0 {
                    return Err(SegmenterError::config("Band weights must not all be zero"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SegmenterConfig::default();

        assert_eq!(config.bands_to_use, vec![0]);
        assert_eq!(config.strategy, StrategyKind::Mean);
        assert_eq!(config.min_segment_size, 100);
        assert_eq!(config.similarity_increase_steps, 2);
        assert!(config.enable_block_merging);
        assert!(config.validate(1).is_ok());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!("Mean".parse::<StrategyKind>().unwrap(), StrategyKind::Mean);
        assert_eq!("baatz".parse::<StrategyKind>().unwrap(), StrategyKind::Baatz);
        assert_eq!(StrategyKind::Baatz.to_string(), "Baatz");
        assert!(matches!(
            "Watershed".parse::<StrategyKind>(),
            Err(SegmenterError::Config(_))
        ));
    }

    #[test]
    fn test_band_validation() {
        let config = SegmenterConfig::default().with_bands(vec![0, 2]);
        assert!(config.validate(3).is_ok());
        assert!(config.validate(2).is_err());

        let duplicated = SegmenterConfig::default().with_bands(vec![1, 1]);
        assert!(duplicated.validate(3).is_err());

        let empty = SegmenterConfig::default().with_bands(vec![]);
        assert!(empty.validate(3).is_err());
    }

    #[test]
    fn test_parameter_validation() {
        let base = SegmenterConfig::default();

        assert!(base.clone().with_similarity_threshold(1.5).validate(1).is_err());
        assert!(base.clone().with_similarity_threshold(-0.1).validate(1).is_err());
        assert!(base.clone().with_min_segment_size(0).validate(1).is_err());
        assert!(base.clone().with_block_overlap_percent(60).validate(1).is_err());
    }

    #[test]
    fn test_baatz_validation() {
        let baatz = SegmenterConfig::default()
            .with_bands(vec![0, 1])
            .with_strategy(StrategyKind::Baatz);

        assert!(baatz.validate(2).is_ok());
        assert_eq!(baatz.band_weights_or_default(), vec![1.0, 1.0]);
        assert!(baatz
            .clone()
            .with_baatz_weights(vec![1.0], 0.5, 0.5)
            .validate(2)
            .is_err());
        assert!(baatz
            .clone()
            .with_baatz_weights(vec![0.0, 0.0], 0.5, 0.5)
            .validate(2)
            .is_err());
        assert!(baatz
            .clone()
            .with_baatz_weights(vec![], 1.5, 0.5)
            .validate(2)
            .is_err());
        assert!(baatz
            .with_baatz_weights(vec![3.0, 1.0], 0.2, 0.8)
            .validate(2)
            .is_ok());
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let config = SegmenterConfig::from_json(
            r#"{"bands_to_use": [0, 1], "strategy": "Baatz", "min_segment_size": 20}"#,
        )
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::Baatz);
        assert_eq!(config.min_segment_size, 20);
        assert_eq!(config.similarity_threshold, 0.03);

        let json = config.to_json().unwrap();
        let parsed = SegmenterConfig::from_json(&json).unwrap();
        assert_eq!(parsed.bands_to_use, vec![0, 1]);

        assert!(SegmenterConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_effective_threads() {
        let single = SegmenterConfig::default().with_threads(false, 8);
        assert_eq!(single.effective_threads(), 1);

        let fixed = SegmenterConfig::default().with_threads(true, 3);
        assert_eq!(fixed.effective_threads(), 3);

        assert!(SegmenterConfig::default().effective_threads() >= 1);
    }
}
