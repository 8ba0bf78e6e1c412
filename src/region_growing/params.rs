//! Parameters of a single region-growing run.

use serde::{Deserialize, Serialize};

use crate::segmenter::config::SegmenterConfig;

/// Tuning knobs of [`RegionGrowingEngine`](super::RegionGrowingEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// Final (ceiling) merge threshold.
    pub similarity_threshold: f64,

    /// Number of intermediate thresholds tried before the ceiling.
    pub similarity_increase_steps: u32,

    /// Segments smaller than this are merged into their best neighbor after
    /// growth converges.
    pub min_segment_size: usize,

    /// Only merge pairs that are each other's best neighbor.
    pub enable_mutual_best_fit: bool,

    /// Allow a segment to merge again in the iteration it already merged in.
    pub enable_same_iteration_merges: bool,

    /// Hard cap on iterations; must stay below the retired-segment marker.
    pub max_iterations: u16,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.03,
            similarity_increase_steps: 2,
            min_segment_size: 100,
            enable_mutual_best_fit: false,
            enable_same_iteration_merges: false,
            max_iterations: u16::MAX - 1,
        }
    }
}

impl EngineParams {
    pub fn from_config(config: &SegmenterConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            similarity_increase_steps: config.similarity_increase_steps,
            min_segment_size: config.min_segment_size,
            enable_mutual_best_fit: config.enable_mutual_best_fit,
            enable_same_iteration_merges: config.enable_same_iteration_merges,
            ..Self::default()
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_similarity_increase_steps(mut self, steps: u32) -> Self {
        self.similarity_increase_steps = steps;
        self
    }

    pub fn with_min_segment_size(mut self, size: usize) -> Self {
        self.min_segment_size = size;
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

    pub fn with_max_iterations(mut self, iterations: u16) -> Self {
        self.max_iterations = iterations.min(u16::MAX - 1);
        self
    }

    /// Threshold used at escalation `level` (1-based).
    ///
    /// Levels climb in equal steps of `ceiling / (steps + 1)`; the last level
    /// is exactly the ceiling.
    pub fn threshold_at(&self, level: u32) -> f64 {
        let levels = self.escalation_levels();
        if level >= levels {
            self.similarity_threshold
        } else {
            self.similarity_threshold / levels as f64 * level as f64
        }
    }

    /// Number of distinct thresholds tried.
    pub fn escalation_levels(&self) -> u32 {
        self.similarity_increase_steps.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_escalation() {
        let params = EngineParams::default()
            .with_similarity_threshold(0.3)
            .with_similarity_increase_steps(2);

        assert_eq!(params.escalation_levels(), 3);
        assert!((params.threshold_at(1) - 0.1).abs() < 1e-12);
        assert!((params.threshold_at(2) - 0.2).abs() < 1e-12);
        assert_eq!(params.threshold_at(3), 0.3);
        assert_eq!(params.threshold_at(10), 0.3);
    }

    #[test]
    fn test_no_escalation_steps() {
        let params = EngineParams::default()
            .with_similarity_threshold(0.5)
            .with_similarity_increase_steps(0);

        assert_eq!(params.escalation_levels(), 1);
        assert_eq!(params.threshold_at(1), 0.5);
    }

    #[test]
    fn test_from_config() {
        let config = SegmenterConfig::default()
            .with_min_segment_size(7)
            .with_mutual_best_fit(true);
        let params = EngineParams::from_config(&config);

        assert_eq!(params.min_segment_size, 7);
        assert!(params.enable_mutual_best_fit);
        assert_eq!(params.similarity_threshold, config.similarity_threshold);
    }

    #[test]
    fn test_iteration_cap_stays_below_retired_marker() {
        let params = EngineParams::default().with_max_iterations(u16::MAX);
        assert_eq!(params.max_iterations, u16::MAX - 1);
    }
}
