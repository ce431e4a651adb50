//! Run configuration: thresholds, batch sizing bounds, and named presets.

use crate::error::{ConfigViolation, Result, SpotError};
use crate::transform::ChannelTransform;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Threshold and transform selection for one run. Immutable while the run is
/// active; supplied by the configuration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Area threshold; a sample counts only when strictly beyond it.
    pub spot_threshold: f64,
    /// When false, the comparison direction flips (below instead of above).
    pub spot_threshold_is_upper: bool,
    /// Presence threshold for the occluding object.
    pub fly_threshold: f64,
    pub fly_threshold_is_upper: bool,
    /// Transform producing the "area" plane.
    pub spot_transform: ChannelTransform,
    /// Transform producing the "presence" plane.
    pub fly_transform: ChannelTransform,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            spot_threshold: 40.0,
            spot_threshold_is_upper: true,
            fly_threshold: 90.0,
            fly_threshold_is_upper: true,
            spot_transform: ChannelTransform::Gray,
            fly_transform: ChannelTransform::Red,
        }
    }
}

impl ThresholdConfig {
    fn collect_violations(&self, out: &mut Vec<ConfigViolation>) {
        if self.spot_threshold < 0.0 {
            out.push(ConfigViolation::new(
                "thresholds.spot_threshold",
                "must not be negative",
            ));
        }
        if self.fly_threshold < 0.0 {
            out.push(ConfigViolation::new(
                "thresholds.fly_threshold",
                "must not be negative",
            ));
        }
    }
}

/// Bounds and control thresholds for adaptive batch sizing.
///
/// `current` is clamped to `[min, max]` at every update and additionally to
/// the remaining frame count by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub current: usize,
    pub min: usize,
    pub max: usize,
    pub grow_step: usize,
    pub shrink_step: usize,
    /// Below this usage percentage the batch grows.
    pub grow_threshold_percent: f64,
    /// Above this usage percentage the batch shrinks.
    pub shrink_threshold_percent: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl BatchConfig {
    /// Small batches and an early shrink point; favors the memory ceiling.
    pub fn conservative() -> Self {
        Self {
            current: 2,
            min: 1,
            max: 8,
            grow_step: 1,
            shrink_step: 2,
            grow_threshold_percent: 40.0,
            shrink_threshold_percent: 65.0,
        }
    }

    /// Default tradeoff.
    pub fn balanced() -> Self {
        Self {
            current: 8,
            min: 1,
            max: 64,
            grow_step: 4,
            shrink_step: 8,
            grow_threshold_percent: 55.0,
            shrink_threshold_percent: 80.0,
        }
    }

    /// Large batches, late shrink point; favors throughput.
    pub fn aggressive() -> Self {
        Self {
            current: 32,
            min: 4,
            max: 256,
            grow_step: 16,
            shrink_step: 32,
            grow_threshold_percent: 70.0,
            shrink_threshold_percent: 90.0,
        }
    }

    fn collect_violations(&self, out: &mut Vec<ConfigViolation>) {
        if self.min == 0 {
            out.push(ConfigViolation::new("batch.min", "must be at least 1"));
        }
        if self.max < self.min {
            out.push(ConfigViolation::new(
                "batch.max",
                format!("ceiling {} is below floor {}", self.max, self.min),
            ));
        }
        if self.grow_step == 0 {
            out.push(ConfigViolation::new("batch.grow_step", "must be at least 1"));
        }
        if self.shrink_step == 0 {
            out.push(ConfigViolation::new(
                "batch.shrink_step",
                "must be at least 1",
            ));
        }
        if !(0.0..=100.0).contains(&self.grow_threshold_percent)
            || !(0.0..=100.0).contains(&self.shrink_threshold_percent)
        {
            out.push(ConfigViolation::new(
                "batch.thresholds",
                "usage thresholds must lie in 0..=100",
            ));
        }
        if self.grow_threshold_percent >= self.shrink_threshold_percent {
            out.push(ConfigViolation::new(
                "batch.grow_threshold_percent",
                "must be below shrink_threshold_percent",
            ));
        }
    }
}

/// Scheduling model for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchedulingMode {
    /// One frame at a time, in increasing index order. Hard memory ceiling.
    #[default]
    Sequential,
    /// Frames of one batch run on a bounded worker pool; the orchestrator
    /// joins before advancing. Safe for small and medium stacks.
    ParallelBatch,
}

/// Full engine configuration, validated before any frame is processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    pub batch: BatchConfig,
    pub mode: SchedulingMode,
    /// Usage percentage above which the run pauses until pressure drops.
    pub critical_usage_percent: f64,
    /// Usage percentage at which a paused run resumes.
    pub resume_usage_percent: f64,
    /// Request a collection every this many batches; `None` disables it.
    pub collect_every_batches: Option<u32>,
    /// Initial sleep while paused; doubles on each re-sample, capped at 8x.
    pub pause_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl EngineConfig {
    /// Small buffers, small batch ceiling, aggressive forced collection.
    pub fn conservative() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            batch: BatchConfig::conservative(),
            mode: SchedulingMode::Sequential,
            critical_usage_percent: 85.0,
            resume_usage_percent: 70.0,
            collect_every_batches: Some(2),
            pause_backoff: Duration::from_millis(250),
        }
    }

    /// Defaults.
    pub fn balanced() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            batch: BatchConfig::balanced(),
            mode: SchedulingMode::Sequential,
            critical_usage_percent: 92.0,
            resume_usage_percent: 82.0,
            collect_every_batches: Some(10),
            pause_backoff: Duration::from_millis(100),
        }
    }

    /// Large buffers and batches, collection disabled.
    pub fn aggressive() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            batch: BatchConfig::aggressive(),
            mode: SchedulingMode::ParallelBatch,
            critical_usage_percent: 96.0,
            resume_usage_percent: 88.0,
            collect_every_batches: None,
            pause_backoff: Duration::from_millis(50),
        }
    }

    /// Check every rule and return the complete violation list, not just the
    /// first offender.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();
        self.thresholds.collect_violations(&mut violations);
        self.batch.collect_violations(&mut violations);

        if !(0.0..=100.0).contains(&self.critical_usage_percent) {
            violations.push(ConfigViolation::new(
                "critical_usage_percent",
                "must lie in 0..=100",
            ));
        }
        if self.resume_usage_percent >= self.critical_usage_percent {
            violations.push(ConfigViolation::new(
                "resume_usage_percent",
                "must be below critical_usage_percent",
            ));
        }
        if self.pause_backoff.is_zero() {
            violations.push(ConfigViolation::new("pause_backoff", "must be non-zero"));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SpotError::Config(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        EngineConfig::conservative().validate().unwrap();
        EngineConfig::balanced().validate().unwrap();
        EngineConfig::aggressive().validate().unwrap();
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let mut config = EngineConfig::balanced();
        config.batch.min = 16;
        config.batch.max = 4;
        config.thresholds.spot_threshold = -1.0;
        config.resume_usage_percent = 99.0;

        let err = config.validate().unwrap_err();
        match err {
            SpotError::Config(violations) => {
                let fields: Vec<_> = violations.iter().map(|v| v.field).collect();
                assert!(fields.contains(&"batch.max"));
                assert!(fields.contains(&"thresholds.spot_threshold"));
                assert!(fields.contains(&"resume_usage_percent"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_ceiling_below_floor_rejected() {
        let mut config = EngineConfig::balanced();
        config.batch.max = 0;
        assert!(config.validate().is_err());
    }
}
