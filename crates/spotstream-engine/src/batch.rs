//! Adaptive batch sizing driven by observed memory usage.

use spotstream_core::BatchConfig;
use tracing::debug;

/// Rough decoded-frame footprint used to seed the initial batch size.
const MEMORY_PER_FRAME_MB: u64 = 24;

/// State machine over `BatchConfig::current`.
///
/// Deterministic: the same sequence of `update` calls always yields the same
/// sizes. `min <= current <= max` holds after every mutation; the one
/// exception is [`initialize`](Self::initialize) when the whole run is
/// shorter than `min` frames, where the remaining-frame clamp wins.
#[derive(Debug, Clone)]
pub struct AdaptiveBatchSizer {
    config: BatchConfig,
}

impl AdaptiveBatchSizer {
    pub fn new(mut config: BatchConfig) -> Self {
        config.current = config.current.clamp(config.min, config.max);
        Self { config }
    }

    pub fn current(&self) -> usize {
        self.config.current
    }

    /// Seed the batch size from available memory, then cap it at the run
    /// length.
    pub fn initialize(&mut self, total_frames: usize, available_mb: u64) {
        let affordable = (available_mb / MEMORY_PER_FRAME_MB) as usize;
        self.config.current = affordable
            .clamp(self.config.min, self.config.max)
            .min(total_frames.max(1));
        debug!(
            available_mb,
            total_frames,
            batch = self.config.current,
            "initial batch size"
        );
    }

    /// Shrink above the shrink threshold, grow below the grow threshold,
    /// hold steady in between.
    pub fn update(&mut self, usage_percent: f64) {
        let before = self.config.current;
        if usage_percent > self.config.shrink_threshold_percent {
            self.config.current = self
                .config
                .current
                .saturating_sub(self.config.shrink_step)
                .max(self.config.min);
        } else if usage_percent < self.config.grow_threshold_percent {
            self.config.current = (self.config.current + self.config.grow_step).min(self.config.max);
        }
        if self.config.current != before {
            debug!(
                usage_percent,
                from = before,
                to = self.config.current,
                "batch size adapted"
            );
        }
        self.assert_bounds();
    }

    /// Unconditional shrink, used when an allocation failure is caught.
    pub fn force_shrink(&mut self) {
        let before = self.config.current;
        self.config.current = self
            .config
            .current
            .saturating_sub(self.config.shrink_step)
            .max(self.config.min);
        debug!(from = before, to = self.config.current, "forced shrink");
        self.assert_bounds();
    }

    fn assert_bounds(&self) {
        debug_assert!(self.config.current >= self.config.min);
        debug_assert!(self.config.current <= self.config.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> AdaptiveBatchSizer {
        AdaptiveBatchSizer::new(BatchConfig {
            current: 8,
            min: 2,
            max: 32,
            grow_step: 4,
            shrink_step: 8,
            grow_threshold_percent: 50.0,
            shrink_threshold_percent: 80.0,
        })
    }

    #[test]
    fn test_grow_shrink_hold() {
        let mut s = sizer();
        s.update(30.0);
        assert_eq!(s.current(), 12);
        s.update(65.0);
        assert_eq!(s.current(), 12);
        s.update(95.0);
        assert_eq!(s.current(), 4);
    }

    #[test]
    fn test_bounds_hold_for_any_sequence() {
        let mut s = sizer();
        let usages = [
            99.0, 99.0, 99.0, 99.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 85.0, 5.0,
            100.0, 0.0,
        ];
        for u in usages {
            s.update(u);
            assert!(s.current() >= 2 && s.current() <= 32);
        }
    }

    #[test]
    fn test_force_shrink_floors_at_min() {
        let mut s = sizer();
        for _ in 0..10 {
            s.force_shrink();
        }
        assert_eq!(s.current(), 2);
    }

    #[test]
    fn test_initialize_from_available_memory() {
        let mut s = sizer();
        // 240 MB / 24 MB per frame = 10 frames
        s.initialize(1000, 240);
        assert_eq!(s.current(), 10);
        // Clamped to the ceiling
        s.initialize(1000, 24_000);
        assert_eq!(s.current(), 32);
        // Capped at the run length, even below min
        s.initialize(1, 24_000);
        assert_eq!(s.current(), 1);
    }

    #[test]
    fn test_determinism() {
        let run = |usages: &[f64]| {
            let mut s = sizer();
            usages.iter().map(|&u| {
                s.update(u);
                s.current()
            }).collect::<Vec<_>>()
        };
        let seq = [20.0, 90.0, 55.0, 10.0, 85.0];
        assert_eq!(run(&seq), run(&seq));
    }
}
