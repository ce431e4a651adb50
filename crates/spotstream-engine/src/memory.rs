//! System memory sampling and usage queries.
//!
//! A sample is computed on demand and never cached across calls; every read
//! reflects current state. The same sample feeds two consumers: the pause
//! gate in the orchestrator and the grow/shrink signal in the batch sizer.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const MB: u64 = 1024 * 1024;

/// A point-in-time reading of memory, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_mb: u64,
    pub free_mb: u64,
    pub total_mb: u64,
    /// Ceiling the run may grow into. Equals `total_mb` for the system probe.
    pub max_mb: u64,
}

impl MemorySample {
    /// Used fraction of the ceiling, as a percentage.
    pub fn usage_percent(&self) -> f64 {
        if self.max_mb == 0 {
            return 0.0;
        }
        self.used_mb as f64 / self.max_mb as f64 * 100.0
    }

    /// Headroom before the ceiling is reached.
    pub fn available_mb(&self) -> u64 {
        self.max_mb.saturating_sub(self.used_mb)
    }
}

/// Source of memory samples.
///
/// The engine only depends on this trait, so tests and embedding hosts can
/// substitute scripted or clamped probes.
pub trait MemoryProbe: Send {
    fn sample(&mut self) -> MemorySample;
}

/// Probe backed by `sysinfo`. Each call refreshes the OS memory counters.
pub struct SystemMemoryProbe {
    system: System,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&mut self) -> MemorySample {
        self.system.refresh_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        let total_mb = self.system.total_memory() / MB;
        let used_mb = self.system.used_memory() / MB;
        let free_mb = self.system.free_memory() / MB;
        MemorySample {
            used_mb,
            free_mb,
            total_mb,
            max_mb: total_mb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percent() {
        let sample = MemorySample {
            used_mb: 750,
            free_mb: 250,
            total_mb: 1000,
            max_mb: 1000,
        };
        assert!((sample.usage_percent() - 75.0).abs() < f64::EPSILON);
        assert_eq!(sample.available_mb(), 250);
    }

    #[test]
    fn test_zero_max_does_not_divide() {
        let sample = MemorySample {
            used_mb: 10,
            free_mb: 0,
            total_mb: 0,
            max_mb: 0,
        };
        assert_eq!(sample.usage_percent(), 0.0);
        assert_eq!(sample.available_mb(), 0);
    }

    #[test]
    fn test_system_probe_reports_something() {
        let mut probe = SystemMemoryProbe::new();
        let sample = probe.sample();
        assert!(sample.total_mb > 0);
        assert!(sample.used_mb <= sample.total_mb);
    }
}
