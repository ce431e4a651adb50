//! Spots: fixed regions of interest with per-frame measurement series.

use crate::mask::MaskKey;
use serde::{Deserialize, Serialize};

/// Identifier of a spot region within an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpotId(pub u32);

/// Setup-layer description of a spot: its region outline and owning cage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotDescriptor {
    pub id: SpotId,
    pub cage_id: u32,
    /// Region name, part of the mask cache key.
    pub name: String,
    /// Pixel coordinates belonging to the region, in scan order.
    pub points: Vec<(u32, u32)>,
}

impl SpotDescriptor {
    pub fn mask_key(&self) -> MaskKey {
        MaskKey::new(self.id, self.name.clone())
    }
}

/// A spot with its accumulated time series.
///
/// Series are pre-sized to the run's frame count at creation and written in
/// place, one index per frame; they are never resized while a run is active.
/// `sum_series` entries start at NaN so "never measured" stays distinguishable
/// from "measured as zero".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spot {
    pub id: SpotId,
    pub cage_id: u32,
    pub name: String,
    /// Mean over-threshold area value per frame (NaN until measured).
    pub sum_series: Vec<f64>,
    /// Smoothed copy of `sum_series`, produced by a downstream pass.
    pub sum_clean_series: Vec<f64>,
    /// Count of mask points classified as occluded, per frame.
    pub fly_present_series: Vec<u32>,
}

impl Spot {
    /// Create a spot with series sized to `total_frames`.
    pub fn new(descriptor: &SpotDescriptor, total_frames: usize) -> Self {
        Self {
            id: descriptor.id,
            cage_id: descriptor.cage_id,
            name: descriptor.name.clone(),
            sum_series: vec![f64::NAN; total_frames],
            sum_clean_series: vec![f64::NAN; total_frames],
            fly_present_series: vec![0; total_frames],
        }
    }

    pub fn mask_key(&self) -> MaskKey {
        MaskKey::new(self.id, self.name.clone())
    }

    /// Frame capacity of the series.
    pub fn total_frames(&self) -> usize {
        debug_assert_eq!(self.sum_series.len(), self.fly_present_series.len());
        debug_assert_eq!(self.sum_series.len(), self.sum_clean_series.len());
        self.sum_series.len()
    }

    /// Whether a frame index has ever been measured.
    pub fn is_measured(&self, index: usize) -> bool {
        !self.sum_series[index].is_nan() || self.fly_present_series[index] > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SpotDescriptor {
        SpotDescriptor {
            id: SpotId(3),
            cage_id: 1,
            name: "cage1_spot3".into(),
            points: vec![(0, 0), (1, 0)],
        }
    }

    #[test]
    fn test_series_presized_with_defaults() {
        let spot = Spot::new(&descriptor(), 5);
        assert_eq!(spot.total_frames(), 5);
        assert!(spot.sum_series.iter().all(|v| v.is_nan()));
        assert!(spot.fly_present_series.iter().all(|&v| v == 0));
        assert!(!spot.is_measured(2));
    }

    #[test]
    fn test_mask_key_stability() {
        let desc = descriptor();
        let spot = Spot::new(&desc, 1);
        assert_eq!(desc.mask_key(), spot.mask_key());
    }
}
