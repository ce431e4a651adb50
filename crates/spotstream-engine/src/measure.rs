//! Per-spot threshold aggregation and presence classification.
//!
//! For one frame the engine receives the two scalar planes the transforms
//! produced, walks each spot's cached mask, and writes the derived scalars
//! into the spot's series at the frame's time index.

use crate::pool::PlaneCursor;
use spotstream_core::{CompressedMask, Plane, Spot, ThresholdConfig};

/// Aggregates for one (frame, spot) pair. Computed fresh every time; only
/// the derived scalars persist in the spot's series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeasurementResult {
    pub points_in_mask: u32,
    pub points_over_threshold: u32,
    pub sum_over_threshold: f64,
    pub points_fly_absent_over_threshold: u32,
    pub sum_over_threshold_no_fly: f64,
    pub points_fly_present: u32,
    pub points_fly_absent: u32,
}

/// Strict `>` against the threshold, with the comparison direction flipped
/// when the threshold is a lower bound. A value exactly at the threshold is
/// never classified as over.
#[inline]
fn over_threshold(value: f64, threshold: f64, is_upper: bool) -> bool {
    (value > threshold) == is_upper
}

/// Measures one frame's planes against spot masks.
#[derive(Debug, Clone)]
pub struct MeasurementEngine {
    thresholds: ThresholdConfig,
}

impl MeasurementEngine {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Aggregate the mask's pixels over the area and presence planes.
    ///
    /// Mask coordinates outside the plane are skipped, not an error: masks
    /// may reference coordinates from a slightly different image size after
    /// registration. An empty mask yields an all-zero result.
    pub fn measure(
        &self,
        area: &Plane,
        presence: &Plane,
        mask: &CompressedMask,
        cursor: &mut PlaneCursor,
    ) -> MeasurementResult {
        let mut result = MeasurementResult::default();
        if mask.is_empty() {
            return result;
        }

        cursor.bind(area);
        let area_samples = area.data();
        let presence_samples = presence.data();

        for (x, y) in mask.points().iter() {
            let Some(area_value) = cursor.value(area_samples, x, y) else {
                continue;
            };
            let presence_value = match cursor.value(presence_samples, x, y) {
                Some(v) => f64::from(v),
                None => continue,
            };
            let area_value = f64::from(area_value);

            result.points_in_mask += 1;

            let fly_present = over_threshold(
                presence_value,
                self.thresholds.fly_threshold,
                self.thresholds.fly_threshold_is_upper,
            );
            if fly_present {
                result.points_fly_present += 1;
            } else {
                result.points_fly_absent += 1;
            }

            let over = over_threshold(
                area_value,
                self.thresholds.spot_threshold,
                self.thresholds.spot_threshold_is_upper,
            );
            if over {
                result.points_over_threshold += 1;
                result.sum_over_threshold += area_value;
                if !fly_present {
                    result.points_fly_absent_over_threshold += 1;
                    result.sum_over_threshold_no_fly += area_value;
                }
            }
        }
        result
    }

    /// Write the derived scalars into the spot's series at `index`.
    ///
    /// `fly_present_series` stores the occluded-point count, preserving the
    /// magnitude of partial-mask presence. When no point was over threshold
    /// the sum entry keeps its previous value, so "never measured" stays
    /// distinguishable from "measured as zero". The no-fly corrected mean
    /// deliberately supersedes the raw mean whenever any occlusion was
    /// detected and its denominator is non-zero.
    pub fn apply(result: &MeasurementResult, spot: &mut Spot, index: usize) {
        if result.points_in_mask == 0 {
            return;
        }
        spot.fly_present_series[index] = result.points_fly_present;

        if result.points_over_threshold > 0 {
            spot.sum_series[index] =
                result.sum_over_threshold / f64::from(result.points_in_mask);
        }
        if result.points_fly_absent != result.points_in_mask
            && result.points_fly_absent_over_threshold > 0
        {
            spot.sum_series[index] = result.sum_over_threshold_no_fly
                / f64::from(result.points_fly_absent_over_threshold);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotstream_core::{SpotDescriptor, SpotId};

    fn plane(values: &[f32], width: u32) -> Plane {
        Plane::from_data(values.to_vec(), width, values.len() as u32 / width)
    }

    fn engine(spot_threshold: f64, fly_threshold: f64) -> MeasurementEngine {
        MeasurementEngine::new(ThresholdConfig {
            spot_threshold,
            spot_threshold_is_upper: true,
            fly_threshold,
            fly_threshold_is_upper: true,
            ..ThresholdConfig::default()
        })
    }

    fn spot(total_frames: usize) -> Spot {
        Spot::new(
            &SpotDescriptor {
                id: SpotId(1),
                cage_id: 0,
                name: "s".into(),
                points: vec![],
            },
            total_frames,
        )
    }

    #[test]
    fn test_threshold_boundary_is_strict() {
        let eng = engine(40.0, 1000.0);
        let mask = CompressedMask::encode(&[(0, 0), (1, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[40.0, 40.0001], 2);
        let presence = plane(&[0.0, 0.0], 2);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        // Exactly at the threshold is not over.
        assert_eq!(result.points_over_threshold, 1);
        assert!((result.sum_over_threshold - 40.0001).abs() < 1e-9);
    }

    #[test]
    fn test_lower_bound_flips_every_classification() {
        let mut thresholds = ThresholdConfig {
            spot_threshold: 40.0,
            spot_threshold_is_upper: true,
            fly_threshold: 1000.0,
            fly_threshold_is_upper: true,
            ..ThresholdConfig::default()
        };
        let mask = CompressedMask::encode(&[(0, 0), (1, 0), (2, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[10.0, 40.0, 70.0], 3);
        let presence = plane(&[0.0, 0.0, 0.0], 3);

        let upper = MeasurementEngine::new(thresholds.clone())
            .measure(&area, &presence, &mask, &mut cursor);
        thresholds.spot_threshold_is_upper = false;
        let lower = MeasurementEngine::new(thresholds)
            .measure(&area, &presence, &mask, &mut cursor);

        assert_eq!(upper.points_over_threshold, 1);
        assert_eq!(lower.points_over_threshold, 2);
        // Every point lands on exactly one side.
        assert_eq!(
            upper.points_over_threshold + lower.points_over_threshold,
            upper.points_in_mask
        );
    }

    #[test]
    fn test_out_of_bounds_mask_points_skipped() {
        let eng = engine(0.0, 1000.0);
        let mask = CompressedMask::encode(&[(0, 0), (50, 50)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[5.0, 5.0], 2);
        let presence = plane(&[0.0, 0.0], 2);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        assert_eq!(result.points_in_mask, 1);
    }

    #[test]
    fn test_empty_mask_leaves_series_untouched() {
        let eng = engine(0.0, 1000.0);
        let mask = CompressedMask::encode(&[]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[5.0], 1);
        let presence = plane(&[0.0], 1);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        let mut s = spot(1);
        MeasurementEngine::apply(&result, &mut s, 0);
        assert!(s.sum_series[0].is_nan());
        assert_eq!(s.fly_present_series[0], 0);
    }

    #[test]
    fn test_below_threshold_frame_keeps_default_entry() {
        // Every point below threshold: no mean is written.
        let eng = engine(40.0, 1000.0);
        let mask = CompressedMask::encode(&[(0, 0), (1, 0), (2, 0), (3, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[10.0, 10.0, 10.0, 10.0], 4);
        let presence = plane(&[0.0, 0.0, 0.0, 0.0], 4);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        assert_eq!(result.points_over_threshold, 0);
        let mut s = spot(1);
        MeasurementEngine::apply(&result, &mut s, 0);
        assert!(s.sum_series[0].is_nan());
    }

    #[test]
    fn test_mean_over_full_mask() {
        // Every point at 50 against threshold 40.
        let eng = engine(40.0, 1000.0);
        let mask = CompressedMask::encode(&[(0, 0), (1, 0), (2, 0), (3, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[50.0; 4], 4);
        let presence = plane(&[0.0; 4], 4);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        let mut s = spot(1);
        MeasurementEngine::apply(&result, &mut s, 0);
        assert!((s.sum_series[0] - 50.0).abs() < 1e-12);
        assert_eq!(s.fly_present_series[0], 0);
    }

    #[test]
    fn test_mean_divides_by_mask_size_not_over_count() {
        // One of four points is over threshold: the mean spreads its value
        // over the whole mask, not just the over-threshold points.
        let eng = engine(40.0, 1000.0);
        let mask = CompressedMask::encode(&[(0, 0), (1, 0), (2, 0), (3, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[0.0, 0.0, 0.0, 50.0], 4);
        let presence = plane(&[0.0; 4], 4);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        assert_eq!(result.points_in_mask, 4);
        assert_eq!(result.points_over_threshold, 1);

        let mut s = spot(1);
        MeasurementEngine::apply(&result, &mut s, 0);
        // 50 / 4, not 50 / 1.
        assert!((s.sum_series[0] - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_no_fly_corrected_sum_supersedes_raw() {
        // One of two mask points sits inside the fly region; the
        // corrected mean uses only the non-occluded point.
        let eng = engine(40.0, 90.0);
        let mask = CompressedMask::encode(&[(0, 0), (1, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[200.0, 60.0], 2);
        let presence = plane(&[255.0, 0.0], 2);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        assert_eq!(result.points_fly_present, 1);
        assert_eq!(result.points_fly_absent, 1);
        assert_eq!(result.points_fly_absent_over_threshold, 1);

        let mut s = spot(1);
        MeasurementEngine::apply(&result, &mut s, 0);
        assert_eq!(s.fly_present_series[0], 1);
        // 60 / 1, not (200 + 60) / 2.
        assert!((s.sum_series[0] - 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_fully_occluded_mask_keeps_raw_mean() {
        // Every point occluded: the corrected denominator is zero, so the
        // raw mean stands.
        let eng = engine(40.0, 90.0);
        let mask = CompressedMask::encode(&[(0, 0), (1, 0)]).unwrap();
        let mut cursor = PlaneCursor::new();
        let area = plane(&[100.0, 100.0], 2);
        let presence = plane(&[255.0, 255.0], 2);

        let result = eng.measure(&area, &presence, &mask, &mut cursor);
        let mut s = spot(1);
        MeasurementEngine::apply(&result, &mut s, 0);
        assert_eq!(s.fly_present_series[0], 2);
        assert!((s.sum_series[0] - 100.0).abs() < 1e-12);
    }
}
