//! Run-length compressed region masks with lazy, memoized decompression.
//!
//! A mask stores the pixel coordinates of one spot region. Adjacent points
//! compress to a single run marker byte; everything else costs five bytes.
//! Decoding reconstructs the original point order exactly.

use crate::error::{Result, SpotError};
use crate::spot::SpotId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Next point continues the previous one by +1 in x, same y.
const MARKER_RUN_X: u8 = 0x01;
/// Next point continues the previous one by +1 in y, same x.
const MARKER_RUN_Y: u8 = 0x02;
/// Next point is encoded explicitly as big-endian 16-bit x then y.
const MARKER_POINT: u8 = 0x00;

/// Decompressed mask coordinates, parallel arrays in original point order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaskPoints {
    pub xs: Vec<u16>,
    pub ys: Vec<u16>,
}

impl MaskPoints {
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Iterate coordinate pairs in original order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }
}

/// A region's coordinate set in run-length compressed form.
///
/// Decompression happens at most once per instance; concurrent readers share
/// the memoized arrays.
#[derive(Debug)]
pub struct CompressedMask {
    encoded: Vec<u8>,
    point_count: usize,
    cache: OnceLock<MaskPoints>,
}

impl CompressedMask {
    /// Compress `points`, preserving their order.
    ///
    /// Coordinates above `u16::MAX` are an out-of-range error; an empty point
    /// list is a valid empty mask.
    pub fn encode(points: &[(u32, u32)]) -> Result<Self> {
        let mut encoded = Vec::with_capacity(points.len());
        let mut prev: Option<(u16, u16)> = None;

        for &(x, y) in points {
            if x > u16::MAX as u32 || y > u16::MAX as u32 {
                return Err(SpotError::MaskCoordinateOutOfRange { x, y });
            }
            let (x, y) = (x as u16, y as u16);
            match prev {
                Some((px, py)) if y == py && x == px.wrapping_add(1) => {
                    encoded.push(MARKER_RUN_X);
                }
                Some((px, py)) if x == px && y == py.wrapping_add(1) => {
                    encoded.push(MARKER_RUN_Y);
                }
                _ => {
                    encoded.push(MARKER_POINT);
                    encoded.extend_from_slice(&x.to_be_bytes());
                    encoded.extend_from_slice(&y.to_be_bytes());
                }
            }
            prev = Some((x, y));
        }

        Ok(Self {
            encoded,
            point_count: points.len(),
            cache: OnceLock::new(),
        })
    }

    /// Number of points in the original region.
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    /// Size of the compressed representation in bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Decompressed coordinates. The first call decodes; later calls return
    /// the same memoized arrays.
    pub fn points(&self) -> &MaskPoints {
        self.cache
            .get_or_init(|| Self::decode(&self.encoded, self.point_count))
    }

    fn decode(encoded: &[u8], point_count: usize) -> MaskPoints {
        let mut xs = Vec::with_capacity(point_count);
        let mut ys = Vec::with_capacity(point_count);
        let mut cursor = 0usize;
        let mut prev: Option<(u16, u16)> = None;

        while cursor < encoded.len() {
            let (x, y) = match encoded[cursor] {
                MARKER_RUN_X => {
                    cursor += 1;
                    let (px, py) = prev.unwrap_or((0, 0));
                    (px.wrapping_add(1), py)
                }
                MARKER_RUN_Y => {
                    cursor += 1;
                    let (px, py) = prev.unwrap_or((0, 0));
                    (px, py.wrapping_add(1))
                }
                _ => {
                    let x = u16::from_be_bytes([encoded[cursor + 1], encoded[cursor + 2]]);
                    let y = u16::from_be_bytes([encoded[cursor + 3], encoded[cursor + 4]]);
                    cursor += 5;
                    (x, y)
                }
            };
            xs.push(x);
            ys.push(y);
            prev = Some((x, y));
        }

        debug_assert_eq!(xs.len(), point_count);
        MaskPoints { xs, ys }
    }
}

/// Stable identity for a cached mask: the owning spot plus its region name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskKey {
    pub spot_id: SpotId,
    pub region: String,
}

impl MaskKey {
    pub fn new(spot_id: SpotId, region: impl Into<String>) -> Self {
        Self {
            spot_id,
            region: region.into(),
        }
    }
}

/// Keyed store of compressed masks, built once at setup and read-only while
/// frames are processed. Each logical region is compressed exactly once.
#[derive(Debug, Default)]
pub struct MaskCache {
    masks: HashMap<MaskKey, Arc<CompressedMask>>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress and store `points` under `key` unless already present.
    pub fn insert(&mut self, key: MaskKey, points: &[(u32, u32)]) -> Result<Arc<CompressedMask>> {
        if let Some(existing) = self.masks.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let mask = Arc::new(CompressedMask::encode(points)?);
        self.masks.insert(key, Arc::clone(&mask));
        Ok(mask)
    }

    pub fn get(&self, key: &MaskKey) -> Option<&Arc<CompressedMask>> {
        self.masks.get(key)
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(points: &[(u32, u32)]) -> Vec<(u16, u16)> {
        let mask = CompressedMask::encode(points).unwrap();
        mask.points().iter().collect()
    }

    #[test]
    fn test_horizontal_run_compresses_to_one_byte_each() {
        let points: Vec<(u32, u32)> = (0..10).map(|x| (x, 5)).collect();
        let mask = CompressedMask::encode(&points).unwrap();
        // 1 explicit point (5 bytes) + 9 run markers
        assert_eq!(mask.encoded_len(), 14);
        let decoded = mask.points();
        assert_eq!(decoded.len(), 10);
        assert_eq!(decoded.xs[9], 9);
        assert_eq!(decoded.ys[9], 5);
    }

    #[test]
    fn test_vertical_run() {
        let points: Vec<(u32, u32)> = (3..8).map(|y| (2, y)).collect();
        let decoded = roundtrip(&points);
        let expected: Vec<(u16, u16)> = points.iter().map(|&(x, y)| (x as u16, y as u16)).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_scattered_points_roundtrip_in_order() {
        let points = vec![(7, 1), (3, 9), (3, 10), (4, 10), (100, 100)];
        let decoded = roundtrip(&points);
        let expected: Vec<(u16, u16)> = points.iter().map(|&(x, y)| (x as u16, y as u16)).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_empty_mask_is_valid() {
        let mask = CompressedMask::encode(&[]).unwrap();
        assert!(mask.is_empty());
        assert!(mask.points().is_empty());
    }

    #[test]
    fn test_out_of_range_coordinate() {
        let err = CompressedMask::encode(&[(70_000, 2)]).unwrap_err();
        assert!(matches!(
            err,
            SpotError::MaskCoordinateOutOfRange { x: 70_000, y: 2 }
        ));
    }

    #[test]
    fn test_decode_is_idempotent_and_shared() {
        let points: Vec<(u32, u32)> = (0..4).map(|x| (x, 0)).collect();
        let mask = CompressedMask::encode(&points).unwrap();
        let first = mask.points() as *const MaskPoints;
        let second = mask.points() as *const MaskPoints;
        // Same memoized instance, decompression ran once.
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_compresses_each_region_once() {
        let mut cache = MaskCache::new();
        let key = MaskKey::new(SpotId(1), "spot_A1");
        let a = cache.insert(key.clone(), &[(1, 1), (2, 1)]).unwrap();
        let b = cache.insert(key.clone(), &[(9, 9)]).unwrap();
        // Second insert with the same key is ignored; the first mask wins.
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().point_count(), 2);
    }

    proptest! {
        #[test]
        fn prop_roundtrip_preserves_points_and_order(
            points in proptest::collection::vec((0u32..1024, 0u32..1024), 0..200)
        ) {
            let decoded = roundtrip(&points);
            let expected: Vec<(u16, u16)> =
                points.iter().map(|&(x, y)| (x as u16, y as u16)).collect();
            prop_assert_eq!(decoded, expected);
        }
    }
}
