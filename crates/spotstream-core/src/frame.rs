//! Frame and plane types for decoded video frames.
//!
//! Frames are transient: the loader materializes one, the measurement engine
//! consumes it, and it is dropped before the next frame is requested.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Sample bit depth declared by the experiment format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelDepth {
    #[default]
    Bits8,
    Bits16,
}

impl PixelDepth {
    /// Largest representable sample value.
    pub fn max_value(self) -> f32 {
        match self {
            Self::Bits8 => 255.0,
            Self::Bits16 => 65535.0,
        }
    }
}

/// Declared decode format for an experiment's frame files.
///
/// Both decode paths must return frames matching this; a mismatch on the fast
/// path triggers the fallback, a mismatch on the fallback fails the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub depth: PixelDepth,
}

impl FrameFormat {
    /// Grayscale 8-bit format.
    pub fn gray8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 1,
            depth: PixelDepth::Bits8,
        }
    }

    /// RGB 8-bit format.
    pub fn rgb8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 3,
            depth: PixelDepth::Bits8,
        }
    }
}

/// One channel plane of scalar samples in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

impl Plane {
    /// Create a zero-filled plane.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0.0; (width as usize) * (height as usize)],
            width,
            height,
        }
    }

    /// Wrap an existing sample buffer. The buffer length must be
    /// `width * height`.
    pub fn from_data(data: Vec<f32>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize));
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw samples, row-major.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Bounds-checked sample read.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x < self.width && y < self.height {
            Some(self.data[(y as usize) * (self.width as usize) + x as usize])
        } else {
            None
        }
    }

    /// Recover the sample buffer, e.g. to return it to a pool.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// A decoded frame: per-channel planes plus the source frame index.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub depth: PixelDepth,
    /// One plane per channel (1 for grayscale, 3 for RGB).
    pub planes: SmallVec<[Plane; 3]>,
}

impl Frame {
    /// Create a frame with zero-filled planes.
    pub fn new(index: usize, width: u32, height: u32, depth: PixelDepth, channels: u8) -> Self {
        let planes = (0..channels).map(|_| Plane::new(width, height)).collect();
        Self {
            index,
            width,
            height,
            depth,
            planes,
        }
    }

    pub fn channel_count(&self) -> u8 {
        self.planes.len() as u8
    }

    /// A frame with no pixel data is structurally invalid and treated as a
    /// decode failure by the loader.
    pub fn has_pixels(&self) -> bool {
        !self.planes.is_empty()
            && self.planes.iter().all(|p| {
                p.data().len() == (self.width as usize) * (self.height as usize)
                    && !p.data().is_empty()
            })
    }

    /// Whether this frame matches a declared format.
    pub fn matches(&self, format: &FrameFormat) -> bool {
        self.width == format.width
            && self.height == format.height
            && self.channel_count() == format.channels
            && self.depth == format.depth
    }

    /// Total sample memory held by this frame, in bytes.
    pub fn memory_size(&self) -> usize {
        self.planes
            .iter()
            .map(|p| p.data().len() * std::mem::size_of::<f32>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_bounds() {
        let plane = Plane::new(4, 3);
        assert_eq!(plane.get(3, 2), Some(0.0));
        assert_eq!(plane.get(4, 2), None);
        assert_eq!(plane.get(3, 3), None);
    }

    #[test]
    fn test_frame_structural_validity() {
        let frame = Frame::new(0, 8, 8, PixelDepth::Bits8, 3);
        assert!(frame.has_pixels());
        assert_eq!(frame.channel_count(), 3);

        let empty = Frame {
            index: 0,
            width: 8,
            height: 8,
            depth: PixelDepth::Bits8,
            planes: SmallVec::new(),
        };
        assert!(!empty.has_pixels());
    }

    #[test]
    fn test_frame_format_match() {
        let frame = Frame::new(0, 16, 9, PixelDepth::Bits8, 1);
        assert!(frame.matches(&FrameFormat::gray8(16, 9)));
        assert!(!frame.matches(&FrameFormat::rgb8(16, 9)));
        assert!(!frame.matches(&FrameFormat::gray8(16, 10)));
    }

    #[test]
    fn test_memory_size() {
        let frame = Frame::new(0, 10, 10, PixelDepth::Bits8, 3);
        assert_eq!(frame.memory_size(), 10 * 10 * 3 * 4);
    }
}
