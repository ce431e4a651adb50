//! Named per-pixel transforms that reduce a frame to one scalar plane.
//!
//! The measurement engine never touches frame channels directly; it consumes
//! the "area" and "presence" planes these transforms produce.

use crate::error::{Result, SpotError};
use crate::frame::{Frame, Plane};
use serde::{Deserialize, Serialize};

/// A transform from a multi-channel frame to a single scalar plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelTransform {
    /// Channel 0 (red for RGB frames).
    Red,
    /// Channel 1.
    Green,
    /// Channel 2.
    Blue,
    /// Mean of all channels.
    Gray,
    /// An explicit channel index.
    Channel(u8),
}

impl ChannelTransform {
    fn channel_index(self) -> Option<usize> {
        match self {
            Self::Red => Some(0),
            Self::Green => Some(1),
            Self::Blue => Some(2),
            Self::Channel(c) => Some(c as usize),
            Self::Gray => None,
        }
    }

    /// Fill `out` with the transformed samples of `frame`.
    ///
    /// The buffer is cleared first, so pooled buffers can be reused across
    /// frames. Growth goes through `try_reserve` so an allocation failure
    /// surfaces as [`SpotError::Allocation`] instead of aborting.
    pub fn fill(self, frame: &Frame, out: &mut Vec<f32>) -> Result<()> {
        let len = (frame.width as usize) * (frame.height as usize);
        out.clear();
        out.try_reserve(len)
            .map_err(|e| SpotError::Allocation(format!("transform plane of {len} samples: {e}")))?;

        match self.channel_index() {
            Some(c) => {
                let plane = frame.planes.get(c).ok_or_else(|| {
                    SpotError::Transform(format!(
                        "channel {c} requested but frame has {} channel(s)",
                        frame.channel_count()
                    ))
                })?;
                out.extend_from_slice(plane.data());
            }
            None => {
                if frame.planes.is_empty() {
                    return Err(SpotError::Transform("frame has no channels".into()));
                }
                let scale = 1.0 / frame.planes.len() as f32;
                out.extend(std::iter::repeat(0.0).take(len));
                for plane in &frame.planes {
                    for (acc, &v) in out.iter_mut().zip(plane.data()) {
                        *acc += v * scale;
                    }
                }
            }
        }
        Ok(())
    }

    /// Convenience wrapper producing an owned plane.
    pub fn apply(self, frame: &Frame) -> Result<Plane> {
        let mut buf = Vec::new();
        self.fill(frame, &mut buf)?;
        Ok(Plane::from_data(buf, frame.width, frame.height))
    }
}
