//! Spotstream Core - Foundation types for the streaming measurement engine
//!
//! This crate provides the fundamental types used throughout spotstream:
//! - Frames, channel planes, and pixel transforms
//! - Run-length compressed region masks and the mask cache
//! - Spots and their per-frame measurement series
//! - Threshold, batch, and engine configuration with structured validation

pub mod config;
pub mod error;
pub mod frame;
pub mod mask;
pub mod spot;
pub mod transform;

pub use config::{BatchConfig, EngineConfig, SchedulingMode, ThresholdConfig};
pub use error::{ConfigViolation, Result, SpotError};
pub use frame::{Frame, FrameFormat, PixelDepth, Plane};
pub use mask::{CompressedMask, MaskCache, MaskKey, MaskPoints};
pub use spot::{Spot, SpotDescriptor, SpotId};
pub use transform::ChannelTransform;
