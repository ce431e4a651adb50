//! Error types for spotstream.

use thiserror::Error;

/// A single configuration rule violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    /// Name of the offending field or input.
    pub field: &'static str,
    /// Human-readable description of the violation.
    pub message: String,
}

impl ConfigViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Main error type for spotstream operations.
#[derive(Error, Debug)]
pub enum SpotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame {index} could not be loaded: {reason}")]
    FrameLoad { index: usize, reason: String },

    #[error("mask coordinate ({x}, {y}) exceeds the 16-bit encoding range")]
    MaskCoordinateOutOfRange { x: u32, y: u32 },

    #[error("transform error: {0}")]
    Transform(String),

    #[error("allocation failure: {0}")]
    Allocation(String),

    #[error("invalid configuration: {} violation(s)", .0.len())]
    Config(Vec<ConfigViolation>),

    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for spotstream operations.
pub type Result<T> = std::result::Result<T, SpotError>;
