//! Streaming frame loading: index -> file path -> decoded frame.
//!
//! Two decode paths exist. The fast path reads binary PNM (P5/P6) straight
//! into channel planes with no intermediate image abstraction; anything it
//! cannot handle falls back to a generic decode through the `image` crate.
//! The loader never buffers more than the in-flight frame: the caller drops
//! each frame before requesting the next, so peak memory stays close to one
//! frame's footprint regardless of stack size.

use spotstream_core::{Frame, FrameFormat, PixelDepth, Plane};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single frame failed to load. Per-frame failures never abort a run.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("frame file {path} unreadable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("raw decode of {path} failed: {reason}")]
    Raw { path: PathBuf, reason: String },

    #[error("fallback decode of {path} failed: {reason}")]
    Fallback { path: PathBuf, reason: String },

    #[error("decoded frame {path} does not match the declared format")]
    FormatMismatch { path: PathBuf },

    #[error("allocation failure while decoding {path}")]
    Allocation { path: PathBuf },
}

impl LoadError {
    /// Allocation failures get a shrink-and-retry instead of a plain skip.
    pub fn is_allocation(&self) -> bool {
        match self {
            Self::Allocation { .. } => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::OutOfMemory,
            _ => false,
        }
    }
}

/// Resolves a frame index to a decoded frame.
///
/// `Send + Sync` so the parallel-batch mode can share one source across the
/// worker pool; implementations must not cache decoded frames.
pub trait FrameSource: Send + Sync {
    fn load(&self, index: usize) -> Result<Frame, LoadError>;
}

/// Frame source reading one file per frame index from disk.
pub struct FileFrameSource {
    format: FrameFormat,
    resolver: Box<dyn Fn(usize) -> PathBuf + Send + Sync>,
}

impl FileFrameSource {
    pub fn new(
        format: FrameFormat,
        resolver: impl Fn(usize) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        Self {
            format,
            resolver: Box::new(resolver),
        }
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    /// Direct PNM decode into channel planes.
    fn decode_raw(&self, index: usize, path: &Path) -> Result<Frame, LoadError> {
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let header = PnmHeader::parse(&bytes).ok_or_else(|| LoadError::Raw {
            path: path.to_path_buf(),
            reason: "not a binary PNM file".into(),
        })?;

        let depth = if header.max_value < 256 {
            PixelDepth::Bits8
        } else {
            PixelDepth::Bits16
        };
        let sample_bytes = if depth == PixelDepth::Bits8 { 1 } else { 2 };
        let pixels = header.width as usize * header.height as usize;
        let expected = pixels * header.channels as usize * sample_bytes;
        let data = &bytes[header.data_offset..];
        if data.len() < expected {
            return Err(LoadError::Raw {
                path: path.to_path_buf(),
                reason: format!("truncated payload: {} of {} bytes", data.len(), expected),
            });
        }

        let mut planes: Vec<Vec<f32>> = Vec::new();
        for _ in 0..header.channels {
            let mut plane = Vec::new();
            plane
                .try_reserve(pixels)
                .map_err(|_| LoadError::Allocation {
                    path: path.to_path_buf(),
                })?;
            planes.push(plane);
        }

        let stride = header.channels as usize * sample_bytes;
        for pixel in 0..pixels {
            let base = pixel * stride;
            for (c, plane) in planes.iter_mut().enumerate() {
                let at = base + c * sample_bytes;
                let value = if sample_bytes == 1 {
                    data[at] as f32
                } else {
                    u16::from_be_bytes([data[at], data[at + 1]]) as f32
                };
                plane.push(value);
            }
        }

        let frame = Frame {
            index,
            width: header.width,
            height: header.height,
            depth,
            planes: planes
                .into_iter()
                .map(|data| Plane::from_data(data, header.width, header.height))
                .collect(),
        };

        if !frame.matches(&self.format) {
            return Err(LoadError::FormatMismatch {
                path: path.to_path_buf(),
            });
        }
        Ok(frame)
    }

    /// Generic decode through the `image` crate.
    fn decode_fallback(&self, index: usize, path: &Path) -> Result<Frame, LoadError> {
        let img = image::open(path).map_err(|e| LoadError::Fallback {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (width, height) = (img.width(), img.height());

        let planes: Vec<Vec<f32>> = match (self.format.channels, self.format.depth) {
            (1, PixelDepth::Bits8) => {
                vec![img.to_luma8().into_raw().iter().map(|&v| v as f32).collect()]
            }
            (1, PixelDepth::Bits16) => {
                vec![img.to_luma16().into_raw().iter().map(|&v| v as f32).collect()]
            }
            (3, PixelDepth::Bits8) => deinterleave(
                &img.to_rgb8().into_raw().iter().map(|&v| v as f32).collect::<Vec<_>>(),
            ),
            (3, PixelDepth::Bits16) => deinterleave(
                &img.to_rgb16().into_raw().iter().map(|&v| v as f32).collect::<Vec<_>>(),
            ),
            (channels, _) => {
                return Err(LoadError::Fallback {
                    path: path.to_path_buf(),
                    reason: format!("unsupported declared channel count {channels}"),
                })
            }
        };

        let frame = Frame {
            index,
            width,
            height,
            depth: self.format.depth,
            planes: planes
                .into_iter()
                .map(|data| Plane::from_data(data, width, height))
                .collect(),
        };

        if !frame.has_pixels() || !frame.matches(&self.format) {
            return Err(LoadError::FormatMismatch {
                path: path.to_path_buf(),
            });
        }
        Ok(frame)
    }
}

impl FrameSource for FileFrameSource {
    fn load(&self, index: usize) -> Result<Frame, LoadError> {
        let path = (self.resolver)(index);
        match self.decode_raw(index, &path) {
            Ok(frame) if frame.has_pixels() => return Ok(frame),
            Ok(_) => {
                warn!(index, path = %path.display(), "raw decode produced an empty frame");
            }
            Err(e) if e.is_allocation() => return Err(e),
            Err(e) => {
                debug!(index, path = %path.display(), error = %e, "raw decode failed, falling back");
            }
        }
        self.decode_fallback(index, &path)
    }
}

/// Split interleaved RGB samples into three planes.
fn deinterleave(samples: &[f32]) -> Vec<Vec<f32>> {
    let pixels = samples.len() / 3;
    let mut planes = vec![Vec::with_capacity(pixels); 3];
    for chunk in samples.chunks_exact(3) {
        planes[0].push(chunk[0]);
        planes[1].push(chunk[1]);
        planes[2].push(chunk[2]);
    }
    planes
}

struct PnmHeader {
    channels: u8,
    width: u32,
    height: u32,
    max_value: u32,
    data_offset: usize,
}

impl PnmHeader {
    /// Parse a binary PNM header (P5 grayscale or P6 RGB). Comments and any
    /// whitespace between tokens are allowed; the payload starts one byte
    /// after the max value token.
    fn parse(bytes: &[u8]) -> Option<Self> {
        let channels = match bytes.get(0..2)? {
            b"P5" => 1,
            b"P6" => 3,
            _ => return None,
        };
        let mut cursor = 2;
        let mut fields = [0u32; 3];
        for field in fields.iter_mut() {
            cursor = skip_separators(bytes, cursor)?;
            let start = cursor;
            while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
                cursor += 1;
            }
            if cursor == start {
                return None;
            }
            *field = std::str::from_utf8(&bytes[start..cursor]).ok()?.parse().ok()?;
        }
        let [width, height, max_value] = fields;
        if width == 0 || height == 0 || max_value == 0 || max_value > 65535 {
            return None;
        }
        // Exactly one whitespace byte separates the header from the payload.
        if !bytes.get(cursor)?.is_ascii_whitespace() {
            return None;
        }
        Some(Self {
            channels,
            width,
            height,
            max_value,
            data_offset: cursor + 1,
        })
    }
}

/// Advance past whitespace and `#` comments.
fn skip_separators(bytes: &[u8], mut cursor: usize) -> Option<usize> {
    loop {
        match bytes.get(cursor)? {
            b'#' => {
                while *bytes.get(cursor)? != b'\n' {
                    cursor += 1;
                }
            }
            b if b.is_ascii_whitespace() => cursor += 1,
            _ => return Some(cursor),
        }
    }
}
