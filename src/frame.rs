//! Frame buffers and fixture geometry.
//!
//! A [`Frame`] is one full picture for the fixture: `width * height` pixels,
//! row-major, three bytes (R, G, B) per pixel. Frames are values: each tick
//! builds a fresh one and hands it on, nothing keeps a reference across ticks.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bytes per pixel (R, G, B).
pub const CHANNELS: usize = 3;

/// Logical fixture dimensions.
///
/// `width` is the number of bars, `height` the number of LEDs per bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    /// Number of bars (columns).
    pub width: usize,
    /// LEDs per bar (rows).
    pub height: usize,
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            width: 21,
            height: 34,
        }
    }
}

impl FrameSize {
    /// Create a new size.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    #[must_use]
    pub fn pixel_count(self) -> usize {
        self.width * self.height
    }

    /// Length in bytes of a frame of this size.
    #[must_use]
    pub fn byte_len(self) -> usize {
        self.pixel_count() * CHANNELS
    }
}

/// One RGB frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("lit", &self.data.iter().any(|b| *b != 0))
            .finish()
    }
}

impl Frame {
    /// An all-zero (black) frame of the given size.
    #[must_use]
    pub fn black(size: FrameSize) -> Self {
        Self {
            data: vec![0; size.byte_len()],
        }
    }

    /// Wrap raw bytes, checking the length against `size`.
    pub fn from_bytes(size: FrameSize, data: Vec<u8>) -> Result<Self> {
        if data.len() != size.byte_len() {
            return Err(Error::Validation(format!(
                "frame has {} bytes, expected {} ({}x{}x{CHANNELS})",
                data.len(),
                size.byte_len(),
                size.width,
                size.height
            )));
        }
        Ok(Self { data })
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame holds no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether every byte is zero.
    #[must_use]
    pub fn is_black(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.data
    }
}

/// Kind of content currently playing, reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// A single still frame.
    #[default]
    Image,
    /// A decoded video.
    Video,
    /// A multi-frame animation or a procedural animation.
    Animation,
}

impl OutputType {
    /// Pick the output type for a decoded frame sequence.
    #[must_use]
    pub fn for_sequence(frame_count: usize, from_video: bool) -> Self {
        if frame_count <= 1 {
            Self::Image
        } else if from_video {
            Self::Video
        } else {
            Self::Animation
        }
    }
}

/// Split a raw byte stream of concatenated frames into frames.
///
/// Trailing bytes that do not fill a complete frame are rejected.
pub fn split_frames(size: FrameSize, raw: &[u8]) -> Result<Vec<Frame>> {
    let len = size.byte_len();
    if len == 0 {
        return Err(Error::Validation("frame size must be non-zero".into()));
    }
    if raw.len() % len != 0 {
        return Err(Error::Validation(format!(
            "{} bytes is not a whole number of {len}-byte frames",
            raw.len()
        )));
    }
    Ok(raw
        .chunks_exact(len)
        .map(|chunk| Frame {
            data: chunk.to_vec(),
        })
        .collect())
}
