//! The active frame source.
//!
//! A program is either a precomputed frame sequence played in a loop or a
//! procedural animation rendered by the sandbox. Replacing the program
//! discards the previous one entirely.

use tokio::time::Instant;

use crate::frame::Frame;

/// What the scheduler plays.
#[derive(Debug, Default)]
pub enum Program {
    /// Nothing loaded; ticks produce black.
    #[default]
    Empty,
    /// A decoded frame sequence.
    File {
        /// Frames in playback order, never empty.
        frames: Vec<Frame>,
        /// Index of the frame last played; `None` before the first tick.
        cursor: Option<usize>,
        /// Start of the current loop, for reported runtime.
        epoch: Instant,
    },
    /// A sandboxed animation; the compiled code lives in the scheduler's
    /// sandbox.
    Procedural {
        /// Id of the animation definition it was loaded from.
        animation_id: String,
    },
}

impl Program {
    /// Sequence program, or [`Program::Empty`] for no frames.
    #[must_use]
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        if frames.is_empty() {
            Self::Empty
        } else {
            Self::File {
                frames,
                cursor: None,
                epoch: Instant::now(),
            }
        }
    }

    /// Whether there is anything to play.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    /// Number of frames in a sequence program.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        match self {
            Self::File { frames, .. } => frames.len(),
            _ => 0,
        }
    }

    /// Advance a sequence program and return a copy of the new frame.
    ///
    /// The first call yields frame 0. Stepping past the last frame wraps to
    /// 0 and restarts the epoch. Returns `None` for other program kinds.
    pub fn advance(&mut self) -> Option<Frame> {
        let Self::File {
            frames,
            cursor,
            epoch,
        } = self
        else {
            return None;
        };

        let next = match *cursor {
            None => 0,
            Some(i) if i + 1 < frames.len() => i + 1,
            Some(_) => {
                *epoch = Instant::now();
                0
            }
        };
        *cursor = Some(next);
        frames.get(next).cloned()
    }

    /// Frame last played by a sequence program.
    #[must_use]
    pub fn current(&self) -> Option<&Frame> {
        match self {
            Self::File { frames, cursor, .. } => frames.get(cursor.unwrap_or(0)),
            _ => None,
        }
    }

    /// Playback position of a sequence program.
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        match self {
            Self::File { cursor, .. } => *cursor,
            _ => None,
        }
    }

    /// Time since the current loop of a sequence program started.
    #[must_use]
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        match self {
            Self::File { epoch, .. } => Some(epoch.elapsed()),
            _ => None,
        }
    }

    /// Animation id of a procedural program.
    #[must_use]
    pub fn animation_id(&self) -> Option<&str> {
        match self {
            Self::Procedural { animation_id } => Some(animation_id),
            _ => None,
        }
    }
}
