//! Status snapshots published by the scheduler.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::frame::OutputType;

/// What the fixture is showing right now.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Whether the tick loop is running.
    pub enabled: bool,
    /// Last frame, logical order.
    pub frame: Vec<u8>,
    /// Frame width in pixels (bars).
    pub width: usize,
    /// Frame height in pixels (LEDs per bar).
    pub height: usize,
    /// Current brightness.
    pub brightness: u8,
    /// Milliseconds since the current loop or animation started.
    pub runtime: u64,
    /// Kind of content playing.
    pub output_type: OutputType,
}

/// Receives a snapshot after every tick and state change.
pub trait StatusObserver {
    /// Called on the scheduler's thread; must not block.
    fn publish(&self, status: &Status);
}

impl StatusObserver for watch::Sender<Status> {
    fn publish(&self, status: &Status) {
        self.send_replace(status.clone());
    }
}
