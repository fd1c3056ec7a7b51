//! Commands sent to the scheduler loop.
//!
//! The scheduler owns a Lua state and therefore lives on a single thread.
//! Everything else (control server, CLI) talks to it through
//! [`SchedulerHandle`], which queues [`SchedulerCommand`]s on an mpsc
//! channel. Commands that can fail carry a oneshot channel for the result.

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::frame::{Frame, OutputType};

/// Reply channel for fallible commands.
pub type Reply = oneshot::Sender<Result<()>>;

/// A request to the scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start playing the loaded program.
    Enable,
    /// Stop playing and turn the fixture off.
    Disable,
    /// Enable when disabled, disable when enabled.
    TogglePower,
    /// Set brightness; out-of-range values are clamped.
    SetBrightness(i64),
    /// Load animation code and start it.
    RunAnimation {
        /// Animation definition id.
        id: String,
        /// Lua source.
        code: String,
        /// Load result.
        reply: Reply,
    },
    /// Replace the program with a frame sequence and start it.
    LoadFrames {
        /// Frames in playback order.
        frames: Vec<Frame>,
        /// Content kind to report.
        output_type: OutputType,
        /// Validation result.
        reply: Reply,
    },
    /// Discard the current program.
    Clear,
}

/// Cloneable, `Send` handle for driving a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Wrap the sender half of the scheduler's command channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<SchedulerCommand>) -> Self {
        Self { tx }
    }

    async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|e| Error::Unavailable(format!("scheduler is not running ({e})")))
    }

    async fn request(&self, build: impl FnOnce(Reply) -> SchedulerCommand) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await
            .map_err(|e| Error::Unavailable(format!("scheduler stopped before replying ({e})")))?
    }

    /// Start playback.
    pub async fn enable(&self) -> Result<()> {
        self.send(SchedulerCommand::Enable).await
    }

    /// Stop playback.
    pub async fn disable(&self) -> Result<()> {
        self.send(SchedulerCommand::Disable).await
    }

    /// Flip power.
    pub async fn toggle_power(&self) -> Result<()> {
        self.send(SchedulerCommand::TogglePower).await
    }

    /// Set brightness (clamped to 0..=255).
    pub async fn set_brightness(&self, value: i64) -> Result<()> {
        self.send(SchedulerCommand::SetBrightness(value)).await
    }

    /// Load and start an animation, waiting for the load result.
    pub async fn run_animation(&self, id: impl Into<String>, code: impl Into<String>) -> Result<()> {
        let (id, code) = (id.into(), code.into());
        self.request(|reply| SchedulerCommand::RunAnimation { id, code, reply })
            .await
    }

    /// Play a frame sequence, waiting for validation.
    pub async fn load_frames(&self, frames: Vec<Frame>, output_type: OutputType) -> Result<()> {
        self.request(|reply| SchedulerCommand::LoadFrames {
            frames,
            output_type,
            reply,
        })
        .await
    }

    /// Discard the current program.
    pub async fn clear(&self) -> Result<()> {
        self.send(SchedulerCommand::Clear).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SchedulerHandle::new(tx);
        assert!(handle.toggle_power().await.is_err());
        assert!(handle.run_animation("a", "return 1").await.is_err());
    }

    #[tokio::test]
    async fn test_request_waits_for_reply() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SchedulerHandle::new(tx);

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(SchedulerCommand::RunAnimation { id, reply, .. }) => {
                    let _ = reply.send(Err(Error::Config(format!("bad {id}"))));
                }
                other => panic!("unexpected command: {other:?}"),
            }
        });

        let err = handle.run_animation("wave", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid animation: bad wave");
        responder.await.unwrap();
    }
}
