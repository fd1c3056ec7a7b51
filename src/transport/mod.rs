//! Delivery of frames and commands to the LED driver hardware.
//!
//! # Architecture
//!
//! ```text
//! TransportDriver (trait)
//!     │
//!     ├── StreamDriver    - serial device, '[' frame ']' / '{' name:value '}'
//!     ├── DatagramDriver  - UDP, one packet per frame or command
//!     └── SocketDriver    - WebSocket client, binary frames / text commands
//! ```
//!
//! Every driver owns a background tokio task fed by an `OutgoingQueue`.
//! `send_frame` reorders the frame into wiring order and parks it in a
//! single slot without waiting; if the link has not taken the previous frame
//! yet, it is replaced, so a slow link skips frames but never lags behind.
//! Commands queue up separately and are written before the next frame.
//! Nothing is ever retried.
//!
//! Connection changes are reported as [`DriverEvent`]s on the channel passed
//! in at construction.

pub mod datagram;
mod serial;
pub mod socket;
pub mod stream;
pub mod ws;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::Frame;
use crate::matrix::WiringLayout;

pub use datagram::DatagramDriver;
pub use socket::SocketDriver;
pub use stream::StreamDriver;

/// Reconnection backoff for connection-oriented drivers.
pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Connection lifecycle notification from a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Link to the hardware is up.
    Connected,
    /// Link to the hardware went away.
    Disconnected,
    /// A transport-level error occurred; always [`Error::Transport`].
    Problem(Error),
    /// Bytes received from the hardware.
    Feedback(Vec<u8>),
}

impl DriverEvent {
    pub(crate) fn problem(message: impl std::fmt::Display) -> Self {
        Self::Problem(Error::Transport(message.to_string()))
    }
}

/// Sender half drivers report events on.
pub type DriverEventSender = mpsc::UnboundedSender<DriverEvent>;

/// Log driver events and mirror the link state into `connected`.
///
/// `Connected` sets the flag; `Disconnected` and `Problem` clear it.
/// Returns when every driver sender is gone.
pub async fn track_events(
    mut events: mpsc::UnboundedReceiver<DriverEvent>,
    connected: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        let up = match event {
            DriverEvent::Connected => {
                log::info!("[driver] Connected");
                true
            }
            DriverEvent::Disconnected => {
                log::warn!("[driver] Disconnected");
                false
            }
            DriverEvent::Problem(e) => {
                log::error!("[driver] {e}");
                false
            }
            DriverEvent::Feedback(bytes) => {
                log::info!("[driver] Feedback: {}", String::from_utf8_lossy(&bytes).trim_end());
                continue;
            }
        };
        connected.send_if_modified(|current| std::mem::replace(current, up) != up);
    }
}

/// Where and how to reach the driver hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportEndpoint {
    /// Serial device.
    Stream {
        /// Device path, e.g. `/dev/ttyUSB0`.
        path: PathBuf,
        /// Line speed.
        baud: u32,
    },
    /// UDP target.
    Datagram {
        /// Host name or address.
        ip: String,
        /// UDP port.
        port: u16,
    },
    /// WebSocket server on the driver.
    Socket {
        /// Host name or address.
        ip: String,
        /// TCP port.
        port: u16,
    },
}

impl std::fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream { path, baud } => write!(f, "serial {} @ {baud}", path.display()),
            Self::Datagram { ip, port } => write!(f, "udp://{ip}:{port}"),
            Self::Socket { ip, port } => write!(f, "ws://{ip}:{port}"),
        }
    }
}

/// Common contract of the three drivers.
///
/// Both send methods return immediately and never fail; problems are logged
/// and surfaced as [`DriverEvent`]s.
pub trait TransportDriver: std::fmt::Debug {
    /// Endpoint this driver talks to.
    fn endpoint(&self) -> &TransportEndpoint;

    /// Reorder `frame` into wiring order and transmit it.
    fn send_frame(&self, frame: &Frame);

    /// Transmit a `name:value` command.
    fn send_command(&self, name: &str, value: &str);
}

/// Start the driver for `endpoint`.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn spawn_driver(
    endpoint: &TransportEndpoint,
    layout: WiringLayout,
    events: DriverEventSender,
) -> Box<dyn TransportDriver + Send> {
    match endpoint {
        TransportEndpoint::Stream { path, baud } => {
            Box::new(StreamDriver::spawn(path.clone(), *baud, layout, events))
        }
        TransportEndpoint::Datagram { ip, port } => {
            Box::new(DatagramDriver::spawn(ip.clone(), *port, layout, events))
        }
        TransportEndpoint::Socket { ip, port } => {
            Box::new(SocketDriver::spawn(ip.clone(), *port, layout, events))
        }
    }
}

/// Text form of a command: `{name:value}`.
#[must_use]
pub fn command_text(name: &str, value: &str) -> String {
    format!("{{{name}:{value}}}")
}

/// A message taken off a driver queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    /// Wired frame bytes.
    Binary(Vec<u8>),
    /// Command text.
    Text(String),
}

impl Outgoing {
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Binary(data) => data,
            Self::Text(text) => text.into_bytes(),
        }
    }
}

/// Non-blocking handle to a driver's background task.
///
/// Commands go through an unbounded channel and are never dropped. Frames
/// share a single slot: a new frame replaces one the task has not picked up
/// yet, so a slow link always sends the newest frame.
///
/// Dropping the handle stops the task once the pending commands are
/// written, or right away if the link is down.
#[derive(Debug)]
pub(crate) struct OutgoingQueue {
    label: &'static str,
    commands: mpsc::UnboundedSender<String>,
    frames: watch::Sender<Vec<u8>>,
    cancel: CancellationToken,
}

/// Task side of an [`OutgoingQueue`].
#[derive(Debug)]
pub(crate) struct OutgoingReceiver {
    commands: mpsc::UnboundedReceiver<String>,
    frames: watch::Receiver<Vec<u8>>,
}

impl OutgoingQueue {
    pub(crate) fn new(label: &'static str) -> (Self, OutgoingReceiver, CancellationToken) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (frames, frames_rx) = watch::channel(Vec::new());
        let cancel = CancellationToken::new();
        (
            Self {
                label,
                commands,
                frames,
                cancel: cancel.clone(),
            },
            OutgoingReceiver {
                commands: commands_rx,
                frames: frames_rx,
            },
            cancel,
        )
    }

    /// Replace the pending frame.
    pub(crate) fn push_frame(&self, data: Vec<u8>) {
        if self.frames.is_closed() {
            log::debug!("[{}] Driver task stopped, dropping frame", self.label);
            return;
        }
        self.frames.send_replace(data);
    }

    /// Enqueue a command behind any already pending.
    pub(crate) fn push_command(&self, text: String) {
        if self.commands.send(text).is_err() {
            log::debug!("[{}] Driver task stopped, dropping command", self.label);
        }
    }
}

impl Drop for OutgoingQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl OutgoingReceiver {
    /// Next message to write: pending commands first, then the newest
    /// frame. Returns `None` once the queue handle is gone and every
    /// command has been handed out.
    ///
    /// Cancel safe.
    pub(crate) async fn recv(&mut self) -> Option<Outgoing> {
        tokio::select! {
            biased;
            command = self.commands.recv() => command.map(Outgoing::Text),
            changed = self.frames.changed() => match changed {
                Ok(()) => Some(Outgoing::Binary(self.frames.borrow_and_update().clone())),
                Err(_closed) => self.commands.recv().await.map(Outgoing::Text),
            },
        }
    }
}

/// Report an event; a closed receiver just means nobody is listening.
pub(crate) fn emit(events: &DriverEventSender, event: DriverEvent) {
    let _ = events.send(event);
}

/// Sleep for `wait` while discarding anything queued in the meantime.
///
/// Returns `false` if the driver should stop (cancelled or queue closed).
pub(crate) async fn wait_discarding(
    rx: &mut OutgoingReceiver,
    wait: Duration,
    cancel: &CancellationToken,
) -> bool {
    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = &mut sleep => return true,
            message = rx.recv() => {
                if message.is_none() {
                    return false;
                }
                // Disconnected: frames are not buffered for later.
            }
        }
    }
}

/// Next backoff step with up to one second of jitter.
pub(crate) fn next_backoff(current: Duration) -> (Duration, Duration) {
    let jitter = Duration::from_millis(rand::random::<u64>() % 1000);
    let next = (current * 2).min(MAX_BACKOFF);
    (current + jitter, next)
}
