//! Byte-stream driver (serial port).
//!
//! Frames are written as `[` + wiring-ordered bytes + `]`, commands as the
//! ASCII text `{name:value}`. The link is opened by a connector closure so
//! the same write loop serves a real serial device and in-memory pipes.
//!
//! When a write fails the stream is dropped and reopened with exponential
//! backoff; frames produced meanwhile are discarded.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{
    command_text, emit, next_backoff, serial, wait_discarding, DriverEvent, DriverEventSender,
    OutgoingQueue, OutgoingReceiver, TransportDriver, TransportEndpoint, INITIAL_BACKOFF,
};
use crate::frame::Frame;
use crate::matrix::WiringLayout;

/// Frame start marker.
pub const FRAME_START: u8 = b'[';
/// Frame end marker.
pub const FRAME_END: u8 = b']';

/// Wrap wiring-ordered bytes in frame markers.
#[must_use]
pub fn frame_payload(wired: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(wired.len() + 2);
    payload.push(FRAME_START);
    payload.extend_from_slice(wired);
    payload.push(FRAME_END);
    payload
}

/// Driver writing to a byte stream.
#[derive(Debug)]
pub struct StreamDriver {
    endpoint: TransportEndpoint,
    layout: WiringLayout,
    queue: OutgoingQueue,
}

impl StreamDriver {
    /// Open the serial device at `path` and keep it open.
    #[must_use]
    pub fn spawn(path: PathBuf, baud: u32, layout: WiringLayout, events: DriverEventSender) -> Self {
        let endpoint = TransportEndpoint::Stream {
            path: path.clone(),
            baud,
        };
        let feedback = events.clone();
        Self::with_connector(endpoint, layout, events, move || {
            serial::open(path.clone(), baud, feedback.clone())
        })
    }

    /// Drive whatever writer `connect` produces, reconnecting on failure.
    #[must_use]
    pub fn with_connector<C, Fut, W>(
        endpoint: TransportEndpoint,
        layout: WiringLayout,
        events: DriverEventSender,
        connect: C,
    ) -> Self
    where
        C: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<W>> + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (queue, rx, cancel) = OutgoingQueue::new("stream");
        let label = endpoint.to_string();
        tokio::spawn(run(connect, rx, events, cancel, label));
        Self {
            endpoint,
            layout,
            queue,
        }
    }
}

impl TransportDriver for StreamDriver {
    fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    fn send_frame(&self, frame: &Frame) {
        let wired = self.layout.apply(frame.as_bytes());
        self.queue.push_frame(frame_payload(&wired));
    }

    fn send_command(&self, name: &str, value: &str) {
        self.queue.push_command(command_text(name, value));
    }
}

async fn run<C, Fut, W>(
    mut connect: C,
    mut rx: OutgoingReceiver,
    events: DriverEventSender,
    cancel: CancellationToken,
    label: String,
) where
    C: FnMut() -> Fut,
    Fut: Future<Output = io::Result<W>>,
    W: AsyncWrite + Unpin,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let attempt = tokio::select! {
            () = cancel.cancelled() => return,
            attempt = connect() => attempt,
        };

        match attempt {
            Ok(mut writer) => {
                log::info!("[stream] Connected to {label}");
                backoff = INITIAL_BACKOFF;
                emit(&events, DriverEvent::Connected);
                let stop = pump(&mut writer, &mut rx, &cancel, &events).await;
                emit(&events, DriverEvent::Disconnected);
                if stop {
                    log::debug!("[stream] Driver for {label} stopped");
                    return;
                }
                log::warn!("[stream] Lost {label}");
            }
            Err(e) => {
                log::warn!("[stream] Failed to open {label}: {e}");
                emit(&events, DriverEvent::problem(&e));
            }
        }

        let (wait, next) = next_backoff(backoff);
        backoff = next;
        log::info!("[stream] Reopening {label} in {wait:?}");
        if !wait_discarding(&mut rx, wait, &cancel).await {
            return;
        }
    }
}

/// Write queued messages until the link fails.
///
/// Returns `true` when the driver itself is shutting down.
async fn pump<W: AsyncWrite + Unpin>(
    writer: &mut W,
    rx: &mut OutgoingReceiver,
    cancel: &CancellationToken,
    events: &DriverEventSender,
) -> bool {
    loop {
        // Queued messages win over cancellation so a final command still
        // goes out on shutdown.
        let message = tokio::select! {
            biased;
            message = rx.recv() => message,
            () = cancel.cancelled() => return true,
        };
        let Some(message) = message else {
            return true;
        };

        let bytes = message.into_bytes();
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            log::warn!("[stream] Write failed: {e}");
            emit(events, DriverEvent::problem(&e));
            return false;
        }
    }
}
