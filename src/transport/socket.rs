//! WebSocket client driver.
//!
//! Connects to `ws://ip:port` on the LED controller. Frames go out as binary
//! messages, commands as text. Anything the controller sends back is
//! surfaced as feedback.
//!
//! # Reconnection
//!
//! Each connection attempt has a 4 second handshake deadline. After a
//! failure or disconnect the driver waits with exponential backoff plus
//! jitter (capped at ten seconds) and tries again. Messages produced while
//! the link is down are discarded, never replayed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ws::{self, WsMessage, WsReader, WsWriter};
use super::{
    command_text, emit, next_backoff, wait_discarding, DriverEvent, DriverEventSender, Outgoing,
    OutgoingQueue, OutgoingReceiver, TransportDriver, TransportEndpoint, INITIAL_BACKOFF,
};
use crate::frame::Frame;
use crate::matrix::WiringLayout;

/// Handshake deadline for each connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Driver speaking WebSocket to the controller.
#[derive(Debug)]
pub struct SocketDriver {
    endpoint: TransportEndpoint,
    layout: WiringLayout,
    queue: OutgoingQueue,
}

impl SocketDriver {
    /// Start connecting to `ws://ip:port`.
    #[must_use]
    pub fn spawn(ip: String, port: u16, layout: WiringLayout, events: DriverEventSender) -> Self {
        let (queue, rx, cancel) = OutgoingQueue::new("socket");
        let url = format!("ws://{ip}:{port}");
        tokio::spawn(run(url, rx, events, cancel));
        Self {
            endpoint: TransportEndpoint::Socket { ip, port },
            layout,
            queue,
        }
    }
}

impl TransportDriver for SocketDriver {
    fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    fn send_frame(&self, frame: &Frame) {
        self.queue.push_frame(self.layout.apply(frame.as_bytes()));
    }

    fn send_command(&self, name: &str, value: &str) {
        self.queue.push_command(command_text(name, value));
    }
}

async fn run(
    url: String,
    mut rx: OutgoingReceiver,
    events: DriverEventSender,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let attempt = tokio::select! {
            () = cancel.cancelled() => return,
            attempt = ws::connect(&url, CONNECT_TIMEOUT) => attempt,
        };

        match attempt {
            Ok((mut writer, mut reader)) => {
                log::info!("[socket] Connected to {url}");
                backoff = INITIAL_BACKOFF;
                emit(&events, DriverEvent::Connected);
                let stop = session(&mut writer, &mut reader, &mut rx, &cancel, &events).await;
                emit(&events, DriverEvent::Disconnected);
                if stop {
                    let _ = writer.close().await;
                    log::debug!("[socket] Driver for {url} stopped");
                    return;
                }
                log::warn!("[socket] Disconnected from {url}");
            }
            Err(e) => {
                log::warn!("[socket] Failed to connect to {url}: {e:#}");
                emit(&events, DriverEvent::problem(format!("{e:#}")));
            }
        }

        let (wait, next) = next_backoff(backoff);
        backoff = next;
        log::info!("[socket] Reconnecting in {}ms", wait.as_millis());
        if !wait_discarding(&mut rx, wait, &cancel).await {
            return;
        }
    }
}

/// Pump one connection until it drops.
///
/// Returns `true` when the driver itself is shutting down.
async fn session(
    writer: &mut WsWriter,
    reader: &mut WsReader,
    rx: &mut OutgoingReceiver,
    cancel: &CancellationToken,
    events: &DriverEventSender,
) -> bool {
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => {
                let sent = match message {
                    None => return true,
                    Some(Outgoing::Binary(data)) => writer.send_binary(data).await,
                    Some(Outgoing::Text(text)) => writer.send_text(&text).await,
                };
                if let Err(e) = sent {
                    log::warn!("[socket] {e:#}");
                    emit(events, DriverEvent::problem(format!("{e:#}")));
                    return false;
                }
            }
            incoming = reader.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        emit(events, DriverEvent::Feedback(text.into_bytes()));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        emit(events, DriverEvent::Feedback(data));
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if writer.send_pong(data).await.is_err() {
                            return false;
                        }
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[socket] Closed by controller ({code}) {reason}");
                        return false;
                    }
                    Some(Err(e)) => {
                        log::warn!("[socket] {e:#}");
                        emit(events, DriverEvent::problem(format!("{e:#}")));
                        return false;
                    }
                    None => return false,
                }
            }
            () = cancel.cancelled() => return true,
        }
    }
}
