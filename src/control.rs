//! Control WebSocket.
//!
//! Browsers and other frontends connect here to steer the scheduler and to
//! watch what the fixture shows.
//!
//! # Protocol
//!
//! All messages are JSON text frames tagged by `command`.
//!
//! Client → server:
//!
//! ```text
//! {"command":"setBrightness","value":128}       value may also be a string
//! {"command":"togglePower"}
//! {"command":"runAnimation","animationId":"rainbow"}
//! {"command":"listAnimations"}
//! ```
//!
//! Server → client:
//!
//! ```text
//! {"command":"updateFrame","enabled":..,"frame":[..],"width":..,"height":..,
//!  "brightness":..,"runtime":..,"outputType":".."}
//! {"command":"updateStatus","driverConnected":true}
//! {"command":"animations","animations":[{"id":..,"title":..}]}
//! {"command":"error","message":".."}
//! ```
//!
//! A client receives the current status and driver state right after
//! connecting, then again every time either changes. Status updates are
//! coalesced: a slow client skips intermediate frames instead of queueing
//! them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{SchedulerHandle, Status};
use crate::storage::{AnimationStore, AnimationSummary};
use crate::transport::ws::{self, WsMessage, WsWriter};

/// Brightness as sent by clients: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BrightnessValue {
    /// JSON number.
    Number(f64),
    /// Numeric string such as `"128"`.
    Text(String),
}

impl BrightnessValue {
    /// Integer value, truncated toward zero; `None` if not numeric.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(n.trunc() as i64),
            Self::Number(_) => None,
            Self::Text(text) => {
                let text = text.trim();
                text.parse::<i64>().ok().or_else(|| {
                    text.parse::<f64>()
                        .ok()
                        .filter(|n| n.is_finite())
                        .map(|n| n.trunc() as i64)
                })
            }
        }
    }
}

/// Message from a control client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Set brightness (clamped by the scheduler).
    SetBrightness {
        /// Requested level.
        value: BrightnessValue,
    },
    /// Toggle playback.
    TogglePower,
    /// Start a stored animation.
    #[serde(rename_all = "camelCase")]
    RunAnimation {
        /// Id of the stored definition.
        animation_id: String,
    },
    /// Ask for the stored animations.
    ListAnimations,
}

/// Message to a control client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Current status snapshot.
    UpdateFrame(Status),
    /// Whether the LED driver link is up.
    #[serde(rename_all = "camelCase")]
    UpdateStatus {
        /// Last lifecycle event was `Connected`.
        driver_connected: bool,
    },
    /// Stored animations.
    Animations {
        /// Id and title of each.
        animations: Vec<AnimationSummary>,
    },
    /// A command from this client failed.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl ServerMessage {
    fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    fn driver_status(driver_connected: bool) -> Self {
        Self::UpdateStatus { driver_connected }
    }
}

/// WebSocket front door to the scheduler.
#[derive(Debug, Clone)]
pub struct ControlServer {
    scheduler: SchedulerHandle,
    store: Arc<dyn AnimationStore>,
    status: watch::Receiver<Status>,
    driver: watch::Receiver<bool>,
}

impl ControlServer {
    /// Server forwarding commands to `scheduler` and streaming `status` and
    /// the `driver` link state.
    #[must_use]
    pub fn new(
        scheduler: SchedulerHandle,
        store: Arc<dyn AnimationStore>,
        status: watch::Receiver<Status>,
        driver: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            store,
            status,
            driver,
        }
    }

    /// Bind the listening socket.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control server on {addr}"))
    }

    /// Accept clients until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("[control] Listening on ws://{addr}");
        }
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    log::info!("[control] Shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.context("Control server accept failed")?;
                    let server = self.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.client(stream, peer, shutdown).await {
                            log::warn!("[control] Client {peer}: {e:#}");
                        }
                    });
                }
            }
        }
    }

    async fn client(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let (mut writer, mut reader) = ws::accept(stream).await?;
        log::info!("[control] Client {peer} connected");

        let mut status = self.status.clone();
        let initial = ServerMessage::UpdateFrame(status.borrow_and_update().clone());
        send(&mut writer, &initial).await?;

        let mut driver = self.driver.clone();
        let mut driver_open = true;
        let connected = *driver.borrow_and_update();
        send(&mut writer, &ServerMessage::driver_status(connected)).await?;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let update = ServerMessage::UpdateFrame(status.borrow_and_update().clone());
                    send(&mut writer, &update).await?;
                }
                changed = driver.changed(), if driver_open => {
                    if changed.is_err() {
                        driver_open = false;
                        continue;
                    }
                    let connected = *driver.borrow_and_update();
                    send(&mut writer, &ServerMessage::driver_status(connected)).await?;
                }
                incoming = reader.recv() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = self.handle_text(&text).await {
                            send(&mut writer, &reply).await?;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => writer.send_pong(data).await?,
                    Some(Ok(WsMessage::Binary(_))) => {
                        send(&mut writer, &ServerMessage::error("binary messages are not supported")).await?;
                    }
                    Some(Ok(WsMessage::Close { .. })) | None => break,
                    Some(Err(e)) => return Err(e),
                },
            }
        }

        let _ = writer.close().await;
        log::info!("[control] Client {peer} disconnected");
        Ok(())
    }

    /// Apply one client message; returns the reply, if any.
    pub async fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        let message: ControlMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[control] Invalid message: {e}");
                return Some(ServerMessage::error(format!("invalid command: {e}")));
            }
        };
        self.handle(message).await
    }

    /// Apply one parsed client message; returns the reply, if any.
    pub async fn handle(&self, message: ControlMessage) -> Option<ServerMessage> {
        match message {
            ControlMessage::SetBrightness { value } => {
                let Some(value) = value.as_i64() else {
                    return Some(ServerMessage::error("brightness must be a number"));
                };
                self.scheduler
                    .set_brightness(value)
                    .await
                    .err()
                    .map(ServerMessage::error)
            }
            ControlMessage::TogglePower => self
                .scheduler
                .toggle_power()
                .await
                .err()
                .map(ServerMessage::error),
            ControlMessage::RunAnimation { animation_id } => {
                let definition = match self.store.get(&animation_id) {
                    Ok(definition) => definition,
                    Err(e) => {
                        log::warn!("[control] Cannot start {animation_id}: {e}");
                        return Some(ServerMessage::error(e));
                    }
                };
                match self
                    .scheduler
                    .run_animation(definition.id, definition.code)
                    .await
                {
                    Ok(()) => {
                        log::info!("[control] Started animation {}", definition.title);
                        None
                    }
                    Err(e) => Some(ServerMessage::error(e)),
                }
            }
            ControlMessage::ListAnimations => Some(match self.store.list() {
                Ok(animations) => ServerMessage::Animations { animations },
                Err(e) => ServerMessage::error(e),
            }),
        }
    }
}

async fn send(writer: &mut WsWriter, message: &ServerMessage) -> Result<()> {
    let text = serde_json::to_string(message).context("Failed to encode control message")?;
    writer.send_text(&text).await
}
