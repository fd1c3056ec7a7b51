//! Shared WebSocket plumbing.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. Both the driver socket transport (client side) and
//! the control server (server side) go through this module rather than
//! `tokio-tungstenite` directly.
//!
//! [`connect`] dials a `ws://` URL with a handshake deadline; [`accept`]
//! upgrades an inbound TCP connection. Either returns a
//! ([`WsWriter`], [`WsReader`]) pair ready for use in `tokio::select!` loops.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::MaybeTlsStream;

/// Concrete WebSocket stream type shared by both directions.
type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    async fn send(&mut self, message: tungstenite::Message, kind: &str) -> Result<()> {
        self.sink
            .send(message)
            .await
            .with_context(|| format!("Failed to send {kind} message"))
    }

    /// Send a text message (driver commands, control JSON).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(tungstenite::Message::Text(text.to_owned()), "text")
            .await
    }

    /// Send a binary message (wired frames).
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.send(tungstenite::Message::Binary(data), "binary").await
    }

    /// Answer a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.send(tungstenite::Message::Pong(data), "pong").await
    }

    /// Send a close frame and shut the sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .context("Failed to close WebSocket")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Pongs and raw frames are skipped.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_))) => {
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

fn split(ws_stream: WsStream) -> (WsWriter, WsReader) {
    let (sink, stream) = ws_stream.split();
    (WsWriter { sink }, WsReader { stream })
}

/// Connect to a `ws://` URL, giving up after `timeout`.
///
/// # Errors
///
/// Returns an error if the URL is invalid, the handshake fails, or it does
/// not complete within `timeout`.
pub async fn connect(url: &str, timeout: Duration) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .with_context(|| format!("WebSocket connect timed out after {timeout:?}"))?
        .context("WebSocket connect failed")?;

    Ok(split(ws_stream))
}

/// Complete the server-side handshake on an accepted TCP connection.
///
/// # Errors
///
/// Returns an error if the peer does not speak WebSocket.
pub async fn accept(stream: TcpStream) -> Result<(WsWriter, WsReader)> {
    let ws_stream = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
        .await
        .context("WebSocket handshake failed")?;
    Ok(split(ws_stream))
}
