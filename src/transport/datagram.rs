//! UDP driver.
//!
//! One datagram per message: frames as raw wiring-ordered bytes, commands as
//! the text `{name:value}`. UDP has no connection, so `Connected` means the
//! target resolved and a local socket is bound. A failed send is reported as
//! a problem followed by `Disconnected`, and the socket is rebound after a
//! backoff.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::{
    command_text, emit, next_backoff, wait_discarding, DriverEvent, DriverEventSender,
    OutgoingQueue, OutgoingReceiver, TransportDriver, TransportEndpoint, INITIAL_BACKOFF,
};
use crate::frame::Frame;
use crate::matrix::WiringLayout;

/// Driver sending UDP datagrams.
#[derive(Debug)]
pub struct DatagramDriver {
    endpoint: TransportEndpoint,
    layout: WiringLayout,
    queue: OutgoingQueue,
}

impl DatagramDriver {
    /// Start sending to `ip:port`.
    #[must_use]
    pub fn spawn(ip: String, port: u16, layout: WiringLayout, events: DriverEventSender) -> Self {
        let (queue, rx, cancel) = OutgoingQueue::new("datagram");
        let target = format!("{ip}:{port}");
        tokio::spawn(run(target, rx, events, cancel));
        Self {
            endpoint: TransportEndpoint::Datagram { ip, port },
            layout,
            queue,
        }
    }
}

impl TransportDriver for DatagramDriver {
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

/// Resolve `target` and bind a matching local socket.
async fn open(target: &str) -> std::io::Result<(UdpSocket, SocketAddr)> {
    let addr = tokio::net::lookup_host(target).await?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {target}"),
        )
    })?;
    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    Ok((socket, addr))
}

async fn run(
    target: String,
    mut rx: OutgoingReceiver,
    events: DriverEventSender,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match open(&target).await {
            Ok((socket, addr)) => {
                log::info!("[datagram] Sending to {addr}");
                backoff = INITIAL_BACKOFF;
                emit(&events, DriverEvent::Connected);
                let stop = send_loop(&socket, addr, &mut rx, &cancel, &events).await;
                emit(&events, DriverEvent::Disconnected);
                if stop {
                    return;
                }
            }
            Err(e) => {
                log::warn!("[datagram] Cannot reach {target}: {e}");
                emit(&events, DriverEvent::problem(&e));
            }
        }

        let (wait, next) = next_backoff(backoff);
        backoff = next;
        if !wait_discarding(&mut rx, wait, &cancel).await {
            return;
        }
    }
}

/// Returns `true` when the driver is shutting down, `false` after an error.
async fn send_loop(
    socket: &UdpSocket,
    addr: SocketAddr,
    rx: &mut OutgoingReceiver,
    cancel: &CancellationToken,
    events: &DriverEventSender,
) -> bool {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => {
                let Some(message) = message else {
                    return true;
                };
                if let Err(e) = socket.send_to(&message.into_bytes(), addr).await {
                    log::warn!("[datagram] Send to {addr} failed: {e}");
                    emit(events, DriverEvent::problem(&e));
                    return false;
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((n, from)) if from == addr => {
                        emit(events, DriverEvent::Feedback(buf[..n].to_vec()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // ICMP port unreachable surfaces here on some platforms.
                        log::debug!("[datagram] Receive error: {e}");
                    }
                }
            }
            () = cancel.cancelled() => return true,
        }
    }
}
