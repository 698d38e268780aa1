//! Per-Player Connection
//!
//! Each connected player owns one WebSocket stream, presented to the rest
//! of the system as two unidirectional message streams: a read task that
//! forwards decoded frames to the hub, and a write task that drains a
//! bounded outbound queue to the wire.
//!
//! The read task is the single authoritative unregister trigger: whatever
//! ends the connection (transport error, keep-alive expiry, protocol
//! violation, clean close) funnels into one unregister event.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

use crate::core::id::ClientId;
use crate::hub::HubHandle;
use crate::network::protocol::{Envelope, ErrorPayload, MessageKind};

/// Outbound queue capacity, in frames. A full queue drops frames instead
/// of blocking the sender.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Deadline for a single write to the wire.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rolling read deadline; any inbound frame (including pongs) extends it.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Keep-alive ping interval. Must be below [`PONG_TIMEOUT`].
pub const PING_INTERVAL: Duration = Duration::from_secs(54);

/// Maximum accepted inbound frame size in bytes.
pub const MAX_FRAME_BYTES: usize = 4096;

/// An item on a connection's outbound queue.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A pre-encoded frame to write to the wire.
    Frame(String),
    /// Close the connection. Enqueued exactly once, by the hub, while it
    /// processes the player's unregister event.
    Shutdown,
}

/// The per-player sending surface.
///
/// This is all a game ever sees of a player: an id and a non-blocking
/// `send`. The hub owns everything else about the player.
#[derive(Clone, Debug)]
pub struct PlayerHandle {
    id: ClientId,
    outbound: mpsc::Sender<Outbound>,
}

impl PlayerHandle {
    /// Create a handle together with the receiving end of its outbound
    /// queue.
    pub(crate) fn channel(id: ClientId) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        (Self { id, outbound: tx }, rx)
    }

    #[cfg(test)]
    pub(crate) fn channel_with_capacity(
        id: ClientId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id, outbound: tx }, rx)
    }

    /// The player's id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Encode and offer a frame to the outbound queue. Never blocks: a
    /// full queue drops the frame with a warning, and the connection
    /// stays open.
    pub fn send<T: Serialize>(&self, kind: MessageKind, payload: &T) {
        match Envelope::new(kind, payload) {
            Ok(env) => self.send_frame(&env),
            Err(e) => error!("Failed to encode {:?} for {}: {}", kind, self.id, e),
        }
    }

    /// Offer a payload-less control frame to the outbound queue.
    pub fn send_empty(&self, kind: MessageKind) {
        self.send_frame(&Envelope::empty(kind));
    }

    /// Offer an already-built envelope to the outbound queue.
    pub fn send_frame(&self, env: &Envelope) {
        let text = match env.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {:?} for {}: {}", env.kind, self.id, e);
                return;
            }
        };
        match self.outbound.try_send(Outbound::Frame(text)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for {}; dropping {:?} frame",
                    self.id, env.kind
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue for {} already closed", self.id);
            }
        }
    }

    /// Ask the write task to close the connection.
    pub(crate) fn shutdown(&self) {
        // Shutdown may race with a full queue of frames; a blocked marker
        // is fine because the write task also exits when all senders drop.
        let _ = self.outbound.try_send(Outbound::Shutdown);
    }
}

/// Spawn the read and write tasks for an accepted WebSocket stream.
///
/// The caller must already have registered `handle` with the hub so the
/// welcome frame precedes anything the peer can trigger.
pub(crate) fn spawn(
    ws: WebSocketStream<TcpStream>,
    handle: PlayerHandle,
    outbound_rx: mpsc::Receiver<Outbound>,
    hub: HubHandle,
) {
    let (ws_tx, ws_rx) = ws.split();

    tokio::spawn(write_loop(handle.id(), ws_tx, outbound_rx));
    tokio::spawn(read_loop(handle, ws_rx, hub));
}

/// Drain the outbound queue to the wire and keep the peer alive with
/// periodic pings. Exit does not trigger unregister; the read task does
/// that (or already has).
async fn write_loop(
    id: ClientId,
    mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );

    loop {
        tokio::select! {
            item = outbound_rx.recv() => match item {
                Some(Outbound::Frame(text)) => {
                    match timeout(WRITE_TIMEOUT, ws_tx.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!("Write to {} failed: {}", id, e);
                            break;
                        }
                        Err(_) => {
                            warn!("Write to {} timed out", id);
                            break;
                        }
                    }
                }
                Some(Outbound::Shutdown) | None => {
                    let _ = timeout(WRITE_TIMEOUT, ws_tx.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_TIMEOUT, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        debug!("Ping to {} failed", id);
                        break;
                    }
                }
            }
        }
    }

    debug!("Write task for {} exited", id);
}

/// Read frames until the transport ends, forwarding each decoded envelope
/// to the hub in arrival order, then deliver the single unregister.
async fn read_loop(
    handle: PlayerHandle,
    mut ws_rx: SplitStream<WebSocketStream<TcpStream>>,
    hub: HubHandle,
) {
    let id = handle.id();

    loop {
        let msg = match timeout(PONG_TIMEOUT, ws_rx.next()).await {
            Err(_) => {
                warn!("Keep-alive expired for {}", id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("Read error from {}: {}", id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match Envelope::from_json(&text) {
                Ok(env) => {
                    if hub.incoming(id, env).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Structurally broken frame: protocol violation.
                    warn!("Protocol violation from {}: {}", id, e);
                    handle.send(
                        MessageKind::Error,
                        &ErrorPayload {
                            message: "Malformed frame".to_string(),
                        },
                    );
                    break;
                }
            },
            Message::Binary(_) => {
                warn!("Unexpected binary frame from {}", id);
                break;
            }
            Message::Close(_) => break,
            // Pings and pongs already extended the read deadline.
            _ => {}
        }
    }

    let _ = hub.unregister(id).await;
    debug!("Read task for {} exited", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_frames_without_blocking() {
        let (handle, mut rx) = PlayerHandle::channel_with_capacity(ClientId::new(), 2);

        for _ in 0..5 {
            handle.send_empty(MessageKind::UpdateLobby);
        }

        // Only the first two frames fit; the rest were dropped.
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_encodes_envelope() {
        let (handle, mut rx) = PlayerHandle::channel(ClientId::new());

        handle.send(
            MessageKind::Error,
            &ErrorPayload {
                message: "nope".to_string(),
            },
        );

        let Ok(Outbound::Frame(text)) = rx.try_recv() else {
            panic!("expected a frame");
        };
        let env = Envelope::from_json(&text).unwrap();
        assert_eq!(env.kind, MessageKind::Error);
        assert_eq!(env.payload["message"], "nope");
    }

    #[test]
    fn test_shutdown_enqueues_marker() {
        let (handle, mut rx) = PlayerHandle::channel(ClientId::new());

        handle.shutdown();

        assert!(matches!(rx.try_recv(), Ok(Outbound::Shutdown)));
    }

    #[test]
    fn test_send_after_close_is_silent() {
        let (handle, rx) = PlayerHandle::channel(ClientId::new());
        drop(rx);

        // Must not panic or block.
        handle.send_empty(MessageKind::BackToLobby);
    }
}
