//! WebSocket Server
//!
//! Binds a TCP listener, upgrades connections at `/ws`, and hands each
//! accepted stream to a [`connection`](crate::network::connection) pair of
//! tasks registered with the hub.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info};

use crate::core::id::ClientId;
use crate::hub::{Hub, HubHandle};
use crate::network::connection::{self, PlayerHandle, MAX_FRAME_BYTES};
use crate::DEFAULT_ADDR;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub addr: String,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            ws_path: "/ws".to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The arcade server: one hub task plus an accept loop.
pub struct ArcadeServer {
    listener: TcpListener,
    config: ServerConfig,
    hub: HubHandle,
}

impl ArcadeServer {
    /// Bind the listen address and spawn the hub task.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.addr).await?;
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        Ok(Self {
            listener,
            config,
            hub: handle,
        })
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// A handle to the hub this server feeds.
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("New connection from {}", peer);
                    let hub = self.hub.clone();
                    let ws_path = self.config.ws_path.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, ws_path, hub).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Upgrade one TCP stream to a WebSocket and wire it into the hub.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, ws_path: String, hub: HubHandle) {
    let check_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == ws_path {
            Ok(resp)
        } else {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_FRAME_BYTES);
    ws_config.max_frame_size = Some(MAX_FRAME_BYTES);

    let ws = match tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        check_path,
        Some(ws_config),
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed for {}: {}", peer, e);
            return;
        }
    };

    let id = ClientId::new();
    let (handle, outbound_rx) = PlayerHandle::channel(id);

    // Register before the read task can deliver anything, so the hub sees
    // the player before its first frame.
    if hub.register(handle.clone()).await.is_err() {
        error!("Hub is gone; dropping connection from {}", peer);
        return;
    }

    info!("Player {} connected from {}", id, peer);
    connection::spawn(ws, handle, outbound_rx, hub);
}
