//! # Arcade Server
//!
//! Realtime multiplayer arcade server. A single lobby hub owns all connected
//! players, collects their game votes, and supervises short-lived game
//! instances (Pong, Asteroids) that run their own fixed-tick simulations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ARCADE SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Shared primitives                        │
//! │  ├── id.rs        - ClientId / GameId newtypes               │
//! │  └── vec2.rs      - 2D vector math for game physics          │
//! │                                                              │
//! │  network/         - Transport                                │
//! │  ├── server.rs    - TCP listener + WebSocket upgrade (/ws)   │
//! │  ├── connection.rs- Per-player read/write tasks, keep-alive  │
//! │  └── protocol.rs  - JSON envelope and lobby payloads         │
//! │                                                              │
//! │  hub/             - Lobby state (single-writer task)         │
//! │  ├── mod.rs       - Event loop, vote rounds, game lifecycle  │
//! │  └── roster.rs    - Player registry + identity pool          │
//! │                                                              │
//! │  games/           - Game implementations                     │
//! │  ├── mod.rs       - Game contract and catalog                │
//! │  ├── pong.rs      - 2-player Pong (~60 Hz)                   │
//! │  └── asteroids.rs - 2-4 player Asteroids (~30 Hz)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! All lobby state is confined to the hub task: connections and games talk
//! to it exclusively through channels, so the hub never holds a lock while
//! calling into a game. Each game instance owns one mutex over its
//! simulation state, shared between its tick loop and the short, non-blocking
//! calls the hub makes into it (`add_player` / `remove_player` /
//! `handle_message`). Games report completion back to the hub over the same
//! channel fabric, outside their own mutex.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod games;
pub mod hub;
pub mod network;

pub use crate::core::id::{ClientId, GameId};
pub use crate::core::vec2::Vec2;
pub use crate::hub::{Hub, HubHandle};
pub use crate::network::server::{ArcadeServer, ServerConfig, ServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen address for the WebSocket endpoint.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";
