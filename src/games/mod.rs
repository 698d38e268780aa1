//! Game Contract and Catalog
//!
//! Everything the hub knows about games: the [`Game`] trait, the result a
//! finished game reports, and the catalog used for voting. Game
//! implementations live in their own modules and own their simulation
//! state behind a single mutex.

pub mod asteroids;
pub mod pong;

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::id::{ClientId, GameId};
use crate::hub::HubHandle;
use crate::network::connection::PlayerHandle;
use crate::network::protocol::{Envelope, GameListing};

/// Per-player score credits reported when a game ends.
pub type ScoreDeltas = HashMap<ClientId, i64>;

/// What a finished game reports back to the hub.
#[derive(Clone, Debug, Default)]
pub struct GameResult {
    /// Credits applied to each participant's cumulative score. May be
    /// empty, but must always be reported.
    pub score_deltas: ScoreDeltas,
}

/// Reasons a player cannot join a game.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    /// The game already has its maximum number of players.
    #[error("game is full ({current}/{max} players)")]
    Full {
        /// Players currently in the game.
        current: usize,
        /// Maximum the game accepts.
        max: usize,
    },
    /// The player is already in the game.
    #[error("player {0} already in game")]
    Duplicate(ClientId),
}

/// Contract every game must satisfy.
///
/// All methods except `start` are called from the hub loop and must return
/// promptly: implementations take their own state mutex, deposit or read,
/// and get out. A game reports its end to the hub exactly once via
/// [`HubHandle::game_finished`], never while holding its mutex.
pub trait Game: Send + Sync {
    /// Stable identifier of this instance.
    fn id(&self) -> GameId;

    /// Add a player. Called before and during the run; must be safe to
    /// call concurrently with a running loop.
    fn add_player(&self, player: PlayerHandle) -> Result<(), GameError>;

    /// Remove a player. Idempotent. If the participant count falls below
    /// the game's minimum, the game initiates its own shutdown.
    fn remove_player(&self, player: ClientId);

    /// Handle an inbound frame from a participant. Must not block beyond
    /// depositing input under the game's mutex.
    fn handle_message(&self, player: ClientId, frame: Envelope);

    /// Spawn the game's runtime task. The runtime ends the game and
    /// reports the result to the hub.
    fn start(self: Arc<Self>);

    /// Request early termination. Idempotent; the runtime still reports
    /// the result exactly once.
    fn stop(&self);
}

/// One catalog entry offered for voting.
pub struct GameInfo {
    /// The name clients vote with.
    pub name: &'static str,
    /// Short description shown in the lobby.
    pub description: &'static str,
}

/// All games this server can host.
pub const CATALOG: &[GameInfo] = &[
    GameInfo {
        name: "Asteroids",
        description: "Blast drifting rocks and outlast up to three rivals in a wrapping arena",
    },
    GameInfo {
        name: "Pong",
        description: "Classic paddle duel, first to five points",
    },
];

/// Whether `name` is a game this server can host.
pub fn is_known(name: &str) -> bool {
    CATALOG.iter().any(|g| g.name == name)
}

/// The catalog as wire listings for the `welcome` frame.
pub fn listings() -> Vec<GameListing> {
    CATALOG
        .iter()
        .map(|g| GameListing {
            name: g.name.to_string(),
            description: g.description.to_string(),
        })
        .collect()
}

/// Construct a game instance by catalog name.
pub fn instantiate(name: &str, id: GameId, hub: HubHandle) -> Option<Arc<dyn Game>> {
    match name {
        "Asteroids" => Some(Arc::new(asteroids::AsteroidsGame::new(id, hub))),
        "Pong" => Some(Arc::new(pong::PongGame::new(id, hub))),
        _ => None,
    }
}

/// Spawn a game runtime under a supervisor that turns a panic into a
/// regular (empty) result report, so players are never stranded in a dead
/// game.
pub(crate) fn spawn_supervised<F>(id: GameId, hub: HubHandle, runtime: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::spawn(runtime).await.is_err() {
            tracing::warn!("[game {}] runtime panicked; reporting empty result", id);
            let _ = hub.game_finished(id, GameResult::default()).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names() {
        assert!(is_known("Pong"));
        assert!(is_known("Asteroids"));
        assert!(!is_known("Tetris"));
    }

    #[test]
    fn test_listings_cover_catalog() {
        let listings = listings();
        assert_eq!(listings.len(), CATALOG.len());
        assert!(listings.iter().all(|l| !l.description.is_empty()));
    }

    #[tokio::test]
    async fn test_instantiate_known_games() {
        let (_hub, handle) = crate::hub::Hub::new();
        assert!(instantiate("Pong", GameId::new(), handle.clone()).is_some());
        assert!(instantiate("Asteroids", GameId::new(), handle.clone()).is_some());
        assert!(instantiate("Tetris", GameId::new(), handle).is_none());
    }
}
