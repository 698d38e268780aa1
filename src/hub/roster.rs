//! Player Registry
//!
//! Hub-owned bookkeeping for every connected player: identity, cumulative
//! score, current location, and pending vote. Mutated only from the hub
//! loop; games never see it, they get [`PlayerHandle`]s instead.

use std::collections::HashMap;

use crate::core::id::{ClientId, GameId};
use crate::network::connection::PlayerHandle;
use crate::network::protocol::{LobbyUpdatePayload, PlayerInfo};

/// Fixed pool of display identities, handed out round-robin (wraps on
/// exhaustion, so names repeat once more than seven players connect).
const IDENTITY_POOL: &[(&str, &str)] = &[
    (
        "Adrian",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Adrian&flip=true",
    ),
    (
        "Brian",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Brian&flip=true",
    ),
    (
        "Amaya",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Amaya&flip=true",
    ),
    (
        "Easton",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Easton&flip=true",
    ),
    (
        "Chase",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Chase&flip=true",
    ),
    (
        "Avery",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Avery&flip=true",
    ),
    (
        "Alexander",
        "https://api.dicebear.com/9.x/adventurer/svg?seed=Alexander&flip=true",
    ),
];

/// Where a player currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// In the lobby, able to vote.
    Lobby,
    /// Inside the given game instance.
    InGame(GameId),
}

/// One registered player.
#[derive(Debug)]
pub struct PlayerEntry {
    /// The player's sending surface.
    pub handle: PlayerHandle,
    /// Display name from the identity pool.
    pub name: String,
    /// Avatar URL from the identity pool.
    pub avatar_url: String,
    /// Cumulative score across games.
    pub score: i64,
    /// Current location.
    pub location: Location,
    /// Pending vote; only meaningful in the lobby.
    pub vote: Option<String>,
}

impl PlayerEntry {
    /// The game this player is in, if any.
    pub fn game(&self) -> Option<GameId> {
        match self.location {
            Location::Lobby => None,
            Location::InGame(id) => Some(id),
        }
    }
}

/// The registry of connected players.
#[derive(Debug, Default)]
pub struct Roster {
    players: HashMap<ClientId, PlayerEntry>,
    next_identity: usize,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player, assigning the next identity from the pool.
    pub fn insert(&mut self, handle: PlayerHandle) {
        let (name, avatar_url) = IDENTITY_POOL[self.next_identity % IDENTITY_POOL.len()];
        self.next_identity = self.next_identity.wrapping_add(1);

        let id = handle.id();
        self.players.insert(
            id,
            PlayerEntry {
                handle,
                name: name.to_string(),
                avatar_url: avatar_url.to_string(),
                score: 0,
                location: Location::Lobby,
                vote: None,
            },
        );
    }

    /// Remove a player, returning their entry if they were registered.
    pub fn remove(&mut self, id: &ClientId) -> Option<PlayerEntry> {
        self.players.remove(id)
    }

    /// Look up a player.
    pub fn get(&self, id: &ClientId) -> Option<&PlayerEntry> {
        self.players.get(id)
    }

    /// Look up a player for mutation.
    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut PlayerEntry> {
        self.players.get_mut(id)
    }

    /// Whether a player is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.players.contains_key(id)
    }

    /// Number of registered players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Iterate over all players.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &PlayerEntry)> {
        self.players.iter()
    }

    /// Iterate mutably over all players.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ClientId, &mut PlayerEntry)> {
        self.players.iter_mut()
    }

    /// Ids of everyone currently in the lobby.
    pub fn lobby_ids(&self) -> Vec<ClientId> {
        self.players
            .iter()
            .filter(|(_, p)| p.location == Location::Lobby)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Build the `update_lobby` snapshot.
    pub fn snapshot(&self) -> LobbyUpdatePayload {
        let players = self
            .players
            .iter()
            .map(|(id, p)| {
                (
                    *id,
                    PlayerInfo {
                        score: p.score,
                        in_game: p.location != Location::Lobby,
                        selected_game: p.vote.clone().unwrap_or_default(),
                        name: p.name.clone(),
                        avatar_url: p.avatar_url.clone(),
                    },
                )
            })
            .collect();
        LobbyUpdatePayload { players }
    }
}
