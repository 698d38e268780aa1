//! The Hub
//!
//! A single long-lived task that owns all lobby state: the player roster,
//! the current votes, and the set of active games. Connections and games
//! never touch that state directly; they send events over channels and the
//! hub processes them one at a time. That single-writer discipline is what
//! lets the hub call into games without ever holding a lock.
//!
//! Event sources:
//! - `register`: a connection finished its handshake.
//! - `unregister`: a connection died (the read task's single trigger).
//! - `incoming`: a decoded frame from a connection, routed to the lobby
//!   handler or to the player's active game.
//! - `control`: game-finished reports and deferred vote sweeps.

pub mod roster;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::id::{ClientId, GameId};
use crate::games::{self, Game, GameResult};
use crate::network::connection::PlayerHandle;
use crate::network::protocol::{
    Envelope, ErrorPayload, GameSelectedPayload, MessageKind, SelectGamePayload, WelcomePayload,
};
use self::roster::{Location, Roster};

/// A vote round needs at least this many lobby players.
const MIN_LOBBY_PLAYERS: usize = 2;

/// Delay before re-evaluating the vote round after a game finishes, so
/// ex-participants get a chance to submit new votes first.
const VOTE_SWEEP_DELAY: Duration = Duration::from_millis(500);

const REGISTER_QUEUE: usize = 8;
const UNREGISTER_QUEUE: usize = 8;
const INCOMING_QUEUE: usize = 256;
const CONTROL_QUEUE: usize = 16;

/// Control events that do not originate from connections.
#[derive(Debug)]
enum Control {
    /// A game runtime finished and reports its result.
    GameFinished(GameId, GameResult),
    /// Deferred re-evaluation of the vote round.
    VoteSweep,
}

/// One event, whichever channel it arrived on.
enum HubEvent {
    Register(PlayerHandle),
    Unregister(ClientId),
    Incoming(ClientId, Envelope),
    Control(Control),
}

/// The hub task is no longer running.
#[derive(Debug, thiserror::Error)]
#[error("hub is no longer running")]
pub struct HubGone;

/// Cloneable sending surface of the hub, held by connections and games.
#[derive(Clone, Debug)]
pub struct HubHandle {
    register_tx: mpsc::Sender<PlayerHandle>,
    unregister_tx: mpsc::Sender<ClientId>,
    incoming_tx: mpsc::Sender<(ClientId, Envelope)>,
    control_tx: mpsc::Sender<Control>,
}

impl HubHandle {
    /// Register a freshly connected player.
    pub async fn register(&self, handle: PlayerHandle) -> Result<(), HubGone> {
        self.register_tx.send(handle).await.map_err(|_| HubGone)
    }

    /// Report a dead connection. Idempotent at the hub.
    pub async fn unregister(&self, id: ClientId) -> Result<(), HubGone> {
        self.unregister_tx.send(id).await.map_err(|_| HubGone)
    }

    /// Forward a decoded frame from a connection.
    pub async fn incoming(&self, id: ClientId, frame: Envelope) -> Result<(), HubGone> {
        self.incoming_tx
            .send((id, frame))
            .await
            .map_err(|_| HubGone)
    }

    /// Report a finished game. Every game must call this exactly once; the
    /// hub ignores duplicates.
    pub async fn game_finished(&self, game: GameId, result: GameResult) -> Result<(), HubGone> {
        self.control_tx
            .send(Control::GameFinished(game, result))
            .await
            .map_err(|_| HubGone)
    }

    async fn vote_sweep(&self) -> Result<(), HubGone> {
        self.control_tx
            .send(Control::VoteSweep)
            .await
            .map_err(|_| HubGone)
    }
}

/// The hub: lobby state plus the receiving ends of its channels.
pub struct Hub {
    roster: Roster,
    active_games: HashMap<GameId, Arc<dyn Game>>,
    handle: HubHandle,
    register_rx: mpsc::Receiver<PlayerHandle>,
    unregister_rx: mpsc::Receiver<ClientId>,
    incoming_rx: mpsc::Receiver<(ClientId, Envelope)>,
    control_rx: mpsc::Receiver<Control>,
}

impl Hub {
    /// Create a hub and its handle. The hub does nothing until [`Hub::run`]
    /// is spawned.
    pub fn new() -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE);
        let (unregister_tx, unregister_rx) = mpsc::channel(UNREGISTER_QUEUE);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            incoming_tx,
            control_tx,
        };

        let hub = Self {
            roster: Roster::new(),
            active_games: HashMap::new(),
            handle: handle.clone(),
            register_rx,
            unregister_rx,
            incoming_rx,
            control_rx,
        };

        (hub, handle)
    }

    /// Run the event loop. Runs for the life of the process; per-player
    /// failures never bring it down.
    pub async fn run(mut self) {
        info!("Hub is running");
        loop {
            let event = tokio::select! {
                Some(handle) = self.register_rx.recv() => HubEvent::Register(handle),
                Some(id) = self.unregister_rx.recv() => HubEvent::Unregister(id),
                Some((id, frame)) = self.incoming_rx.recv() => HubEvent::Incoming(id, frame),
                Some(ctl) = self.control_rx.recv() => HubEvent::Control(ctl),
                else => break,
            };

            match event {
                HubEvent::Register(handle) => self.on_register(handle),
                HubEvent::Unregister(id) => self.on_unregister(id),
                HubEvent::Incoming(id, frame) => self.on_incoming(id, frame),
                HubEvent::Control(Control::GameFinished(game, result)) => {
                    self.on_game_finished(game, result)
                }
                HubEvent::Control(Control::VoteSweep) => self.check_vote_round(),
            }

            self.audit();
        }
        info!("Hub stopped");
    }

    // =========================================================================
    // EVENT HANDLERS
    // =========================================================================

    fn on_register(&mut self, handle: PlayerHandle) {
        let id = handle.id();
        self.roster.insert(handle);
        let count = self.roster.len();

        let Some(entry) = self.roster.get(&id) else {
            return;
        };
        info!(
            "Player {} ({}) registered. Total players: {}",
            id, entry.name, count
        );

        entry.handle.send(
            MessageKind::Welcome,
            &WelcomePayload {
                client_id: id,
                current_games: games::listings(),
            },
        );
        self.broadcast_lobby();
    }

    fn on_unregister(&mut self, id: ClientId) {
        // A connection's read task fires this once, but re-delivery must be
        // harmless.
        let Some(entry) = self.roster.remove(&id) else {
            return;
        };

        if let Some(game_id) = entry.game() {
            if let Some(game) = self.active_games.get(&game_id) {
                game.remove_player(id);
                info!("Removed player {} from game {}", id, game_id);
            }
        }

        entry.handle.shutdown();
        info!(
            "Player {} unregistered. Total players: {}",
            id,
            self.roster.len()
        );

        self.broadcast_lobby();
        // A departure can complete a vote round among the remaining players.
        self.check_vote_round();
    }

    fn on_incoming(&mut self, id: ClientId, frame: Envelope) {
        // Late frame from a connection that already unregistered.
        let Some(entry) = self.roster.get(&id) else {
            debug!("Dropping frame from unknown player {}", id);
            return;
        };

        match entry.location {
            Location::InGame(game_id) => {
                if let Some(game) = self.active_games.get(&game_id) {
                    game.handle_message(id, frame);
                } else {
                    warn!(
                        "Player {} mapped to game {} which does not exist",
                        id, game_id
                    );
                    if let Some(entry) = self.roster.get_mut(&id) {
                        entry.location = Location::Lobby;
                    }
                }
            }
            Location::Lobby => self.on_lobby_message(id, frame),
        }
    }

    fn on_lobby_message(&mut self, id: ClientId, frame: Envelope) {
        match frame.kind {
            MessageKind::SelectGame => self.on_select_game(id, frame),
            kind => {
                debug!("Unhandled lobby message {:?} from player {}", kind, id);
            }
        }
    }

    fn on_select_game(&mut self, id: ClientId, frame: Envelope) {
        let Some(entry) = self.roster.get_mut(&id) else {
            return;
        };

        let payload: SelectGamePayload = match serde_json::from_value(frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Invalid select_game payload from {}: {}", id, e);
                entry.handle.send(
                    MessageKind::Error,
                    &ErrorPayload {
                        message: "Invalid select_game payload".to_string(),
                    },
                );
                return;
            }
        };

        if !games::is_known(&payload.game) {
            warn!("Player {} selected invalid game: {}", id, payload.game);
            entry.handle.send(
                MessageKind::Error,
                &ErrorPayload {
                    message: "Invalid game selected".to_string(),
                },
            );
            return;
        }

        info!("Player {} selected game: {}", id, payload.game);
        entry.vote = Some(payload.game);

        self.broadcast_lobby();
        self.check_vote_round();
    }

    fn on_game_finished(&mut self, game_id: GameId, result: GameResult) {
        // A game may report twice (end condition raced with a stop); only
        // the first report counts.
        if self.active_games.remove(&game_id).is_none() {
            debug!(
                "GameFinished for unknown or already finished game {}",
                game_id
            );
            return;
        }
        info!("Game {} finished. Processing results", game_id);

        for (id, entry) in self.roster.iter_mut() {
            if entry.location != Location::InGame(game_id) {
                continue;
            }
            entry.location = Location::Lobby;
            if let Some(delta) = result.score_deltas.get(id) {
                entry.score += delta;
                info!("Score updated for {}: new score {}", id, entry.score);
            }
            entry.handle.send_empty(MessageKind::BackToLobby);
        }

        self.broadcast_lobby();

        // Give ex-participants time to vote before the next round can
        // auto-start among players who already had votes in.
        let handle = self.handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(VOTE_SWEEP_DELAY).await;
            let _ = handle.vote_sweep().await;
        });
    }

    // =========================================================================
    // VOTE ROUNDS
    // =========================================================================

    /// Close the vote round if every lobby player (at least two) has voted.
    fn check_vote_round(&mut self) {
        let lobby = self.roster.lobby_ids();
        if lobby.len() < MIN_LOBBY_PLAYERS {
            return;
        }

        // Each vote is one ballot; popular games win proportionally more
        // draws. Votes are deliberately not de-duplicated.
        let mut ballots = Vec::with_capacity(lobby.len());
        for id in &lobby {
            match self.roster.get(id).and_then(|p| p.vote.clone()) {
                Some(vote) => ballots.push(vote),
                None => {
                    debug!(
                        "{} out of {} lobby players have selected a game",
                        ballots.len(),
                        lobby.len()
                    );
                    return;
                }
            }
        }

        let choice = ballots[rand::thread_rng().gen_range(0..ballots.len())].clone();
        let game_id = GameId::new();

        let Some(game) = games::instantiate(&choice, game_id, self.handle.clone()) else {
            // Votes are validated on the way in, so this is a bug.
            warn!("Vote round chose unknown game {:?}; dropping round", choice);
            for id in &lobby {
                if let Some(entry) = self.roster.get_mut(id) {
                    entry.vote = None;
                }
            }
            return;
        };

        info!(
            "Vote round closed: starting {} ({}) for {} players",
            choice,
            game_id,
            lobby.len()
        );

        for id in &lobby {
            let Some(entry) = self.roster.get_mut(id) else {
                continue;
            };
            entry.vote = None;

            match game.add_player(entry.handle.clone()) {
                Ok(()) => {
                    entry.location = Location::InGame(game_id);
                    entry.handle.send(
                        MessageKind::GameSelected,
                        &GameSelectedPayload {
                            selected_game: choice.clone(),
                            game_id,
                        },
                    );
                }
                Err(e) => {
                    // The player stays in the lobby and can vote again.
                    warn!("Could not add player {} to game {}: {}", id, game_id, e);
                }
            }
        }

        self.active_games.insert(game_id, Arc::clone(&game));
        game.start();
        self.broadcast_lobby();
    }

    // =========================================================================
    // SUPPORT
    // =========================================================================

    fn broadcast_lobby(&self) {
        let snapshot = self.roster.snapshot();
        let env = match Envelope::new(MessageKind::UpdateLobby, &snapshot) {
            Ok(env) => env,
            Err(e) => {
                warn!("Failed to encode lobby update: {}", e);
                return;
            }
        };
        for (_, entry) in self.roster.iter() {
            entry.handle.send_frame(&env);
        }
    }

    /// Reconcile lobby invariants after each event: a player mapped to a
    /// game must map to a live game, and only lobby players may hold votes.
    /// Violations are repaired, not fatal.
    fn audit(&mut self) {
        for (id, entry) in self.roster.iter_mut() {
            if let Location::InGame(game_id) = entry.location {
                if !self.active_games.contains_key(&game_id) {
                    warn!(
                        "Invariant repair: player {} mapped to dead game {}",
                        id, game_id
                    );
                    entry.location = Location::Lobby;
                }
            }
            if entry.vote.is_some() && entry.location != Location::Lobby {
                warn!("Invariant repair: clearing in-game vote of player {}", id);
                entry.vote = None;
            }
        }
    }
}
