//! Pong
//!
//! Two-player paddle duel on an 800x600 field, simulated at ~60 Hz. The
//! ball moves a fixed step per tick; paddle hits invert its horizontal
//! velocity and speed it up slightly, capped so rallies stay playable.
//! Crossing the left or right edge scores for the opposite player and
//! resets the serve. First to [`TARGET_SCORE`] wins.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::id::{ClientId, GameId};
use crate::core::vec2::Vec2;
use crate::games::{Game, GameError, GameResult};
use crate::hub::HubHandle;
use crate::network::connection::PlayerHandle;
use crate::network::protocol::{Envelope, MessageKind};

/// Field width in game units.
pub const GAME_WIDTH: f64 = 800.0;
/// Field height in game units. y = 0 is the bottom edge.
pub const GAME_HEIGHT: f64 = 600.0;
/// Paddle width.
pub const PADDLE_WIDTH: f64 = 10.0;
/// Paddle height.
pub const PADDLE_HEIGHT: f64 = 60.0;
/// Ball diameter.
pub const BALL_SIZE: f64 = 10.0;
/// Paddle movement per input event.
pub const PADDLE_SPEED: f64 = 10.0;
/// Score needed to win.
pub const TARGET_SCORE: i64 = 5;

const INITIAL_BALL_VX: f64 = 5.0;
const INITIAL_BALL_VY: f64 = 4.0;
const MAX_BALL_SPEED_X: f64 = 15.0;
const MAX_BALL_SPEED_Y: f64 = 12.0;
const SPEED_INCREASE: f64 = 1.05;
const MIN_PLAYERS: usize = 2;
const MAX_PLAYERS: usize = 2;
const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Direction of a paddle input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddleDirection {
    /// Move the paddle up (towards y = GAME_HEIGHT).
    Up,
    /// Move the paddle down (towards y = 0).
    Down,
}

/// Payload of `pong_input`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PongInputPayload {
    /// Requested paddle movement for this event.
    pub direction: PaddleDirection,
}

/// Payload of `pong_state`, sent every tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PongStatePayload {
    /// Ball center x.
    pub ball_x: f64,
    /// Ball center y.
    pub ball_y: f64,
    /// Center y of the left paddle.
    pub paddle_1_y: f64,
    /// Center y of the right paddle.
    pub paddle_2_y: f64,
    /// Left player's score.
    pub score_1: i64,
    /// Right player's score.
    pub score_2: i64,
    /// Id of the left player.
    pub player_1: ClientId,
    /// Id of the right player.
    pub player_2: ClientId,
}

/// Payload of `pong_game_over`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PongGameOverPayload {
    /// Id of the winner.
    pub winner: ClientId,
    /// Final left score.
    pub score_1: i64,
    /// Final right score.
    pub score_2: i64,
}

/// Which side of the field a paddle defends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

struct Paddle {
    handle: PlayerHandle,
    side: Side,
    y: f64,
    score: i64,
}

struct PongState {
    players: BTreeMap<ClientId, Paddle>,
    ball: Vec2,
    ball_vel: Vec2,
    running: bool,
}

impl PongState {
    fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            ball: Vec2::new(GAME_WIDTH / 2.0, GAME_HEIGHT / 2.0),
            ball_vel: Vec2::ZERO,
            running: false,
        }
    }

    fn paddle(&self, side: Side) -> Option<&Paddle> {
        self.players.values().find(|p| p.side == side)
    }

    fn paddle_mut(&mut self, side: Side) -> Option<&mut Paddle> {
        self.players.values_mut().find(|p| p.side == side)
    }

    fn side_y(&self, side: Side) -> Option<f64> {
        self.paddle(side).map(|p| p.y)
    }

    /// Center the ball with a randomized serve and re-center the paddles.
    fn reset_round(&mut self) {
        self.ball = Vec2::new(GAME_WIDTH / 2.0, GAME_HEIGHT / 2.0);

        let mut rng = rand::thread_rng();
        let vx = if rng.gen_bool(0.5) {
            INITIAL_BALL_VX
        } else {
            -INITIAL_BALL_VX
        };
        let vy = if rng.gen_bool(0.5) {
            INITIAL_BALL_VY
        } else {
            -INITIAL_BALL_VY
        };
        self.ball_vel = Vec2::new(vx, vy);

        for paddle in self.players.values_mut() {
            paddle.y = GAME_HEIGHT / 2.0;
        }
    }

    /// Advance the simulation by one tick.
    fn step(&mut self) {
        self.ball = self.ball + self.ball_vel;

        let half_ball = BALL_SIZE / 2.0;
        let half_paddle = PADDLE_HEIGHT / 2.0;

        // Top and bottom walls.
        if self.ball.y - half_ball <= 0.0 {
            self.ball.y = half_ball;
            self.ball_vel.y = -self.ball_vel.y;
        } else if self.ball.y + half_ball >= GAME_HEIGHT {
            self.ball.y = GAME_HEIGHT - half_ball;
            self.ball_vel.y = -self.ball_vel.y;
        }

        let (Some(left_y), Some(right_y)) = (self.side_y(Side::Left), self.side_y(Side::Right))
        else {
            return;
        };

        // Left paddle face.
        let left_face = PADDLE_WIDTH;
        if self.ball_vel.x < 0.0
            && self.ball.x - half_ball <= left_face
            && self.ball.y >= left_y - half_paddle
            && self.ball.y <= left_y + half_paddle
        {
            self.ball.x = left_face + half_ball;
            self.ball_vel.x = -self.ball_vel.x;
            self.speed_up();
        }

        // Right paddle face.
        let right_face = GAME_WIDTH - PADDLE_WIDTH;
        if self.ball_vel.x > 0.0
            && self.ball.x + half_ball >= right_face
            && self.ball.y >= right_y - half_paddle
            && self.ball.y <= right_y + half_paddle
        {
            self.ball.x = right_face - half_ball;
            self.ball_vel.x = -self.ball_vel.x;
            self.speed_up();
        }

        // Scoring: the ball got past a paddle.
        if self.ball.x - half_ball <= 0.0 {
            self.award_point(Side::Right);
        } else if self.ball.x + half_ball >= GAME_WIDTH {
            self.award_point(Side::Left);
        }
    }

    fn speed_up(&mut self) {
        self.ball_vel.x =
            (self.ball_vel.x * SPEED_INCREASE).clamp(-MAX_BALL_SPEED_X, MAX_BALL_SPEED_X);
        self.ball_vel.y =
            (self.ball_vel.y * SPEED_INCREASE).clamp(-MAX_BALL_SPEED_Y, MAX_BALL_SPEED_Y);
    }

    fn award_point(&mut self, side: Side) {
        if let Some(paddle) = self.paddle_mut(side) {
            paddle.score += 1;
        }
        debug!("Point scored; serving again");
        self.reset_round();
    }

    fn apply_input(&mut self, player: ClientId, direction: PaddleDirection) {
        if let Some(paddle) = self.players.get_mut(&player) {
            let delta = match direction {
                PaddleDirection::Up => PADDLE_SPEED,
                PaddleDirection::Down => -PADDLE_SPEED,
            };
            let half_paddle = PADDLE_HEIGHT / 2.0;
            paddle.y = (paddle.y + delta).clamp(half_paddle, GAME_HEIGHT - half_paddle);
        }
    }

    fn state_payload(&self) -> Option<PongStatePayload> {
        let left = self.paddle(Side::Left)?;
        let right = self.paddle(Side::Right)?;
        Some(PongStatePayload {
            ball_x: self.ball.x,
            ball_y: self.ball.y,
            paddle_1_y: left.y,
            paddle_2_y: right.y,
            score_1: left.score,
            score_2: right.score,
            player_1: left.handle.id(),
            player_2: right.handle.id(),
        })
    }

    fn broadcast_state(&self) {
        let Some(payload) = self.state_payload() else {
            return;
        };
        for paddle in self.players.values() {
            paddle.handle.send(MessageKind::PongState, &payload);
        }
    }

    /// Returns `(winner, score_1, score_2)` once a side reaches the target.
    fn check_game_over(&self) -> Option<(ClientId, i64, i64)> {
        let left = self.paddle(Side::Left)?;
        let right = self.paddle(Side::Right)?;
        if left.score >= TARGET_SCORE {
            Some((left.handle.id(), left.score, right.score))
        } else if right.score >= TARGET_SCORE {
            Some((right.handle.id(), left.score, right.score))
        } else {
            None
        }
    }
}

/// A running Pong instance.
pub struct PongGame {
    id: GameId,
    hub: HubHandle,
    state: Mutex<PongState>,
    stop_signal: Notify,
    finished: AtomicBool,
}

impl PongGame {
    /// Create a Pong instance reporting to `hub` when it ends.
    pub fn new(id: GameId, hub: HubHandle) -> Self {
        Self {
            id,
            hub,
            state: Mutex::new(PongState::new()),
            stop_signal: Notify::new(),
            finished: AtomicBool::new(false),
        }
    }

    async fn run(self: Arc<Self>) {
        let wrong_player_count = {
            let mut state = self.state.lock().expect("pong state lock poisoned");
            if state.players.len() != MIN_PLAYERS {
                warn!(
                    "[game {}] cannot start with {} players",
                    self.id,
                    state.players.len()
                );
                true
            } else {
                state.running = true;
                state.reset_round();
                false
            }
        };
        if wrong_player_count {
            self.finish().await;
            return;
        }

        info!("[game {}] starting game loop", self.id);
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let over = {
                        let mut state = self.state.lock().expect("pong state lock poisoned");
                        if !state.running {
                            break;
                        }
                        state.step();
                        state.broadcast_state();
                        state.check_game_over()
                    };

                    if let Some((winner, score_1, score_2)) = over {
                        info!(
                            "[game {}] game over. Winner: {} ({}:{})",
                            self.id, winner, score_1, score_2
                        );
                        self.send_game_over(winner, score_1, score_2);
                        break;
                    }
                }
                _ = self.stop_signal.notified() => break,
            }
        }

        info!("[game {}] game loop stopped", self.id);
        self.finish().await;
    }

    fn send_game_over(&self, winner: ClientId, score_1: i64, score_2: i64) {
        let state = self.state.lock().expect("pong state lock poisoned");
        let payload = PongGameOverPayload {
            winner,
            score_1,
            score_2,
        };
        for paddle in state.players.values() {
            paddle.handle.send(MessageKind::PongGameOver, &payload);
        }
    }

    /// Report the result to the hub. Safe to call more than once; only the
    /// first call reports.
    async fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = {
            let state = self.state.lock().expect("pong state lock poisoned");
            GameResult {
                score_deltas: state
                    .players
                    .iter()
                    .map(|(id, paddle)| (*id, paddle.score))
                    .collect(),
            }
        };
        if self.hub.game_finished(self.id, result).await.is_err() {
            warn!("[game {}] hub is gone; result dropped", self.id);
        }
    }
}

impl Game for PongGame {
    fn id(&self) -> GameId {
        self.id
    }

    fn add_player(&self, player: PlayerHandle) -> Result<(), GameError> {
        let mut state = self.state.lock().expect("pong state lock poisoned");

        if state.players.len() >= MAX_PLAYERS {
            return Err(GameError::Full {
                current: state.players.len(),
                max: MAX_PLAYERS,
            });
        }
        let id = player.id();
        if state.players.contains_key(&id) {
            return Err(GameError::Duplicate(id));
        }

        let side = if state.players.is_empty() {
            Side::Left
        } else {
            Side::Right
        };
        state.players.insert(
            id,
            Paddle {
                handle: player,
                side,
                y: GAME_HEIGHT / 2.0,
                score: 0,
            },
        );
        info!("[game {}] player {} joined as {:?}", self.id, id, side);
        Ok(())
    }

    fn remove_player(&self, player: ClientId) {
        let (removed, remaining, running) = {
            let mut state = self.state.lock().expect("pong state lock poisoned");
            let removed = state.players.remove(&player).is_some();
            (removed, state.players.len(), state.running)
        };
        if !removed {
            return;
        }

        info!("[game {}] player {} removed", self.id, player);
        if running && remaining < MIN_PLAYERS {
            info!(
                "[game {}] not enough players remaining ({}/{}); stopping",
                self.id, remaining, MIN_PLAYERS
            );
            self.stop();
        }
    }

    fn handle_message(&self, player: ClientId, frame: Envelope) {
        match frame.kind {
            MessageKind::PongInput => {
                let payload: PongInputPayload = match serde_json::from_value(frame.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("[game {}] bad pong_input from {}: {}", self.id, player, e);
                        return;
                    }
                };
                let mut state = self.state.lock().expect("pong state lock poisoned");
                if !state.running {
                    return;
                }
                state.apply_input(player, payload.direction);
            }
            kind => {
                debug!(
                    "[game {}] unhandled message {:?} from {}",
                    self.id, kind, player
                );
            }
        }
    }

    fn start(self: Arc<Self>) {
        super::spawn_supervised(self.id, self.hub.clone(), Arc::clone(&self).run());
    }

    fn stop(&self) {
        self.stop_signal.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;

    fn input_frame(direction: PaddleDirection) -> Envelope {
        Envelope::new(MessageKind::PongInput, &PongInputPayload { direction }).unwrap()
    }

    async fn two_player_game() -> (Arc<PongGame>, ClientId, ClientId, HubHandle) {
        let (_hub, handle) = Hub::new();
        let game = Arc::new(PongGame::new(GameId::new(), handle.clone()));

        let (a, _rx_a) = PlayerHandle::channel(ClientId::new());
        let (b, _rx_b) = PlayerHandle::channel(ClientId::new());
        let (id_a, id_b) = (a.id(), b.id());
        game.add_player(a).unwrap();
        game.add_player(b).unwrap();
        game.state.lock().unwrap().running = true;
        (game, id_a, id_b, handle)
    }

    #[tokio::test]
    async fn test_add_player_limits() {
        let (_hub, handle) = Hub::new();
        let game = PongGame::new(GameId::new(), handle);

        let (a, _rx) = PlayerHandle::channel(ClientId::new());
        let duplicate = a.clone();
        game.add_player(a).unwrap();
        assert!(matches!(
            game.add_player(duplicate),
            Err(GameError::Duplicate(_))
        ));

        let (b, _rx) = PlayerHandle::channel(ClientId::new());
        game.add_player(b).unwrap();

        let (c, _rx) = PlayerHandle::channel(ClientId::new());
        assert!(matches!(game.add_player(c), Err(GameError::Full { .. })));
    }

    #[tokio::test]
    async fn test_input_moves_paddle_by_fixed_step() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;

        let before = game.state.lock().unwrap().players[&id_a].y;
        game.handle_message(id_a, input_frame(PaddleDirection::Up));
        let after = game.state.lock().unwrap().players[&id_a].y;
        assert_eq!(after, before + PADDLE_SPEED);

        game.handle_message(id_a, input_frame(PaddleDirection::Down));
        let back = game.state.lock().unwrap().players[&id_a].y;
        assert_eq!(back, before);
    }

    #[tokio::test]
    async fn test_paddle_clamped_to_field() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;

        for _ in 0..100 {
            game.handle_message(id_a, input_frame(PaddleDirection::Up));
        }
        let y = game.state.lock().unwrap().players[&id_a].y;
        assert_eq!(y, GAME_HEIGHT - PADDLE_HEIGHT / 2.0);

        for _ in 0..100 {
            game.handle_message(id_a, input_frame(PaddleDirection::Down));
        }
        let y = game.state.lock().unwrap().players[&id_a].y;
        assert_eq!(y, PADDLE_HEIGHT / 2.0);
    }

    #[tokio::test]
    async fn test_ball_bounces_off_bottom_wall() {
        let (game, _id_a, _id_b, _hub) = two_player_game().await;

        {
            let mut state = game.state.lock().unwrap();
            state.ball = Vec2::new(400.0, 6.0);
            state.ball_vel = Vec2::new(2.0, -4.0);
            state.step();
            assert_eq!(state.ball.y, BALL_SIZE / 2.0);
            assert!(state.ball_vel.y > 0.0);
        }
    }

    #[tokio::test]
    async fn test_paddle_hit_reflects_and_speeds_up() {
        let (game, _id_a, _id_b, _hub) = two_player_game().await;

        let mut state = game.state.lock().unwrap();
        let paddle_y = state.side_y(Side::Left).unwrap();
        state.ball = Vec2::new(PADDLE_WIDTH + BALL_SIZE / 2.0 + 1.0, paddle_y);
        state.ball_vel = Vec2::new(-5.0, 1.0);
        state.step();

        assert!(state.ball_vel.x > 0.0);
        assert!((state.ball_vel.x - 5.0 * SPEED_INCREASE).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ball_speed_is_capped() {
        let (game, _id_a, _id_b, _hub) = two_player_game().await;

        let mut state = game.state.lock().unwrap();
        state.ball_vel = Vec2::new(MAX_BALL_SPEED_X, MAX_BALL_SPEED_Y);
        state.speed_up();
        assert_eq!(state.ball_vel.x, MAX_BALL_SPEED_X);
        assert_eq!(state.ball_vel.y, MAX_BALL_SPEED_Y);
    }

    #[tokio::test]
    async fn test_crossing_left_edge_scores_for_right() {
        let (game, _id_a, id_b, _hub) = two_player_game().await;

        let mut state = game.state.lock().unwrap();
        // Well below the left paddle, so it cannot intercept.
        state.paddle_mut(Side::Left).unwrap().y = GAME_HEIGHT - PADDLE_HEIGHT / 2.0;
        state.ball = Vec2::new(4.0, 100.0);
        state.ball_vel = Vec2::new(-5.0, 0.0);
        state.step();

        assert_eq!(state.players[&id_b].score, 1);
        // Serve was reset to center.
        assert_eq!(state.ball.x, GAME_WIDTH / 2.0);
        assert_eq!(state.ball.y, GAME_HEIGHT / 2.0);
    }

    #[tokio::test]
    async fn test_game_over_at_target_score() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;

        let mut state = game.state.lock().unwrap();
        assert!(state.check_game_over().is_none());

        // The first player added defends the left side.
        state.players.get_mut(&id_a).unwrap().score = TARGET_SCORE;
        let (winner, score_1, score_2) = state.check_game_over().unwrap();
        assert_eq!(winner, id_a);
        assert_eq!(score_1, TARGET_SCORE);
        assert_eq!(score_2, 0);
    }

    #[tokio::test]
    async fn test_remove_player_is_idempotent() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;

        game.remove_player(id_a);
        game.remove_player(id_a);
        assert_eq!(game.state.lock().unwrap().players.len(), 1);
    }
}
