//! Asteroids
//!
//! Free-for-all for two to four players on a toroidal 800x600 world,
//! simulated at ~30 Hz with real elapsed-time integration. Ships turn and
//! thrust from level-triggered button state, shots split asteroids into
//! smaller, faster pieces, and collisions cost health and respawn the ship
//! at center with brief invincibility. The round ends when at most one
//! ship is still alive.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::id::{ClientId, GameId};
use crate::core::vec2::{circles_overlap, Vec2};
use crate::games::{Game, GameError, GameResult};
use crate::hub::HubHandle;
use crate::network::connection::PlayerHandle;
use crate::network::protocol::{Envelope, MessageKind};

/// World width in game units.
pub const WORLD_WIDTH: f64 = 800.0;
/// World height in game units.
pub const WORLD_HEIGHT: f64 = 600.0;
/// Asteroids seeded at round start.
pub const INITIAL_ASTEROID_COUNT: usize = 8;
/// Points for destroying a large asteroid.
pub const ASTEROID_POINTS_LARGE: i64 = 20;
/// Points for destroying a medium asteroid.
pub const ASTEROID_POINTS_MIDDLE: i64 = 50;
/// Points for destroying a small asteroid.
pub const ASTEROID_POINTS_SMALL: i64 = 100;

const PLAYER_SPEED: f64 = 250.0;
const TURN_SPEED_DEG: f64 = 180.0;
const INITIAL_HEALTH: i32 = 3;
const PLAYER_RADIUS: f64 = 15.0;
const RESPAWN_INVINCIBILITY: Duration = Duration::from_secs(3);
const SHOOT_COOLDOWN: Duration = Duration::from_millis(250);

const PROJECTILE_SPEED: f64 = 400.0;
const PROJECTILE_LIFETIME: Duration = Duration::from_millis(1500);
const PROJECTILE_RADIUS: f64 = 3.0;

const ASTEROID_SPAWN_PADDING: f64 = 100.0;
const ASTEROID_SPEED_MIN: f64 = 30.0;
const ASTEROID_SPEED_MAX: f64 = 80.0;
const ASTEROID_SPLIT_COUNT: usize = 2;
const ASTEROID_SPLIT_ANGLE_VARY_DEG: f64 = 30.0;

const MIN_PLAYERS: usize = 2;
const MAX_PLAYERS: usize = 4;
const TICK_INTERVAL: Duration = Duration::from_millis(33);

/// Size class of an asteroid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsteroidKind {
    /// Splits into two medium pieces.
    Large,
    /// Splits into two small pieces.
    Middle,
    /// Disappears when destroyed.
    Small,
}

impl AsteroidKind {
    fn radius(self) -> f64 {
        match self {
            Self::Large => 30.0,
            Self::Middle => 18.0,
            Self::Small => 10.0,
        }
    }

    fn points(self) -> i64 {
        match self {
            Self::Large => ASTEROID_POINTS_LARGE,
            Self::Middle => ASTEROID_POINTS_MIDDLE,
            Self::Small => ASTEROID_POINTS_SMALL,
        }
    }

    // Smaller pieces drift faster.
    fn speed_factor(self) -> f64 {
        match self {
            Self::Large => 1.0,
            Self::Middle => 1.3,
            Self::Small => 1.6,
        }
    }

    fn split(self) -> Option<Self> {
        match self {
            Self::Large => Some(Self::Middle),
            Self::Middle => Some(Self::Small),
            Self::Small => None,
        }
    }
}

/// Payload of `asteroids_input`: the full button state, applied every tick
/// until replaced.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsteroidsInputPayload {
    /// Rotate counter-clockwise.
    pub left: bool,
    /// Rotate clockwise.
    pub right: bool,
    /// Thrust along the current heading.
    pub up: bool,
    /// Fire, cooldown permitting.
    pub shoot: bool,
}

/// Per-ship entry of `asteroids_state`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipState {
    /// Owning player.
    pub id: ClientId,
    /// Position.
    pub pos: Vec2,
    /// Unit heading.
    pub dir: Vec2,
    /// Remaining health.
    pub health: i32,
    /// Whether the ship currently ignores collisions.
    pub is_invincible: bool,
    /// In-game score.
    pub score: i64,
}

/// Per-asteroid entry of `asteroids_state`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsteroidState {
    /// Asteroid id, unique within the game.
    pub id: u32,
    /// Position.
    pub pos: Vec2,
    /// Drift direction.
    pub dir: Vec2,
    /// Size class.
    #[serde(rename = "type")]
    pub kind: AsteroidKind,
    /// Which sprite variant the client should draw.
    pub variant_index: u8,
}

/// Per-projectile entry of `asteroids_state`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectileState {
    /// Projectile id, unique within the game.
    pub id: u32,
    /// Position.
    pub pos: Vec2,
}

/// Payload of `asteroids_state`, sent every tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AsteroidsStatePayload {
    /// All ships, keyed by player id.
    pub players: HashMap<ClientId, ShipState>,
    /// All live asteroids.
    pub asteroids: Vec<AsteroidState>,
    /// All live projectiles.
    pub projectiles: Vec<ProjectileState>,
}

/// Payload of `asteroids_game_over`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AsteroidsGameOverPayload {
    /// Winner's player id, or `"draw"`.
    pub winner: String,
}

struct Ship {
    handle: PlayerHandle,
    pos: Vec2,
    dir: Vec2,
    health: i32,
    score: i64,
    input: AsteroidsInputPayload,
    last_shot: Option<Instant>,
    invincible_until: Instant,
}

impl Ship {
    fn is_dead(&self) -> bool {
        self.health <= 0
    }

    fn is_invincible(&self, now: Instant) -> bool {
        now < self.invincible_until
    }

    fn can_shoot(&self, now: Instant) -> bool {
        self.last_shot
            .map_or(true, |last| now.duration_since(last) >= SHOOT_COOLDOWN)
    }
}

#[derive(Clone)]
struct Asteroid {
    id: u32,
    pos: Vec2,
    dir: Vec2,
    kind: AsteroidKind,
    speed: f64,
    variant: u8,
}

struct Projectile {
    id: u32,
    owner: ClientId,
    pos: Vec2,
    dir: Vec2,
    spawned_at: Instant,
}

/// Wrap a position onto the torus.
fn wrap_position(mut pos: Vec2) -> Vec2 {
    if pos.x < 0.0 {
        pos.x += WORLD_WIDTH;
    } else if pos.x >= WORLD_WIDTH {
        pos.x -= WORLD_WIDTH;
    }
    if pos.y < 0.0 {
        pos.y += WORLD_HEIGHT;
    } else if pos.y >= WORLD_HEIGHT {
        pos.y -= WORLD_HEIGHT;
    }
    pos
}

struct AsteroidsState {
    players: BTreeMap<ClientId, Ship>,
    asteroids: BTreeMap<u32, Asteroid>,
    projectiles: BTreeMap<u32, Projectile>,
    next_entity: u32,
    running: bool,
}

impl AsteroidsState {
    fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            asteroids: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            next_entity: 0,
            running: false,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_entity;
        self.next_entity = self.next_entity.wrapping_add(1);
        id
    }

    fn alive_count(&self) -> usize {
        self.players.values().filter(|s| !s.is_dead()).count()
    }

    fn respawn(ship: &mut Ship, now: Instant) {
        ship.pos = Vec2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0);
        ship.dir = Vec2::new(0.0, -1.0);
        ship.invincible_until = now + RESPAWN_INVINCIBILITY;
    }

    fn seed_asteroids(&mut self) {
        let center = Vec2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0);
        let max_dist = WORLD_WIDTH.min(WORLD_HEIGHT) / 2.0 - ASTEROID_SPAWN_PADDING;
        for _ in 0..INITIAL_ASTEROID_COUNT {
            let (angle, dist) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen::<f64>() * std::f64::consts::TAU,
                    ASTEROID_SPAWN_PADDING + rng.gen::<f64>() * max_dist,
                )
            };
            let pos = center + Vec2::from_angle(angle) * dist;
            self.spawn_asteroid(pos, AsteroidKind::Large);
        }
    }

    fn new_asteroid(&mut self, pos: Vec2, kind: AsteroidKind, dir: Vec2) -> Asteroid {
        let mut rng = rand::thread_rng();
        Asteroid {
            id: self.next_id(),
            pos,
            dir,
            kind,
            speed: rng.gen_range(ASTEROID_SPEED_MIN..ASTEROID_SPEED_MAX) * kind.speed_factor(),
            variant: rng.gen_range(0..2),
        }
    }

    fn spawn_asteroid(&mut self, pos: Vec2, kind: AsteroidKind) {
        let angle = rand::thread_rng().gen::<f64>() * std::f64::consts::TAU;
        let asteroid = self.new_asteroid(pos, kind, Vec2::from_angle(angle));
        self.asteroids.insert(asteroid.id, asteroid);
    }

    /// Break an asteroid into its smaller pieces, if it has any.
    fn split_asteroid(&mut self, original: &Asteroid) -> Vec<Asteroid> {
        let Some(next_kind) = original.kind.split() else {
            return Vec::new();
        };

        let base_angle = original.dir.angle();
        let vary = ASTEROID_SPLIT_ANGLE_VARY_DEG.to_radians();
        let mut pieces = Vec::with_capacity(ASTEROID_SPLIT_COUNT);
        for _ in 0..ASTEROID_SPLIT_COUNT {
            let offset = (rand::thread_rng().gen::<f64>() * 2.0 - 1.0) * vary;
            let dir = Vec2::from_angle(base_angle + offset);
            // Nudge the pieces apart so they do not re-collide immediately.
            let pos = original.pos + dir * (original.kind.radius() / 2.0);
            pieces.push(self.new_asteroid(pos, next_kind, dir));
        }
        pieces
    }

    fn spawn_projectile(&mut self, owner: ClientId, now: Instant) {
        let (pos, dir) = {
            let Some(ship) = self.players.get_mut(&owner) else {
                return;
            };
            ship.last_shot = Some(now);
            (
                ship.pos + ship.dir * (PLAYER_RADIUS + PROJECTILE_RADIUS + 1.0),
                ship.dir,
            )
        };
        let id = self.next_id();
        self.projectiles.insert(
            id,
            Projectile {
                id,
                owner,
                pos,
                dir,
                spawned_at: now,
            },
        );
    }

    /// Advance the simulation by `dt` seconds.
    fn update(&mut self, dt: f64, now: Instant) {
        // Ships: apply the latest button state.
        let mut shooters = Vec::new();
        for (id, ship) in self.players.iter_mut() {
            if ship.is_dead() {
                continue;
            }

            let turn = match (ship.input.left, ship.input.right) {
                (true, false) => -1.0,
                (false, true) => 1.0,
                _ => 0.0,
            };
            if turn != 0.0 {
                let angle = TURN_SPEED_DEG.to_radians() * turn * dt;
                ship.dir = ship.dir.rotate(angle).normalize();
            }
            if ship.input.up {
                ship.pos = ship.pos + ship.dir * (PLAYER_SPEED * dt);
            }
            if ship.input.shoot && ship.can_shoot(now) {
                shooters.push(*id);
            }
            ship.pos = wrap_position(ship.pos);
        }
        for id in shooters {
            self.spawn_projectile(id, now);
        }

        // Projectiles: move, wrap, expire.
        for projectile in self.projectiles.values_mut() {
            projectile.pos = wrap_position(projectile.pos + projectile.dir * (PROJECTILE_SPEED * dt));
        }
        self.projectiles
            .retain(|_, p| now.duration_since(p.spawned_at) <= PROJECTILE_LIFETIME);

        // Asteroids drift.
        for asteroid in self.asteroids.values_mut() {
            asteroid.pos = wrap_position(asteroid.pos + asteroid.dir * (asteroid.speed * dt));
        }

        let mut removed_asteroids: BTreeSet<u32> = BTreeSet::new();
        let mut removed_projectiles: BTreeSet<u32> = BTreeSet::new();
        let mut spawned: Vec<Asteroid> = Vec::new();

        // Ships vs asteroids: at most one hit per ship per tick.
        let mut ship_hits = Vec::new();
        for (id, ship) in self.players.iter() {
            if ship.is_dead() || ship.is_invincible(now) {
                continue;
            }
            let hit = self
                .asteroids
                .values()
                .find(|a| circles_overlap(ship.pos, PLAYER_RADIUS, a.pos, a.kind.radius()));
            if let Some(asteroid) = hit {
                ship_hits.push((*id, asteroid.id));
            }
        }
        for (ship_id, asteroid_id) in ship_hits {
            if let Some(ship) = self.players.get_mut(&ship_id) {
                ship.health -= 1;
                debug!("Ship {} hit an asteroid; health now {}", ship_id, ship.health);
                Self::respawn(ship, now);
            }
            if removed_asteroids.insert(asteroid_id) {
                if let Some(asteroid) = self.asteroids.get(&asteroid_id).cloned() {
                    spawned.extend(self.split_asteroid(&asteroid));
                }
            }
        }

        // Projectiles vs asteroids: each projectile hits at most once.
        let flying: Vec<(u32, ClientId, Vec2)> = self
            .projectiles
            .values()
            .map(|p| (p.id, p.owner, p.pos))
            .collect();
        for (projectile_id, owner, pos) in flying {
            let hit = self
                .asteroids
                .values()
                .find(|a| {
                    !removed_asteroids.contains(&a.id)
                        && circles_overlap(pos, PROJECTILE_RADIUS, a.pos, a.kind.radius())
                })
                .map(|a| a.id);
            let Some(asteroid_id) = hit else {
                continue;
            };

            removed_projectiles.insert(projectile_id);
            removed_asteroids.insert(asteroid_id);

            if let Some(asteroid) = self.asteroids.get(&asteroid_id).cloned() {
                // The shooter may have disconnected mid-flight.
                if let Some(shooter) = self.players.get_mut(&owner) {
                    shooter.score += asteroid.kind.points();
                }
                spawned.extend(self.split_asteroid(&asteroid));
            }
        }

        for id in removed_projectiles {
            self.projectiles.remove(&id);
        }
        for id in removed_asteroids {
            self.asteroids.remove(&id);
        }
        for asteroid in spawned {
            self.asteroids.insert(asteroid.id, asteroid);
        }

        // Replenish the field from the edges once it thins out.
        if self.asteroids.len() < INITIAL_ASTEROID_COUNT / 2 && !self.players.is_empty() {
            let pos = {
                let mut rng = rand::thread_rng();
                match rng.gen_range(0..4) {
                    0 => Vec2::new(rng.gen::<f64>() * WORLD_WIDTH, -ASTEROID_SPAWN_PADDING),
                    1 => Vec2::new(
                        rng.gen::<f64>() * WORLD_WIDTH,
                        WORLD_HEIGHT + ASTEROID_SPAWN_PADDING,
                    ),
                    2 => Vec2::new(-ASTEROID_SPAWN_PADDING, rng.gen::<f64>() * WORLD_HEIGHT),
                    _ => Vec2::new(
                        WORLD_WIDTH + ASTEROID_SPAWN_PADDING,
                        rng.gen::<f64>() * WORLD_HEIGHT,
                    ),
                }
            };
            self.spawn_asteroid(pos, AsteroidKind::Large);
        }
    }

    /// The round ends once at most one ship is alive (given a real round
    /// started with at least two players).
    fn is_over(&self) -> bool {
        self.players.len() >= MIN_PLAYERS && self.alive_count() <= 1
    }

    /// Last survivor, else unique top scorer, else `"draw"`.
    fn determine_winner(&self) -> String {
        let alive: Vec<&Ship> = self.players.values().filter(|s| !s.is_dead()).collect();
        match alive.len() {
            1 => alive[0].handle.id().to_string(),
            0 => Self::top_scorer(self.players.values()),
            _ => Self::top_scorer(alive.into_iter()),
        }
    }

    fn top_scorer<'a>(ships: impl Iterator<Item = &'a Ship>) -> String {
        let mut best: Option<(i64, ClientId)> = None;
        let mut tied = false;
        for ship in ships {
            match best {
                None => best = Some((ship.score, ship.handle.id())),
                Some((score, _)) if ship.score > score => {
                    best = Some((ship.score, ship.handle.id()));
                    tied = false;
                }
                Some((score, _)) if ship.score == score => tied = true,
                _ => {}
            }
        }
        match best {
            Some((_, id)) if !tied => id.to_string(),
            _ => "draw".to_string(),
        }
    }

    fn state_payload(&self, now: Instant) -> AsteroidsStatePayload {
        AsteroidsStatePayload {
            players: self
                .players
                .iter()
                .map(|(id, s)| {
                    (
                        *id,
                        ShipState {
                            id: *id,
                            pos: s.pos,
                            dir: s.dir,
                            health: s.health,
                            is_invincible: s.is_invincible(now),
                            score: s.score,
                        },
                    )
                })
                .collect(),
            asteroids: self
                .asteroids
                .values()
                .map(|a| AsteroidState {
                    id: a.id,
                    pos: a.pos,
                    dir: a.dir,
                    kind: a.kind,
                    variant_index: a.variant,
                })
                .collect(),
            projectiles: self
                .projectiles
                .values()
                .map(|p| ProjectileState { id: p.id, pos: p.pos })
                .collect(),
        }
    }

    fn broadcast_state(&self, now: Instant) {
        let payload = self.state_payload(now);
        for ship in self.players.values() {
            ship.handle.send(MessageKind::AsteroidsState, &payload);
        }
    }
}

/// A running Asteroids instance.
pub struct AsteroidsGame {
    id: GameId,
    hub: HubHandle,
    state: Mutex<AsteroidsState>,
    stop_signal: Notify,
    finished: AtomicBool,
}

impl AsteroidsGame {
    /// Create an Asteroids instance reporting to `hub` when it ends.
    pub fn new(id: GameId, hub: HubHandle) -> Self {
        Self {
            id,
            hub,
            state: Mutex::new(AsteroidsState::new()),
            stop_signal: Notify::new(),
            finished: AtomicBool::new(false),
        }
    }

    async fn run(self: Arc<Self>) {
        let insufficient_players = {
            let mut state = self.state.lock().expect("asteroids state lock poisoned");
            if state.players.len() < MIN_PLAYERS {
                warn!(
                    "[game {}] cannot start with {} players",
                    self.id,
                    state.players.len()
                );
                true
            } else {
                state.running = true;
                state.seed_asteroids();
                false
            }
        };
        if insufficient_players {
            self.finish().await;
            return;
        }

        info!("[game {}] starting game loop", self.id);
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f64();
                    last_tick = now;

                    let over = {
                        let mut state = self.state.lock().expect("asteroids state lock poisoned");
                        if !state.running {
                            break;
                        }
                        state.update(dt, now);
                        state.broadcast_state(now);
                        state.is_over()
                    };

                    if over {
                        let winner = {
                            let state = self.state.lock().expect("asteroids state lock poisoned");
                            state.determine_winner()
                        };
                        info!("[game {}] game over. Winner: {}", self.id, winner);
                        self.send_game_over(&winner);
                        break;
                    }
                }
                _ = self.stop_signal.notified() => break,
            }
        }

        info!("[game {}] game loop stopped", self.id);
        self.finish().await;
    }

    fn send_game_over(&self, winner: &str) {
        let state = self.state.lock().expect("asteroids state lock poisoned");
        let payload = AsteroidsGameOverPayload {
            winner: winner.to_string(),
        };
        for ship in state.players.values() {
            ship.handle.send(MessageKind::AsteroidsGameOver, &payload);
        }
    }

    /// Report the result to the hub. Safe to call more than once; only the
    /// first call reports.
    async fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = {
            let state = self.state.lock().expect("asteroids state lock poisoned");
            GameResult {
                score_deltas: state
                    .players
                    .iter()
                    .map(|(id, ship)| (*id, ship.score))
                    .collect(),
            }
        };
        if self.hub.game_finished(self.id, result).await.is_err() {
            warn!("[game {}] hub is gone; result dropped", self.id);
        }
    }
}

impl Game for AsteroidsGame {
    fn id(&self) -> GameId {
        self.id
    }

    fn add_player(&self, player: PlayerHandle) -> Result<(), GameError> {
        let mut state = self.state.lock().expect("asteroids state lock poisoned");

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

        let now = Instant::now();
        state.players.insert(
            id,
            Ship {
                handle: player,
                pos: Vec2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0),
                dir: Vec2::new(0.0, -1.0),
                health: INITIAL_HEALTH,
                score: 0,
                input: AsteroidsInputPayload::default(),
                last_shot: None,
                // Spawn protection while the field settles.
                invincible_until: now + RESPAWN_INVINCIBILITY,
            },
        );
        info!("[game {}] player {} joined", self.id, id);
        Ok(())
    }

    fn remove_player(&self, player: ClientId) {
        let (removed, remaining, running) = {
            let mut state = self.state.lock().expect("asteroids state lock poisoned");
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
            MessageKind::AsteroidsInput => {
                let payload: AsteroidsInputPayload = match serde_json::from_value(frame.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            "[game {}] bad asteroids_input from {}: {}",
                            self.id, player, e
                        );
                        return;
                    }
                };
                let mut state = self.state.lock().expect("asteroids state lock poisoned");
                if let Some(ship) = state.players.get_mut(&player) {
                    ship.input = payload;
                }
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

    const EPS: f64 = 1e-6;

    async fn two_player_game() -> (Arc<AsteroidsGame>, ClientId, ClientId, HubHandle) {
        let (_hub, handle) = Hub::new();
        let game = Arc::new(AsteroidsGame::new(GameId::new(), handle.clone()));

        let (a, _rx_a) = PlayerHandle::channel(ClientId::new());
        let (b, _rx_b) = PlayerHandle::channel(ClientId::new());
        let (id_a, id_b) = (a.id(), b.id());
        game.add_player(a).unwrap();
        game.add_player(b).unwrap();
        game.state.lock().unwrap().running = true;
        (game, id_a, id_b, handle)
    }

    fn make_vulnerable(state: &mut AsteroidsState, id: &ClientId, now: Instant) {
        state.players.get_mut(id).unwrap().invincible_until = now - Duration::from_secs(1);
    }

    #[tokio::test]
    async fn test_add_player_limits() {
        let (_hub, handle) = Hub::new();
        let game = AsteroidsGame::new(GameId::new(), handle);

        for _ in 0..MAX_PLAYERS {
            let (p, _rx) = PlayerHandle::channel(ClientId::new());
            game.add_player(p).unwrap();
        }
        let (extra, _rx) = PlayerHandle::channel(ClientId::new());
        assert!(matches!(game.add_player(extra), Err(GameError::Full { .. })));
    }

    #[tokio::test]
    async fn test_turn_input_rotates_heading() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        state.players.get_mut(&id_a).unwrap().input = AsteroidsInputPayload {
            right: true,
            ..Default::default()
        };
        // 180 deg/s for half a second is a quarter turn: (0,-1) -> (1,0).
        state.update(0.5, now);

        let dir = state.players[&id_a].dir;
        assert!((dir.x - 1.0).abs() < EPS);
        assert!(dir.y.abs() < EPS);
    }

    #[tokio::test]
    async fn test_thrust_moves_along_heading() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        state.players.get_mut(&id_a).unwrap().input = AsteroidsInputPayload {
            up: true,
            ..Default::default()
        };
        let before = state.players[&id_a].pos;
        state.update(0.1, now);

        let after = state.players[&id_a].pos;
        assert!((before.y - after.y - PLAYER_SPEED * 0.1).abs() < EPS);
        assert!((before.x - after.x).abs() < EPS);
    }

    #[tokio::test]
    async fn test_positions_wrap_around_world() {
        assert_eq!(wrap_position(Vec2::new(-5.0, 300.0)).x, WORLD_WIDTH - 5.0);
        assert_eq!(wrap_position(Vec2::new(805.0, 300.0)).x, 5.0);
        assert_eq!(wrap_position(Vec2::new(400.0, -1.0)).y, WORLD_HEIGHT - 1.0);
        assert_eq!(wrap_position(Vec2::new(400.0, 601.0)).y, 1.0);
    }

    #[tokio::test]
    async fn test_shoot_respects_cooldown() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        state.players.get_mut(&id_a).unwrap().input = AsteroidsInputPayload {
            shoot: true,
            ..Default::default()
        };

        state.update(0.0, now);
        assert_eq!(state.projectiles.len(), 1);

        // Within the cooldown window nothing new spawns.
        state.update(0.0, now + Duration::from_millis(100));
        assert_eq!(state.projectiles.len(), 1);

        state.update(0.0, now + SHOOT_COOLDOWN);
        assert_eq!(state.projectiles.len(), 2);
    }

    #[tokio::test]
    async fn test_projectile_splits_large_asteroid_and_scores() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        let target = Vec2::new(100.0, 100.0);
        state.spawn_asteroid(target, AsteroidKind::Large);
        let target_id = *state.asteroids.keys().next().unwrap();

        let projectile_id = state.next_id();
        state.projectiles.insert(
            projectile_id,
            Projectile {
                id: projectile_id,
                owner: id_a,
                pos: target,
                dir: Vec2::new(1.0, 0.0),
                spawned_at: now,
            },
        );

        state.update(0.0, now);

        assert!(!state.asteroids.contains_key(&target_id));
        assert!(!state.projectiles.contains_key(&projectile_id));
        let middles = state
            .asteroids
            .values()
            .filter(|a| a.kind == AsteroidKind::Middle)
            .count();
        assert_eq!(middles, ASTEROID_SPLIT_COUNT);
        assert_eq!(state.players[&id_a].score, ASTEROID_POINTS_LARGE);
    }

    #[tokio::test]
    async fn test_asteroid_hit_damages_and_respawns_ship() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        make_vulnerable(&mut state, &id_a, now);
        let ship_pos = state.players[&id_a].pos;
        state.spawn_asteroid(ship_pos, AsteroidKind::Small);

        state.update(0.0, now);

        let ship = &state.players[&id_a];
        assert_eq!(ship.health, INITIAL_HEALTH - 1);
        assert!(ship.is_invincible(now));
        assert_eq!(ship.pos, Vec2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0));
    }

    #[tokio::test]
    async fn test_invincible_ship_ignores_asteroids() {
        let (game, id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        let ship_pos = state.players[&id_a].pos;
        state.spawn_asteroid(ship_pos, AsteroidKind::Small);

        state.update(0.0, now);

        assert_eq!(state.players[&id_a].health, INITIAL_HEALTH);
    }

    #[tokio::test]
    async fn test_field_replenishes_from_edges() {
        let (game, _id_a, _id_b, _hub) = two_player_game().await;
        let now = Instant::now();

        let mut state = game.state.lock().unwrap();
        assert!(state.asteroids.is_empty());
        state.update(0.0, now);

        assert_eq!(state.asteroids.len(), 1);
        let spawned = state.asteroids.values().next().unwrap();
        assert_eq!(spawned.kind, AsteroidKind::Large);
        // Spawned outside the visible field.
        let p = spawned.pos;
        assert!(p.x < 0.0 || p.x > WORLD_WIDTH || p.y < 0.0 || p.y > WORLD_HEIGHT);
    }

    #[tokio::test]
    async fn test_end_condition_and_survivor_wins() {
        let (game, id_a, id_b, _hub) = two_player_game().await;

        let mut state = game.state.lock().unwrap();
        assert!(!state.is_over());

        state.players.get_mut(&id_b).unwrap().health = 0;
        assert!(state.is_over());
        assert_eq!(state.determine_winner(), id_a.to_string());
    }

    #[tokio::test]
    async fn test_all_dead_falls_back_to_score_then_draw() {
        let (game, id_a, id_b, _hub) = two_player_game().await;

        let mut state = game.state.lock().unwrap();
        state.players.get_mut(&id_a).unwrap().health = 0;
        state.players.get_mut(&id_b).unwrap().health = 0;

        state.players.get_mut(&id_a).unwrap().score = 100;
        state.players.get_mut(&id_b).unwrap().score = 50;
        assert_eq!(state.determine_winner(), id_a.to_string());

        state.players.get_mut(&id_b).unwrap().score = 100;
        assert_eq!(state.determine_winner(), "draw");
    }
}
