//! Integration tests for the lobby and game lifecycle
//!
//! Each test drives a real bound server over real WebSocket clients and
//! validates the wire-level behavior a browser client would observe.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use arcade_server::{ArcadeServer, ServerConfig};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> SocketAddr {
    let config = ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    };
    let server = ArcadeServer::bind(config).await.expect("bind failed");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.run());
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("connect failed");
    ws
}

async fn recv_frame(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is not valid JSON");
        }
    }
}

/// Read frames until one of the given type arrives, skipping the rest.
async fn recv_until(ws: &mut WsClient, kind: &str) -> Value {
    for _ in 0..500 {
        let frame = recv_frame(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
    panic!("never received a {} frame", kind);
}

async fn send(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string()))
        .await
        .expect("send failed");
}

async fn select_game(ws: &mut WsClient, game: &str) {
    send(ws, json!({"type": "select_game", "payload": {"game": game}})).await;
}

/// S1: a fresh client gets a welcome with the catalog, then a lobby update
/// listing exactly itself with zeroed state.
#[tokio::test]
async fn welcome_and_initial_lobby_state() {
    let addr = start_server().await;
    let mut ws = connect(addr).await;

    let welcome = recv_frame(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    let client_id = welcome["payload"]["clientId"]
        .as_str()
        .expect("clientId is a string")
        .to_string();
    assert!(!client_id.is_empty());

    let games: Vec<&str> = welcome["payload"]["currentGames"]
        .as_array()
        .expect("currentGames is a list")
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert!(games.contains(&"Asteroids"));
    assert!(games.contains(&"Pong"));

    let update = recv_until(&mut ws, "update_lobby").await;
    let players = update["payload"]["players"]
        .as_object()
        .expect("players is a map");
    assert_eq!(players.len(), 1);
    let me = &players[&client_id];
    assert_eq!(me["score"], 0);
    assert_eq!(me["inGame"], false);
    assert_eq!(me["selectedGame"], "");
    assert!(me["name"].as_str().is_some_and(|n| !n.is_empty()));
}

/// S5: voting for an unknown game earns an error frame and changes nothing.
#[tokio::test]
async fn invalid_selection_is_rejected() {
    let addr = start_server().await;
    let mut ws = connect(addr).await;
    recv_until(&mut ws, "update_lobby").await;

    select_game(&mut ws, "Tetris").await;

    let error = recv_until(&mut ws, "error").await;
    assert!(error["payload"]["message"]
        .as_str()
        .is_some_and(|m| !m.is_empty()));
}

/// P7: reconnecting yields a fresh id.
#[tokio::test]
async fn reconnect_mints_fresh_id() {
    let addr = start_server().await;

    let mut first = connect(addr).await;
    let welcome = recv_frame(&mut first).await;
    let first_id = welcome["payload"]["clientId"].as_str().unwrap().to_string();
    first.close(None).await.expect("close failed");

    let mut second = connect(addr).await;
    let welcome = recv_frame(&mut second).await;
    let second_id = welcome["payload"]["clientId"].as_str().unwrap().to_string();

    assert_ne!(first_id, second_id);
}

/// Only the configured endpoint upgrades; anything else is rejected during
/// the handshake.
#[tokio::test]
async fn unknown_path_is_rejected() {
    let addr = start_server().await;
    assert!(connect_async(format!("ws://{}/other", addr)).await.is_err());
}

/// S2 + S3 + S4: a full Pong round. Two players vote, both get the same
/// game id, state frames flow, an input moves the paddle by exactly one
/// step, and a disconnect sends the survivor back to the lobby.
#[tokio::test]
async fn pong_round_lifecycle() {
    let addr = start_server().await;

    let mut alice = connect(addr).await;
    let alice_id = recv_frame(&mut alice).await["payload"]["clientId"]
        .as_str()
        .unwrap()
        .to_string();
    let mut bob = connect(addr).await;
    recv_frame(&mut bob).await;

    // S2: both vote Pong; the round closes with a shared game id.
    select_game(&mut alice, "Pong").await;
    select_game(&mut bob, "Pong").await;

    let selected_a = recv_until(&mut alice, "game_selected").await;
    let selected_b = recv_until(&mut bob, "game_selected").await;
    assert_eq!(selected_a["payload"]["selectedGame"], "Pong");
    assert_eq!(
        selected_a["payload"]["gameId"],
        selected_b["payload"]["gameId"]
    );

    // Both receive periodic state frames.
    let state = recv_until(&mut alice, "pong_state").await;
    recv_until(&mut bob, "pong_state").await;

    // S3: one "up" input moves Alice's paddle by exactly one step in the
    // next broadcasts.
    let alice_is_left = state["payload"]["player_1"] == alice_id.as_str();
    let paddle_key = if alice_is_left {
        "paddle_1_y"
    } else {
        "paddle_2_y"
    };
    let before = state["payload"][paddle_key].as_f64().unwrap();

    send(
        &mut alice,
        json!({"type": "pong_input", "payload": {"direction": "up"}}),
    )
    .await;

    let expected = (before + 10.0).min(600.0 - 30.0);
    let mut moved = false;
    for _ in 0..120 {
        let state = recv_until(&mut alice, "pong_state").await;
        let y = state["payload"][paddle_key].as_f64().unwrap();
        if (y - expected).abs() < 1e-9 {
            moved = true;
            break;
        }
    }
    assert!(moved, "paddle never moved by one step");

    // S4: Bob drops; the game folds and Alice returns to the lobby.
    bob.close(None).await.expect("close failed");

    recv_until(&mut alice, "back_to_lobby").await;
    let update = recv_until(&mut alice, "update_lobby").await;
    let players = update["payload"]["players"].as_object().unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[&alice_id]["inGame"], false);
}

/// P10: a mid-vote disconnect releases the vote and lets the remaining
/// lobby auto-start.
#[tokio::test]
async fn disconnect_completes_vote_round() {
    let addr = start_server().await;

    let mut alice = connect(addr).await;
    recv_frame(&mut alice).await;
    let mut bob = connect(addr).await;
    recv_frame(&mut bob).await;
    let mut carol = connect(addr).await;
    recv_frame(&mut carol).await;

    select_game(&mut alice, "Asteroids").await;
    select_game(&mut bob, "Asteroids").await;

    // Carol never votes, so nothing starts until she leaves.
    carol.close(None).await.expect("close failed");

    let selected = recv_until(&mut alice, "game_selected").await;
    assert_eq!(selected["payload"]["selectedGame"], "Asteroids");
    recv_until(&mut alice, "asteroids_state").await;
    recv_until(&mut bob, "asteroids_state").await;
}
