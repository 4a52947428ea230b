#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use meeting_api::config::Config;
use meeting_api::AppState;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_state(config: Config) -> AppState {
    AppState::new(config)
}

pub fn test_app() -> (Router, AppState) {
    let state = test_state(Config::default());
    let app = meeting_api::routes::router().with_state(state.clone());
    (app, state)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the background.
pub async fn start_ws_server(config: Config) -> (SocketAddr, AppState) {
    let state = test_state(config);
    let app = meeting_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Open a gateway connection and consume `hello`.
pub async fn connect(addr: SocketAddr) -> (Ws, Value) {
    let url = format!("ws://{addr}/gateway");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    let hello = recv(&mut ws).await;
    assert_eq!(hello["t"], "hello");
    (ws, hello)
}

pub async fn send(ws: &mut Ws, t: &str, d: Value) {
    let frame = serde_json::json!({ "t": t, "d": d });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Next text frame as JSON. Panics on close or timeout.
pub async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

/// Skip frames until one with event name `t` arrives.
pub async fn recv_until(ws: &mut Ws, t: &str) -> Value {
    loop {
        let frame = recv(ws).await;
        if frame["t"] == t {
            return frame;
        }
    }
}

/// Collect every frame up to and including the first one matching `done`.
pub async fn recv_through(ws: &mut Ws, done: impl Fn(&Value) -> bool) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = recv(ws).await;
        let finished = done(&frame);
        frames.push(frame);
        if finished {
            return frames;
        }
    }
}

/// Join and return the `welcome` payload. Drains the joiner's own state broadcast.
pub async fn join(ws: &mut Ws, display_name: &str, role: &str) -> Value {
    send(ws, "join", serde_json::json!({ "display_name": display_name, "role": role })).await;
    let welcome = recv(ws).await;
    assert_eq!(welcome["t"], "welcome", "unexpected frame: {welcome}");
    recv_until(ws, "vote_status_update").await;
    welcome["d"].clone()
}

pub async fn expect_close(ws: &mut Ws, code: u16) {
    loop {
        let msg = time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::from(code));
                return;
            }
            Message::Text(_) | Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected close frame, got: {other:?}"),
        }
    }
}

pub fn participant_named<'a>(state_update: &'a Value, name: &str) -> Option<&'a Value> {
    state_update["d"]["participants"]
        .as_array()?
        .iter()
        .find(|p| p["display_name"] == name)
}
