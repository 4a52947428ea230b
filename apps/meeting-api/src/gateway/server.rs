//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time;

use crate::models::participant::ConnectionId;
use crate::AppState;

use super::events::{ClientCommand, GatewayMessage, HelloPayload, ServerEvent};
use super::handler::{handle_command, Close};
use super::session::GatewaySession;

/// Heartbeat interval announced in `hello` unless configured otherwise.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(41250);

/// Close codes (4000-range for application-level).
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_JOIN_REJECTED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Gives the client time to read the join error before the socket goes away.
const JOIN_REJECT_CLOSE_DELAY: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, ws_rx) = socket.split();
    let mut session = GatewaySession::new(ConnectionId::new());

    // Subscribe before anything can happen on this connection.
    let broadcast_rx = state.broadcast.subscribe();

    tracing::info!(connection_id = %session.connection_id, "gateway connection opened");

    let hello = ServerEvent::Hello(HelloPayload {
        connection_id: session.connection_id.clone(),
        heartbeat_interval: state.config.heartbeat_interval.as_millis() as u64,
    });
    if send_event(&mut ws_tx, &mut session, &hello).await {
        run_session(&state, &mut session, ws_tx, ws_rx, broadcast_rx).await;
    }

    // Starts the grace period if this connection was still bound.
    state.meeting.disconnect(&session.connection_id);

    tracing::info!(connection_id = %session.connection_id, "gateway connection closed");
}

/// Main event loop: read client commands, forward broadcasts, enforce heartbeat.
async fn run_session(
    state: &AppState,
    session: &mut GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut broadcast_rx: broadcast::Receiver<Arc<ServerEvent>>,
) {
    // Client must send something within 1.5× the interval.
    let heartbeat_deadline = state.config.heartbeat_interval * 3 / 2;
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        got_heartbeat = true;

                        let command = match ClientCommand::parse(&text) {
                            Ok(command) => command,
                            Err(reason) => {
                                tracing::debug!(connection_id = %session.connection_id, %reason, "invalid frame");
                                let event = ServerEvent::invalid_payload(reason);
                                if !send_event(&mut ws_tx, session, &event).await {
                                    break;
                                }
                                continue;
                            }
                        };

                        // Anything queued before this join predates the joiner.
                        if !session.has_joined() && matches!(command, ClientCommand::Join(_)) {
                            drain_pending(&mut broadcast_rx);
                        }

                        let reply = handle_command(state, session, command);
                        if !send_all(&mut ws_tx, session, &reply.events).await {
                            break;
                        }

                        match reply.close {
                            Some(Close::JoinRejected) => {
                                time::sleep(JOIN_REJECT_CLOSE_DELAY).await;
                                let _ = send_close(&mut ws_tx, CLOSE_JOIN_REJECTED, "Join rejected").await;
                                break;
                            }
                            Some(Close::LoggedOut) => {
                                let _ = send_close(&mut ws_tx, CLOSE_NORMAL, "Logged out").await;
                                break;
                            }
                            None => {}
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        got_heartbeat = true;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            result = broadcast_rx.recv() => {
                match result {
                    Ok(event) => {
                        if !is_bound(state, session) {
                            continue;
                        }
                        if !send_event(&mut ws_tx, session, &event).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway connection lagged behind broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(connection_id = %session.connection_id, "heartbeat timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Broadcasts go only to connections still bound to a participant. A resume
/// on another connection takes the binding away.
fn is_bound(state: &AppState, session: &mut GatewaySession) -> bool {
    if !session.has_joined() {
        return false;
    }
    if state.meeting.lock().sessions().by_connection(&session.connection_id).is_none() {
        tracing::debug!(connection_id = %session.connection_id, "connection no longer bound");
        session.participant_id = None;
        return false;
    }
    true
}

fn drain_pending(rx: &mut broadcast::Receiver<Arc<ServerEvent>>) -> usize {
    let mut drained = 0;
    loop {
        match rx.try_recv() {
            Ok(_) => drained += 1,
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

/// Frame and send one event. Returns `false` once the socket is gone.
async fn send_event(ws_tx: &mut WsSink, session: &mut GatewaySession, event: &ServerEvent) -> bool {
    let seq = session.next_seq();
    let json = match serde_json::to_string(&GatewayMessage::dispatch(event, seq)) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(?e, connection_id = %session.connection_id, "failed to encode gateway event");
            return true;
        }
    };
    ws_tx.send(Message::Text(json.into())).await.is_ok()
}

async fn send_all(ws_tx: &mut WsSink, session: &mut GatewaySession, events: &[ServerEvent]) -> bool {
    for event in events {
        if !send_event(ws_tx, session, event).await {
            return false;
        }
    }
    true
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
