//! Gateway commands, events, and wire-format frames.
//!
//! Client → server frames are `{ "t": <command>, "d": <payload> }`.
//! Server → client frames are `{ "t": <event>, "s": <seq>, "d": <payload> }`.

use meeting_common::id::{has_prefix, prefix};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorPayload;
use crate::meeting::queue::QueueEntry;
use crate::meeting::StateSnapshot;
use crate::models::participant::{ConnectionId, HandKind, Participant, ParticipantId, Role};
use crate::models::vote::{VoteOption, VoteResults, VoteStatus};

/// Wire `kind` for frames that never reach the meeting engine.
pub const INVALID_PAYLOAD: &str = "InvalidPayload";

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A raw frame received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub t: String,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinPayload {
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub resume_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RaiseHandPayload {
    pub kind: HandKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClearReactionsPayload {
    #[serde(default)]
    pub target_display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LowerHandPayload {
    pub target_id: ParticipantId,
    pub kind: HandKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StartVotePayload {
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CastVotePayload {
    pub option: VoteOption,
}

/// A validated inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Join(JoinPayload),
    Logout,
    ToggleReaction,
    RaiseHand(RaiseHandPayload),
    AdminClearReactions(ClearReactionsPayload),
    AdminLowerHand(LowerHandPayload),
    StartVote(StartVotePayload),
    StopVote,
    CastVote(CastVotePayload),
    Heartbeat,
}

impl ClientCommand {
    /// Decode a text frame. Payloads of commands that take none are ignored.
    pub fn parse(text: &str) -> Result<Self, String> {
        let msg: ClientMessage = serde_json::from_str(text).map_err(|e| format!("invalid frame: {e}"))?;
        Self::from_message(msg)
    }

    pub fn from_message(msg: ClientMessage) -> Result<Self, String> {
        fn payload<T: for<'de> Deserialize<'de>>(t: &str, d: Value) -> Result<T, String> {
            // `null` stands in for an omitted payload.
            let d = if d.is_null() { Value::Object(Default::default()) } else { d };
            serde_json::from_value(d).map_err(|e| format!("invalid {t} payload: {e}"))
        }

        let ClientMessage { t, d } = msg;
        let command = match t.as_str() {
            "join" => Self::Join(payload(&t, d)?),
            "logout" => Self::Logout,
            "toggle_reaction" => Self::ToggleReaction,
            "raise_hand" => Self::RaiseHand(payload(&t, d)?),
            "admin_clear_reactions" => Self::AdminClearReactions(payload(&t, d)?),
            "admin_lower_hand" => {
                let payload: LowerHandPayload = payload(&t, d)?;
                if !has_prefix(&payload.target_id.0, prefix::PARTICIPANT) {
                    return Err(format!("invalid {t} payload: malformed target_id"));
                }
                Self::AdminLowerHand(payload)
            }
            "start_vote" => Self::StartVote(payload(&t, d)?),
            "stop_vote" => Self::StopVote,
            "cast_vote" => Self::CastVote(payload(&t, d)?),
            "heartbeat" => Self::Heartbeat,
            other => return Err(format!("unknown command: {other}")),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Logout => "logout",
            Self::ToggleReaction => "toggle_reaction",
            Self::RaiseHand(_) => "raise_hand",
            Self::AdminClearReactions(_) => "admin_clear_reactions",
            Self::AdminLowerHand(_) => "admin_lower_hand",
            Self::StartVote(_) => "start_vote",
            Self::StopVote => "stop_vote",
            Self::CastVote(_) => "cast_vote",
            Self::Heartbeat => "heartbeat",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelloPayload {
    pub connection_id: ConnectionId,
    /// Milliseconds.
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WelcomePayload {
    pub participant: Participant,
    pub resume_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateUpdatePayload {
    pub participants: Vec<Participant>,
    pub queue: Vec<QueueEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteStartedPayload {
    pub anonymous: bool,
}

/// Every event the server emits, to one connection or to all joined ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ServerEvent {
    Hello(HelloPayload),
    Welcome(WelcomePayload),
    Error(ErrorPayload),
    StateUpdate(StateUpdatePayload),
    VoteStatusUpdate(VoteStatus),
    VoteStarted(VoteStartedPayload),
    VoteResult(VoteResults),
    VoteAccepted,
    HeartbeatAck,
    LoggedOut,
}

impl ServerEvent {
    pub fn error(payload: impl Into<ErrorPayload>) -> Self {
        Self::Error(payload.into())
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload::new(INVALID_PAYLOAD, message))
    }

    /// The pair of broadcasts that follows every state change.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> [Self; 2] {
        [
            Self::StateUpdate(StateUpdatePayload {
                participants: snapshot.participants.clone(),
                queue: snapshot.queue.clone(),
            }),
            Self::VoteStatusUpdate(snapshot.vote),
        ]
    }
}

/// A framed server message. The event supplies `t` and `d`.
#[derive(Debug, Serialize)]
pub struct GatewayMessage<'a> {
    #[serde(flatten)]
    pub event: &'a ServerEvent,
    pub s: u64,
}

impl<'a> GatewayMessage<'a> {
    pub fn dispatch(event: &'a ServerEvent, seq: u64) -> Self {
        Self { event, s: seq }
    }
}
