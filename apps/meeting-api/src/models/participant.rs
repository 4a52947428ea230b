use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use meeting_common::id::prefix;
use meeting_common::PrefixedId;
use serde::{Deserialize, Serialize};

/// Stable participant identity (`ptc_` prefixed ULID). Survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl PrefixedId for ParticipantId {
    const PREFIX: &'static str = prefix::PARTICIPANT;
}

impl ParticipantId {
    pub fn new() -> Self {
        Self(Self::generate())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level connection id (`conn_` prefixed ULID), one per WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl PrefixedId for ConnectionId {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(Self::generate())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of meeting roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary participant: votes and signals readiness.
    Participant,
    Admin,
    Guest,
    Advisor,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Participant, Role::Admin, Role::Guest, Role::Advisor];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Participant => "participant",
            Role::Admin => "admin",
            Role::Guest => "guest",
            Role::Advisor => "advisor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Ready,
}

/// The two independent hand-raise kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandKind {
    /// Wants to open a new topic.
    Topic,
    /// Wants to reply to the current speaker. Always queued ahead of topics.
    Reply,
}

/// Raise instants per hand kind; `None` means the hand is down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandState {
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub topic_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub reply_at: Option<DateTime<Utc>>,
}

impl HandState {
    pub fn get(&self, kind: HandKind) -> Option<DateTime<Utc>> {
        match kind {
            HandKind::Topic => self.topic_at,
            HandKind::Reply => self.reply_at,
        }
    }

    pub fn slot_mut(&mut self, kind: HandKind) -> &mut Option<DateTime<Utc>> {
        match kind {
            HandKind::Topic => &mut self.topic_at,
            HandKind::Reply => &mut self.reply_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    /// Disconnected, identity held until the grace timer fires.
    GracePeriod,
}

/// Externally visible participant record, as broadcast in `state_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub reaction: Option<Reaction>,
    pub hands: HandState,
    pub connection: ConnectionState,
}

impl Participant {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Connected ordinary participants are the only eligible voters.
    pub fn is_eligible_voter(&self) -> bool {
        self.role == Role::Participant && self.is_connected()
    }
}
