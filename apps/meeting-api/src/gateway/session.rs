//! Per-connection gateway session state.

use crate::models::participant::{ConnectionId, ParticipantId};

/// State for a single WebSocket connection.
pub struct GatewaySession {
    pub connection_id: ConnectionId,
    /// Set once a `join` succeeds; broadcasts are forwarded only after that.
    pub participant_id: Option<ParticipantId>,
    seq: u64,
}

impl GatewaySession {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            participant_id: None,
            seq: 0,
        }
    }

    pub fn has_joined(&self) -> bool {
        self.participant_id.is_some()
    }

    /// Monotonically increasing sequence number for outbound frames.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}
