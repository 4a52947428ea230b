//! Command dispatch: one inbound command in, direct replies out.
//!
//! Each command runs to completion under the meeting lock: validate,
//! mutate, push any broadcast events, then notify once. Replies meant only
//! for the caller are returned to the connection loop.

use chrono::Utc;

use crate::error::MeetingError;
use crate::meeting::Meeting;
use crate::AppState;

use super::events::{ClientCommand, ServerEvent, VoteStartedPayload, WelcomePayload};
use super::session::GatewaySession;

/// How the connection should end after the replies are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Close {
    /// Join failed: close after a short delay so the error is read first.
    JoinRejected,
    LoggedOut,
}

#[derive(Debug, Default)]
pub struct Reply {
    pub events: Vec<ServerEvent>,
    pub close: Option<Close>,
}

impl Reply {
    fn event(event: ServerEvent) -> Self {
        Self {
            events: vec![event],
            close: None,
        }
    }

    fn error(err: &MeetingError) -> Self {
        Self::event(ServerEvent::error(err))
    }
}

impl From<Result<(), MeetingError>> for Reply {
    fn from(result: Result<(), MeetingError>) -> Self {
        match result {
            Ok(()) => Self::default(),
            Err(err) => Self::error(&err),
        }
    }
}

pub fn handle_command(state: &AppState, session: &mut GatewaySession, command: ClientCommand) -> Reply {
    let name = command.name();
    let connection = session.connection_id.clone();

    let reply = match command {
        ClientCommand::Heartbeat => Reply::event(ServerEvent::HeartbeatAck),

        ClientCommand::Join(payload) => {
            let mut meeting = state.meeting.lock();
            let joined = meeting.join(
                &connection,
                &payload.display_name,
                payload.role,
                payload.resume_token.as_deref(),
            );
            match joined {
                Ok(joined) => {
                    if let Some(displaced) = &joined.displaced {
                        tracing::info!(
                            connection_id = %displaced,
                            participant_id = %joined.participant.id,
                            "connection displaced by resume"
                        );
                    }
                    session.participant_id = Some(joined.participant.id.clone());
                    meeting.notify();
                    Reply::event(ServerEvent::Welcome(WelcomePayload {
                        participant: joined.participant,
                        resume_token: joined.resume_token,
                    }))
                }
                Err(err) => {
                    let mut reply = Reply::error(&err);
                    if err.closes_connection() {
                        reply.close = Some(Close::JoinRejected);
                    }
                    reply
                }
            }
        }

        ClientCommand::Logout => {
            let mut meeting = state.meeting.lock();
            match meeting.logout(&connection) {
                Ok(_) => {
                    session.participant_id = None;
                    meeting.notify();
                    Reply {
                        events: vec![ServerEvent::LoggedOut],
                        close: Some(Close::LoggedOut),
                    }
                }
                Err(err) => Reply::error(&err),
            }
        }

        ClientCommand::ToggleReaction => {
            let mut meeting = state.meeting.lock();
            let result = meeting.toggle_reaction(&connection);
            changed(&meeting, result)
        }

        ClientCommand::RaiseHand(payload) => {
            let mut meeting = state.meeting.lock();
            let result = meeting.raise_hand(&connection, payload.kind, Utc::now());
            changed(&meeting, result)
        }

        ClientCommand::AdminClearReactions(payload) => {
            let mut meeting = state.meeting.lock();
            let result = meeting.clear_reactions(&connection, payload.target_display_name.as_deref());
            changed(&meeting, result)
        }

        ClientCommand::AdminLowerHand(payload) => {
            let mut meeting = state.meeting.lock();
            let result = meeting.lower_hand(&connection, &payload.target_id, payload.kind);
            changed(&meeting, result)
        }

        ClientCommand::StartVote(payload) => {
            let mut meeting = state.meeting.lock();
            let result = meeting.start_vote(&connection, payload.anonymous).map(|()| {
                state.broadcast.dispatch(ServerEvent::VoteStarted(VoteStartedPayload {
                    anonymous: payload.anonymous,
                }));
                meeting.notify();
            });
            result.into()
        }

        ClientCommand::StopVote => {
            let mut meeting = state.meeting.lock();
            match meeting.stop_vote(&connection) {
                Ok(Some(results)) => {
                    state.broadcast.dispatch(ServerEvent::VoteResult(results));
                    meeting.notify();
                    Reply::default()
                }
                Ok(None) => Reply::default(),
                Err(err) => Reply::error(&err),
            }
        }

        ClientCommand::CastVote(payload) => {
            let mut meeting = state.meeting.lock();
            match meeting.cast_vote(&connection, payload.option) {
                Ok(true) => {
                    close_if_complete(state, &mut meeting);
                    meeting.notify();
                    Reply::event(ServerEvent::VoteAccepted)
                }
                Ok(false) => Reply::default(),
                Err(err) => Reply::error(&err),
            }
        }
    };

    if let Some(ServerEvent::Error(err)) = reply.events.first() {
        tracing::debug!(connection_id = %connection, command = name, kind = %err.kind, "command rejected");
        // A resume elsewhere took this connection's binding.
        if err.kind == MeetingError::NotAuthenticated.kind() {
            session.participant_id = None;
        }
    }
    reply
}

/// Results go out before the state broadcast that shows the poll closed.
fn close_if_complete(state: &AppState, meeting: &mut Meeting) {
    if let Some(results) = meeting.close_if_complete() {
        state.broadcast.dispatch(ServerEvent::VoteResult(results));
    }
}

/// Notify only when something externally visible changed.
fn changed(meeting: &Meeting, result: Result<bool, MeetingError>) -> Reply {
    match result {
        Ok(true) => {
            meeting.notify();
            Reply::default()
        }
        Ok(false) => Reply::default(),
        Err(err) => Reply::error(&err),
    }
}
