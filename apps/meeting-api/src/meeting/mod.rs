//! The session/state engine.
//!
//! `Meeting` is the single owned store object: participants and bindings
//! (`SessionStore`), the poll (`VoteEngine`), the role table (`RolePolicy`),
//! and at most one state-change listener. It is synchronous and never
//! notifies on its own; callers mutate, then call `notify` once.
//!
//! `MeetingHub` is the cloneable handle shared with the gateway. It puts the
//! meeting behind one mutex (the single-writer timeline) and owns the
//! grace-period timers, which are tokio tasks that call back into the hub.

pub mod policy;
pub mod queue;
pub mod store;
pub mod vote;

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::error::MeetingError;
use crate::models::participant::{ConnectionId, HandKind, Participant, ParticipantId, Role};
use crate::models::vote::{VoteOption, VoteResults, VoteStatus};

use policy::{Action, RolePolicy};
use queue::{HandMode, QueueEntry};
use store::{Joined, SessionStore};
use vote::VoteEngine;

/// Default reconnect window.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Everything a client needs to render the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub participants: Vec<Participant>,
    pub queue: Vec<QueueEntry>,
    pub vote: VoteStatus,
}

/// Receives a fresh snapshot after every externally visible change.
/// Runs under the meeting lock: it must only enqueue, never call back in.
pub type StateListener = Box<dyn Fn(&StateSnapshot) + Send + Sync>;

pub struct Meeting {
    sessions: SessionStore,
    votes: VoteEngine,
    policy: RolePolicy,
    listener: Option<StateListener>,
}

impl Meeting {
    pub fn new(policy: RolePolicy) -> Self {
        Self {
            sessions: SessionStore::new(),
            votes: VoteEngine::new(),
            policy,
            listener: None,
        }
    }

    /// Register the state-change listener, replacing any previous one.
    pub fn set_listener(&mut self, listener: StateListener) {
        self.listener = Some(listener);
    }

    pub fn notify(&self) {
        if let Some(listener) = &self.listener {
            listener(&self.snapshot());
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            participants: self.sessions.list_participants(),
            queue: queue::speaking_queue(self.sessions.participants()),
            vote: self.vote_status(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn vote_status(&self) -> VoteStatus {
        self.votes.status(self.sessions.eligible_voters())
    }

    pub fn vote_results(&self) -> VoteResults {
        self.votes.results(|id| {
            self.sessions
                .by_identity(id)
                .map(|p| p.display_name.clone())
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn join(
        &mut self,
        connection: &ConnectionId,
        display_name: &str,
        role: Role,
        resume_token: Option<&str>,
    ) -> Result<Joined, MeetingError> {
        let joined = self
            .sessions
            .join(connection, display_name, role, resume_token, &self.policy)?;

        tracing::info!(
            connection_id = %connection,
            participant_id = %joined.participant.id,
            display_name = %joined.participant.display_name,
            role = %joined.participant.role,
            resumed = joined.resumed,
            "participant joined"
        );
        Ok(joined)
    }

    /// Move the bound participant into the grace period. The caller owns
    /// scheduling the returned expiry epoch.
    pub fn disconnect(&mut self, connection: &ConnectionId) -> Option<(ParticipantId, u64)> {
        let (id, epoch) = self.sessions.disconnect(connection)?;
        tracing::info!(connection_id = %connection, participant_id = %id, "participant in grace period");
        Some((id, epoch))
    }

    pub fn logout(&mut self, connection: &ConnectionId) -> Result<Participant, MeetingError> {
        let participant = self.sessions.logout(connection)?;
        self.votes.remove_ballot(&participant.id);
        tracing::info!(
            connection_id = %connection,
            participant_id = %participant.id,
            "participant logged out"
        );
        Ok(participant)
    }

    /// Grace-timer callback; a no-op unless the identity is still waiting on
    /// this exact timer.
    pub fn expire(&mut self, id: &ParticipantId, epoch: u64) -> Option<Participant> {
        let participant = self.sessions.expire(id, epoch)?;
        self.votes.remove_ballot(&participant.id);
        tracing::info!(
            participant_id = %participant.id,
            display_name = %participant.display_name,
            "grace period expired, participant removed"
        );
        Some(participant)
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// Resolve the acting participant from its connection and check the role table.
    fn authorize(&self, connection: &ConnectionId, action: Action) -> Result<ParticipantId, MeetingError> {
        let actor = self
            .sessions
            .by_connection(connection)
            .ok_or(MeetingError::NotAuthenticated)?;

        if let Err(err) = self.policy.check(action, actor.role) {
            tracing::warn!(
                participant_id = %actor.id,
                display_name = %actor.display_name,
                role = %actor.role,
                action = action.as_str(),
                "action denied"
            );
            return Err(err);
        }
        Ok(actor.id.clone())
    }

    // -----------------------------------------------------------------------
    // Participant actions
    // -----------------------------------------------------------------------

    pub fn toggle_reaction(&mut self, connection: &ConnectionId) -> Result<bool, MeetingError> {
        let id = self.authorize(connection, Action::ToggleReaction)?;
        Ok(self.sessions.toggle_reaction(&id))
    }

    /// Toggle the actor's own hand of `kind`.
    pub fn raise_hand(
        &mut self,
        connection: &ConnectionId,
        kind: HandKind,
        now: DateTime<Utc>,
    ) -> Result<bool, MeetingError> {
        let id = self.authorize(connection, Action::RaiseHand)?;
        Ok(self.sessions.set_hand(&id, kind, HandMode::Toggle, now))
    }

    /// Record a ballot. Silently ignored while no poll is open.
    pub fn cast_vote(&mut self, connection: &ConnectionId, option: VoteOption) -> Result<bool, MeetingError> {
        let id = self.authorize(connection, Action::CastVote)?;
        Ok(self.votes.cast(&id, option))
    }

    // -----------------------------------------------------------------------
    // Admin actions
    // -----------------------------------------------------------------------

    pub fn clear_reactions(
        &mut self,
        connection: &ConnectionId,
        target_display_name: Option<&str>,
    ) -> Result<bool, MeetingError> {
        self.authorize(connection, Action::ClearReactions)?;
        Ok(self.sessions.clear_reactions(target_display_name))
    }

    /// Force another participant's hand down. Idempotent.
    pub fn lower_hand(
        &mut self,
        connection: &ConnectionId,
        target: &ParticipantId,
        kind: HandKind,
    ) -> Result<bool, MeetingError> {
        self.authorize(connection, Action::ForceLowerHand)?;
        Ok(self.sessions.set_hand(target, kind, HandMode::ForceLower, Utc::now()))
    }

    pub fn start_vote(&mut self, connection: &ConnectionId, anonymous: bool) -> Result<(), MeetingError> {
        self.authorize(connection, Action::StartVote)?;
        self.votes.start(anonymous, self.sessions.eligible_voters())?;
        tracing::info!(anonymous, total_voters = self.sessions.eligible_voters(), "vote started");
        Ok(())
    }

    /// Close the poll. Returns the results captured while it was still open,
    /// or `None` when there was no open poll.
    pub fn stop_vote(&mut self, connection: &ConnectionId) -> Result<Option<VoteResults>, MeetingError> {
        self.authorize(connection, Action::StopVote)?;
        Ok(self.close_vote())
    }

    /// Auto-close rule: once every eligible voter has a ballot, capture the
    /// results and stop the poll.
    pub fn close_if_complete(&mut self) -> Option<VoteResults> {
        if !self.vote_status().is_complete() {
            return None;
        }
        tracing::info!("all eligible voters have voted, closing vote");
        self.close_vote()
    }

    fn close_vote(&mut self) -> Option<VoteResults> {
        if !self.votes.is_active() {
            return None;
        }
        let results = self.vote_results();
        self.votes.stop();
        tracing::info!(
            yes = results.summary.yes,
            no = results.summary.no,
            abstain = results.summary.abstain,
            "vote closed"
        );
        Some(results)
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Shared handle to the one `Meeting` of this process.
#[derive(Clone)]
pub struct MeetingHub {
    inner: Arc<Mutex<Meeting>>,
    grace_period: Duration,
}

impl MeetingHub {
    pub fn new(meeting: Meeting, grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(meeting)),
            grace_period,
        }
    }

    /// Enter the single-writer timeline.
    pub fn lock(&self) -> MutexGuard<'_, Meeting> {
        self.inner.lock()
    }

    pub fn set_listener(&self, listener: StateListener) {
        self.inner.lock().set_listener(listener);
    }

    /// Transport lost the connection: start the grace period and schedule
    /// expiry. Must be called from within a tokio runtime.
    pub fn disconnect(&self, connection: &ConnectionId) -> Option<ParticipantId> {
        let mut meeting = self.inner.lock();
        let (id, epoch) = meeting.disconnect(connection)?;

        let weak: Weak<Mutex<Meeting>> = Arc::downgrade(&self.inner);
        let grace = self.grace_period;
        let expiring = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                let mut meeting = inner.lock();
                if meeting.expire(&expiring, epoch).is_some() {
                    meeting.notify();
                }
            }
        });

        // The task cannot reach the lock before we release it.
        meeting.sessions.arm_grace_timer(&id, epoch, task.abort_handle());
        meeting.notify();
        Some(id)
    }
}
