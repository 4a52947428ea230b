//! Authoritative registry of participants and connection bindings.
//!
//! Identity is keyed by `ParticipantId` and survives reconnects; a connection
//! is only a transient binding onto it. A disconnected identity stays live in
//! `GracePeriod` until its timer epoch expires or it resumes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

use crate::error::MeetingError;
use crate::models::participant::{
    ConnectionId, ConnectionState, HandKind, HandState, Participant, ParticipantId, Reaction, Role,
};

use super::policy::RolePolicy;
use super::queue::{self, HandMode};

/// Generate an opaque resume credential.
pub fn generate_resume_token() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = [0u8; 32];
    rand::thread_rng().fill(&mut buf[..]);
    format!(
        "{}_{}",
        meeting_common::id::prefix::RESUME,
        URL_SAFE_NO_PAD.encode(buf)
    )
}

/// A pending grace-expiry timer. The epoch identifies which timer is current;
/// a timer whose epoch no longer matches is stale and must not expire anyone.
#[derive(Debug)]
struct GraceTimer {
    epoch: u64,
    handle: Option<AbortHandle>,
}

impl GraceTimer {
    fn cancel(self) {
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct Entry {
    participant: Participant,
    resume_token: String,
    connection: Option<ConnectionId>,
    grace: Option<GraceTimer>,
}

impl Entry {
    fn cancel_grace(&mut self) {
        if let Some(timer) = self.grace.take() {
            timer.cancel();
        }
    }
}

/// Outcome of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub participant: Participant,
    pub resume_token: String,
    /// An existing identity was resumed rather than created.
    pub resumed: bool,
    /// A previous connection of the same identity that lost its binding.
    pub displaced: Option<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    entries: HashMap<ParticipantId, Entry>,
    /// Identity creation order.
    order: Vec<ParticipantId>,
    bindings: HashMap<ConnectionId, ParticipantId>,
    tokens: HashMap<String, ParticipantId>,
    next_epoch: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a new identity, or resume an existing one with its resume token.
    ///
    /// Everything is validated before anything is mutated.
    pub fn join(
        &mut self,
        connection: &ConnectionId,
        display_name: &str,
        role: Role,
        resume_token: Option<&str>,
        policy: &RolePolicy,
    ) -> Result<Joined, MeetingError> {
        if self.bindings.contains_key(connection) {
            return Err(MeetingError::AlreadyJoined);
        }

        if let Some(id) = resume_token.and_then(|t| self.tokens.get(t)).cloned() {
            if let Some(joined) = self.resume(connection, &id, role, policy) {
                return Ok(joined);
            }
        }

        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(MeetingError::InvalidDisplayName);
        }
        if self.find_by_name(display_name).is_some() {
            return Err(MeetingError::NameTaken);
        }
        if resume_token.is_some() {
            return Err(MeetingError::InvalidResumeToken);
        }

        let id = ParticipantId::new();
        let token = generate_resume_token();
        let participant = Participant {
            id: id.clone(),
            display_name: display_name.to_string(),
            role,
            reaction: None,
            hands: HandState::default(),
            connection: ConnectionState::Connected,
        };

        self.entries.insert(
            id.clone(),
            Entry {
                participant: participant.clone(),
                resume_token: token.clone(),
                connection: Some(connection.clone()),
                grace: None,
            },
        );
        self.order.push(id.clone());
        self.tokens.insert(token.clone(), id.clone());
        self.bindings.insert(connection.clone(), id);

        Ok(Joined {
            participant,
            resume_token: token,
            resumed: false,
            displaced: None,
        })
    }

    fn resume(
        &mut self,
        connection: &ConnectionId,
        id: &ParticipantId,
        role: Role,
        policy: &RolePolicy,
    ) -> Option<Joined> {
        let entry = self.entries.get_mut(id)?;

        entry.cancel_grace();
        let displaced = entry
            .connection
            .replace(connection.clone())
            .filter(|old| old != connection);
        entry.participant.role = policy.role_on_rejoin(entry.participant.role, role);
        entry.participant.connection = ConnectionState::Connected;

        let joined = Joined {
            participant: entry.participant.clone(),
            resume_token: entry.resume_token.clone(),
            resumed: true,
            displaced: displaced.clone(),
        };

        if let Some(old) = displaced {
            self.bindings.remove(&old);
        }
        self.bindings.insert(connection.clone(), id.clone());
        Some(joined)
    }

    /// Unbind a connection and move its identity into the grace period.
    ///
    /// Returns the identity and the epoch the caller must schedule expiry
    /// for. `None` if the connection was not bound.
    pub fn disconnect(&mut self, connection: &ConnectionId) -> Option<(ParticipantId, u64)> {
        let id = self.bindings.remove(connection)?;
        self.next_epoch += 1;
        let epoch = self.next_epoch;

        let entry = self.entries.get_mut(&id)?;
        entry.connection = None;
        entry.participant.connection = ConnectionState::GracePeriod;
        entry.cancel_grace();
        entry.grace = Some(GraceTimer { epoch, handle: None });
        Some((id, epoch))
    }

    /// Attach the task handle of a scheduled expiry. A handle for an epoch
    /// that is no longer current is aborted immediately.
    pub fn arm_grace_timer(&mut self, id: &ParticipantId, epoch: u64, handle: AbortHandle) -> bool {
        match self.entries.get_mut(id).and_then(|e| e.grace.as_mut()) {
            Some(timer) if timer.epoch == epoch => {
                timer.handle = Some(handle);
                true
            }
            _ => {
                handle.abort();
                false
            }
        }
    }

    /// Timer callback. Removes the identity only if it is still waiting on
    /// exactly this timer; a reconnect in the meantime wins.
    pub fn expire(&mut self, id: &ParticipantId, epoch: u64) -> Option<Participant> {
        let entry = self.entries.get_mut(id)?;
        let current = entry.participant.connection == ConnectionState::GracePeriod
            && entry.grace.as_ref().is_some_and(|t| t.epoch == epoch);
        if !current {
            return None;
        }
        // The firing task is the one holding this handle; nothing to abort.
        entry.grace = None;
        self.remove(id)
    }

    /// Explicit exit: remove the bound identity immediately.
    pub fn logout(&mut self, connection: &ConnectionId) -> Result<Participant, MeetingError> {
        let id = self
            .bindings
            .get(connection)
            .cloned()
            .ok_or(MeetingError::NotAuthenticated)?;
        self.remove(&id).ok_or(MeetingError::NotAuthenticated)
    }

    /// Fully remove an identity: entry, order slot, token, binding, timer.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        let mut entry = self.entries.remove(id)?;
        entry.cancel_grace();
        self.order.retain(|o| o != id);
        self.tokens.remove(&entry.resume_token);
        if let Some(conn) = entry.connection.take() {
            self.bindings.remove(&conn);
        }
        Some(entry.participant)
    }

    pub fn by_identity(&self, id: &ParticipantId) -> Option<&Participant> {
        self.entries.get(id).map(|e| &e.participant)
    }

    pub fn by_connection(&self, connection: &ConnectionId) -> Option<&Participant> {
        self.bindings
            .get(connection)
            .and_then(|id| self.by_identity(id))
    }

    /// Case-insensitive display-name lookup among live identities.
    pub fn find_by_name(&self, display_name: &str) -> Option<&Participant> {
        let wanted = display_name.trim().to_lowercase();
        self.participants()
            .find(|p| p.display_name.to_lowercase() == wanted)
    }

    /// Live participants in identity-creation order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.by_identity(id))
    }

    pub fn list_participants(&self) -> Vec<Participant> {
        self.participants().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Connected ordinary participants.
    pub fn eligible_voters(&self) -> usize {
        self.participants().filter(|p| p.is_eligible_voter()).count()
    }

    pub fn toggle_reaction(&mut self, id: &ParticipantId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let p = &mut entry.participant;
        p.reaction = match p.reaction {
            Some(Reaction::Ready) => None,
            None => Some(Reaction::Ready),
        };
        true
    }

    /// Clear one participant's reaction (by display name) or everyone's.
    /// Returns whether anything changed.
    pub fn clear_reactions(&mut self, target_display_name: Option<&str>) -> bool {
        let target = match target_display_name {
            Some(name) => match self.find_by_name(name) {
                Some(p) => Some(p.id.clone()),
                None => return false,
            },
            None => None,
        };

        let mut changed = false;
        for entry in self.entries.values_mut() {
            if target.as_ref().is_some_and(|t| *t != entry.participant.id) {
                continue;
            }
            changed |= entry.participant.reaction.take().is_some();
        }
        changed
    }

    pub fn set_hand(&mut self, id: &ParticipantId, kind: HandKind, mode: HandMode, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => queue::apply_hand(&mut entry.participant, kind, mode, now),
            None => false,
        }
    }

    #[cfg(test)]
    fn grace_epoch(&self, id: &ParticipantId) -> Option<u64> {
        self.entries.get(id)?.grace.as_ref().map(|t| t.epoch)
    }
}
