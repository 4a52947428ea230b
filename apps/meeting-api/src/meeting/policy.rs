//! Role-based authorization table.
//!
//! A pure decision function: `RolePolicy::allows(action, role)`. The only
//! deployment-configurable entries are the hand-raise role set and whether a
//! reconnect may change the stored role.

use std::collections::HashSet;

use crate::error::MeetingError;
use crate::models::participant::Role;

/// Every role-gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ToggleReaction,
    RaiseHand,
    CastVote,
    ClearReactions,
    ForceLowerHand,
    StartVote,
    StopVote,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::ToggleReaction => "toggle_reaction",
            Action::RaiseHand => "raise_hand",
            Action::CastVote => "cast_vote",
            Action::ClearReactions => "admin_clear_reactions",
            Action::ForceLowerHand => "admin_lower_hand",
            Action::StartVote => "start_vote",
            Action::StopVote => "stop_vote",
        }
    }
}

/// What happens to the stored role when a participant resumes their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinRole {
    /// The role supplied with the rejoin replaces the stored one.
    Overwrite,
    /// The stored role is kept; the supplied one is ignored.
    Keep,
}

impl std::str::FromStr for RejoinRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "keep" => Ok(Self::Keep),
            other => Err(format!("unknown rejoin role policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    hand_raise: HashSet<Role>,
    rejoin_role: RejoinRole,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            hand_raise: default_hand_raise_roles().into_iter().collect(),
            rejoin_role: RejoinRole::Overwrite,
        }
    }
}

/// Every role except the administrator.
pub fn default_hand_raise_roles() -> Vec<Role> {
    vec![Role::Participant, Role::Guest, Role::Advisor]
}

impl RolePolicy {
    pub fn new(hand_raise: impl IntoIterator<Item = Role>, rejoin_role: RejoinRole) -> Self {
        Self {
            hand_raise: hand_raise.into_iter().collect(),
            rejoin_role,
        }
    }

    pub fn allows(&self, action: Action, role: Role) -> bool {
        match action {
            Action::ToggleReaction | Action::CastVote => role == Role::Participant,
            Action::RaiseHand => self.hand_raise.contains(&role),
            Action::ClearReactions
            | Action::ForceLowerHand
            | Action::StartVote
            | Action::StopVote => role == Role::Admin,
        }
    }

    /// `Ok(())` if permitted, `Err(Unauthorized)` otherwise.
    pub fn check(&self, action: Action, role: Role) -> Result<(), MeetingError> {
        if self.allows(action, role) {
            Ok(())
        } else {
            Err(MeetingError::Unauthorized)
        }
    }

    /// Role to store after a successful resume.
    pub fn role_on_rejoin(&self, stored: Role, supplied: Role) -> Role {
        match self.rejoin_role {
            RejoinRole::Overwrite => supplied,
            RejoinRole::Keep => stored,
        }
    }
}
