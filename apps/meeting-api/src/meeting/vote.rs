//! Poll state machine: Idle ⇄ Active, plus the ballot set.

use crate::error::MeetingError;
use crate::models::participant::ParticipantId;
use crate::models::vote::{BallotDetail, VoteOption, VoteResults, VoteStatus, VoteSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct VoteConfig {
    active: bool,
    anonymous: bool,
}

/// Owns the poll configuration and ballots. Eligibility is decided by the
/// caller, which knows who is connected.
#[derive(Debug, Default)]
pub struct VoteEngine {
    config: VoteConfig,
    /// Insertion-ordered; a re-vote updates in place.
    ballots: Vec<(ParticipantId, VoteOption)>,
}

impl VoteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.config.active
    }

    /// Open a new poll. Re-entrant: starting while active resets ballots.
    pub fn start(&mut self, anonymous: bool, eligible_voters: usize) -> Result<(), MeetingError> {
        if eligible_voters == 0 {
            return Err(MeetingError::NoEligibleVoters);
        }
        self.ballots.clear();
        self.config = VoteConfig { active: true, anonymous };
        Ok(())
    }

    /// Record or overwrite a ballot. Ignored while idle; returns whether it was recorded.
    pub fn cast(&mut self, voter: &ParticipantId, option: VoteOption) -> bool {
        if !self.config.active {
            return false;
        }
        match self.ballots.iter_mut().find(|(id, _)| id == voter) {
            Some(entry) => entry.1 = option,
            None => self.ballots.push((voter.clone(), option)),
        }
        true
    }

    /// Close the poll. Ballots and the anonymity flag stay queryable.
    /// Returns whether a poll was actually open.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.config.active, false)
    }

    /// Drop a voter's ballot (identity left the meeting for good).
    pub fn remove_ballot(&mut self, voter: &ParticipantId) -> bool {
        let before = self.ballots.len();
        self.ballots.retain(|(id, _)| id != voter);
        before != self.ballots.len()
    }

    pub fn status(&self, total_voters: usize) -> VoteStatus {
        VoteStatus {
            active: self.config.active,
            anonymous: self.config.anonymous,
            total_voters,
            current_votes: self.ballots.len(),
        }
    }

    /// Aggregate ballots. `display_name` resolves a voter for the detailed view;
    /// ballots whose voter cannot be resolved still count in the summary.
    pub fn results<F>(&self, display_name: F) -> VoteResults
    where
        F: Fn(&ParticipantId) -> Option<String>,
    {
        let mut summary = VoteSummary::default();
        let mut details = Vec::new();

        for (voter, option) in &self.ballots {
            summary.record(*option);
            if !self.config.anonymous {
                if let Some(name) = display_name(voter) {
                    details.push(BallotDetail {
                        display_name: name,
                        option: *option,
                    });
                }
            }
        }

        VoteResults {
            anonymous: self.config.anonymous,
            summary,
            details: (!self.config.anonymous).then_some(details),
        }
    }
}
