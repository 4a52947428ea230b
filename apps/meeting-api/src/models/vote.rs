use serde::{Deserialize, Serialize};

/// Closed ballot option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOption {
    Yes,
    No,
    Abstain,
}

/// Public snapshot of the current poll, broadcast as `vote_status_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub active: bool,
    pub anonymous: bool,
    /// Connected ordinary participants right now, not at vote start.
    pub total_voters: usize,
    pub current_votes: usize,
}

impl VoteStatus {
    /// Every eligible voter has a ballot in an open poll.
    pub fn is_complete(&self) -> bool {
        self.active && self.total_voters > 0 && self.current_votes == self.total_voters
    }
}

/// Fixed three-way tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSummary {
    pub yes: usize,
    pub no: usize,
    pub abstain: usize,
}

impl VoteSummary {
    pub fn record(&mut self, option: VoteOption) {
        match option {
            VoteOption::Yes => self.yes += 1,
            VoteOption::No => self.no += 1,
            VoteOption::Abstain => self.abstain += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotDetail {
    pub display_name: String,
    pub option: VoteOption,
}

/// Result snapshot, broadcast as `vote_result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResults {
    pub anonymous: bool,
    pub summary: VoteSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<BallotDetail>>,
}
