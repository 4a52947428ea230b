//! Speaking-queue ordering over participant hand state.
//!
//! Replies always go ahead of topics; inside a kind the earliest raise wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::participant::{HandKind, Participant, ParticipantId};

/// How a hand change is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandMode {
    /// Raise a lowered hand, lower a raised one.
    Toggle,
    /// Lower unconditionally. Never raises.
    ForceLower,
}

/// One position in the speaking queue. A participant with both hands raised
/// occupies two entries, one per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub kind: HandKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub raised_at: DateTime<Utc>,
}

fn band(kind: HandKind) -> u8 {
    match kind {
        HandKind::Reply => 0,
        HandKind::Topic => 1,
    }
}

/// Build the ordered speaking queue. Ties keep participant list order.
pub fn speaking_queue<'a, I>(participants: I) -> Vec<QueueEntry>
where
    I: IntoIterator<Item = &'a Participant>,
{
    let mut entries: Vec<QueueEntry> = participants
        .into_iter()
        .flat_map(|p| {
            [HandKind::Reply, HandKind::Topic]
                .into_iter()
                .filter_map(move |kind| {
                    p.hands.get(kind).map(|raised_at| QueueEntry {
                        participant_id: p.id.clone(),
                        display_name: p.display_name.clone(),
                        kind,
                        raised_at,
                    })
                })
        })
        .collect();

    // sort_by_key is stable.
    entries.sort_by_key(|e| (band(e.kind), e.raised_at));
    entries
}

/// Apply a hand change to one participant. Returns whether anything changed.
pub fn apply_hand(participant: &mut Participant, kind: HandKind, mode: HandMode, now: DateTime<Utc>) -> bool {
    let slot = participant.hands.slot_mut(kind);
    match (mode, slot.is_some()) {
        (HandMode::Toggle, true) | (HandMode::ForceLower, true) => {
            *slot = None;
            true
        }
        (HandMode::Toggle, false) => {
            *slot = Some(now);
            true
        }
        (HandMode::ForceLower, false) => false,
    }
}
