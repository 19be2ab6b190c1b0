//! Selection of rounds that still need the reviewer's attention.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::segmenter::DialogueRound;
use crate::workflow::WorkflowState;

/// Default prefix of system-injected init prompts.
pub const DEFAULT_INIT_MARKER: &str = "#InitPrompt-";

/// Which init-marker rounds are kept out of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitRoundPolicy {
    /// Every round whose user input starts with the marker.
    #[default]
    Always,
    /// Only round 1, and only if it carries the marker.
    FirstOnly,
}

impl InitRoundPolicy {
    pub fn excludes(&self, round: &DialogueRound, marker: &str) -> bool {
        if marker.is_empty() || !round.user_input.trim_start().starts_with(marker) {
            return false;
        }
        match self {
            Self::Always => true,
            Self::FirstOnly => round.round_number == 1,
        }
    }
}

/// Rounds not yet persisted, split by whether they enter the workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRounds {
    pub reviewable: Vec<DialogueRound>,
    /// Recorded so they are never reconsidered, but never reviewed.
    pub excluded: Vec<DialogueRound>,
}

impl PendingRounds {
    pub fn is_empty(&self) -> bool {
        self.reviewable.is_empty() && self.excluded.is_empty()
    }

    /// Whether the newest reviewable round changed code.
    pub fn latest_has_code_changes(&self) -> bool {
        self.reviewable.last().is_some_and(|r| r.has_code_changes)
    }

    pub fn code_change_rounds(&self) -> Vec<&DialogueRound> {
        self.reviewable.iter().filter(|r| r.has_code_changes).collect()
    }
}

/// Diff segmented rounds against the persisted round numbers.
pub fn select_pending(
    rounds: Vec<DialogueRound>,
    persisted: &HashSet<u32>,
    state: WorkflowState,
    policy: InitRoundPolicy,
    init_marker: &str,
) -> PendingRounds {
    let mut pending = PendingRounds::default();
    for round in rounds {
        if persisted.contains(&round.round_number) {
            continue;
        }
        let reviewer_echo = round.from_review && !state.reviews_reviewer_rounds();
        if reviewer_echo || policy.excludes(&round, init_marker) {
            pending.excluded.push(round);
        } else {
            pending.reviewable.push(round);
        }
    }
    pending
}
