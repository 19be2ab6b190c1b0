use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ledger::ExecutionStatus;
use crate::signals::Signal;
use crate::workflow::WorkflowState;

/// Sync lifecycle of one primary session. Independent of the workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    /// A turn ended; waiting for the quiet period.
    Debouncing,
    /// Extracting and persisting rounds.
    Syncing,
    /// Instruction delivered, reviewer reply outstanding.
    AwaitingReviewer,
    /// Reviewer replied; relaying and advancing.
    DispatchingResult,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Debouncing => "debouncing",
            Self::Syncing => "syncing",
            Self::AwaitingReviewer => "awaiting_reviewer",
            Self::DispatchingResult => "dispatching_result",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status notifications ─────────────────────────────────────────────

/// Push-style notifications for observers, keyed by BrainSession id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StatusEvent {
    Syncing {
        brain_session_id: String,
    },
    Started {
        brain_session_id: String,
        execution_id: String,
        rounds: Vec<u32>,
        state: WorkflowState,
    },
    Done {
        brain_session_id: String,
        execution_id: String,
        status: ExecutionStatus,
        state: WorkflowState,
        signal: Option<Signal>,
        /// Human-readable outcome, e.g. "no clear outcome".
        note: Option<String>,
    },
}

impl StatusEvent {
    pub fn brain_session_id(&self) -> &str {
        match self {
            Self::Syncing { brain_session_id }
            | Self::Started {
                brain_session_id, ..
            }
            | Self::Done {
                brain_session_id, ..
            } => brain_session_id,
        }
    }
}

/// Best-effort send: observers that lag or are absent never affect the caller.
pub fn broadcast_status(tx: &broadcast::Sender<String>, event: &StatusEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(json); // Ignore error if no receivers
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize status event");
        }
    }
}
