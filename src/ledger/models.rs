use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::workflow::{StateContext, WorkflowState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrainSessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl BrainSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Pending and active sessions are supervised.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl FromStr for BrainSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid brain session status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

/// One supervised primary session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrainSession {
    pub id: String,
    pub main_session_id: String,
    pub review_session_id: String,
    pub status: BrainSessionStatus,
    pub state: WorkflowState,
    pub context: StateContext,
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A dialogue round once ingested. Its round number is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrainRound {
    pub id: i64,
    pub brain_session_id: String,
    pub round_number: u32,
    pub user_input: String,
    pub ai_summary: String,
    pub message_ids: Vec<String>,
    pub started_at: String,
    pub ended_at: String,
    pub from_review: bool,
    pub has_code_changes: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    AssistantText,
    ToolUse,
    ToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEntry {
    pub kind: ProgressKind,
    pub content: String,
    pub timestamp: String,
}

impl ProgressEntry {
    pub fn new(kind: ProgressKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One reviewer invocation cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: String,
    pub brain_session_id: String,
    pub rounds_reviewed: Vec<u32>,
    pub prompt: String,
    pub status: ExecutionStatus,
    pub progress_log: Vec<ProgressEntry>,
    pub result: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// A BrainSession with its executions, as shown by `brain status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainSessionDetail {
    pub session: BrainSession,
    pub rounds: Vec<BrainRound>,
    pub executions: Vec<Execution>,
}
