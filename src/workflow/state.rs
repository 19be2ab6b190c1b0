//! Workflow states, retryable stages, and the persisted transition context.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::signals::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Idle,
    Developing,
    Reviewing,
    Linting,
    Testing,
    Committing,
    Deploying,
    Done,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 8] = [
        WorkflowState::Idle,
        WorkflowState::Developing,
        WorkflowState::Reviewing,
        WorkflowState::Linting,
        WorkflowState::Testing,
        WorkflowState::Committing,
        WorkflowState::Deploying,
        WorkflowState::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Developing => "developing",
            Self::Reviewing => "reviewing",
            Self::Linting => "linting",
            Self::Testing => "testing",
            Self::Committing => "committing",
            Self::Deploying => "deploying",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The retryable stage this state belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Reviewing => Some(Stage::Review),
            Self::Linting => Some(Stage::Lint),
            Self::Testing => Some(Stage::Test),
            Self::Committing => Some(Stage::Commit),
            Self::Deploying => Some(Stage::Deploy),
            Self::Idle | Self::Developing | Self::Done => None,
        }
    }

    /// States that only move on `ai_reply_done` / `dev_complete`.
    pub fn awaits_reply_done(&self) -> bool {
        matches!(self, Self::Idle | Self::Developing)
    }

    /// States where the reviewer must act without a new primary-session round.
    pub fn requires_unprompted_action(&self) -> bool {
        matches!(
            self,
            Self::Linting | Self::Testing | Self::Committing | Self::Deploying
        )
    }

    /// Whether rounds whose user turn came from the reviewer are reviewed.
    ///
    /// In `developing` the fix rounds are driven by relayed feedback, and in
    /// the action stages the primary session acts on relayed instructions;
    /// elsewhere those rounds are the reviewer's own echo.
    pub fn reviews_reviewer_rounds(&self) -> bool {
        matches!(
            self,
            Self::Developing | Self::Linting | Self::Testing | Self::Committing | Self::Deploying
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "developing" => Ok(Self::Developing),
            "reviewing" => Ok(Self::Reviewing),
            "linting" => Ok(Self::Linting),
            "testing" => Ok(Self::Testing),
            "committing" => Ok(Self::Committing),
            "deploying" => Ok(Self::Deploying),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid workflow state: {}", s)),
        }
    }
}

/// A stage with its own retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Review,
    Lint,
    Test,
    Commit,
    Deploy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::Commit => "commit",
            Self::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryLimits {
    #[serde(default = "default_review_limit")]
    pub review: u32,
    #[serde(default = "default_lint_limit")]
    pub lint: u32,
    #[serde(default = "default_test_limit")]
    pub test: u32,
    #[serde(default = "default_commit_limit")]
    pub commit: u32,
    #[serde(default = "default_deploy_limit")]
    pub deploy: u32,
}

fn default_review_limit() -> u32 {
    5
}

fn default_lint_limit() -> u32 {
    3
}

fn default_test_limit() -> u32 {
    3
}

fn default_commit_limit() -> u32 {
    2
}

fn default_deploy_limit() -> u32 {
    2
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            review: default_review_limit(),
            lint: default_lint_limit(),
            test: default_test_limit(),
            commit: default_commit_limit(),
            deploy: default_deploy_limit(),
        }
    }
}

impl RetryLimits {
    pub fn for_stage(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Review => self.review,
            Stage::Lint => self.lint,
            Stage::Test => self.test,
            Stage::Commit => self.commit,
            Stage::Deploy => self.deploy,
        }
    }
}

/// Retry counters, one per retryable stage. Never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    #[serde(default)]
    pub review: u32,
    #[serde(default)]
    pub lint: u32,
    #[serde(default)]
    pub test: u32,
    #[serde(default)]
    pub commit: u32,
    #[serde(default)]
    pub deploy: u32,
}

impl RetryCounters {
    pub fn get(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Review => self.review,
            Stage::Lint => self.lint,
            Stage::Test => self.test,
            Stage::Commit => self.commit,
            Stage::Deploy => self.deploy,
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut u32 {
        match stage {
            Stage::Review => &mut self.review,
            Stage::Lint => &mut self.lint,
            Stage::Test => &mut self.test,
            Stage::Commit => &mut self.commit,
            Stage::Deploy => &mut self.deploy,
        }
    }

    pub fn set(&mut self, stage: Stage, value: u32) {
        *self.slot(stage) = value;
    }

    /// Increment the counter, saturating at `limit`. Returns the new value.
    pub fn bump(&mut self, stage: Stage, limit: u32) -> u32 {
        let slot = self.slot(stage);
        *slot = (*slot + 1).min(limit.max(*slot));
        *slot
    }
}

/// Context persisted atomically with the workflow state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateContext {
    #[serde(default)]
    pub retries: RetryCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_signal: Option<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_signal_detail: Option<String>,
    /// Set when the workflow was forced into `done` past a failing stage.
    #[serde(default)]
    pub failed_completion: bool,
}

impl StateContext {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse persisted JSON. Missing fields fall back to their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrips_through_str() {
        for state in WorkflowState::ALL {
            assert_eq!(state.as_str().parse::<WorkflowState>().unwrap(), state);
        }
        assert!("shipping".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn test_state_classification() {
        assert!(WorkflowState::Idle.awaits_reply_done());
        assert!(WorkflowState::Developing.awaits_reply_done());
        assert!(!WorkflowState::Reviewing.awaits_reply_done());
        assert!(WorkflowState::Testing.requires_unprompted_action());
        assert!(!WorkflowState::Reviewing.requires_unprompted_action());
        assert!(!WorkflowState::Idle.reviews_reviewer_rounds());
        assert!(WorkflowState::Linting.reviews_reviewer_rounds());
        assert!(WorkflowState::Done.is_terminal());
        assert_eq!(WorkflowState::Linting.stage(), Some(Stage::Lint));
        assert_eq!(WorkflowState::Developing.stage(), None);
    }

    #[test]
    fn test_bump_saturates_at_limit() {
        let mut counters = RetryCounters::default();
        assert_eq!(counters.bump(Stage::Lint, 2), 1);
        assert_eq!(counters.bump(Stage::Lint, 2), 2);
        assert_eq!(counters.bump(Stage::Lint, 2), 2);
        assert_eq!(counters.get(Stage::Review), 0);
    }

    #[test]
    fn test_bump_never_decreases_when_limit_shrinks() {
        let mut counters = RetryCounters {
            test: 4,
            ..Default::default()
        };
        assert_eq!(counters.bump(Stage::Test, 2), 4);
    }

    #[test]
    fn test_context_json_roundtrip_and_defaults() {
        let ctx = StateContext {
            last_signal: Some(Signal::LintFail),
            last_signal_detail: Some("clippy".to_string()),
            ..Default::default()
        };
        let json = ctx.to_json().unwrap();
        assert_eq!(StateContext::from_json(&json).unwrap(), ctx);
        assert_eq!(StateContext::from_json("").unwrap(), StateContext::default());
        assert_eq!(StateContext::from_json("{}").unwrap(), StateContext::default());
    }

    #[test]
    fn test_default_limits_favor_review() {
        let limits = RetryLimits::default();
        assert!(limits.review > limits.lint);
        assert_eq!(limits.for_stage(Stage::Deploy), 2);
    }
}
