//! Signal vocabulary.
//!
//! A signal is the single token the reviewer session emits on its last line
//! (`SIGNAL:<token>`) to report the outcome of a stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// The primary session finished a turn that changed code.
    AiReplyDone,
    /// The primary session reports development as complete.
    DevComplete,
    /// The primary session asked a question instead of finishing the work.
    AiQuestion,
    NoIssue,
    HasIssue,
    LintPass,
    LintFail,
    TestPass,
    TestFail,
    CommitOk,
    CommitFail,
    ProceedDeploy,
    DeployOk,
    DeployFail,
    /// An instruction was relayed; waiting for the primary session to act.
    Waiting,
    /// The stage does not apply to this project.
    Skip,
}

impl Signal {
    pub const ALL: [Signal; 16] = [
        Signal::AiReplyDone,
        Signal::DevComplete,
        Signal::AiQuestion,
        Signal::NoIssue,
        Signal::HasIssue,
        Signal::LintPass,
        Signal::LintFail,
        Signal::TestPass,
        Signal::TestFail,
        Signal::CommitOk,
        Signal::CommitFail,
        Signal::ProceedDeploy,
        Signal::DeployOk,
        Signal::DeployFail,
        Signal::Waiting,
        Signal::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiReplyDone => "ai_reply_done",
            Self::DevComplete => "dev_complete",
            Self::AiQuestion => "ai_question",
            Self::NoIssue => "no_issue",
            Self::HasIssue => "has_issue",
            Self::LintPass => "lint_pass",
            Self::LintFail => "lint_fail",
            Self::TestPass => "test_pass",
            Self::TestFail => "test_fail",
            Self::CommitOk => "commit_ok",
            Self::CommitFail => "commit_fail",
            Self::ProceedDeploy => "proceed_deploy",
            Self::DeployOk => "deploy_ok",
            Self::DeployFail => "deploy_fail",
            Self::Waiting => "waiting",
            Self::Skip => "skip",
        }
    }

    /// One-line meaning shown to the reviewer next to the token.
    pub fn description(&self) -> &'static str {
        match self {
            Self::AiReplyDone => "the main session finished a code-changing turn",
            Self::DevComplete => "development is complete",
            Self::AiQuestion => "the main session asked a question instead of finishing the work",
            Self::NoIssue => "the changes look correct, continue to lint",
            Self::HasIssue => "the changes have problems that must be fixed",
            Self::LintPass => "lint is clean",
            Self::LintFail => "lint reported problems that must be fixed",
            Self::TestPass => "all tests pass",
            Self::TestFail => "tests fail and must be fixed",
            Self::CommitOk => "the changes were committed",
            Self::CommitFail => "committing failed",
            Self::ProceedDeploy => "the commit is done and a deploy is required",
            Self::DeployOk => "the deploy succeeded",
            Self::DeployFail => "the deploy failed",
            Self::Waiting => "you asked the main session to act and are waiting for it",
            Self::Skip => "this stage does not apply to the project",
        }
    }

    /// Failure outcomes that consume a retry.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::HasIssue
                | Self::AiQuestion
                | Self::LintFail
                | Self::TestFail
                | Self::CommitFail
                | Self::DeployFail
        )
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Signal::ALL
            .iter()
            .copied()
            .find(|signal| signal.as_str() == normalized)
            .ok_or_else(|| format!("Unknown signal: {}", s))
    }
}

/// A signal as found in a reviewer reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub signal: Signal,
    /// Free text after the token on the same line, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_roundtrips_through_str() {
        for signal in Signal::ALL {
            assert_eq!(signal.as_str().parse::<Signal>().unwrap(), signal);
        }
    }

    #[test]
    fn test_signal_parse_is_case_insensitive() {
        assert_eq!("LINT_PASS".parse::<Signal>().unwrap(), Signal::LintPass);
        assert_eq!(" no_issue ".parse::<Signal>().unwrap(), Signal::NoIssue);
    }

    #[test]
    fn test_unknown_signal_is_rejected() {
        assert!("ship_it".parse::<Signal>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        assert!(Signal::HasIssue.is_failure());
        assert!(Signal::AiQuestion.is_failure());
        assert!(!Signal::Waiting.is_failure());
        assert!(!Signal::Skip.is_failure());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Signal::ProceedDeploy).unwrap();
        assert_eq!(json, "\"proceed_deploy\"");
    }
}
