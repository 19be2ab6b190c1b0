//! Typed error hierarchy for the Brain engine.
//!
//! Two top-level enums cover the two layers:
//! - `WorkflowError`: rejected workflow transitions
//! - `BrainError`: orchestrator failures (ledger, collaborators, delivery)

use thiserror::Error;

use crate::signals::Signal;
use crate::workflow::WorkflowState;

/// Errors from the pure workflow transition function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Signal {signal} is not allowed in state {state}")]
    SignalNotAllowed {
        state: WorkflowState,
        signal: Signal,
    },
}

/// Errors from the sync orchestrator and the execution ledger.
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("Brain session {id} not found")]
    SessionNotFound { id: String },

    #[error("Failed to deliver instruction to session {session_id}: {message}")]
    DeliveryFailed { session_id: String, message: String },

    #[error("Message store error for session {session_id}: {message}")]
    MessageStore { session_id: String, message: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BrainResult<T> = std::result::Result<T, BrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_carries_state_and_signal() {
        let err = WorkflowError::SignalNotAllowed {
            state: WorkflowState::Done,
            signal: Signal::LintPass,
        };
        let text = err.to_string();
        assert!(text.contains("lint_pass"));
        assert!(text.contains("done"));
    }

    #[test]
    fn brain_error_converts_from_workflow_error() {
        let inner = WorkflowError::SignalNotAllowed {
            state: WorkflowState::Idle,
            signal: Signal::NoIssue,
        };
        let err: BrainError = inner.into();
        assert!(matches!(
            err,
            BrainError::Workflow(WorkflowError::SignalNotAllowed { .. })
        ));
    }

    #[test]
    fn delivery_failed_names_session() {
        let err = BrainError::DeliveryFailed {
            session_id: "review-7".to_string(),
            message: "socket closed".to_string(),
        };
        assert!(err.to_string().contains("review-7"));
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BrainError::SessionNotFound {
            id: "b1".to_string(),
        });
        assert_std_error(&WorkflowError::SignalNotAllowed {
            state: WorkflowState::Idle,
            signal: Signal::Skip,
        });
    }
}
