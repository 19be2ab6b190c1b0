//! Pure transition function for the review workflow.
//!
//! The machine holds configuration only. Every call takes the persisted
//! `(state, context)` pair and returns the next pair, so callers rehydrate,
//! apply and persist on each signal without a long-lived actor.

use serde::{Deserialize, Serialize};

use super::state::{RetryLimits, Stage, StateContext, WorkflowState};
use crate::errors::WorkflowError;
use crate::signals::Signal;

/// Outcome of an accepted signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub context: StateContext,
    pub signal: Signal,
    /// True when a stage was left because its retry budget ran out.
    pub forced: bool,
}

impl Transition {
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}

/// Signals accepted in `state`. `done` accepts none.
pub fn allowed_signals(state: WorkflowState) -> &'static [Signal] {
    use Signal::*;
    match state {
        WorkflowState::Idle | WorkflowState::Developing => &[AiReplyDone, DevComplete],
        WorkflowState::Reviewing => &[NoIssue, HasIssue, AiQuestion, Skip],
        WorkflowState::Linting => &[LintPass, LintFail, Waiting, Skip],
        WorkflowState::Testing => &[TestPass, TestFail, Waiting, Skip],
        WorkflowState::Committing => &[CommitOk, CommitFail, ProceedDeploy, Waiting, Skip],
        WorkflowState::Deploying => &[DeployOk, DeployFail, Waiting, Skip],
        WorkflowState::Done => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowMachine {
    limits: RetryLimits,
    auto_deploy: bool,
}

impl Default for WorkflowMachine {
    fn default() -> Self {
        Self::new(RetryLimits::default(), false)
    }
}

impl WorkflowMachine {
    pub fn new(limits: RetryLimits, auto_deploy: bool) -> Self {
        Self {
            limits,
            auto_deploy,
        }
    }

    pub fn limits(&self) -> &RetryLimits {
        &self.limits
    }

    pub fn auto_deploy(&self) -> bool {
        self.auto_deploy
    }

    /// Apply `signal` to the persisted pair.
    ///
    /// Rejected signals leave the caller's pair untouched; nothing here
    /// mutates its inputs.
    pub fn apply(
        &self,
        state: WorkflowState,
        context: &StateContext,
        signal: Signal,
        detail: Option<&str>,
    ) -> Result<Transition, WorkflowError> {
        if !allowed_signals(state).contains(&signal) {
            return Err(WorkflowError::SignalNotAllowed { state, signal });
        }

        let mut next_ctx = context.clone();
        next_ctx.last_signal = Some(signal);
        next_ctx.last_signal_detail = detail.map(str::to_string);

        let (to, forced) = match (state, signal) {
            (WorkflowState::Idle | WorkflowState::Developing, _) => {
                (WorkflowState::Reviewing, false)
            }

            (WorkflowState::Reviewing, Signal::NoIssue | Signal::Skip) => {
                (WorkflowState::Linting, false)
            }
            (WorkflowState::Linting, Signal::LintPass | Signal::Skip) => {
                (WorkflowState::Testing, false)
            }
            (WorkflowState::Testing, Signal::TestPass | Signal::Skip) => {
                (WorkflowState::Committing, false)
            }
            (WorkflowState::Committing, Signal::CommitOk | Signal::Skip) => {
                if self.auto_deploy {
                    (WorkflowState::Deploying, false)
                } else {
                    (WorkflowState::Done, false)
                }
            }
            (WorkflowState::Committing, Signal::ProceedDeploy) => {
                (WorkflowState::Deploying, false)
            }
            (WorkflowState::Deploying, Signal::DeployOk | Signal::Skip) => {
                (WorkflowState::Done, false)
            }

            (_, Signal::Waiting) => (state, false),

            (_, failure) if failure.is_failure() => match state.stage() {
                Some(stage) => self.fail_stage(stage, &mut next_ctx),
                None => return Err(WorkflowError::SignalNotAllowed { state, signal }),
            },

            _ => return Err(WorkflowError::SignalNotAllowed { state, signal }),
        };

        tracing::debug!(
            from = %state,
            signal = %signal,
            to = %to,
            forced,
            "Workflow transition"
        );

        Ok(Transition {
            from: state,
            to,
            context: next_ctx,
            signal,
            forced,
        })
    }

    /// Count a failure in `stage`; loop back while budget remains.
    fn fail_stage(&self, stage: Stage, ctx: &mut StateContext) -> (WorkflowState, bool) {
        let limit = self.limits.for_stage(stage);
        let count = ctx.retries.bump(stage, limit);
        if count < limit {
            return (WorkflowState::Developing, false);
        }

        let target = forced_target(stage);
        if target == WorkflowState::Done {
            ctx.failed_completion = true;
        }
        tracing::warn!(
            stage = %stage,
            retries = count,
            limit,
            to = %target,
            "Retry budget exhausted, forcing advance"
        );
        (target, true)
    }
}

fn forced_target(stage: Stage) -> WorkflowState {
    match stage {
        Stage::Review => WorkflowState::Linting,
        Stage::Lint => WorkflowState::Testing,
        Stage::Test | Stage::Commit | Stage::Deploy => WorkflowState::Done,
    }
}
