//! Instruction texts exchanged with the reviewer and primary sessions.
//!
//! - **Instruction**: stage-specific brief sent to the reviewer session
//! - **Relay**: reviewer feedback forwarded to the primary session
//! - **Completion notice**: one-time message once the workflow is done

use super::types::Signal;
use crate::rounds::DialogueRound;
use crate::util::truncate_chars;
use crate::workflow::{RetryLimits, StateContext, WorkflowState, allowed_signals};

const USER_INPUT_DIGEST_CHARS: usize = 600;
const REPLY_DIGEST_CHARS: usize = 1500;

/// Everything needed to brief the reviewer for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct InstructionContext<'a> {
    pub state: WorkflowState,
    pub context: &'a StateContext,
    pub limits: &'a RetryLimits,
    pub working_dir: Option<&'a str>,
    /// Rounds covered by this cycle; empty for unprompted stage actions.
    pub rounds: &'a [DialogueRound],
}

/// Build the reviewer instruction for the current workflow position.
pub fn render_instruction(ctx: &InstructionContext<'_>) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Brain Review: {}\n\n{}\n\n",
        stage_title(ctx.state),
        stage_task(ctx.state)
    ));

    prompt.push_str("## Context\n\n");
    prompt.push_str(&format!(
        "- **Working Directory**: {}\n",
        ctx.working_dir.unwrap_or("(unknown)")
    ));
    prompt.push_str(&format!("- **Workflow State**: {}\n", ctx.state));
    let mut last_retry = None;
    if let Some(stage) = ctx.state.stage() {
        let used = ctx.context.retries.get(stage);
        let limit = ctx.limits.for_stage(stage);
        prompt.push_str(&format!("- **Retry**: {}/{}\n", used, limit));
        if limit > 0 && used + 1 == limit {
            last_retry = Some(stage);
        }
    }
    if let Some(detail) = &ctx.context.last_signal_detail {
        prompt.push_str(&format!("- **Previous Note**: {}\n", detail));
    }
    prompt.push('\n');
    if let Some(stage) = last_retry {
        prompt.push_str(&format!(
            "> **Warning**: this is the last retry for {}. One more failure moves \
             the workflow past this stage without a fix.\n\n",
            stage
        ));
    }

    if ctx.rounds.is_empty() {
        prompt.push_str("## Rounds\n\n");
        prompt.push_str(
            "No new rounds from the main session. Act on the current stage directly.\n\n",
        );
    } else {
        prompt.push_str("## Rounds Under Review\n\n");
        for round in ctx.rounds {
            prompt.push_str(&format_round(round));
        }
    }

    prompt.push_str(&build_signal_section(ctx.state));
    prompt
}

fn stage_title(state: WorkflowState) -> &'static str {
    match state {
        WorkflowState::Idle | WorkflowState::Developing | WorkflowState::Reviewing => {
            "Code Review"
        }
        WorkflowState::Linting => "Lint",
        WorkflowState::Testing => "Test",
        WorkflowState::Committing => "Commit",
        WorkflowState::Deploying => "Deploy",
        WorkflowState::Done => "Complete",
    }
}

fn stage_task(state: WorkflowState) -> &'static str {
    match state {
        WorkflowState::Idle | WorkflowState::Developing | WorkflowState::Reviewing => {
            "Review the code changes the main session made in the rounds below. Read the \
             touched files in the working directory. Check correctness, error handling, \
             edge cases and whether the user's request was actually fulfilled. If the main \
             session stopped to ask a question instead of finishing, report that."
        }
        WorkflowState::Linting => {
            "Make sure the project passes its linters and formatters. If the rounds below \
             show lint output, judge it. Otherwise tell the main session exactly which lint \
             command to run and wait for it."
        }
        WorkflowState::Testing => {
            "Make sure the test suite passes. If the rounds below show test output, judge \
             it. Otherwise tell the main session exactly which test command to run and wait \
             for it."
        }
        WorkflowState::Committing => {
            "Make sure the changes are committed with a clear message. If the rounds below \
             show the commit, judge it. Otherwise tell the main session how to commit and \
             wait for it."
        }
        WorkflowState::Deploying => {
            "Make sure the committed changes are deployed. If the rounds below show the \
             deploy result, judge it. Otherwise tell the main session how to deploy and wait \
             for it."
        }
        WorkflowState::Done => "The workflow is complete. No further action is needed.",
    }
}

fn format_round(round: &DialogueRound) -> String {
    let mut section = format!("### Round {}", round.round_number);
    if round.has_code_changes {
        section.push_str(" (code changes)");
    }
    section.push_str("\n\n");
    section.push_str(&format!(
        "**User**: {}\n\n",
        truncate_chars(round.user_input.trim(), USER_INPUT_DIGEST_CHARS)
    ));
    if round.agent_replies.is_empty() {
        section.push_str("**Agent**: (no reply)\n\n");
    } else {
        section.push_str(&format!(
            "**Agent**: {}\n\n",
            truncate_chars(round.ai_summary().trim(), REPLY_DIGEST_CHARS)
        ));
    }
    section
}

fn build_signal_section(state: WorkflowState) -> String {
    let allowed = allowed_signals(state);
    let mut section = String::from("## Outcome\n\n");
    if allowed.is_empty() {
        section.push_str("No signal is expected.\n");
        return section;
    }

    section.push_str(
        "Explain your findings first. Then end your reply with exactly one line of the \
         form `SIGNAL:<token>` (optionally `SIGNAL:<token> - short note`). Allowed tokens:\n\n",
    );
    for signal in allowed {
        section.push_str(&format!("- `{}`: {}\n", signal, signal.description()));
    }
    section.push_str(
        "\nThe signal line must be the last line of your reply. Any other token is ignored.\n",
    );
    section
}

/// Reviewer feedback forwarded to the primary session.
pub fn render_relay(reviewer_reply: &str, signal: Option<Signal>) -> String {
    let body = super::parser::strip_signal_lines(reviewer_reply);
    let header = match signal {
        Some(Signal::Waiting) => "[Brain] Please do the following:",
        _ => "[Brain] Review feedback, please address it:",
    };
    format!("{}\n\n{}", header, body)
}

/// One-time notice sent to the primary session when the workflow ends.
pub fn render_completion_notice(context: &StateContext) -> String {
    if context.failed_completion {
        let mut text = String::from(
            "[Brain] Workflow finished without passing every stage: the retry budget \
             ran out.",
        );
        if let Some(signal) = context.last_signal {
            text.push_str(&format!(" Last outcome: {}.", signal));
        }
        if let Some(detail) = &context.last_signal_detail {
            text.push_str(&format!(" Note: {}", detail));
        }
        text
    } else {
        let mut text = String::from("[Brain] Workflow complete.");
        if let Some(signal) = context.last_signal {
            text.push_str(&format!(" Last outcome: {}.", signal));
        }
        text
    }
}
