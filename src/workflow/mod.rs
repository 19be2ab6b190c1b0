//! Review workflow: states, retry budgets and the pure transition function.
//!
//! ```text
//! idle/developing --ai_reply_done--> reviewing --no_issue--> linting
//!   --lint_pass--> testing --test_pass--> committing --commit_ok--> done
//!                                                    \--proceed_deploy--> deploying --deploy_ok--> done
//! ```
//!
//! Failures loop back to `developing` until the stage budget is spent, then
//! force an advance.

mod machine;
mod state;

pub use machine::{Transition, WorkflowMachine, allowed_signals};
pub use state::{RetryCounters, RetryLimits, Stage, StateContext, WorkflowState};
