//! Signal protocol between the engine and the reviewer session.
//!
//! Outbound, the engine renders a stage-specific instruction listing the
//! tokens the reviewer may answer with. Inbound, the reviewer ends its reply
//! with a marker line:
//!
//! - `SIGNAL:no_issue`
//! - `SIGNAL:lint_fail - clippy reports two warnings`
//!
//! Only the trailing lines are scanned, and tokens outside the current
//! state's vocabulary count as no signal.

mod instructions;
mod parser;
mod types;

pub use instructions::{
    InstructionContext, render_completion_notice, render_instruction, render_relay,
};
pub use parser::{DEFAULT_LOOKBACK_LINES, SignalParser, extract_signal, strip_signal_lines};
pub use types::{ParsedSignal, Signal};
