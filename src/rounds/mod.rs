//! Reconstruction of a session's message log into dialogue rounds.

mod classify;
mod pending;
mod segmenter;

pub use classify::{DEFAULT_MUTATING_TOOLS, DEFAULT_REVIEW_ORIGIN, MessageClassifier, MessagePart};
pub use pending::{DEFAULT_INIT_MARKER, InitRoundPolicy, PendingRounds, select_pending};
pub use segmenter::{DialogueRound, RoundActivity, segment};
