//! Sync orchestrator: turns "turn ended" events into review cycles.
//!
//! ```text
//! turn ended ──► debounce ──► stability wait ──► segment ──► pending rounds
//!                                                              │
//!        reviewer reply ◄── instruction ◄── execution ◄────────┘
//!              │
//!              └──► parse signal ──► workflow transition ──► relay / next cycle
//! ```

pub mod debounce;
pub mod stability;
pub mod status;
pub mod sync;

pub use debounce::Debouncer;
pub use stability::{Stability, StabilitySettings, wait_for_stable_count};
pub use status::{StatusEvent, SyncPhase, broadcast_status};
pub use sync::{
    Collaborators, NO_CLEAR_OUTCOME, OrchestratorSettings, ReviewOutcome, SyncOrchestrator,
    SyncOutcome,
};
