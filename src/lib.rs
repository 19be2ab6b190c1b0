pub mod config;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod rounds;
pub mod signals;
pub mod util;
pub mod workflow;

pub use errors::{BrainError, BrainResult, WorkflowError};
pub use orchestrator::{Collaborators, SyncOrchestrator};
