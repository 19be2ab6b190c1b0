//! Shared collaborator contracts for the Brain orchestration engine.
//!
//! The engine never talks to a storage driver, an AI backend, or an HTTP layer
//! directly. Everything it consumes goes through the narrow interfaces defined
//! here:
//!
//! - [`MessageStore`] - ordered message log of a session
//! - [`SessionRegistry`] - liveness and metadata of a session
//! - [`ReviewerQuery`] - fire-and-forget delivery of an instruction
//! - [`EventBus`] - "turn ended" notifications

pub mod events;
pub mod memory;
pub mod message;
pub mod session;

pub use events::{EventBus, TurnEndedEvent};
pub use memory::{InMemoryMessageStore, InMemorySessionRegistry};
pub use message::{MessageStore, StoredMessage};
pub use session::{ReviewerQuery, SessionInfo, SessionMetadata, SessionRegistry};
