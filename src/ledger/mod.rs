//! Execution ledger: persisted BrainSessions, ingested rounds and reviewer
//! executions, backed by SQLite.

mod db;
mod models;

pub use db::{DbHandle, INTERRUPTED_NOTE, LedgerDb, SUPERSEDED_NOTE};
pub use models::{
    BrainRound, BrainSession, BrainSessionDetail, BrainSessionStatus, Execution, ExecutionStatus,
    ProgressEntry, ProgressKind,
};
