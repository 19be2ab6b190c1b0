//! In-process implementations of the collaborator traits.
//!
//! Used when the engine is embedded without a persistent host and throughout
//! the test suites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::message::{MessageStore, StoredMessage};
use crate::session::{SessionInfo, SessionRegistry};

#[derive(Default)]
pub struct InMemoryMessageStore {
    sessions: Mutex<HashMap<String, Vec<StoredMessage>>>,
    full_reads: AtomicUsize,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append synchronously and return the stored message.
    pub fn push(&self, session_id: &str, content: serde_json::Value) -> Result<StoredMessage> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow!("message store lock poisoned: {}", e))?;
        let log = sessions.entry(session_id.to_string()).or_default();
        let seq = log.len() as i64 + 1;
        let message = StoredMessage::new(uuid::Uuid::new_v4().to_string(), seq, content);
        log.push(message.clone());
        Ok(message)
    }

    /// Snapshot of a session's log.
    pub fn messages(&self, session_id: &str) -> Vec<StoredMessage> {
        self.sessions
            .lock()
            .map(|s| s.get(session_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of `get_all_messages` calls served so far.
    pub fn full_read_count(&self) -> usize {
        self.full_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn get_all_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        self.full_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.messages(session_id))
    }

    async fn get_message_count(&self, session_id: &str) -> Result<usize> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow!("message store lock poisoned: {}", e))?;
        Ok(sessions.get(session_id).map(Vec::len).unwrap_or(0))
    }

    async fn append_message(&self, session_id: &str, content: serde_json::Value) -> Result<()> {
        self.push(session_id, content).map(|_| ())
    }
}

#[derive(Default)]
pub struct InMemorySessionRegistry {
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: SessionInfo) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(info.id.clone(), info);
        }
    }

    pub fn set_thinking(&self, id: &str, thinking: bool) {
        if let Ok(mut sessions) = self.sessions.lock()
            && let Some(info) = sessions.get_mut(id)
        {
            info.thinking = thinking;
        }
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn get_session(&self, id: &str) -> Result<Option<SessionInfo>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow!("session registry lock poisoned: {}", e))?;
        Ok(sessions.get(id).cloned())
    }
}
