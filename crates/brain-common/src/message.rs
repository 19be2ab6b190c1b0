use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a session's message log.
///
/// `content` is opaque to the store; the engine classifies it when
/// segmenting rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub content: serde_json::Value,
}

impl StoredMessage {
    pub fn new(id: impl Into<String>, seq: i64, content: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            seq,
            created_at: Utc::now(),
            content,
        }
    }
}

/// Ordered message log access for a session.
///
/// Real implementation lives in the host application. Test double:
/// [`crate::InMemoryMessageStore`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages of the session in time order.
    async fn get_all_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>>;

    async fn get_message_count(&self, session_id: &str) -> Result<usize>;

    /// Append a message to the session. For the primary session this is how a
    /// user turn is delivered to the agent.
    async fn append_message(&self, session_id: &str, content: serde_json::Value) -> Result<()>;
}
