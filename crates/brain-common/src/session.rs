use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata the host keeps about a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Working directory of the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Snapshot of a session as seen by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub active: bool,
    /// True while the agent is still producing output for the current turn.
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub metadata: Option<SessionMetadata>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: true,
            thinking: false,
            metadata: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(SessionMetadata::default).path = Some(path.into());
        self
    }

    /// Working directory recorded in the metadata, if any.
    pub fn working_dir(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.path.as_deref())
    }
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<SessionInfo>>;
}

/// Delivery of an instruction into a session's own turn loop.
///
/// Fire-and-forget: the reply surfaces later as regular messages in the
/// [`crate::MessageStore`] followed by a turn-ended event.
#[async_trait]
pub trait ReviewerQuery: Send + Sync {
    async fn send(&self, session_id: &str, text: &str) -> Result<()>;
}
