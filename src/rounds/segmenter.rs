//! Round segmentation.
//!
//! A round is one user turn plus every agent reply up to the next user turn.
//! Segmentation is a single forward scan and depends only on the message
//! list, so repeated calls over the same log yield the same rounds.

use brain_common::StoredMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::{MessageClassifier, MessagePart};

/// Agent activity inside a round, in log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum RoundActivity {
    Text(String),
    ToolUse { name: String, input: Option<String> },
    ToolResult(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueRound {
    /// 1-based, gap-free within a session.
    pub round_number: u32,
    pub user_input: String,
    pub agent_replies: Vec<String>,
    pub message_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub from_review: bool,
    pub has_code_changes: bool,
    #[serde(default)]
    pub activity: Vec<RoundActivity>,
}

impl DialogueRound {
    fn open(round_number: u32, message: &StoredMessage, text: String, from_review: bool) -> Self {
        Self {
            round_number,
            user_input: text,
            agent_replies: Vec::new(),
            message_ids: vec![message.id.clone()],
            started_at: message.created_at,
            ended_at: message.created_at,
            from_review,
            has_code_changes: false,
            activity: Vec::new(),
        }
    }

    fn touch(&mut self, message: &StoredMessage) {
        if self.message_ids.last() != Some(&message.id) {
            self.message_ids.push(message.id.clone());
        }
        if message.created_at > self.ended_at {
            self.ended_at = message.created_at;
        }
    }

    /// All agent replies joined, for the persisted `ai_summary` column.
    pub fn ai_summary(&self) -> String {
        self.agent_replies.join("\n\n")
    }

    /// The last agent reply, which carries a reviewer's verdict.
    pub fn last_reply(&self) -> Option<&str> {
        self.agent_replies.last().map(String::as_str)
    }
}

/// Segment a time-ordered message list into rounds.
///
/// Agent output before the first user turn belongs to no round and is
/// dropped. The trailing round is included even if no reply arrived yet.
pub fn segment(messages: &[StoredMessage], classifier: &MessageClassifier) -> Vec<DialogueRound> {
    let mut rounds: Vec<DialogueRound> = Vec::new();

    for message in messages {
        for part in classifier.classify(&message.content) {
            if let MessagePart::UserText { text, from_review } = part {
                let number = rounds.len() as u32 + 1;
                rounds.push(DialogueRound::open(number, message, text, from_review));
                continue;
            }

            let Some(current) = rounds.last_mut() else {
                continue;
            };
            current.touch(message);
            match part {
                MessagePart::AgentText(text) => {
                    current.activity.push(RoundActivity::Text(text.clone()));
                    current.agent_replies.push(text);
                }
                MessagePart::ToolUse {
                    name,
                    mutating,
                    input,
                } => {
                    current.has_code_changes |= mutating;
                    current.activity.push(RoundActivity::ToolUse { name, input });
                }
                MessagePart::ToolResult(text) => {
                    current.activity.push(RoundActivity::ToolResult(text));
                }
                MessagePart::UserText { .. } => {}
            }
        }
    }

    rounds
}
