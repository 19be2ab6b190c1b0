//! Classification of stored message content into round-relevant parts.
//!
//! Content shapes understood:
//!
//! | Shape | Parts |
//! |-------|-------|
//! | `{role:"user", content:{type:"text", text}}` | user text |
//! | `{role:"agent"\|"assistant", content:{type:"text", text}}` | agent text |
//! | `{role:"agent", content:{type:"output", data:{message:{content:[..]}}}}` | text, `tool_use`, `tool_result` blocks |
//! | `{role:"agent", content:{type:"codex", data:{type:"message"\|"tool-call"\|"tool-call-result"}}}` | agent text, tool use, tool result |

use serde_json::Value;

/// Default tools that modify the working tree.
pub const DEFAULT_MUTATING_TOOLS: &[&str] = &[
    "Edit",
    "MultiEdit",
    "Write",
    "NotebookEdit",
    "Bash",
    "apply_patch",
    "shell",
];

/// Default `meta.sentFrom` value marking messages injected by the reviewer.
pub const DEFAULT_REVIEW_ORIGIN: &str = "brain-review";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    UserText { text: String, from_review: bool },
    AgentText(String),
    ToolUse { name: String, mutating: bool, input: Option<String> },
    ToolResult(String),
}

#[derive(Debug, Clone)]
pub struct MessageClassifier {
    mutating_tools: Vec<String>,
    review_origin: String,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_MUTATING_TOOLS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_REVIEW_ORIGIN,
        )
    }
}

impl MessageClassifier {
    pub fn new(mutating_tools: Vec<String>, review_origin: impl Into<String>) -> Self {
        Self {
            mutating_tools: mutating_tools
                .into_iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            review_origin: review_origin.into(),
        }
    }

    pub fn review_origin(&self) -> &str {
        &self.review_origin
    }

    pub fn is_mutating_tool(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.mutating_tools.iter().any(|t| *t == name)
    }

    /// Split one message into its parts, in the order they appear.
    pub fn classify(&self, message: &Value) -> Vec<MessagePart> {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        let Some(content) = message.get("content") else {
            return Vec::new();
        };
        let kind = content.get("type").and_then(Value::as_str).unwrap_or("");

        match role {
            "user" => self.classify_user(message, content, kind),
            "agent" | "assistant" => self.classify_agent(content, kind),
            _ => Vec::new(),
        }
    }

    fn classify_user(&self, message: &Value, content: &Value, kind: &str) -> Vec<MessagePart> {
        if kind != "text" {
            return Vec::new();
        }
        let Some(text) = content.get("text").and_then(Value::as_str) else {
            return Vec::new();
        };
        let from_review = message
            .pointer("/meta/sentFrom")
            .and_then(Value::as_str)
            .is_some_and(|origin| origin == self.review_origin);
        vec![MessagePart::UserText {
            text: text.to_string(),
            from_review,
        }]
    }

    fn classify_agent(&self, content: &Value, kind: &str) -> Vec<MessagePart> {
        match kind {
            "text" => content
                .get("text")
                .and_then(Value::as_str)
                .map(|t| vec![MessagePart::AgentText(t.to_string())])
                .unwrap_or_default(),
            "output" => content
                .pointer("/data/message/content")
                .and_then(Value::as_array)
                .map(|blocks| blocks.iter().filter_map(|b| self.classify_block(b)).collect())
                .unwrap_or_default(),
            "codex" => content
                .get("data")
                .and_then(|data| self.classify_codex(data))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn classify_block(&self, block: &Value) -> Option<MessagePart> {
        match block.get("type").and_then(Value::as_str)? {
            "text" => block
                .get("text")
                .and_then(Value::as_str)
                .map(|t| MessagePart::AgentText(t.to_string())),
            "tool_use" => {
                let name = block.get("name").and_then(Value::as_str)?;
                Some(self.tool_use(name, block.get("input")))
            }
            "tool_result" => Some(MessagePart::ToolResult(value_text(block.get("content")))),
            _ => None,
        }
    }

    fn classify_codex(&self, data: &Value) -> Option<MessagePart> {
        match data.get("type").and_then(Value::as_str)? {
            "message" => data
                .get("message")
                .and_then(Value::as_str)
                .map(|t| MessagePart::AgentText(t.to_string())),
            "tool-call" => {
                let name = data.get("name").and_then(Value::as_str)?;
                Some(self.tool_use(name, data.get("input")))
            }
            "tool-call-result" => Some(MessagePart::ToolResult(value_text(data.get("output")))),
            _ => None,
        }
    }

    fn tool_use(&self, name: &str, input: Option<&Value>) -> MessagePart {
        MessagePart::ToolUse {
            name: name.to_string(),
            mutating: self.is_mutating_tool(name),
            input: input.filter(|v| !v.is_null()).map(Value::to_string),
        }
    }
}

/// Flatten a result payload: strings as-is, text block arrays joined.
fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => other.get("text").and_then(Value::as_str).map(str::to_string),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}
