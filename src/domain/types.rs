use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The objective handed to one agent run. Immutable after run start.
#[derive(Debug, Clone)]
pub struct Goal {
    pub text: String,
    /// Command whose exit code verifies the goal (e.g. a test invocation).
    /// When set, the loop refuses success claims that the most recent
    /// execution result does not back with `exit_code == 0`.
    pub verify_command: Option<String>,
    /// Extra reference material rendered into the initial prompt.
    pub context_blocks: Vec<String>,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            verify_command: None,
            context_blocks: Vec::new(),
        }
    }

    pub fn with_verify_command(mut self, command: impl Into<String>) -> Self {
        self.verify_command = Some(command.into());
        self
    }

    pub fn with_context_blocks(mut self, blocks: Vec<String>) -> Self {
        self.context_blocks = blocks;
        self
    }
}

/// Per-invocation identity allocated by the run coordinator. The agent loop
/// only ever reads it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub sandbox_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub model: String,
}

/// Token counters reported by a model provider, when available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}
