use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::types::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Ok,
    Error,
}

/// One entry in the run's ordered trace. Model and tool calls share a single
/// list so occurrence order survives serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManifestEvent {
    ModelCall {
        sequence: u64,
        iteration: usize,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: EventStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_prompt_preview: Option<String>,
        input_preview: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolCall {
        sequence: u64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: EventStatus,
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        server: Option<String>,
        arguments: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ManifestEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            ManifestEvent::ModelCall { sequence, .. } => *sequence,
            ManifestEvent::ToolCall { sequence, .. } => *sequence,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ManifestEvent::ToolCall { .. })
    }

    pub fn is_model_call(&self) -> bool {
        matches!(self, ManifestEvent::ModelCall { .. })
    }
}

/// The persisted record of one run: every model and tool interaction in
/// issue order, plus the outcome. Written exactly once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    pub run_id: String,
    pub goal: String,
    pub model: String,
    pub sandbox_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub iterations: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub events: Vec<ManifestEvent>,
    pub cleanup_errors: Vec<String>,
}

impl RunManifest {
    pub fn tool_calls(&self) -> impl Iterator<Item = &ManifestEvent> {
        self.events.iter().filter(|event| event.is_tool_call())
    }

    pub fn model_calls(&self) -> impl Iterator<Item = &ManifestEvent> {
        self.events.iter().filter(|event| event.is_model_call())
    }
}
