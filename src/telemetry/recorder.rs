use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::manifest::{EventStatus, ManifestEvent, RunManifest};
use crate::types::{RunContext, TokenUsage};

pub const MANIFEST_FILE_NAME: &str = "run_manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest cannot be persisted before finalize")]
    NotFinalized,
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write manifest to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A completed model invocation, ready to be appended to the trace.
#[derive(Debug)]
pub struct ModelCall {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub system_prompt: Option<String>,
    pub input: String,
    pub response: Option<String>,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
}

/// A completed tool dispatch attempt, successful or not.
#[derive(Debug)]
pub struct ToolCall {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tool: String,
    pub server: Option<String>,
    pub arguments: Value,
    pub output: Option<String>,
    pub error: Option<String>,
}

struct RecorderState {
    events: Vec<ManifestEvent>,
    sequence: u64,
    iterations: usize,
}

/// Append-only trace for one run. One instance per RunContext, never a
/// process-wide singleton, so concurrent runs cannot cross-contaminate.
/// `finalize` freezes the manifest; later calls return the same snapshot.
pub struct TraceRecorder {
    context: RunContext,
    goal: String,
    preview_limit: usize,
    state: Mutex<RecorderState>,
    frozen: OnceCell<RunManifest>,
}

impl TraceRecorder {
    pub fn new(context: RunContext, goal: impl Into<String>, preview_limit: usize) -> Self {
        Self {
            context,
            goal: goal.into(),
            preview_limit,
            state: Mutex::new(RecorderState {
                events: Vec::new(),
                sequence: 0,
                iterations: 0,
            }),
            frozen: OnceCell::new(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn record_model_call(&self, call: ModelCall) {
        let status = if call.error.is_none() {
            EventStatus::Ok
        } else {
            EventStatus::Error
        };
        let mut state = self.state.lock().expect("trace recorder lock");
        state.sequence += 1;
        state.iterations += 1;
        let event = ManifestEvent::ModelCall {
            sequence: state.sequence,
            iteration: state.iterations,
            started_at: call.started_at,
            ended_at: call.ended_at,
            status,
            system_prompt_preview: call
                .system_prompt
                .map(|text| truncate_preview(&text, self.preview_limit)),
            input_preview: truncate_preview(&call.input, self.preview_limit),
            response_preview: call
                .response
                .map(|text| truncate_preview(&text, self.preview_limit)),
            usage: call.usage,
            error: call.error,
        };
        state.events.push(event);
    }

    pub fn record_tool_call(&self, call: ToolCall) {
        let status = if call.error.is_none() {
            EventStatus::Ok
        } else {
            EventStatus::Error
        };
        let mut state = self.state.lock().expect("trace recorder lock");
        state.sequence += 1;
        let event = ManifestEvent::ToolCall {
            sequence: state.sequence,
            started_at: call.started_at,
            ended_at: call.ended_at,
            status,
            tool: call.tool,
            server: call.server,
            arguments: call.arguments,
            output_preview: call
                .output
                .map(|text| truncate_preview(&text, self.preview_limit)),
            error: call.error,
        };
        state.events.push(event);
    }

    /// Freeze the manifest. Idempotent: the first call decides the snapshot
    /// and every later call returns it unchanged, whatever arguments it got.
    pub fn finalize(
        &self,
        success: bool,
        reason: Option<String>,
        cleanup_errors: Vec<String>,
    ) -> RunManifest {
        self.frozen
            .get_or_init(|| {
                let state = self.state.lock().expect("trace recorder lock");
                let completed_at = Utc::now();
                RunManifest {
                    run_id: self.context.run_id.clone(),
                    goal: self.goal.clone(),
                    model: self.context.model.clone(),
                    sandbox_path: self.context.sandbox_path.display().to_string(),
                    started_at: self.context.started_at,
                    completed_at,
                    duration_seconds: (completed_at - self.context.started_at)
                        .num_milliseconds() as f64
                        / 1000.0,
                    iterations: state.iterations,
                    success,
                    reason,
                    events: state.events.clone(),
                    cleanup_errors,
                }
            })
            .clone()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.context.sandbox_path.join(MANIFEST_FILE_NAME)
    }

    /// Write the frozen manifest next to the run's sandbox. Exactly-once is
    /// the coordinator's responsibility; this just refuses to run early.
    pub fn persist(&self) -> Result<PathBuf, ManifestError> {
        let manifest = self.frozen.get().ok_or(ManifestError::NotFinalized)?;
        let path = self.manifest_path();
        let body = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, body).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "run manifest persisted");
        Ok(path)
    }
}

/// Bound a preview to `limit` characters. Always keeps the `...` marker when
/// anything was cut, and only ever slices at char boundaries.
pub fn truncate_preview(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let keep = limit.saturating_sub(3);
    let byte_offset = value
        .char_indices()
        .nth(keep)
        .map(|(index, _)| index)
        .unwrap_or(value.len());
    format!("{}...", &value[..byte_offset])
}
