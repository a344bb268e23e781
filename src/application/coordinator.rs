use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::agent::{Agent, AgentOptions};
use super::tooling::{ToolClient, ToolInvokeError, ToolRegistry};
use crate::config::AppConfig;
use crate::infrastructure::model::ModelProvider;
use crate::telemetry::{ManifestError, RunManifest, TraceRecorder};
use crate::types::{Goal, RunContext};

const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to prepare workspace at {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Knobs that vary per invocation rather than per deployment.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub run_id: Option<String>,
    pub run_id_prefix: String,
    pub cancel: Arc<AtomicBool>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_id: None,
            run_id_prefix: "run".to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub manifest: RunManifest,
    pub manifest_path: PathBuf,
}

/// Owns the lifecycle around one agent run: workspace, server connections,
/// the loop itself, teardown, and the manifest. Whatever the loop does, the
/// manifest is finalized exactly once and persisted before this returns.
pub struct RunCoordinator {
    config: AppConfig,
    provider: Arc<dyn ModelProvider>,
}

impl RunCoordinator {
    pub fn new(config: AppConfig, provider: Arc<dyn ModelProvider>) -> Self {
        Self { config, provider }
    }

    pub async fn execute(
        &self,
        goal: Goal,
        settings: RunSettings,
    ) -> Result<RunReport, CoordinatorError> {
        let run_id = settings
            .run_id
            .clone()
            .unwrap_or_else(|| generate_run_id(&settings.run_id_prefix));
        let sandbox_path = self.config.sandbox_root.join(&run_id);
        fs::create_dir_all(&sandbox_path).map_err(|source| CoordinatorError::Workspace {
            path: sandbox_path.clone(),
            source,
        })?;

        let context = RunContext {
            run_id: run_id.clone(),
            sandbox_path,
            started_at: Utc::now(),
            model: self.config.model.clone(),
        };
        let recorder = Arc::new(TraceRecorder::new(
            context,
            goal.text.clone(),
            self.config.preview_limit,
        ));
        info!(run_id = %run_id, "run starting");

        let mut clients: Vec<Arc<ToolClient>> = Vec::new();
        for server in &self.config.servers {
            let client = Arc::new(ToolClient::new(server.clone(), self.config.tool_timeout));
            match connect_with_retry(&client).await {
                Ok(()) => clients.push(client),
                Err(err) => {
                    error!(server = %server.name, %err, "tool server never came up");
                    let cleanup = shutdown_all(&clients).await;
                    let manifest = recorder.finalize(
                        false,
                        Some(format!("tool server '{}' unavailable: {err}", server.name)),
                        cleanup,
                    );
                    let manifest_path = recorder.persist()?;
                    return Ok(RunReport {
                        manifest,
                        manifest_path,
                    });
                }
            }
        }

        let registry = Arc::new(ToolRegistry::build(&clients).await);
        let agent = Agent::new(self.provider.clone(), registry, recorder.clone());
        let options = AgentOptions::new(self.config.max_iterations, self.config.model_timeout)
            .with_cancel(settings.cancel.clone());

        let result = agent.run(&goal, &options).await;
        let cleanup_errors = shutdown_all(&clients).await;

        let manifest = match result {
            Ok(outcome) => {
                info!(
                    run_id = %run_id,
                    success = outcome.success,
                    iterations = outcome.iterations,
                    "run finished"
                );
                recorder.finalize(outcome.success, outcome.reason, cleanup_errors)
            }
            Err(err) => {
                error!(run_id = %run_id, %err, "run aborted");
                recorder.finalize(false, Some(err.to_string()), cleanup_errors)
            }
        };
        let manifest_path = recorder.persist()?;
        Ok(RunReport {
            manifest,
            manifest_path,
        })
    }
}

/// `{prefix}-{UTC timestamp}-{8 hex chars}`, unique and sortable by start.
pub fn generate_run_id(prefix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let tail = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{stamp}-{}", &tail[..8])
}

async fn connect_with_retry(client: &Arc<ToolClient>) -> Result<(), ToolInvokeError> {
    let mut last_error = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match client.connect().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(
                    server = client.server_name(),
                    attempt,
                    %err,
                    "tool server connection failed"
                );
                last_error = Some(err);
                if attempt < CONNECT_ATTEMPTS {
                    let backoff = Duration::from_secs(u64::from(attempt).min(5));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| ToolInvokeError::NotConfigured {
        server: client.server_name().to_string(),
    }))
}

/// Best-effort teardown. Failures are reported, never escalated; a run that
/// produced a result keeps it even when a server refuses to die.
async fn shutdown_all(clients: &[Arc<ToolClient>]) -> Vec<String> {
    let mut errors = Vec::new();
    for client in clients {
        if let Err(err) = client.shutdown().await {
            warn!(server = client.server_name(), %err, "tool server shutdown failed");
            errors.push(format!(
                "failed to stop server '{}': {err}",
                client.server_name()
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_carry_prefix_timestamp_and_suffix() {
        let id = generate_run_id("run");
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "run");
        assert_eq!(parts[1].len(), 16);
        assert!(parts[1].ends_with('Z'));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(generate_run_id("bench"), generate_run_id("bench"));
    }
}
