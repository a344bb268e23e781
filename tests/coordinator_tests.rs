use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use talos::config::{AppConfig, ProviderConfig, ProviderKind};
use talos::coordinator::{RunCoordinator, RunSettings};
use talos::model::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use talos::telemetry::MANIFEST_FILE_NAME;
use talos::types::{ChatMessage, Goal, MessageRole};

struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let mut responses = self.responses.lock().await;
        let content = responses.remove(0);
        Ok(ModelResponse {
            message: ChatMessage::new(MessageRole::Assistant, content),
            usage: None,
        })
    }
}

fn test_config(sandbox_root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.provider = ProviderConfig {
        kind: ProviderKind::Openai,
        endpoint: "http://localhost:1".to_string(),
        api_key_env: "UNUSED_KEY".to_string(),
    };
    config.model = "scripted".to_string();
    config.max_iterations = 3;
    config.model_timeout = Duration::from_secs(5);
    config.sandbox_root = sandbox_root.to_path_buf();
    config.servers = Vec::new();
    config
}

#[tokio::test]
async fn successful_run_persists_a_manifest_in_its_sandbox() {
    let root = tempfile::tempdir().expect("tempdir");
    let provider = Arc::new(ScriptedProvider::new(vec![
        &json!({"action": "complete", "outcome": "success", "summary": "nothing to do"})
            .to_string(),
    ]));
    let coordinator = RunCoordinator::new(test_config(root.path()), provider);

    let report = coordinator
        .execute(Goal::new("report readiness"), RunSettings::default())
        .await
        .expect("run completes");

    assert!(report.manifest.success);
    assert_eq!(report.manifest.iterations, 1);
    assert!(report.manifest.cleanup_errors.is_empty());
    assert!(report.manifest.run_id.starts_with("run-"));

    let expected = root
        .path()
        .join(&report.manifest.run_id)
        .join(MANIFEST_FILE_NAME);
    assert_eq!(report.manifest_path, expected);
    let body = std::fs::read_to_string(&expected).expect("manifest on disk");
    let parsed: serde_json::Value = serde_json::from_str(&body).expect("manifest is json");
    assert_eq!(parsed["success"], json!(true));
    assert_eq!(parsed["model"], json!("scripted"));
    assert_eq!(parsed["events"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn unknown_tool_requests_exhaust_the_iteration_budget() {
    let root = tempfile::tempdir().expect("tempdir");
    let request = json!({"action": "call_tool", "tool": "sandbox_run_command", "input": {}})
        .to_string();
    let provider = Arc::new(ScriptedProvider::new(vec![&request, &request, &request]));
    let coordinator = RunCoordinator::new(test_config(root.path()), provider);

    let report = coordinator
        .execute(Goal::new("use a tool that is not there"), RunSettings::default())
        .await
        .expect("run completes");

    assert!(!report.manifest.success);
    assert_eq!(report.manifest.reason.as_deref(), Some("turn-limit-exceeded"));
    assert_eq!(report.manifest.iterations, 3);
    // Three planning calls, three failed dispatch attempts, all on the trace.
    assert_eq!(report.manifest.model_calls().count(), 3);
    assert_eq!(report.manifest.tool_calls().count(), 3);
}

#[tokio::test]
async fn explicit_run_ids_are_honored() {
    let root = tempfile::tempdir().expect("tempdir");
    let provider = Arc::new(ScriptedProvider::new(vec![
        &json!({"action": "complete", "outcome": "abandoned", "summary": "no tools available"})
            .to_string(),
    ]));
    let coordinator = RunCoordinator::new(test_config(root.path()), provider);

    let settings = RunSettings {
        run_id: Some("run-fixed-id".to_string()),
        ..RunSettings::default()
    };
    let report = coordinator
        .execute(Goal::new("do nothing"), settings)
        .await
        .expect("run completes");

    assert_eq!(report.manifest.run_id, "run-fixed-id");
    assert!(!report.manifest.success);
    assert_eq!(report.manifest.reason.as_deref(), Some("abandoned"));
    assert!(root.path().join("run-fixed-id").join(MANIFEST_FILE_NAME).exists());
}
