use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_CONFIG_PATH: &str = "config/talos.toml";
const DEFAULT_SANDBOX_ROOT: &str = "sandbox_volumes";
const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PREVIEW_LIMIT: usize = 600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub model: String,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub preview_limit: usize,
    pub sandbox_root: PathBuf,
    pub servers: Vec<ServerConfig>,
}

/// How to launch one sandboxed tool server process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    Openai,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint: String,
    /// Environment variable holding the API key, for providers that need one.
    pub api_key_env: String,
}

impl ProviderConfig {
    pub fn defaults_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Openai => Self {
                kind,
                endpoint: "https://api.openai.com".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
            },
            ProviderKind::Ollama => Self {
                kind,
                endpoint: "http://127.0.0.1:11434".to_string(),
                api_key_env: String::new(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    provider: Option<ProviderKind>,
    endpoint: Option<String>,
    api_key_env: Option<String>,
    max_iterations: Option<usize>,
    model_timeout_seconds: Option<u64>,
    tool_timeout_seconds: Option<u64>,
    preview_limit: Option<usize>,
    sandbox_root: Option<PathBuf>,
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        RawConfig::default().into()
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parsed.into())
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let kind = raw.provider.unwrap_or(ProviderKind::Openai);
        let defaults = ProviderConfig::defaults_for(kind);
        Self {
            provider: ProviderConfig {
                kind,
                endpoint: raw.endpoint.unwrap_or(defaults.endpoint),
                api_key_env: raw.api_key_env.unwrap_or(defaults.api_key_env),
            },
            model: raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_iterations: raw.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            model_timeout: Duration::from_secs(
                raw.model_timeout_seconds.unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS),
            ),
            tool_timeout: Duration::from_secs(
                raw.tool_timeout_seconds.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS),
            ),
            preview_limit: raw.preview_limit.unwrap_or(DEFAULT_PREVIEW_LIMIT),
            sandbox_root: raw
                .sandbox_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SANDBOX_ROOT)),
            servers: raw.servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let err = AppConfig::load(Some(&path)).expect_err("load should fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn defaults_cover_the_full_surface() {
        let config = AppConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.provider.kind, ProviderKind::Openai);
        assert_eq!(config.sandbox_root, PathBuf::from(DEFAULT_SANDBOX_ROOT));
        assert!(config.servers.is_empty());
    }

    #[test]
    fn reads_model_and_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("talos.toml");
        fs::write(
            &path,
            r#"
model = "qwen2.5-coder"
provider = "ollama"
max_iterations = 4
tool_timeout_seconds = 30
"#,
        )
        .expect("write config");

        let config = AppConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.model, "qwen2.5-coder");
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.provider.endpoint, "http://127.0.0.1:11434");
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.model_timeout, Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS));
    }

    #[test]
    fn reads_server_definitions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("talos.toml");
        fs::write(
            &path,
            r#"
[[servers]]
name = "sandbox-filesystem"
command = "uv"
args = ["run", "fs-server", "--transport", "stdio"]

[[servers]]
name = "sandbox-executor"
command = "uv"
args = ["run", "exec-server", "--transport", "stdio"]
env = { SANDBOX_ROOT = "/sandbox" }
"#,
        )
        .expect("write servers config");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name, "sandbox-filesystem");
        assert_eq!(config.servers[0].args.len(), 4);
        assert!(config.servers[0].env.is_empty());
        assert_eq!(
            config.servers[1].env.get("SANDBOX_ROOT").map(String::as_str),
            Some("/sandbox")
        );
    }
}
