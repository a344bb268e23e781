mod client;
mod error;
mod registry;

use async_trait::async_trait;
use serde_json::Value;

pub use client::ToolClient;
pub use error::{ToolError, ToolInvokeError};
pub use registry::ToolRegistry;

/// One tool as advertised by its server.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub server: String,
    pub input_schema: Option<Value>,
}

/// Result of one tool dispatch. A failing command is still a successful
/// invocation; `exit_code` carries the verifiable signal when present.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool: String,
    pub server: String,
    pub success: bool,
    pub output: Value,
    pub message: Option<String>,
    pub exit_code: Option<i64>,
}

/// Seam between the agent loop and the tool layer, so the loop can be
/// exercised against scripted servers.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutcome, ToolError>;

    fn catalog(&self) -> Vec<ToolDescriptor>;

    /// Usage guidance the servers announced at connect time, for prompt
    /// composition.
    fn instructions(&self) -> Vec<String> {
        Vec::new()
    }
}
