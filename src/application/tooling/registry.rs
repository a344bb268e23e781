use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::ToolClient;
use super::error::ToolError;
use super::{ToolDescriptor, ToolDispatch, ToolOutcome};

/// Aggregates every connected tool client into one namespace. Built once per
/// run; resolves a tool name to the client whose server advertises it and
/// delegates. No retry logic lives here.
pub struct ToolRegistry {
    catalog: Vec<ToolDescriptor>,
    index: HashMap<String, Arc<ToolClient>>,
    instructions: Vec<String>,
}

impl ToolRegistry {
    pub async fn build(clients: &[Arc<ToolClient>]) -> Self {
        let mut catalog = Vec::new();
        let mut index = HashMap::new();
        let mut instructions = Vec::new();
        for client in clients {
            if let Some(text) = client.instructions().await {
                instructions.push(format!("[{}] {text}", client.server_name()));
            }
            let mut tools = client.tools().await;
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            for descriptor in tools {
                if index.contains_key(&descriptor.name) {
                    warn!(
                        tool = %descriptor.name,
                        server = %client.server_name(),
                        "tool name already advertised by an earlier server; keeping first"
                    );
                    continue;
                }
                index.insert(descriptor.name.clone(), Arc::clone(client));
                catalog.push(descriptor);
            }
        }
        debug!(tool_count = catalog.len(), "tool registry built");
        Self {
            catalog,
            index,
            instructions,
        }
    }

    fn resolve(&self, tool: &str) -> Result<&Arc<ToolClient>, ToolError> {
        self.index
            .get(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))
    }
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutcome, ToolError> {
        let client = self.resolve(tool)?;
        let server = client.server_name().to_string();
        debug!(tool, server = %server, "dispatching tool call");
        let result = client
            .call_tool(tool, arguments)
            .await
            .map_err(|source| ToolError::Invocation {
                tool: tool.to_string(),
                source,
            })?;

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(ToolOutcome {
            tool: tool.to_string(),
            server,
            success: !is_error,
            message: extract_tool_message(&result),
            exit_code: extract_exit_code(&result),
            output: result,
        })
    }

    fn catalog(&self) -> Vec<ToolDescriptor> {
        self.catalog.clone()
    }

    fn instructions(&self) -> Vec<String> {
        self.instructions.clone()
    }
}

/// Pull a human-readable summary out of an MCP tool result: the first
/// non-empty text content block, or a structured error message.
fn extract_tool_message(result: &Value) -> Option<String> {
    if let Some(array) = result.get("content").and_then(Value::as_array) {
        for block in array {
            if block
                .get("type")
                .and_then(Value::as_str)
                .map(|value| value.eq_ignore_ascii_case("text"))
                .unwrap_or(false)
            {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
    }

    if let Some(structured) = result.get("structuredContent").and_then(Value::as_object) {
        if let Some(error) = structured.get("error").and_then(Value::as_object) {
            if let Some(message) = error.get("message").and_then(Value::as_str) {
                let trimmed = message.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    None
}

/// Execution-style tools report `exit_code` in their payload. Servers differ
/// in where they put it: structured content, the top level, or JSON embedded
/// in a text block.
fn extract_exit_code(result: &Value) -> Option<i64> {
    if let Some(code) = result
        .get("structuredContent")
        .and_then(|s| s.get("exit_code"))
        .and_then(Value::as_i64)
    {
        return Some(code);
    }
    if let Some(code) = result.get("exit_code").and_then(Value::as_i64) {
        return Some(code);
    }
    if let Some(array) = result.get("content").and_then(Value::as_array) {
        for block in array {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                    if let Some(code) = parsed.get("exit_code").and_then(Value::as_i64) {
                        return Some(code);
                    }
                }
            }
        }
    }
    None
}
