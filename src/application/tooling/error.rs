use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolInvokeError {
    #[error("tool server '{server}' is not configured")]
    NotConfigured { server: String },
    #[error("failed to spawn tool server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("tool server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tool server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("call to tool server '{server}' timed out after {seconds}s")]
    Timeout { server: String, seconds: u64 },
    #[error("tool server '{server}' terminated unexpectedly")]
    Terminated { server: String },
    #[error("tool server '{server}' request cancelled")]
    Cancelled { server: String },
}

impl ToolInvokeError {
    /// Whether the loop can carry on after feeding this back to the model.
    /// Transport-level losses are not survivable; application-level failures
    /// and timeouts are just the next turn's context.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ToolInvokeError::Rpc { .. }
                | ToolInvokeError::Timeout { .. }
                | ToolInvokeError::InvalidJson { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("failed to execute tool '{tool}': {source}")]
    Invocation {
        tool: String,
        #[source]
        source: ToolInvokeError,
    },
}

impl ToolError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            ToolError::UnknownTool(_) => true,
            ToolError::Invocation { source, .. } => source.is_recoverable(),
        }
    }
}
