use serde_json::Value;

/// The one structured action a planning step may produce: either a tool
/// invocation request or an explicit termination signal.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDirective {
    CallTool { tool: String, input: Value },
    Complete { success: bool, summary: String },
}
