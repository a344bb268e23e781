use serde_json::Value;
use thiserror::Error;

use super::directive::AgentDirective;

#[derive(Debug, Error)]
#[error("invalid agent response: {0}")]
pub struct DirectiveError(pub String);

/// Interpret a model response as a directive. Tolerates fenced code blocks
/// and surrounding prose, but the payload itself must be a JSON object with
/// an `action` field.
pub fn parse_directive(content: &str) -> Result<AgentDirective, DirectiveError> {
    match extract_json(content) {
        Some(value) => parse_value(value),
        None => Err(DirectiveError(
            "expected a JSON object in the agent response".into(),
        )),
    }
}

fn parse_value(value: Value) -> Result<AgentDirective, DirectiveError> {
    match value {
        Value::Object(map) => {
            let action = map
                .get("action")
                .and_then(Value::as_str)
                .ok_or_else(|| DirectiveError("missing action field".into()))?;
            match action {
                "call_tool" => {
                    let tool = map
                        .get("tool")
                        .and_then(Value::as_str)
                        .ok_or_else(|| DirectiveError("call_tool action missing tool field".into()))?;
                    let input = map.get("input").cloned().unwrap_or(Value::Null);
                    Ok(AgentDirective::CallTool {
                        tool: tool.to_string(),
                        input,
                    })
                }
                "complete" => {
                    let outcome = map
                        .get("outcome")
                        .and_then(Value::as_str)
                        .ok_or_else(|| DirectiveError("complete action missing outcome field".into()))?;
                    let success = match outcome {
                        "success" => true,
                        "abandoned" => false,
                        other => {
                            return Err(DirectiveError(format!(
                                "unknown outcome value: {other}"
                            )));
                        }
                    };
                    let summary = map
                        .get("summary")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Ok(AgentDirective::Complete { success, summary })
                }
                other => Err(DirectiveError(format!("unknown action value: {other}"))),
            }
        }
        Value::String(text) => parse_directive(&text),
        other => Err(DirectiveError(format!("unsupported response type: {other}"))),
    }
}

fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed.trim_start_matches("```json");
        let stripped = stripped.trim_start_matches("```JSON");
        let stripped = stripped.trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            let slice = &stripped[..end];
            if let Ok(value) = serde_json::from_str::<Value>(slice.trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let candidate = &trimmed[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}
