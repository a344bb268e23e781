use serde_json::json;

use crate::application::tooling::ToolDescriptor;
use crate::types::{Goal, RunContext};

/// System preamble: the iterative contract, the sandbox rules, and the tool
/// catalog with schemas. Composed once at loop start.
pub fn compose_system_instructions(
    catalog: &[ToolDescriptor],
    server_instructions: &[String],
    context: &RunContext,
) -> String {
    let sandbox = context.sandbox_path.display();
    let mut lines = vec![
        "You are an autonomous, goal-driven coding agent.".to_string(),
        "Follow this iterative process: understand the goal, inspect or modify files with the filesystem tools, run commands or tests with the executor tools, and keep iterating until the goal is satisfied or clearly infeasible.".to_string(),
        "All responses must be a single valid JSON object without commentary or code fences.".to_string(),
        "To invoke a tool, respond with: {\"action\":\"call_tool\",\"tool\":\"tool_name\",\"input\":{...}}.".to_string(),
        "When the goal is verifiably satisfied, respond with: {\"action\":\"complete\",\"outcome\":\"success\",\"summary\":\"...\"}.".to_string(),
        "If the goal is infeasible, respond with: {\"action\":\"complete\",\"outcome\":\"abandoned\",\"summary\":\"...\"}.".to_string(),
        format!(
            "Every filesystem read or write must stay inside {sandbox}. Use relative paths without leading slashes (e.g. `bubble_sort.py` or `tests/test_sort.py`); never reference host paths."
        ),
        "Declare success only after verification passes.".to_string(),
    ];

    if catalog.is_empty() {
        lines.push("No tools are currently available.".to_string());
    } else {
        lines.push("Available tools:".to_string());
        for descriptor in catalog {
            let mut line = format!("- {} (server: {})", descriptor.name, descriptor.server);
            if let Some(description) = &descriptor.description {
                line.push_str(&format!(": {description}"));
            }
            if let Some(schema) = &descriptor.input_schema {
                let compact = serde_json::to_string(schema).unwrap_or_default();
                line.push_str(&format!(". Input schema: {compact}"));
            }
            lines.push(line);
        }
    }

    if !server_instructions.is_empty() {
        lines.push("Server guidance:".to_string());
        for instruction in server_instructions {
            lines.push(format!("- {instruction}"));
        }
    }

    lines.join("\n")
}

/// The opening user turn: the mission itself, the verification contract, and
/// any reference material, as one structured payload.
pub fn initial_user_prompt(goal: &Goal, context: &RunContext) -> String {
    let mut payload = json!({
        "action": "mission",
        "goal": goal.text,
        "sandbox_root": context.sandbox_path.display().to_string(),
    });

    if let Some(map) = payload.as_object_mut() {
        if let Some(command) = &goal.verify_command {
            map.insert(
                "verification_command".to_string(),
                json!(format!(
                    "`{command}` must exit 0 before success may be declared"
                )),
            );
        }
        if !goal.context_blocks.is_empty() {
            map.insert("context".to_string(), json!(goal.context_blocks));
        }
    }

    payload.to_string()
}
