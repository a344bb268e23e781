use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use super::errors::AgentError;
use super::instructions::{compose_system_instructions, initial_user_prompt};
use super::models::{AgentOptions, AgentOutcome, REASON_ABANDONED, REASON_CANCELLED, REASON_TURN_LIMIT};
use super::parser::parse_directive;
use super::AgentDirective;
use crate::application::tooling::{ToolDispatch, ToolError};
use crate::infrastructure::model::{ModelProvider, ModelRequest};
use crate::telemetry::{ModelCall, ToolCall, TraceRecorder};
use crate::types::{ChatMessage, Goal, MessageRole};

/// The iteration engine. Each turn asks the model for exactly one action,
/// executes it through the tool dispatch seam, feeds the result back, and
/// decides whether to continue. The conversation grows append-only; the
/// recorder sees every model and tool call, in issue order, on every path.
pub struct Agent {
    provider: Arc<dyn ModelProvider>,
    dispatch: Arc<dyn ToolDispatch>,
    recorder: Arc<TraceRecorder>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        dispatch: Arc<dyn ToolDispatch>,
        recorder: Arc<TraceRecorder>,
    ) -> Self {
        Self {
            provider,
            dispatch,
            recorder,
        }
    }

    pub async fn run(&self, goal: &Goal, options: &AgentOptions) -> Result<AgentOutcome, AgentError> {
        let context = self.recorder.context().clone();
        info!(run_id = %context.run_id, "agent run started");

        let catalog = self.dispatch.catalog();
        let server_instructions = self.dispatch.instructions();
        let system_prompt = compose_system_instructions(&catalog, &server_instructions, &context);
        let mut conversation = vec![
            ChatMessage::new(MessageRole::System, system_prompt.clone()),
            ChatMessage::new(MessageRole::User, initial_user_prompt(goal, &context)),
        ];

        let verify = goal.verify_command.is_some();
        let mut last_exit_code: Option<i64> = None;
        let mut iterations = 0usize;

        loop {
            if options.cancel.load(Ordering::Relaxed) {
                warn!(run_id = %context.run_id, "run cancelled between iterations");
                return Ok(AgentOutcome::failed(REASON_CANCELLED, iterations));
            }
            if iterations >= options.max_iterations {
                warn!(
                    run_id = %context.run_id,
                    limit = options.max_iterations,
                    "iteration bound reached"
                );
                return Ok(AgentOutcome::failed(REASON_TURN_LIMIT, iterations));
            }
            iterations += 1;

            let input_preview = conversation
                .last()
                .map(|turn| turn.content.clone())
                .unwrap_or_default();
            let request = ModelRequest {
                model: context.model.clone(),
                messages: conversation.clone(),
            };
            debug!(iteration = iterations, "submitting planning turn to model");
            let started_at = Utc::now();
            let result = tokio::time::timeout(options.model_timeout, self.provider.chat(request)).await;
            let ended_at = Utc::now();

            let response = match result {
                Err(_) => {
                    let message = format!(
                        "model call timed out after {}s",
                        options.model_timeout.as_secs()
                    );
                    warn!(iteration = iterations, "{message}");
                    self.recorder.record_model_call(ModelCall {
                        started_at,
                        ended_at,
                        system_prompt: Some(system_prompt.clone()),
                        input: input_preview,
                        response: None,
                        usage: None,
                        error: Some(message.clone()),
                    });
                    conversation.push(model_failure_turn(&message));
                    continue;
                }
                Ok(Err(err)) => {
                    warn!(iteration = iterations, %err, "model call failed");
                    self.recorder.record_model_call(ModelCall {
                        started_at,
                        ended_at,
                        system_prompt: Some(system_prompt.clone()),
                        input: input_preview,
                        response: None,
                        usage: None,
                        error: Some(err.to_string()),
                    });
                    conversation.push(model_failure_turn(&err.to_string()));
                    continue;
                }
                Ok(Ok(response)) => response,
            };

            self.recorder.record_model_call(ModelCall {
                started_at,
                ended_at,
                system_prompt: Some(system_prompt.clone()),
                input: input_preview,
                response: Some(response.message.content.clone()),
                usage: response.usage.clone(),
                error: None,
            });
            conversation.push(response.message.clone());

            let directive = match parse_directive(&response.message.content) {
                Ok(directive) => directive,
                Err(err) => {
                    debug!(iteration = iterations, %err, "unparseable planning response");
                    conversation.push(ChatMessage::new(
                        MessageRole::User,
                        json!({
                            "error": err.to_string(),
                            "hint": "respond with a single JSON object using the documented actions",
                        })
                        .to_string(),
                    ));
                    continue;
                }
            };

            match directive {
                AgentDirective::CallTool { tool, input } => {
                    let feedback = self
                        .dispatch_tool(&tool, input, &mut last_exit_code)
                        .await?;
                    // A passing verification result decides the run on its
                    // own; no further model turn is needed to confirm it.
                    if verify && last_exit_code == Some(0) {
                        info!(
                            run_id = %context.run_id,
                            iterations,
                            "verification command passed; run complete"
                        );
                        return Ok(AgentOutcome {
                            success: true,
                            reason: None,
                            iterations,
                            summary: Some("verification command exited 0".to_string()),
                        });
                    }
                    conversation.push(ChatMessage::new(MessageRole::User, feedback));
                }
                AgentDirective::Complete { success, summary } => {
                    if success && verify && last_exit_code != Some(0) {
                        warn!(
                            iteration = iterations,
                            ?last_exit_code,
                            "success claimed without a passing verification result"
                        );
                        conversation.push(ChatMessage::new(
                            MessageRole::User,
                            json!({
                                "verification": {
                                    "accepted": false,
                                    "last_exit_code": last_exit_code,
                                    "message": "Success was claimed, but the verification command has not been observed to exit 0. Run it and declare success only after it passes.",
                                }
                            })
                            .to_string(),
                        ));
                        continue;
                    }
                    info!(
                        run_id = %context.run_id,
                        success,
                        iterations,
                        "agent signalled termination"
                    );
                    return Ok(AgentOutcome {
                        success,
                        reason: if success {
                            None
                        } else {
                            Some(REASON_ABANDONED.to_string())
                        },
                        iterations,
                        summary: Some(summary),
                    });
                }
            }
        }
    }

    /// Dispatch one tool request, record the attempt whatever happens, and
    /// turn the result into the next conversation turn. Only unrecoverable
    /// transport failures propagate.
    async fn dispatch_tool(
        &self,
        tool: &str,
        input: serde_json::Value,
        last_exit_code: &mut Option<i64>,
    ) -> Result<String, AgentError> {
        let started_at = Utc::now();
        let result = self.dispatch.invoke(tool, input.clone()).await;
        let ended_at = Utc::now();

        match result {
            Ok(outcome) => {
                if let Some(code) = outcome.exit_code {
                    *last_exit_code = Some(code);
                }
                self.recorder.record_tool_call(ToolCall {
                    started_at,
                    ended_at,
                    tool: outcome.tool.clone(),
                    server: Some(outcome.server.clone()),
                    arguments: input,
                    output: Some(outcome.output.to_string()),
                    error: if outcome.success {
                        None
                    } else {
                        Some(
                            outcome
                                .message
                                .clone()
                                .unwrap_or_else(|| "tool reported an error".to_string()),
                        )
                    },
                });
                info!(tool = %outcome.tool, success = outcome.success, "tool executed");
                Ok(json!({
                    "tool_result": {
                        "tool": outcome.tool,
                        "server": outcome.server,
                        "success": outcome.success,
                        "output": outcome.output,
                        "message": outcome.message,
                    }
                })
                .to_string())
            }
            Err(err) => {
                self.recorder.record_tool_call(ToolCall {
                    started_at,
                    ended_at,
                    tool: tool.to_string(),
                    server: None,
                    arguments: input,
                    output: None,
                    error: Some(err.to_string()),
                });
                match err {
                    ToolError::Invocation { source, .. } if !source.is_recoverable() => {
                        Err(AgentError::Transport(source))
                    }
                    err => {
                        warn!(tool, %err, "tool dispatch failed; feeding back as context");
                        Ok(json!({
                            "tool_result": {
                                "tool": tool,
                                "success": false,
                                "error": err.to_string(),
                            }
                        })
                        .to_string())
                    }
                }
            }
        }
    }
}

/// Feedback turn for a failed or timed-out planning call, so the retry does
/// not replay a byte-identical request.
fn model_failure_turn(message: &str) -> ChatMessage {
    ChatMessage::new(
        MessageRole::User,
        json!({
            "error": message,
            "hint": "the previous planning call failed; respond with a single JSON object using the documented actions",
        })
        .to_string(),
    )
}
