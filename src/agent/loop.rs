//! Per-message tool-call loop
//!
//! One call to [`ToolCallLoop::process`] drives a single message through
//!
//! ```text
//! build-context ─► waiting_llm ─► processing ─┬─► tool dispatch ─► build-context
//!                                             └─► idle
//! ```
//!
//! and stops on a tool-free answer, a yielding tool, the round budget, a
//! stop/terminate request, or an LLM failure. The runtime returns the agent
//! to `idle` (or `stopped`) once `process` returns.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bus::AgentMessage;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::events::RuntimeEvent;
use crate::providers::{LLMResponse, LLMToolCall};
use crate::runtime::{AgentComputeStatus, AgentRuntime};
use crate::session::Message;
use crate::tools::{ToolContext, ToolExecutor, ToolOutput};

use super::intent::{IntentWithoutToolCall, PostAction, ResponsePostProcessor};
use super::AgentContext;

/// Error type reported to the parent when the round budget runs out.
pub const MAX_TOOL_ROUNDS_EXCEEDED: &str = "max_tool_rounds_exceeded";
/// Error type reported to the parent when the LLM call fails for good.
pub const LLM_CALL_FAILED: &str = "llm_call_failed";

/// How processing of one message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Final text was auto-delivered.
    Delivered { to: String, message_id: String },
    /// Final answer had no text, or no recipient could be resolved.
    Silent,
    /// A tool asked to end the message.
    Yielded,
    /// The round budget ran out; the parent was notified.
    RoundLimit { rounds: u32 },
    /// The in-flight LLM call was aborted.
    Aborted,
    /// The agent was stopped or terminated mid-message.
    Stopped,
    /// The LLM call failed after retries; the parent was notified.
    LlmFailed,
}

pub struct ToolCallLoop {
    tools: Arc<dyn ToolExecutor>,
    post_processors: Vec<Arc<dyn ResponsePostProcessor>>,
    max_tool_rounds: u32,
}

impl ToolCallLoop {
    pub fn new(tools: Arc<dyn ToolExecutor>, max_tool_rounds: u32) -> Self {
        Self {
            tools,
            post_processors: Vec::new(),
            max_tool_rounds: max_tool_rounds.max(1),
        }
    }

    /// Loop with the round budget and intent detector from config.
    pub fn from_config(tools: Arc<dyn ToolExecutor>, config: &AgentConfig) -> Result<Self> {
        let mut tool_loop = Self::new(tools, config.max_tool_rounds);
        if let Some(detector) = IntentWithoutToolCall::from_config(&config.intent_detection)? {
            tool_loop = tool_loop.with_post_processor(Arc::new(detector));
        }
        Ok(tool_loop)
    }

    pub fn with_post_processor(mut self, processor: Arc<dyn ResponsePostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    pub fn max_tool_rounds(&self) -> u32 {
        self.max_tool_rounds
    }

    pub fn tools(&self) -> &Arc<dyn ToolExecutor> {
        &self.tools
    }

    /// Process one message to completion.
    ///
    /// Recoverable failures (bad tool arguments, tool errors, exhausted
    /// rounds, LLM failures) are handled here and reported through the
    /// outcome. `Err` is left for bookkeeping failures the runtime escalates.
    pub async fn process(&self, ctx: &AgentContext, message: AgentMessage) -> Result<LoopOutcome> {
        let agent_id = ctx.agent_id();
        let rt = ctx.runtime();

        let conversations = rt.conversations();
        conversations
            .ensure(agent_id, &ctx.agent().system_prompt())
            .await;
        conversations.begin_message(agent_id).await;
        let mut surfaced = Vec::new();
        let outcome = self.run(ctx, message, &mut surfaced).await;
        conversations.end_message(agent_id).await;
        outcome
    }

    async fn run(
        &self,
        ctx: &AgentContext,
        message: AgentMessage,
        surfaced: &mut Vec<AgentMessage>,
    ) -> Result<LoopOutcome> {
        let agent_id = ctx.agent_id();
        let rt = ctx.runtime();
        let conversations = rt.conversations();

        let banner = conversations.build_context_status_prompt(agent_id).await;
        conversations
            .append(
                agent_id,
                Message::user(&format!("{}\n\n{}", message.render_for_llm(), banner)),
            )
            .await?;

        let mut tool_ctx = ToolContext::new(agent_id).with_runtime(rt.clone());
        tool_ctx.task_id = message.task_id.clone();
        let definitions = self.tools.definitions();
        let mut round: u32 = 0;

        loop {
            if round >= self.max_tool_rounds {
                warn!(agent_id = %agent_id, rounds = round, "Tool round budget exhausted");
                let _ = rt
                    .state()
                    .set_agent_compute_status(agent_id, AgentComputeStatus::Idle);
                rt.notify_parent_error(
                    agent_id,
                    MAX_TOOL_ROUNDS_EXCEEDED,
                    &format!("stopped after {} tool rounds", round),
                );
                return Ok(LoopOutcome::RoundLimit { rounds: round });
            }
            round += 1;

            if !enter(rt, agent_id, AgentComputeStatus::WaitingLlm) {
                if round == 1 && is_stopped(rt, agent_id) {
                    // Stopped before the model saw it: undo and keep the message.
                    conversations.rollback_message(agent_id).await;
                    rt.bus().requeue_front(vec![message]);
                }
                return Ok(LoopOutcome::Stopped);
            }

            let history = conversations.snapshot(agent_id).await;
            debug!(agent_id = %agent_id, round = round, turns = history.len(), "Calling LLM");
            let response = match rt.llm().chat(agent_id, history, definitions.clone()).await {
                Ok(response) => response,
                Err(e) if e.is_abort() => {
                    info!(agent_id = %agent_id, round = round, "LLM call aborted");
                    return Ok(LoopOutcome::Aborted);
                }
                Err(e) => {
                    warn!(agent_id = %agent_id, round = round, error = %e, "LLM call failed");
                    let removed = conversations.rollback_message(agent_id).await;
                    debug!(agent_id = %agent_id, turns = removed, "Rolled back turns of failed message");
                    // Interruptions only lived in the rolled-back turns.
                    surfaced.extend(rt.state().active_set().take_interruptions(agent_id));
                    if !surfaced.is_empty() {
                        info!(agent_id = %agent_id, count = surfaced.len(), "Requeueing interruptions of failed message");
                        rt.bus().requeue_front(std::mem::take(surfaced));
                    }
                    rt.notify_parent_error(agent_id, LLM_CALL_FAILED, &e.to_string());
                    return Ok(LoopOutcome::LlmFailed);
                }
            };

            if let Some(usage) = response.usage {
                conversations.update_token_usage(agent_id, usage).await;
            }

            if is_halted(rt, agent_id) || !enter(rt, agent_id, AgentComputeStatus::Processing) {
                debug!(agent_id = %agent_id, "Agent halted during LLM call, discarding response");
                return Ok(LoopOutcome::Stopped);
            }

            if !response.has_tool_calls() {
                conversations.append(agent_id, response.to_message()).await?;
                if let Some(correction) = self.post_process(&response) {
                    info!(agent_id = %agent_id, round = round, "Response announced an action without a tool call, retrying");
                    conversations
                        .append(agent_id, Message::system(&correction))
                        .await?;
                    continue;
                }
                return self.finish_with_text(ctx, &message, &response.content).await;
            }

            conversations.append(agent_id, response.to_message()).await?;
            match self
                .dispatch_batch(ctx, &tool_ctx, &response.tool_calls, round)
                .await?
            {
                BatchEnd::Completed => {}
                BatchEnd::Yielded => return Ok(LoopOutcome::Yielded),
                BatchEnd::Halted => return Ok(LoopOutcome::Stopped),
            }

            let interruptions = rt.state().active_set().take_interruptions(agent_id);
            if !interruptions.is_empty() {
                info!(agent_id = %agent_id, count = interruptions.len(), "Surfacing interruptions");
                let body = interruptions
                    .iter()
                    .map(AgentMessage::render_for_llm)
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let banner = conversations.build_context_status_prompt(agent_id).await;
                conversations
                    .append(agent_id, Message::user(&format!("{}\n\n{}", body, banner)))
                    .await?;
                surfaced.extend(interruptions);
            }
        }
    }

    fn post_process(&self, response: &LLMResponse) -> Option<String> {
        self.post_processors
            .iter()
            .find_map(|p| match p.inspect(response) {
                PostAction::Accept => None,
                PostAction::Retry { correction } => {
                    debug!(processor = p.name(), "Post-processor requested retry");
                    Some(correction)
                }
            })
    }

    async fn finish_with_text(
        &self,
        ctx: &AgentContext,
        message: &AgentMessage,
        content: &str,
    ) -> Result<LoopOutcome> {
        if content.trim().is_empty() {
            return Ok(LoopOutcome::Silent);
        }
        match ctx
            .runtime()
            .deliver_reply(ctx.agent_id(), message, content)?
        {
            Some((to, receipt)) => Ok(LoopOutcome::Delivered {
                to,
                message_id: receipt.message_id,
            }),
            None => Ok(LoopOutcome::Silent),
        }
    }

    async fn dispatch_batch(
        &self,
        ctx: &AgentContext,
        tool_ctx: &ToolContext,
        calls: &[LLMToolCall],
        round: u32,
    ) -> Result<BatchEnd> {
        let agent_id = ctx.agent_id();
        let rt = ctx.runtime();

        for (i, call) in calls.iter().enumerate() {
            if is_halted(rt, agent_id) {
                debug!(agent_id = %agent_id, remaining = calls.len() - i, "Agent halted, skipping remaining tool calls");
                skip_rest(rt, agent_id, &calls[i..], "agent stopped").await?;
                return Ok(BatchEnd::Halted);
            }

            let started = Instant::now();
            let (arguments, output) = match parse_arguments(&call.arguments) {
                Ok(args) => {
                    let output = match self.tools.execute(&call.name, args.clone(), tool_ctx).await {
                        Ok(out) => out,
                        Err(e) => ToolOutput::error(format!("Error: {}", e)),
                    };
                    (args, output)
                }
                Err(e) => {
                    warn!(agent_id = %agent_id, tool = %call.name, error = %e, "Invalid JSON in tool arguments");
                    (
                        Value::String(call.arguments.clone()),
                        ToolOutput::error(format!("Error: invalid arguments JSON: {}", e)),
                    )
                }
            };
            let elapsed = started.elapsed();

            debug!(
                agent_id = %agent_id,
                round = round,
                tool = %call.name,
                is_error = output.is_error,
                latency_ms = elapsed.as_millis() as u64,
                "Tool call finished"
            );
            rt.llm()
                .metrics()
                .record_tool_call(&call.name, elapsed, !output.is_error);
            rt.events().emit(RuntimeEvent::ToolCall {
                agent_id: agent_id.to_string(),
                tool: call.name.clone(),
                arguments,
                is_error: output.is_error,
                duration_ms: elapsed.as_millis() as u64,
            });

            rt.conversations()
                .append(agent_id, Message::tool_result(&call.id, &output.content))
                .await?;

            if output.yield_round {
                skip_rest(rt, agent_id, &calls[i + 1..], "message ended by an earlier tool").await?;
                return Ok(BatchEnd::Yielded);
            }
        }
        Ok(BatchEnd::Completed)
    }
}

enum BatchEnd {
    Completed,
    Yielded,
    Halted,
}

fn parse_arguments(raw: &str) -> serde_json::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

fn is_halted(rt: &AgentRuntime, agent_id: &str) -> bool {
    rt.state()
        .status(agent_id)
        .map_or(true, AgentComputeStatus::is_halted)
}

fn is_stopped(rt: &AgentRuntime, agent_id: &str) -> bool {
    matches!(
        rt.state().status(agent_id),
        Some(AgentComputeStatus::Stopping | AgentComputeStatus::Stopped)
    )
}

/// Apply a status; `false` when the agent was stopped or removed meanwhile.
fn enter(rt: &AgentRuntime, agent_id: &str, status: AgentComputeStatus) -> bool {
    match rt.state().set_agent_compute_status(agent_id, status) {
        Ok(_) => true,
        Err(e) => {
            debug!(agent_id = %agent_id, error = %e, "Status change refused");
            false
        }
    }
}

/// Answer every unexecuted call so the transcript stays well formed.
async fn skip_rest(
    rt: &AgentRuntime,
    agent_id: &str,
    calls: &[LLMToolCall],
    reason: &str,
) -> Result<()> {
    for call in calls {
        rt.conversations()
            .append(
                agent_id,
                Message::tool_result(&call.id, &format!("Skipped: {}", reason)),
            )
            .await?;
    }
    Ok(())
}
