//! Core mesh tools.
//!
//! These are the tools every LLM-driven agent gets by default: messaging
//! other agents, spawning children, compressing its own history and
//! yielding until the next message.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bus::{AgentMessage, Disposition};
use crate::error::{MeshError, Result};
use crate::runtime::AgentSpec;

use super::{Tool, ToolContext, ToolOutput, ToolRegistry};

pub(crate) fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Box::new(SendMessageTool));
    registry.register(Box::new(SpawnAgentTool));
    registry.register(Box::new(CompressContextTool));
    registry.register(Box::new(WaitForMessageTool));
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| MeshError::Tool(format!("{}: invalid arguments: {}", tool, e)))
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    to: String,
    content: String,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    delay_ms: Option<u64>,
}

/// Send a text message to another agent or an external recipient.
pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to another agent (by id) or to an external recipient such as 'user'. \
         Optionally tag it with a task id or delay delivery."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient agent id or external recipient" },
                "content": { "type": "string", "description": "Message text" },
                "task_id": { "type": "string", "description": "Task this message belongs to" },
                "delay_ms": { "type": "integer", "minimum": 0, "description": "Deliver after this many milliseconds" }
            },
            "required": ["to", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: SendMessageArgs = parse_args(self.name(), args)?;
        let runtime = ctx.require_runtime()?;

        let mut message = AgentMessage::text(&ctx.agent_id, &args.to, &args.content);
        if let Some(task) = args.task_id.or_else(|| ctx.task_id.clone()) {
            message = message.with_task(task);
        }
        if let Some(delay) = args.delay_ms.filter(|d| *d > 0) {
            message = message.with_delay_ms(delay);
        }

        match runtime.send(message) {
            Ok(receipt) => {
                let how = match receipt.disposition {
                    Disposition::Queued => "queued",
                    Disposition::Delayed => "scheduled",
                    Disposition::Interrupted => "delivered as an interruption",
                    Disposition::Outbound => "delivered",
                };
                Ok(ToolOutput::text(format!(
                    "Message {} to {} ({})",
                    how, args.to, receipt.message_id
                )))
            }
            Err(MeshError::NotFound(what)) => {
                Ok(ToolOutput::error(format!("Unknown recipient: {}", what)))
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnAgentArgs {
    #[serde(default)]
    id: Option<String>,
    name: String,
    role_prompt: String,
    #[serde(default)]
    role_id: Option<String>,
}

/// Spawn a child agent of the caller.
pub struct SpawnAgentTool;

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Create a new agent that reports to you. Its failures are escalated to you, \
         and it is terminated when you are."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Agent id (generated when omitted)" },
                "name": { "type": "string", "description": "Display name" },
                "role_prompt": { "type": "string", "description": "Instructions for the new agent" },
                "role_id": { "type": "string", "description": "Role identifier" }
            },
            "required": ["name", "role_prompt"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: SpawnAgentArgs = parse_args(self.name(), args)?;
        let runtime = ctx.require_runtime()?;

        let mut spec = AgentSpec::new(&args.name)
            .with_role_prompt(&args.role_prompt)
            .with_parent(&ctx.agent_id);
        if let Some(id) = &args.id {
            spec = spec.with_id(id);
        }
        if let Some(role) = &args.role_id {
            spec = spec.with_role_id(role);
        }

        match runtime.spawn_agent(spec).await {
            Ok(id) => Ok(ToolOutput::text(format!("Spawned agent {}", id))),
            Err(MeshError::Config(msg)) => Ok(ToolOutput::error(msg)),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompressArgs {
    summary: String,
    #[serde(default)]
    keep_recent: Option<usize>,
}

/// Replace the caller's older history with a summary.
pub struct CompressContextTool;

#[async_trait]
impl Tool for CompressContextTool {
    fn name(&self) -> &str {
        "compress_context"
    }

    fn description(&self) -> &str {
        "Replace your older conversation history with the summary you provide, \
         keeping the most recent turns. Use when the context status asks you to."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "Summary of the history being dropped" },
                "keep_recent": { "type": "integer", "minimum": 0, "description": "Recent turns to keep" }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: CompressArgs = parse_args(self.name(), args)?;
        if args.summary.trim().is_empty() {
            return Ok(ToolOutput::error("summary must not be empty"));
        }
        let runtime = ctx.require_runtime()?;
        let report = runtime
            .conversations()
            .compress(&ctx.agent_id, &args.summary, args.keep_recent)
            .await?;

        let text = if report.compressed {
            format!(
                "History compressed from {} to {} turns.",
                report.original_count, report.new_count
            )
        } else {
            format!(
                "Nothing to compress ({} turns).",
                report.original_count
            )
        };
        Ok(ToolOutput::text(text))
    }
}

/// End the current message and wait for the next one.
pub struct WaitForMessageTool;

#[async_trait]
impl Tool for WaitForMessageTool {
    fn name(&self) -> &str {
        "wait_for_message"
    }

    fn description(&self) -> &str {
        "Stop working on the current message and wait until another message arrives."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        Ok(ToolOutput::yielding("Waiting for the next message."))
    }
}
