//! Agent module - agents, behaviors and the per-message tool-call loop
//!
//! An [`Agent`] is an identity plus a behavior capability. The runtime owns
//! agents; the scheduler hands each dequeued message to
//! [`AgentBehavior::on_message`] together with an [`AgentContext`] that gives
//! the behavior access to the runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   message   ┌──────────────┐    chat    ┌───────────┐
//! │ Scheduler │────────────>│ LlmBehavior  │───────────>│ LlmClient │
//! └───────────┘             │ (ToolCallLoop)│<───────────└───────────┘
//!                           └──────────────┘
//!                              │        │
//!                 tool calls   ▼        ▼  turns
//!                     ┌──────────────┐ ┌─────────────────────┐
//!                     │ ToolExecutor │ │ ConversationManager │
//!                     └──────────────┘ └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use agentmesh::agent::{Agent, FnBehavior};
//!
//! let echo = FnBehavior::new(|ctx, msg| async move {
//!     ctx.runtime()
//!         .send_message(ctx.agent_id(), &msg.from, &msg.as_text(), None)
//!         .map(|_| ())
//! });
//! let agent = Agent::new("echo", "Echo", "", Arc::new(echo));
//! assert_eq!(agent.id, "echo");
//! ```

pub mod compaction;
pub mod intent;
mod r#loop;

pub use intent::{IntentWithoutToolCall, PostAction, ResponsePostProcessor};
pub use r#loop::{LoopOutcome, ToolCallLoop};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::bus::AgentMessage;
use crate::error::Result;
use crate::runtime::AgentRuntime;

/// A named actor. Stateless beyond identity; conversation and status live
/// in the runtime.
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role_prompt: String,
    pub behavior: Arc<dyn AgentBehavior>,
}

impl Agent {
    pub fn new(id: &str, name: &str, role_prompt: &str, behavior: Arc<dyn AgentBehavior>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role_prompt: role_prompt.to_string(),
            behavior,
        }
    }

    /// System turn for the agent's conversation.
    pub fn system_prompt(&self) -> String {
        if self.role_prompt.is_empty() {
            format!("You are {} (agent id: {}).", self.name, self.id)
        } else {
            format!(
                "You are {} (agent id: {}).\n\n{}",
                self.name, self.id, self.role_prompt
            )
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("behavior", &self.behavior.kind())
            .finish()
    }
}

/// What a behavior sees while handling one message.
#[derive(Clone)]
pub struct AgentContext {
    agent: Arc<Agent>,
    runtime: Arc<AgentRuntime>,
}

impl AgentContext {
    pub fn new(agent: Arc<Agent>, runtime: Arc<AgentRuntime>) -> Self {
        Self { agent, runtime }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }
}

/// The capability an agent runs for each message it receives.
///
/// Errors returned here are caught by the runtime, logged and escalated to
/// the agent's parent; they never reach the scheduler.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    async fn on_message(&self, ctx: &AgentContext, message: AgentMessage) -> Result<()>;

    /// Short label for logs.
    fn kind(&self) -> &str {
        "custom"
    }
}

/// Drives each message through the LLM tool-call loop.
pub struct LlmBehavior {
    tool_loop: Arc<ToolCallLoop>,
}

impl LlmBehavior {
    pub fn new(tool_loop: Arc<ToolCallLoop>) -> Self {
        Self { tool_loop }
    }

    pub fn tool_loop(&self) -> &Arc<ToolCallLoop> {
        &self.tool_loop
    }
}

#[async_trait]
impl AgentBehavior for LlmBehavior {
    async fn on_message(&self, ctx: &AgentContext, message: AgentMessage) -> Result<()> {
        self.tool_loop.process(ctx, message).await.map(|_| ())
    }

    fn kind(&self) -> &str {
        "llm"
    }
}

type BehaviorFn = dyn Fn(AgentContext, AgentMessage) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Behavior backed by a closure. Useful for deterministic agents and tests.
pub struct FnBehavior {
    f: Box<BehaviorFn>,
}

impl FnBehavior {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(AgentContext, AgentMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx, msg| f(ctx, msg).boxed()),
        }
    }

    /// Accepts every message and does nothing.
    pub fn noop() -> Self {
        Self::new(|_, _| async { Ok(()) })
    }
}

#[async_trait]
impl AgentBehavior for FnBehavior {
    async fn on_message(&self, ctx: &AgentContext, message: AgentMessage) -> Result<()> {
        (self.f)(ctx.clone(), message).await
    }

    fn kind(&self) -> &str {
        "fn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt() {
        let agent = Agent::new("w1", "Writer", "Write short answers.", Arc::new(FnBehavior::noop()));
        let prompt = agent.system_prompt();
        assert!(prompt.starts_with("You are Writer (agent id: w1)."));
        assert!(prompt.ends_with("Write short answers."));

        let bare = Agent::new("w2", "Writer", "", Arc::new(FnBehavior::noop()));
        assert_eq!(bare.system_prompt(), "You are Writer (agent id: w2).");
    }

    #[test]
    fn test_debug_shows_behavior_kind() {
        let agent = Agent::new("a", "A", "", Arc::new(FnBehavior::noop()));
        assert!(format!("{:?}", agent).contains("fn"));
    }
}
