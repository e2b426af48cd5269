//! AgentMesh - message scheduling and tool-calling engine for long-lived LLM agents
//!
//! Agents exchange messages over a [`MessageBus`]; the [`MessageScheduler`]
//! hands each agent at most one message at a time, bounded by the provider's
//! concurrent-request budget; the [`ToolCallLoop`] drives a message through
//! LLM calls and tool dispatch until the agent answers, yields or fails.

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod providers;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{Agent, AgentBehavior, AgentContext, FnBehavior, LlmBehavior, ToolCallLoop};
pub use bus::{AgentMessage, Disposition, MessageBus, SendReceipt};
pub use config::Config;
pub use error::{MeshError, ProviderError, Result};
pub use events::{EventHub, RuntimeEvent};
pub use providers::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, LlmClient, ScriptedProvider,
    ToolDefinition, Usage,
};
pub use runtime::{AgentComputeStatus, AgentRuntime, AgentSpec, RuntimeState};
pub use scheduler::{MessageScheduler, RunReport, ShutdownReport, TickOutcome};
pub use session::{ConversationManager, Message, Role, ToolCall};
