//! Tool types for AgentMesh
//!
//! This module defines the execution boundary between the tool-call loop and
//! tool implementations: the [`ToolExecutor`] trait the loop dispatches
//! through, the [`Tool`] trait individual tools implement, [`ToolOutput`] and
//! the [`ToolContext`] handed to each call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{MeshError, Result};
use crate::providers::ToolDefinition;
use crate::runtime::AgentRuntime;

/// Result of one tool call, recorded as a tool-result turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Content the LLM sees as the tool result.
    pub content: String,
    /// Whether this result represents an error condition.
    pub is_error: bool,
    /// End processing of the current message after this call.
    pub yield_round: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            yield_round: false,
        }
    }

    /// Error result. The round continues; the LLM sees the error.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            yield_round: false,
        }
    }

    /// Successful result that ends the current message.
    pub fn yielding(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            yield_round: true,
        }
    }
}

/// Trait that all tools must implement.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use agentmesh::tools::{Tool, ToolContext, ToolOutput};
/// use agentmesh::error::Result;
///
/// struct Clock;
///
/// #[async_trait]
/// impl Tool for Clock {
///     fn name(&self) -> &str { "clock" }
///     fn description(&self) -> &str { "Current UTC time" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}})
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::text(chrono::Utc::now().to_rfc3339()))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LLM uses to request the tool.
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with parsed arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

/// The boundary the tool-call loop dispatches through.
///
/// [`ToolRegistry`](super::ToolRegistry) implements it; embedders with their
/// own tool business logic can supply any other implementation.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools advertised to the LLM.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one call. Unknown tools should produce an error output, not `Err`.
    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Context provided to tools during execution.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// The calling agent
    pub agent_id: String,
    /// Task id of the message being processed
    pub task_id: Option<String>,
    /// Runtime handle for tools that message, spawn or compress
    pub runtime: Option<Arc<AgentRuntime>>,
}

impl ToolContext {
    /// Create a context for `agent_id` with no runtime attached.
    ///
    /// # Example
    /// ```
    /// use agentmesh::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new("writer").with_task("t-1");
    /// assert_eq!(ctx.agent_id, "writer");
    /// assert_eq!(ctx.task_id.as_deref(), Some("t-1"));
    /// assert!(ctx.runtime.is_none());
    /// ```
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<AgentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The runtime, or a tool error when the context has none.
    pub fn require_runtime(&self) -> Result<&Arc<AgentRuntime>> {
        self.runtime
            .as_ref()
            .ok_or_else(|| MeshError::Tool("tool requires a runtime context".into()))
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent_id", &self.agent_id)
            .field("task_id", &self.task_id)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_output_constructors() {
        let out = ToolOutput::text("ok");
        assert!(!out.is_error && !out.yield_round);

        let err = ToolOutput::error("bad");
        assert!(err.is_error);

        let y = ToolOutput::yielding("waiting");
        assert!(y.yield_round && !y.is_error);
    }

    #[test]
    fn test_context_without_runtime() {
        let ctx = ToolContext::new("a");
        let err = ctx.require_runtime().unwrap_err();
        assert!(matches!(err, MeshError::Tool(_)));
        assert!(format!("{:?}", ctx).contains("runtime: false"));
    }
}
