//! Provider types for AgentMesh
//!
//! This module defines the core types and traits for LLM providers,
//! including the `LLMProvider` trait, chat options, and response types.
//! Concrete network providers live outside this crate; anything that can
//! answer a chat completion implements [`LLMProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::session::{Message, ToolCall};

/// Definition of a tool that can be called by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (must be unique)
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    ///
    /// # Example
    /// ```
    /// use agentmesh::providers::ToolDefinition;
    /// use serde_json::json;
    ///
    /// let tool = ToolDefinition::new(
    ///     "send_message",
    ///     "Send a message to another agent",
    ///     json!({
    ///         "type": "object",
    ///         "properties": { "to": { "type": "string" } },
    ///         "required": ["to"]
    ///     }),
    /// );
    /// assert_eq!(tool.name, "send_message");
    /// ```
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Trait for LLM providers.
///
/// The provider is responsible for translating between AgentMesh's turn
/// format and its API's format. Retries, backoff and cancellation are
/// layered on top by [`LlmClient`](super::LlmClient).
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request to the LLM.
    ///
    /// # Arguments
    /// * `messages` - The conversation history
    /// * `tools` - Available tools the LLM can call
    /// * `model` - Optional model override (uses default if None)
    /// * `options` - Additional options like temperature, max_tokens, etc.
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse>;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the provider name.
    fn name(&self) -> &str;
}

/// Options for chat completion requests.
///
/// Use the builder pattern to construct options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
    /// End-user identifier forwarded to the provider; the client sets it to
    /// the calling agent's id.
    pub user: Option<String>,
}

impl ChatOptions {
    /// Create new default chat options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens to generate.
    ///
    /// # Example
    /// ```
    /// use agentmesh::providers::ChatOptions;
    ///
    /// let options = ChatOptions::new().with_max_tokens(1000).with_temperature(0.2);
    /// assert_eq!(options.max_tokens, Some(1000));
    /// assert_eq!(options.temperature, Some(0.2));
    /// ```
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for sampling.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the end-user identifier.
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }
}

/// Response from an LLM chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Text content of the response
    pub content: String,
    /// Tool calls made by the LLM (if any)
    pub tool_calls: Vec<LLMToolCall>,
    /// Normalized token usage (if available)
    pub usage: Option<Usage>,
    /// Provider-native usage object, normalized into `usage` by the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_usage: Option<Value>,
}

impl LLMResponse {
    /// Create a simple text response with no tool calls.
    ///
    /// # Example
    /// ```
    /// use agentmesh::providers::LLMResponse;
    ///
    /// let response = LLMResponse::text("Hello, world!");
    /// assert_eq!(response.content, "Hello, world!");
    /// assert!(!response.has_tool_calls());
    /// ```
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }

    /// Create a response with tool calls.
    pub fn with_tools(content: &str, tool_calls: Vec<LLMToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            ..Default::default()
        }
    }

    /// Check if this response contains any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Set usage information for this response.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach a provider-native usage object.
    pub fn with_raw_usage(mut self, raw: Value) -> Self {
        self.raw_usage = Some(raw);
        self
    }

    /// Fill `usage` from `raw_usage` when the provider did not normalize it.
    pub fn normalize_usage(&mut self) {
        if self.usage.is_none() {
            self.usage = self.raw_usage.as_ref().and_then(Usage::from_raw);
        }
    }

    /// The assistant turn recording this response.
    pub fn to_message(&self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(&self.content)
        } else {
            let calls = self
                .tool_calls
                .iter()
                .map(|c| ToolCall::new(&c.id, &c.name, &c.arguments))
                .collect();
            Message::assistant_with_tools(&self.content, calls)
        }
    }
}

/// A tool call made by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to execute
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl LLMToolCall {
    /// Create a new tool call.
    ///
    /// # Example
    /// ```
    /// use agentmesh::providers::LLMToolCall;
    ///
    /// let call = LLMToolCall::new("call_123", "send_message", r#"{"to": "boss"}"#);
    /// assert_eq!(call.name, "send_message");
    /// ```
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the arguments as a specific type.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.arguments)
    }
}

/// Token usage information from a completion request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used (prompt + completion)
    pub total_tokens: u32,
}

impl Usage {
    /// Create new usage information.
    ///
    /// # Example
    /// ```
    /// use agentmesh::providers::Usage;
    ///
    /// let usage = Usage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Normalize a provider-native usage object.
    ///
    /// Accepts OpenAI-style (`prompt_tokens`/`completion_tokens`),
    /// Anthropic-style (`input_tokens`/`output_tokens`) and camelCase keys.
    /// A missing total is computed from its parts.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let field = |keys: &[&str]| -> Option<u32> {
            keys.iter()
                .find_map(|k| raw.get(*k).and_then(Value::as_u64))
                .map(|v| v.min(u32::MAX as u64) as u32)
        };
        let prompt = field(&["prompt_tokens", "promptTokens", "input_tokens", "inputTokens"]);
        let completion = field(&[
            "completion_tokens",
            "completionTokens",
            "output_tokens",
            "outputTokens",
        ]);
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        let mut usage = Usage::new(prompt.unwrap_or(0), completion.unwrap_or(0));
        if let Some(total) = field(&["total_tokens", "totalTokens"]) {
            usage.total_tokens = total;
        }
        Some(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_from_openai_shape() {
        let usage = Usage::from_raw(&json!({
            "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150
        }))
        .unwrap();
        assert_eq!(usage, Usage::new(120, 30));
    }

    #[test]
    fn test_usage_from_anthropic_shape() {
        let usage = Usage::from_raw(&json!({"input_tokens": 10, "output_tokens": 5})).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_usage_from_camel_case_keeps_reported_total() {
        let usage =
            Usage::from_raw(&json!({"promptTokens": 10, "completionTokens": 5, "totalTokens": 20}))
                .unwrap();
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn test_usage_from_unrelated_object() {
        assert!(Usage::from_raw(&json!({"cost": 1.5})).is_none());
        assert!(Usage::from_raw(&json!("nope")).is_none());
    }

    #[test]
    fn test_normalize_keeps_existing_usage() {
        let mut response = LLMResponse::text("hi")
            .with_usage(Usage::new(1, 1))
            .with_raw_usage(json!({"prompt_tokens": 99}));
        response.normalize_usage();
        assert_eq!(response.usage, Some(Usage::new(1, 1)));

        let mut raw_only = LLMResponse::text("hi").with_raw_usage(json!({"prompt_tokens": 99}));
        raw_only.normalize_usage();
        assert_eq!(raw_only.usage.unwrap().prompt_tokens, 99);
    }

    #[test]
    fn test_to_message() {
        let plain = LLMResponse::text("done").to_message();
        assert!(!plain.has_tool_calls());

        let call = LLMToolCall::new("c1", "send_message", "{}");
        let with_tools = LLMResponse::with_tools("", vec![call]).to_message();
        assert!(with_tools.has_tool_calls());
        assert_eq!(with_tools.tool_calls.unwrap()[0].id, "c1");
    }

    #[test]
    fn test_chat_options_user() {
        let options = ChatOptions::new().with_user("planner");
        assert_eq!(options.user.as_deref(), Some("planner"));
    }
}
