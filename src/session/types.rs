//! Conversation types for AgentMesh
//!
//! This module defines the chat turns kept per agent: the turn itself, its
//! role, the tool calls an assistant turn may carry, and the per-agent
//! conversation that owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::Usage;

/// One agent's ordered turn list. Turn 0 is always the system turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Owning agent
    pub agent_id: String,
    /// Ordered turns, system turn first
    pub messages: Vec<Message>,
    /// Last provider-reported usage; `None` until the next LLM call after a reset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// When this conversation was created
    pub created_at: DateTime<Utc>,
    /// When this conversation was last modified
    pub updated_at: DateTime<Utc>,
    /// Index of the first turn of the message being processed
    #[serde(skip)]
    pub rollback_point: Option<usize>,
}

impl Conversation {
    /// Create a conversation holding only the system turn.
    ///
    /// # Example
    /// ```
    /// use agentmesh::session::{Conversation, Role};
    ///
    /// let conv = Conversation::new("planner", "You plan trips.");
    /// assert_eq!(conv.messages.len(), 1);
    /// assert_eq!(conv.messages[0].role, Role::System);
    /// ```
    pub fn new(agent_id: &str, system_prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.to_string(),
            messages: vec![Message::system(system_prompt)],
            usage: None,
            created_at: now,
            updated_at: now,
            rollback_point: None,
        }
    }

    /// Append a turn and bump `updated_at`.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get the last turn, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the turn's author
    pub role: Role,
    /// The text content of the turn
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this turn is responding to (for tool results)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user turn.
    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant turn.
    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system turn.
    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a new tool result turn.
    ///
    /// # Example
    /// ```
    /// use agentmesh::session::{Message, Role};
    ///
    /// let msg = Message::tool_result("call_123", "Tool executed successfully");
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
    /// ```
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Create an assistant turn carrying tool calls.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Check if this turn has tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }

    /// Check if this is a tool result turn.
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }
}

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompts and instructions
    System,
    /// Incoming messages and context banners
    User,
    /// Model output
    Assistant,
    /// Results from tool executions
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_starts_with_system_turn() {
        let conv = Conversation::new("a1", "be brief");
        assert_eq!(conv.agent_id, "a1");
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages[0], Message::system("be brief"));
        assert!(conv.usage.is_none());
    }

    #[test]
    fn test_conversation_push() {
        let mut conv = Conversation::new("a1", "sys");
        let before = conv.updated_at;
        conv.push(Message::user("hi"));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last_message().unwrap().role, Role::User);
        assert!(conv.updated_at >= before);
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("x").role, Role::User);
        assert_eq!(Message::assistant("x").role, Role::Assistant);
        assert_eq!(Message::system("x").role, Role::System);
        let tool = Message::tool_result("call_1", "ok");
        assert!(tool.is_tool_result());
        assert!(!Message::user("x").is_tool_result());
    }

    #[test]
    fn test_assistant_with_tools() {
        let msg = Message::assistant_with_tools("", vec![ToolCall::new("c1", "send_message", "{}")]);
        assert!(msg.has_tool_calls());
        assert!(!Message::assistant_with_tools("", vec![]).has_tool_calls());
    }

    #[test]
    fn test_tool_call_parse_arguments() {
        #[derive(serde::Deserialize)]
        struct Args {
            to: String,
        }
        let call = ToolCall::new("c1", "send_message", r#"{"to": "boss"}"#);
        let args: Args = call.parse_arguments().unwrap();
        assert_eq!(args.to, "boss");

        let bad = ToolCall::new("c2", "send_message", "{not json");
        assert!(bad.parse_arguments::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_role_display_and_serde() {
        assert_eq!(Role::Tool.to_string(), "tool");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }

    #[test]
    fn test_optional_fields_skipped() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }
}
