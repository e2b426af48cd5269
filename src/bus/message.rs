//! Message types for the AgentMesh message bus
//!
//! This module defines the addressed unit of work exchanged between agents
//! and the receipt returned when one is sent.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// An addressed, optionally delayed message for one agent.
///
/// Immutable once sent: the bus stamps `seq` and from then on the message is
/// only moved between queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message identifier (UUID v4)
    pub id: String,
    /// Sender: an agent id or an external party such as `"user"`
    pub from: String,
    /// Recipient: an agent id or an external recipient
    pub to: String,
    /// Optional task correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Opaque payload. Text messages use `{"text": "..."}`.
    pub payload: Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Earliest delivery time; `None` delivers immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<DateTime<Utc>>,
    /// Send order stamped by the bus (0 until sent)
    #[serde(default)]
    pub seq: u64,
}

impl AgentMessage {
    /// Creates a message with an arbitrary payload.
    ///
    /// # Example
    /// ```
    /// use agentmesh::bus::AgentMessage;
    /// use serde_json::json;
    ///
    /// let msg = AgentMessage::new("user", "planner", json!({"text": "hi"}));
    /// assert_eq!(msg.as_text(), "hi");
    /// assert!(msg.deliver_at.is_none());
    /// ```
    pub fn new(from: &str, to: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            task_id: None,
            payload,
            created_at: Utc::now(),
            deliver_at: None,
            seq: 0,
        }
    }

    /// Creates a plain text message.
    pub fn text(from: &str, to: &str, content: &str) -> Self {
        Self::new(from, to, json!({ "text": content }))
    }

    /// Attaches a task id (builder pattern).
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Delays delivery by `delay_ms` milliseconds from now (builder pattern).
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        let delay = ChronoDuration::milliseconds(delay_ms.min(i64::MAX as u64) as i64);
        self.deliver_at = Some(Utc::now() + delay);
        self
    }

    /// Sets an absolute delivery time (builder pattern).
    pub fn deliver_at(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_at = Some(at);
        self
    }

    /// Whether the message may be handed to the scheduler at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deliver_at.map_or(true, |at| at <= now)
    }

    /// Whether this payload is an escalated error notification.
    pub fn is_error_notification(&self) -> bool {
        self.payload.get("kind").and_then(Value::as_str) == Some("error")
    }

    /// Best-effort text view of the payload.
    pub fn as_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None if self.is_error_notification() => format!(
                    "{} from {}: {}",
                    map.get("errorType").and_then(Value::as_str).unwrap_or("error"),
                    map.get("agentId").and_then(Value::as_str).unwrap_or("unknown"),
                    map.get("message").and_then(Value::as_str).unwrap_or(""),
                ),
                None => self.payload.to_string(),
            },
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Renders the message as the body of a user turn.
    pub fn render_for_llm(&self) -> String {
        let mut header = format!("[message from {}", self.from);
        if let Some(task) = &self.task_id {
            header.push_str(&format!(", task {}", task));
        }
        if self.is_error_notification() {
            header.push_str(", error");
        }
        header.push(']');
        format!("{} {}", header, self.as_text())
    }
}

/// What the bus did with a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Appended to the recipient's live queue
    Queued,
    /// Held until its delivery time
    Delayed,
    /// Handed to the interruption listener of a busy recipient
    Interrupted,
    /// Published on the outbound channel for an external recipient
    Outbound,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub disposition: Disposition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message() {
        let msg = AgentMessage::text("user", "planner", "plan the trip");
        assert_eq!(msg.from, "user");
        assert_eq!(msg.to, "planner");
        assert_eq!(msg.as_text(), "plan the trip");
        assert_eq!(msg.seq, 0);
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_unique_ids() {
        let a = AgentMessage::text("a", "b", "x");
        let b = AgentMessage::text("a", "b", "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_delay_is_not_due_yet() {
        let msg = AgentMessage::text("a", "b", "later").with_delay_ms(60_000);
        assert!(!msg.is_due(Utc::now()));
        assert!(msg.is_due(Utc::now() + ChronoDuration::minutes(2)));
    }

    #[test]
    fn test_past_delivery_time_is_due() {
        let msg = AgentMessage::text("a", "b", "x").deliver_at(Utc::now() - ChronoDuration::seconds(1));
        assert!(msg.is_due(Utc::now()));
    }

    #[test]
    fn test_render_with_task() {
        let msg = AgentMessage::text("boss", "worker", "do it").with_task("t-1");
        assert_eq!(msg.render_for_llm(), "[message from boss, task t-1] do it");
    }

    #[test]
    fn test_error_payload_text() {
        let msg = AgentMessage::new(
            "worker",
            "boss",
            json!({
                "kind": "error",
                "errorType": "llm_call_failed",
                "agentId": "worker",
                "message": "timeout"
            }),
        );
        assert!(msg.is_error_notification());
        assert_eq!(msg.as_text(), "llm_call_failed from worker: timeout");
        assert!(msg.render_for_llm().starts_with("[message from worker, error]"));
    }

    #[test]
    fn test_non_text_payload_falls_back_to_json() {
        let msg = AgentMessage::new("a", "b", json!({"n": 1}));
        assert_eq!(msg.as_text(), r#"{"n":1}"#);
    }

    #[test]
    fn test_serde_roundtrip_keeps_seq() {
        let mut msg = AgentMessage::text("a", "b", "x").with_task("t");
        msg.seq = 42;
        let json = serde_json::to_string(&msg).unwrap();
        let back: AgentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
