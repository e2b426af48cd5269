//! Runtime event surface.
//!
//! The engine publishes tool-call, error, LLM-retry, compute-status-change
//! and interruption events. Telemetry or UI consumers either subscribe to the
//! broadcast channel or register a synchronous listener.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::runtime::AgentComputeStatus;

/// Default broadcast buffer. Slow subscribers lag rather than block emitters.
const DEFAULT_CAPACITY: usize = 1024;

/// Everything the core reports to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A tool call finished (successfully or not).
    ToolCall {
        agent_id: String,
        tool: String,
        arguments: serde_json::Value,
        is_error: bool,
        duration_ms: u64,
    },
    /// An agent-level failure that was escalated or logged.
    Error {
        agent_id: String,
        error_type: String,
        message: String,
    },
    /// An LLM attempt failed and another attempt is scheduled.
    LlmRetry {
        agent_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// A compute-status transition was applied.
    StatusChanged {
        agent_id: String,
        from: AgentComputeStatus,
        to: AgentComputeStatus,
    },
    /// A message arrived for an agent that is mid-flight.
    Interruption { agent_id: String, message_id: String },
}

impl RuntimeEvent {
    /// The agent this event concerns.
    pub fn agent_id(&self) -> &str {
        match self {
            RuntimeEvent::ToolCall { agent_id, .. }
            | RuntimeEvent::Error { agent_id, .. }
            | RuntimeEvent::LlmRetry { agent_id, .. }
            | RuntimeEvent::StatusChanged { agent_id, .. }
            | RuntimeEvent::Interruption { agent_id, .. } => agent_id,
        }
    }
}

/// Synchronous event listener. Runs on the emitting task; keep it cheap.
pub type EventListener = Arc<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// Fan-out hub for [`RuntimeEvent`]s.
pub struct EventHub {
    sender: broadcast::Sender<RuntimeEvent>,
    listeners: RwLock<Vec<EventListener>>,
}

impl EventHub {
    /// Create a hub with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Publish an event to all listeners and subscribers.
    pub fn emit(&self, event: RuntimeEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in &listeners {
            listener(&event);
        }
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    /// Register a synchronous listener.
    pub fn add_listener(&self, listener: EventListener) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
