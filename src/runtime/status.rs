//! Per-agent compute status and its transition table.

use serde::{Deserialize, Serialize};

/// What stage of processing an agent is in.
///
/// ```text
///            ┌──────────── idle ◄──────────────┐
///            │              │                  │
///            │              ▼                  │
///            │        waiting_llm ◄──► processing
///            │              │                  │
///            ▼              ▼                  ▼
///         stopped ◄──── stopping ◄─────────────┘
///
///   any state ──► terminating (absorbing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentComputeStatus {
    Idle,
    WaitingLlm,
    Processing,
    Stopping,
    Stopped,
    Terminating,
}

impl AgentComputeStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same status is not a transition and is always allowed,
    /// except that nothing leaves `terminating`.
    pub fn can_transition_to(self, next: AgentComputeStatus) -> bool {
        use AgentComputeStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Terminating, _) => false,
            (_, Terminating) => true,
            (Idle, WaitingLlm | Stopping | Stopped) => true,
            (WaitingLlm, Processing | Idle | Stopping) => true,
            (Processing, WaitingLlm | Idle | Stopping) => true,
            (Stopping, Stopped) => true,
            (Stopped, Idle) => true,
            _ => false,
        }
    }

    /// The scheduler only dispatches to idle agents.
    pub fn is_eligible(self) -> bool {
        self == AgentComputeStatus::Idle
    }

    /// Stop or terminate has been requested; processing must not continue.
    pub fn is_halted(self) -> bool {
        matches!(
            self,
            AgentComputeStatus::Stopping
                | AgentComputeStatus::Stopped
                | AgentComputeStatus::Terminating
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentComputeStatus::Idle => "idle",
            AgentComputeStatus::WaitingLlm => "waiting_llm",
            AgentComputeStatus::Processing => "processing",
            AgentComputeStatus::Stopping => "stopping",
            AgentComputeStatus::Stopped => "stopped",
            AgentComputeStatus::Terminating => "terminating",
        }
    }
}

impl std::fmt::Display for AgentComputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
