//! Configuration type definitions for AgentMesh
//!
//! This module defines all configuration structs used throughout the engine.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for AgentMesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM client configuration (model, retries, concurrency budget)
    pub llm: LlmConfig,
    /// Per-agent processing configuration (tool rounds, intent detection)
    pub agents: AgentConfig,
    /// Context window bookkeeping configuration
    pub context: ContextConfig,
    /// Scheduler loop timing configuration
    pub scheduler: SchedulerConfig,
    /// Conversation and queue persistence
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Configuration for the retrying LLM client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier passed to the provider
    pub model: String,
    /// Maximum tokens for responses
    pub max_tokens: u32,
    /// Temperature for generation
    pub temperature: f32,
    /// Total number of attempts per chat call (not retries after the first).
    pub max_retries: u32,
    /// Base delay for exponential backoff: attempt `n` waits `base * 2^n` ms.
    pub base_delay_ms: u64,
    /// Upstream concurrent-request budget. The scheduler derives its agent
    /// concurrency from this value.
    pub max_concurrent_requests: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_concurrent_requests: 3,
        }
    }
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Per-agent processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum LLM/tool rounds for a single message.
    pub max_tool_rounds: u32,
    /// "I will do X" detection for responses without tool calls.
    pub intent_detection: IntentDetectionConfig,
    /// Recipient ids that are not agents. Messages addressed to them are
    /// published on the bus's outbound channel.
    pub external_recipients: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 200,
            intent_detection: IntentDetectionConfig::default(),
            external_recipients: vec!["user".to_string()],
        }
    }
}

/// Configuration for the intent-without-tool-call post-processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentDetectionConfig {
    /// Whether the post-processor is installed.
    pub enabled: bool,
    /// Case-insensitive regular expressions matched against response text.
    pub patterns: Vec<String>,
    /// Corrective system turn injected when a pattern matches.
    pub correction: String,
}

impl Default for IntentDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: vec![
                r"\b(i will|i'll|i am going to|i'm going to|let me)\s+(now\s+)?(call|use|send|create|spawn|run|invoke|write|check|ask|delegate)\b".to_string(),
                r"\b(next|now),?\s+i\s+(will|shall)\b".to_string(),
            ],
            correction: "You described an action but did not call a tool. If you intend to act, call the appropriate tool now instead of describing it.".to_string(),
        }
    }
}

// ============================================================================
// Context Configuration
// ============================================================================

/// Context window thresholds and history limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Context window size in tokens.
    pub max_tokens: u64,
    /// Fraction of `max_tokens` at which usage becomes `warning`.
    pub warning_threshold: f64,
    /// Fraction of `max_tokens` at which usage becomes `critical`.
    pub critical_threshold: f64,
    /// Fraction of `max_tokens` at which usage becomes `exceeded`.
    pub hard_limit_threshold: f64,
    /// Turns kept verbatim by history compression.
    pub keep_recent: usize,
    /// Raw turn-count ceiling checked by `check_and_warn`.
    pub max_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            warning_threshold: 0.70,
            critical_threshold: 0.90,
            hard_limit_threshold: 0.95,
            keep_recent: 10,
            max_turns: 400,
        }
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Scheduler loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long an idle tick waits for a new message before rescanning.
    pub idle_wait_ms: u64,
    /// Back-off when messages are pending but nothing could be dispatched.
    pub busy_backoff_ms: u64,
    /// Upper bound on waiting for in-flight messages during shutdown.
    pub drain_timeout_secs: u64,
    /// Consecutive idle ticks after which a bounded run is complete.
    pub idle_ticks_to_complete: u32,
    /// Optional dispatch limit for bounded runs.
    pub max_steps: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: 100,
            busy_backoff_ms: 10,
            drain_timeout_secs: 30,
            idle_ticks_to_complete: 3,
            max_steps: None,
        }
    }
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Persistence location for conversations and spooled messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage directory. `None` keeps everything in memory.
    pub dir: Option<String>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// Compact single-line output with component tags
    #[default]
    Component,
    /// Structured JSON lines
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default level filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional log file (appended)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
