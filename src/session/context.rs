//! Context window classification.
//!
//! Usage is the provider-reported prompt token count divided by the window
//! size. Three ascending thresholds split it into four levels; each boundary
//! is inclusive on the upper level.

use serde::{Deserialize, Serialize};

use crate::config::ContextConfig;

/// Window size and level thresholds (fractions of `max_tokens`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextLimit {
    pub max_tokens: u64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub hard_limit_threshold: f64,
}

impl ContextLimit {
    pub fn classify(&self, usage_percent: f64) -> ContextLevel {
        if usage_percent >= self.hard_limit_threshold {
            ContextLevel::Exceeded
        } else if usage_percent >= self.critical_threshold {
            ContextLevel::Critical
        } else if usage_percent >= self.warning_threshold {
            ContextLevel::Warning
        } else {
            ContextLevel::Normal
        }
    }

    /// Builds the status for a prompt token count.
    pub fn status(&self, prompt_tokens: u64) -> ContextStatus {
        let usage_percent = if self.max_tokens == 0 {
            1.0
        } else {
            prompt_tokens as f64 / self.max_tokens as f64
        };
        ContextStatus {
            level: self.classify(usage_percent),
            usage_percent,
            prompt_tokens,
            max_tokens: self.max_tokens,
        }
    }
}

impl Default for ContextLimit {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextLimit {
    fn from(cfg: &ContextConfig) -> Self {
        Self {
            max_tokens: cfg.max_tokens,
            warning_threshold: cfg.warning_threshold,
            critical_threshold: cfg.critical_threshold,
            hard_limit_threshold: cfg.hard_limit_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    Normal,
    Warning,
    Critical,
    Exceeded,
}

impl std::fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextLevel::Normal => "normal",
            ContextLevel::Warning => "warning",
            ContextLevel::Critical => "critical",
            ContextLevel::Exceeded => "exceeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextStatus {
    pub level: ContextLevel,
    pub usage_percent: f64,
    pub prompt_tokens: u64,
    pub max_tokens: u64,
}

impl ContextStatus {
    /// Banner appended to every outgoing user turn.
    pub fn banner(&self) -> String {
        let pct = (self.usage_percent * 100.0).round() as u64;
        let head = format!(
            "[context: {}% of {} tokens used, status {}]",
            pct, self.max_tokens, self.level
        );
        match self.level {
            ContextLevel::Normal => head,
            ContextLevel::Warning => format!(
                "{} Context is filling up. Consider summarizing older history with compress_context.",
                head
            ),
            ContextLevel::Critical => format!(
                "{} Context is nearly full. Call compress_context with a summary of the history before continuing.",
                head
            ),
            ContextLevel::Exceeded => format!(
                "{} Context limit exceeded. You must call compress_context now; further work may fail.",
                head
            ),
        }
    }
}
