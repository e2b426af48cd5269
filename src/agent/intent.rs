//! Post-processing of tool-free LLM responses.
//!
//! A response with text but no tool calls normally ends the message. Post
//! processors may instead ask the loop to retry with a corrective system
//! turn. The only built-in one flags "I will do X" phrasing that describes
//! an action without performing it; it is heuristic and can misfire, so it
//! is installed from config and can be disabled or replaced.

use regex::{Regex, RegexBuilder};

use crate::config::IntentDetectionConfig;
use crate::error::{MeshError, Result};
use crate::providers::LLMResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Deliver the response as is.
    Accept,
    /// Inject `correction` as a system turn and ask the LLM again.
    Retry { correction: String },
}

pub trait ResponsePostProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Called only for responses without tool calls.
    fn inspect(&self, response: &LLMResponse) -> PostAction;
}

/// Detects announced-but-not-performed actions.
#[derive(Debug, Clone)]
pub struct IntentWithoutToolCall {
    patterns: Vec<Regex>,
    correction: String,
}

impl IntentWithoutToolCall {
    /// Compile case-insensitive patterns.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Config` naming the first pattern that fails to compile.
    pub fn new(patterns: &[String], correction: &str) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| MeshError::Config(format!("invalid intent pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            correction: correction.to_string(),
        })
    }

    /// Build from config; `None` when detection is disabled.
    pub fn from_config(config: &IntentDetectionConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        Self::new(&config.patterns, &config.correction).map(Some)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

impl ResponsePostProcessor for IntentWithoutToolCall {
    fn name(&self) -> &str {
        "intent_without_tool_call"
    }

    fn inspect(&self, response: &LLMResponse) -> PostAction {
        if response.has_tool_calls() || !self.matches(&response.content) {
            return PostAction::Accept;
        }
        PostAction::Retry {
            correction: self.correction.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> IntentWithoutToolCall {
        IntentWithoutToolCall::from_config(&IntentDetectionConfig::default())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_flags_announced_action() {
        let d = detector();
        let action = d.inspect(&LLMResponse::text("Sure. I will send the draft to the editor."));
        assert!(matches!(action, PostAction::Retry { .. }));
        assert!(d.matches("Let me now call the research agent"));
        assert!(d.matches("Next, I will summarize"));
    }

    #[test]
    fn test_accepts_plain_answers() {
        let d = detector();
        assert_eq!(d.inspect(&LLMResponse::text("The capital is Paris.")), PostAction::Accept);
        assert_eq!(d.inspect(&LLMResponse::text("")), PostAction::Accept);
    }

    #[test]
    fn test_disabled_config() {
        let config = IntentDetectionConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(IntentWithoutToolCall::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_bad_pattern() {
        let err = IntentWithoutToolCall::new(&["(unclosed".to_string()], "x").unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }
}
