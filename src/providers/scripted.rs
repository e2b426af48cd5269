//! Scripted provider that replays canned responses per agent.
//!
//! Used by scenario files and tests to drive the engine without a network
//! provider. Each agent (identified by `ChatOptions::user`) has its own queue
//! of steps; once it is exhausted the provider answers with the fallback
//! text, which defaults to an empty reply.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeshError, ProviderError, Result};
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};

/// A canned tool call. `arguments` may be a JSON value or an already-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One scripted answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    /// Fail the attempt. `status` maps to a classified provider error.
    Fail {
        error: String,
        #[serde(default)]
        status: Option<u16>,
    },
    /// Answer with text and/or tool calls.
    Respond {
        #[serde(default)]
        content: String,
        #[serde(default)]
        tool_calls: Vec<ScriptedToolCall>,
        #[serde(default)]
        usage: Option<Value>,
        /// Simulated latency before answering.
        #[serde(default)]
        delay_ms: u64,
    },
}

impl ScriptStep {
    pub fn text(content: &str) -> Self {
        ScriptStep::Respond {
            content: content.to_string(),
            tool_calls: Vec::new(),
            usage: None,
            delay_ms: 0,
        }
    }

    pub fn tool_call(name: &str, arguments: Value) -> Self {
        ScriptStep::Respond {
            content: String::new(),
            tool_calls: vec![ScriptedToolCall {
                id: None,
                name: name.to_string(),
                arguments,
            }],
            usage: None,
            delay_ms: 0,
        }
    }

    pub fn fail(error: &str) -> Self {
        ScriptStep::Fail {
            error: error.to_string(),
            status: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    fallback: String,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, Vec<Message>)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text returned once an agent's script is exhausted.
    pub fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = text.to_string();
        self
    }

    /// Append steps to an agent's script (builder pattern).
    pub fn with_script(self, agent_id: &str, steps: Vec<ScriptStep>) -> Self {
        self.push_steps(agent_id, steps);
        self
    }

    pub fn push_steps(&self, agent_id: &str, steps: Vec<ScriptStep>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(agent_id.to_string())
            .or_default()
            .extend(steps);
    }

    /// Number of chat calls answered so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Conversations the provider was asked to complete, per agent, in call order.
    pub fn requests_for(&self, agent_id: &str) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| id == agent_id)
            .map(|(_, msgs)| msgs.clone())
            .collect()
    }

    pub fn remaining(&self, agent_id: &str) -> usize {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let agent_id = options.user.unwrap_or_default();
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((agent_id.clone(), messages));

        let step = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&agent_id)
            .and_then(VecDeque::pop_front);

        match step {
            None => Ok(LLMResponse::text(&self.fallback)),
            Some(ScriptStep::Fail { error, status }) => Err(match status {
                Some(code) => ProviderError::from_status(code, &error).into(),
                None => MeshError::Provider(error),
            }),
            Some(ScriptStep::Respond {
                content,
                tool_calls,
                usage,
                delay_ms,
            }) => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                let calls = tool_calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let id = c.id.unwrap_or_else(|| format!("call_{}_{}", call, i));
                        let arguments = match c.arguments {
                            Value::String(s) => s,
                            Value::Null => "{}".to_string(),
                            other => other.to_string(),
                        };
                        LLMToolCall::new(&id, &c.name, &arguments)
                    })
                    .collect();
                let mut response = LLMResponse::with_tools(&content, calls);
                response.raw_usage = usage;
                Ok(response)
            }
        }
    }
}
