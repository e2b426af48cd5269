//! Shared CLI helpers: scenario files and runtime assembly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use agentmesh::bus::AgentMessage;
use agentmesh::config::Config;
use agentmesh::events::RuntimeEvent;
use agentmesh::providers::{ScriptStep, ScriptedProvider};
use agentmesh::runtime::{AgentRuntime, AgentSpec};

/// An agent declared in a scenario. Parents must be declared before children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAgent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role_prompt: String,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

/// A message sent when the scenario starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioMessage {
    #[serde(default = "default_sender")]
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

fn default_sender() -> String {
    "user".to_string()
}

/// A scenario: agents, seed messages, and scripted LLM responses per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub agents: Vec<ScenarioAgent>,
    #[serde(default)]
    pub messages: Vec<ScenarioMessage>,
    #[serde(default)]
    pub scripts: HashMap<String, Vec<ScriptStep>>,
    /// Reply once an agent's script is exhausted (empty means no reply).
    #[serde(default)]
    pub fallback: Option<String>,
}

pub(crate) fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&content)
        .with_context(|| format!("Invalid scenario {}", path.display()))?;
    if scenario.agents.is_empty() {
        bail!("Scenario {} declares no agents", path.display());
    }
    Ok(scenario)
}

/// Load the config and refuse to start on semantic errors.
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from_path(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration:\n  {}", problems.join("\n  "));
    }
    Ok(config)
}

/// Build a runtime for a scenario: scripted provider, agents, restored
/// conversations and spool, then the seed messages.
pub(crate) async fn build_runtime(config: Config, scenario: &Scenario) -> Result<Arc<AgentRuntime>> {
    let mut provider = ScriptedProvider::new();
    if let Some(text) = &scenario.fallback {
        provider = provider.with_fallback(text);
    }
    for (agent_id, steps) in &scenario.scripts {
        provider = provider.with_script(agent_id, steps.clone());
    }

    let runtime = AgentRuntime::builder(config)
        .provider(Arc::new(provider))
        .build()?;

    let restored = runtime.conversations().load_all().await?;
    if restored > 0 {
        info!(count = restored, "Restored conversations");
    }

    for agent in &scenario.agents {
        let mut spec = AgentSpec::new(agent.name.as_deref().unwrap_or(&agent.id))
            .with_id(&agent.id)
            .with_role_prompt(&agent.role_prompt);
        if let Some(parent) = &agent.parent {
            spec = spec.with_parent(parent);
        }
        if let Some(role) = &agent.role_id {
            spec = spec.with_role_id(role);
        }
        runtime
            .spawn_agent(spec)
            .await
            .with_context(|| format!("Failed to spawn agent {}", agent.id))?;
    }

    runtime.restore_spool().await?;

    for seed in &scenario.messages {
        let mut message = AgentMessage::text(&seed.from, &seed.to, &seed.content);
        if let Some(task) = &seed.task_id {
            message = message.with_task(task.clone());
        }
        if let Some(delay) = seed.delay_ms {
            message = message.with_delay_ms(delay);
        }
        if let Err(e) = runtime.send(message) {
            warn!(to = %seed.to, error = %e, "Skipping seed message");
        }
    }

    Ok(runtime)
}

/// One outbound message as a display line.
pub(crate) fn format_outbound(message: &AgentMessage, json: bool) -> String {
    if json {
        serde_json::json!({
            "kind": "outbound",
            "id": message.id,
            "from": message.from,
            "to": message.to,
            "task_id": message.task_id,
            "payload": message.payload,
        })
        .to_string()
    } else {
        format!("[{} -> {}] {}", message.from, message.to, message.as_text())
    }
}

pub(crate) fn format_event(event: &RuntimeEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| format!("{:?}", event))
}

/// Print runtime events to stderr until the hub closes.
pub(crate) fn spawn_event_printer(runtime: &AgentRuntime) -> tokio::task::JoinHandle<()> {
    let mut rx = runtime.events().subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(event) => eprintln!("event: {}", format_event(&event)),
                Err(RecvError::Lagged(n)) => eprintln!("event: ({} skipped)", n),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_parse() {
        let json = r#"{
            "agents": [
                {"id": "lead", "role_prompt": "Coordinate."},
                {"id": "worker", "parent": "lead"}
            ],
            "messages": [{"to": "lead", "content": "Start"}],
            "scripts": {
                "lead": [
                    {"tool_calls": [{"name": "send_message", "arguments": {"to": "worker", "content": "go"}}]},
                    {"content": "Done"}
                ],
                "worker": [{"error": "boom", "status": 500}]
            },
            "fallback": "ok"
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.agents.len(), 2);
        assert_eq!(scenario.messages[0].from, "user");
        assert!(matches!(scenario.scripts["worker"][0], ScriptStep::Fail { .. }));
        assert!(matches!(scenario.scripts["lead"][1], ScriptStep::Respond { .. }));
    }

    #[test]
    fn test_format_outbound_text() {
        let msg = AgentMessage::text("lead", "user", "All done");
        assert_eq!(format_outbound(&msg, false), "[lead -> user] All done");
        let line = format_outbound(&msg, true);
        assert!(line.contains("\"kind\":\"outbound\""));
    }

    #[tokio::test]
    async fn test_build_runtime_seeds_messages() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"agents": [{"id": "a"}], "messages": [{"to": "a", "content": "hi"}, {"to": "ghost", "content": "lost"}]}"#,
        )
        .unwrap();
        let runtime = build_runtime(Config::default(), &scenario).await.unwrap();
        assert_eq!(runtime.state().agent_ids(), vec!["a"]);
        assert_eq!(runtime.bus().get_pending_count(), 1);
    }
}
