//! Agent runtime for AgentMesh
//!
//! [`AgentRuntime`] is the aggregate the rest of the engine is handed by
//! reference: it owns the registries ([`RuntimeState`]), the message bus,
//! the conversation manager and the LLM client, and implements the agent
//! lifecycle (spawn, stop, resume, cascading terminate), validated sending,
//! reply routing, error escalation and per-message fault isolation.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use agentmesh::config::Config;
//! use agentmesh::providers::ScriptedProvider;
//! use agentmesh::runtime::{AgentRuntime, AgentSpec};
//!
//! # tokio_test::block_on(async {
//! let runtime = AgentRuntime::builder(Config::default())
//!     .provider(Arc::new(ScriptedProvider::new()))
//!     .build()
//!     .unwrap();
//!
//! let id = runtime
//!     .spawn_agent(AgentSpec::new("Planner").with_id("planner"))
//!     .await
//!     .unwrap();
//! let receipt = runtime.send_message("user", &id, "plan a trip", None).unwrap();
//! assert_eq!(runtime.bus().get_pending_count(), 1);
//! # let _ = receipt;
//! # });
//! ```

pub mod lock;
pub mod state;
pub mod status;

pub use lock::KeyedLock;
pub use state::{AgentMeta, RuntimeState};
pub use status::AgentComputeStatus;

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::agent::{Agent, AgentBehavior, AgentContext, LlmBehavior, ToolCallLoop};
use crate::bus::{AgentMessage, Disposition, MessageBus, SendReceipt};
use crate::config::Config;
use crate::error::{MeshError, Result};
use crate::events::{EventHub, RuntimeEvent};
use crate::providers::{LLMProvider, LlmClient};
use crate::session::ConversationManager;
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::utils::metrics::MetricsCollector;

/// Error type for failures caught at the per-message boundary.
pub const UNEXPECTED_ERROR: &str = "unexpected_error";

const SPOOL_FILE: &str = "spool.json";

/// What to create in [`AgentRuntime::spawn_agent`].
#[derive(Clone, Default)]
pub struct AgentSpec {
    pub id: Option<String>,
    pub name: String,
    pub role_prompt: String,
    pub role_id: Option<String>,
    pub parent: Option<String>,
    /// Uses the runtime's default (LLM) behavior when `None`.
    pub behavior: Option<Arc<dyn AgentBehavior>>,
}

impl AgentSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_role_prompt(mut self, prompt: &str) -> Self {
        self.role_prompt = prompt.to_string();
        self
    }

    pub fn with_role_id(mut self, role_id: &str) -> Self {
        self.role_id = Some(role_id.to_string());
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_behavior(mut self, behavior: Arc<dyn AgentBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }
}

/// Files written by [`AgentRuntime::persist`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub conversations: usize,
    pub spooled: usize,
}

/// Builder for [`AgentRuntime`].
pub struct RuntimeBuilder {
    config: Config,
    provider: Option<Arc<dyn LLMProvider>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    default_behavior: Option<Arc<dyn AgentBehavior>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RuntimeBuilder {
    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Tool executor for the default behavior. Defaults to the built-in registry.
    pub fn tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Behavior for agents spawned without one.
    pub fn default_behavior(mut self, behavior: Arc<dyn AgentBehavior>) -> Self {
        self.default_behavior = Some(behavior);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    ///
    /// `MeshError::Config` without a provider or with invalid intent
    /// patterns; I/O errors when the storage directory cannot be created.
    pub fn build(self) -> Result<Arc<AgentRuntime>> {
        let config = self.config;
        let provider = self
            .provider
            .ok_or_else(|| MeshError::Config("no LLM provider configured".into()))?;

        let events = Arc::new(EventHub::default());
        let state = Arc::new(RuntimeState::new(events.clone()));
        let bus = Arc::new(MessageBus::with_active_set(state.active_set().clone()));
        install_interruption_listener(&bus, &state, &events);

        let conversations = match config.storage_path() {
            Some(dir) => ConversationManager::with_path(&config.context, dir.join("conversations"))?,
            None => ConversationManager::new_memory(&config.context),
        };

        let llm = Arc::new(
            LlmClient::from_config(provider, &config.llm)
                .with_events(events.clone())
                .with_metrics(self.metrics.unwrap_or_default()),
        );

        let default_behavior = match self.default_behavior {
            Some(b) => b,
            None => {
                let tools = self
                    .tools
                    .unwrap_or_else(|| Arc::new(ToolRegistry::with_builtins()));
                let tool_loop = ToolCallLoop::from_config(tools, &config.agents)?;
                Arc::new(LlmBehavior::new(Arc::new(tool_loop)))
            }
        };

        Ok(Arc::new(AgentRuntime {
            spool_path: config.storage_path().map(|d| d.join(SPOOL_FILE)),
            config,
            state,
            bus,
            conversations,
            llm,
            events,
            default_behavior,
        }))
    }
}

/// Busy recipients get their message on the interruption queue. The check
/// and the append happen under one lock, so a message is never stranded
/// on the queue of an agent that has just finished.
fn install_interruption_listener(bus: &MessageBus, state: &RuntimeState, events: &Arc<EventHub>) {
    let active = state.active_set().clone();
    let events = events.clone();
    bus.set_interruption_listener(Arc::new(move |message: AgentMessage| {
        let agent_id = message.to.clone();
        let message_id = message.id.clone();
        match active.add_interruption(&agent_id, message) {
            Ok(()) => {
                info!(agent_id = %agent_id, message_id = %message_id, "Interruption queued");
                events.emit(RuntimeEvent::Interruption {
                    agent_id,
                    message_id,
                });
                None
            }
            Err(message) => Some(message),
        }
    }));
}

pub struct AgentRuntime {
    config: Config,
    state: Arc<RuntimeState>,
    bus: Arc<MessageBus>,
    conversations: ConversationManager,
    llm: Arc<LlmClient>,
    events: Arc<EventHub>,
    default_behavior: Arc<dyn AgentBehavior>,
    spool_path: Option<PathBuf>,
}

impl AgentRuntime {
    pub fn builder(config: Config) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            provider: None,
            tools: None,
            default_behavior: None,
            metrics: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    pub fn llm(&self) -> &Arc<LlmClient> {
        &self.llm
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.llm.metrics()
    }

    pub fn agent_status(&self, agent_id: &str) -> Option<AgentComputeStatus> {
        self.state.status(agent_id)
    }

    /// Recipients that are not agents (for example the human user).
    pub fn is_external(&self, recipient: &str) -> bool {
        self.config
            .agents
            .external_recipients
            .iter()
            .any(|r| r == recipient)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register a new agent and create its conversation.
    ///
    /// Returns the agent id (generated from the name when not given).
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown parent, `AgentTerminated` when the parent
    /// is being terminated, `Config` for duplicate or reserved ids.
    pub async fn spawn_agent(&self, spec: AgentSpec) -> Result<String> {
        let id = spec.id.clone().unwrap_or_else(|| generate_id(&spec.name));
        if id.is_empty() {
            return Err(MeshError::Config("agent id must not be empty".into()));
        }
        if self.is_external(&id) {
            return Err(MeshError::Config(format!(
                "agent id {} is reserved for an external recipient",
                id
            )));
        }

        if spec.parent.as_deref() == Some(id.as_str()) {
            return Err(MeshError::Config(format!("agent {} cannot be its own parent", id)));
        }
        if self.state.contains(&id) {
            return Err(MeshError::Config(format!("agent {} is already registered", id)));
        }

        // Holding the parent's lock keeps a concurrent terminate from
        // missing this child. Both locks are taken in key order.
        let _guards = match &spec.parent {
            Some(parent) => {
                let (first, second) = if parent.as_str() < id.as_str() {
                    (parent.as_str(), id.as_str())
                } else {
                    (id.as_str(), parent.as_str())
                };
                let guards = (
                    self.state.acquire_lock(first).await,
                    Some(self.state.acquire_lock(second).await),
                );
                match self.state.status(parent) {
                    None => return Err(MeshError::NotFound(format!("parent agent {}", parent))),
                    Some(AgentComputeStatus::Terminating) => {
                        return Err(MeshError::AgentTerminated(parent.clone()))
                    }
                    Some(_) => guards,
                }
            }
            None => (self.state.acquire_lock(&id).await, None),
        };

        let behavior = spec
            .behavior
            .clone()
            .unwrap_or_else(|| self.default_behavior.clone());
        let agent = Arc::new(Agent::new(&id, &spec.name, &spec.role_prompt, behavior));
        let system_prompt = agent.system_prompt();
        self.state.register(
            agent,
            AgentMeta {
                parent_agent_id: spec.parent.clone(),
                role_id: spec.role_id.clone(),
            },
        )?;
        self.conversations.ensure(&id, &system_prompt).await;

        info!(
            agent_id = %id,
            name = %spec.name,
            parent = spec.parent.as_deref().unwrap_or("-"),
            "Agent spawned"
        );
        Ok(id)
    }

    /// Request a stop. An agent mid-message goes to `stopping` (its LLM call
    /// is aborted and the loop exits at the next checkpoint, ending in
    /// `stopped`); an idle agent goes straight to `stopped`.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<AgentComputeStatus> {
        let _guard = self.state.acquire_lock(agent_id).await;
        let current = self
            .state
            .status(agent_id)
            .ok_or_else(|| MeshError::NotFound(format!("agent {}", agent_id)))?;
        if current.is_halted() {
            return Ok(current);
        }

        if self.state.is_active(agent_id) {
            self.state
                .set_agent_compute_status(agent_id, AgentComputeStatus::Stopping)?;
            self.llm.abort(agent_id);
            // Processing may have finished between the check and the change.
            if !self.state.is_active(agent_id) {
                self.state
                    .set_agent_compute_status(agent_id, AgentComputeStatus::Stopped)?;
            }
        } else {
            self.state
                .set_agent_compute_status(agent_id, AgentComputeStatus::Stopped)?;
        }

        info!(agent_id = %agent_id, "Agent stop requested");
        Ok(self.state.status(agent_id).unwrap_or(AgentComputeStatus::Stopped))
    }

    /// Return a stopped agent to `idle`; its queued messages become eligible.
    pub async fn resume_agent(&self, agent_id: &str) -> Result<()> {
        let _guard = self.state.acquire_lock(agent_id).await;
        self.state
            .set_agent_compute_status(agent_id, AgentComputeStatus::Idle)?;
        self.bus.wake();
        info!(agent_id = %agent_id, "Agent resumed");
        Ok(())
    }

    /// Terminate an agent and all of its descendants.
    ///
    /// Returns the removed ids, deepest first.
    pub async fn terminate_agent(&self, agent_id: &str) -> Result<Vec<String>> {
        if !self.state.contains(agent_id) {
            return Err(MeshError::NotFound(format!("agent {}", agent_id)));
        }
        let mut removed = Vec::new();
        self.terminate_tree(agent_id, &mut removed).await;
        self.state.prune_locks();
        Ok(removed)
    }

    fn terminate_tree<'a>(
        &'a self,
        agent_id: &'a str,
        removed: &'a mut Vec<String>,
    ) -> BoxFuture<'a, ()> {
        async move {
            {
                let _guard = self.state.acquire_lock(agent_id).await;
                if self
                    .state
                    .set_agent_compute_status(agent_id, AgentComputeStatus::Terminating)
                    .is_err()
                {
                    return;
                }
                self.llm.abort(agent_id);
            }

            // Spawns under this agent are refused from here on, so the
            // child list is final.
            for child in self.state.children_of(agent_id) {
                self.terminate_tree(&child, removed).await;
            }

            let _guard = self.state.acquire_lock(agent_id).await;
            let dropped = self.bus.clear_queue(agent_id).len()
                + self.state.active_set().take_interruptions(agent_id).len();
            if let Err(e) = self.conversations.remove(agent_id).await {
                warn!(agent_id = %agent_id, error = %e, "Failed to remove conversation");
            }
            self.state.unregister(agent_id);
            info!(agent_id = %agent_id, dropped_messages = dropped, "Agent terminated");
            removed.push(agent_id.to_string());
        }
        .boxed()
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Validate and send a message.
    ///
    /// External recipients go to the outbound channel; unknown agents are
    /// rejected before the bus sees the message.
    pub fn send(&self, message: AgentMessage) -> Result<SendReceipt> {
        if self.is_external(&message.to) {
            let message_id = message.id.clone();
            debug!(message_id = %message_id, to = %message.to, "Message published outbound");
            self.bus.publish_outbound(message);
            return Ok(SendReceipt {
                message_id,
                disposition: Disposition::Outbound,
            });
        }
        match self.state.status(&message.to) {
            None => Err(MeshError::NotFound(format!("agent {}", message.to))),
            Some(AgentComputeStatus::Terminating) => {
                Err(MeshError::AgentTerminated(message.to.clone()))
            }
            Some(_) => Ok(self.bus.send(message)),
        }
    }

    /// Send a text message.
    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        content: &str,
        task_id: Option<&str>,
    ) -> Result<SendReceipt> {
        let mut message = AgentMessage::text(from, to, content);
        if let Some(task) = task_id {
            message = message.with_task(task);
        }
        self.send(message)
    }

    /// Where an agent's tool-free answer to `message` goes: the sender, or
    /// for self-sent messages the parent, or else the first external recipient.
    pub fn default_recipient(&self, agent_id: &str, message: &AgentMessage) -> Option<String> {
        let from = message.from.as_str();
        if from != agent_id && (self.is_external(from) || self.state.contains(from)) {
            return Some(from.to_string());
        }
        self.state
            .parent_of(agent_id)
            .filter(|p| self.state.contains(p))
            .or_else(|| self.config.agents.external_recipients.first().cloned())
    }

    /// Auto-deliver an answer. Returns the recipient and receipt, or `None`
    /// when nobody can receive it.
    pub fn deliver_reply(
        &self,
        agent_id: &str,
        message: &AgentMessage,
        content: &str,
    ) -> Result<Option<(String, SendReceipt)>> {
        let Some(to) = self.default_recipient(agent_id, message) else {
            warn!(agent_id = %agent_id, "No recipient for reply, dropping it");
            return Ok(None);
        };
        let mut reply = AgentMessage::text(agent_id, &to, content);
        if let Some(task) = &message.task_id {
            reply = reply.with_task(task.clone());
        }
        let receipt = self.send(reply)?;
        debug!(agent_id = %agent_id, to = %to, message_id = %receipt.message_id, "Reply delivered");
        Ok(Some((to, receipt)))
    }

    /// Report a failure to the agent's parent (root agents report to the
    /// first external recipient) and emit an error event.
    pub fn notify_parent_error(&self, agent_id: &str, error_type: &str, message: &str) {
        error!(agent_id = %agent_id, error_type = %error_type, error = %message, "Agent error");
        self.events.emit(RuntimeEvent::Error {
            agent_id: agent_id.to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
        });

        let target = self
            .state
            .parent_of(agent_id)
            .filter(|p| self.state.contains(p))
            .or_else(|| self.config.agents.external_recipients.first().cloned());
        let Some(target) = target else {
            return;
        };
        let notification = AgentMessage::new(
            agent_id,
            &target,
            json!({
                "kind": "error",
                "errorType": error_type,
                "agentId": agent_id,
                "message": message,
            }),
        );
        if let Err(e) = self.send(notification) {
            warn!(agent_id = %agent_id, target = %target, error = %e, "Failed to escalate error");
        }
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Run the agent's behavior on one message, isolated from the caller.
    ///
    /// The agent must already be in the active set. Errors and panics are
    /// logged and escalated; the agent is always returned to `idle` (or
    /// `stopped`) and deactivated afterwards.
    pub async fn process_message(self: &Arc<Self>, agent_id: &str, message: AgentMessage) {
        let Some(agent) = self.state.get_agent(agent_id) else {
            debug!(agent_id = %agent_id, "Agent vanished before processing");
            self.finish_processing(agent_id);
            return;
        };

        // A stop can land between dispatch and this point; the message then
        // goes back to the head of the queue untouched.
        if matches!(
            self.state.status(agent_id),
            Some(AgentComputeStatus::Stopping | AgentComputeStatus::Stopped)
        ) {
            info!(agent_id = %agent_id, message_id = %message.id, "Agent stopped before processing, requeueing message");
            self.bus.requeue_front(vec![message]);
            self.finish_processing(agent_id);
            return;
        }

        let span = info_span!(
            "agent_message",
            agent_id = %agent_id,
            message_id = %message.id,
            from = %message.from,
        );
        let ctx = AgentContext::new(agent.clone(), self.clone());
        let started = Instant::now();
        let result = AssertUnwindSafe(agent.behavior.on_message(&ctx, message))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        span.in_scope(|| match result {
            Ok(Ok(())) => debug!(latency_ms = latency_ms, "Message processed"),
            Ok(Err(e)) if e.is_abort() => info!(latency_ms = latency_ms, "Message processing aborted"),
            Ok(Err(e)) if self.is_departing(agent_id) => {
                debug!(error = %e, "Processing ended while agent was terminating")
            }
            Ok(Err(e)) => {
                error!(latency_ms = latency_ms, error = %e, "Message processing failed");
                self.notify_parent_error(agent_id, UNEXPECTED_ERROR, &e.to_string());
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(latency_ms = latency_ms, panic = %detail, "Agent behavior panicked");
                self.notify_parent_error(agent_id, UNEXPECTED_ERROR, &format!("panic: {}", detail));
            }
        });

        self.finish_processing(agent_id);
    }

    fn is_departing(&self, agent_id: &str) -> bool {
        matches!(
            self.state.status(agent_id),
            None | Some(AgentComputeStatus::Terminating)
        )
    }

    /// Deactivate the agent after a message, requeue unconsumed
    /// interruptions at the head of its queue and settle its status.
    pub fn finish_processing(&self, agent_id: &str) {
        let leftovers = self.state.active_set().finish(agent_id);
        if !leftovers.is_empty() {
            if self.state.contains(agent_id) {
                debug!(agent_id = %agent_id, count = leftovers.len(), "Requeueing unconsumed interruptions");
                self.bus.requeue_front(leftovers);
            } else {
                debug!(agent_id = %agent_id, count = leftovers.len(), "Dropping interruptions of removed agent");
            }
        }

        let settled = match self.state.status(agent_id) {
            Some(AgentComputeStatus::WaitingLlm | AgentComputeStatus::Processing) => {
                Some(AgentComputeStatus::Idle)
            }
            Some(AgentComputeStatus::Stopping) => Some(AgentComputeStatus::Stopped),
            _ => None,
        };
        if let Some(status) = settled {
            if let Err(e) = self.state.set_agent_compute_status(agent_id, status) {
                debug!(agent_id = %agent_id, error = %e, "Status not settled");
            }
        }
        self.bus.wake();
    }

    /// Whether any agent that can be dispatched has queued messages.
    pub fn has_schedulable_pending(&self) -> bool {
        self.state
            .statuses()
            .iter()
            .any(|(id, status)| !status.is_halted() && self.bus.has_pending_for(id))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Flush conversations and write spooled messages. No-op without storage.
    pub async fn persist(&self, spooled: &[AgentMessage]) -> Result<PersistReport> {
        let conversations = self.conversations.flush_all().await?;
        let Some(path) = &self.spool_path else {
            return Ok(PersistReport {
                conversations,
                spooled: 0,
            });
        };
        if spooled.is_empty() {
            if path.exists() {
                tokio::fs::remove_file(path).await?;
            }
        } else {
            tokio::fs::write(path, serde_json::to_string_pretty(spooled)?).await?;
            info!(path = %path.display(), count = spooled.len(), "Spooled pending messages");
        }
        Ok(PersistReport {
            conversations,
            spooled: spooled.len(),
        })
    }

    /// Re-send messages spooled by a previous shutdown, then remove the spool.
    ///
    /// Messages for agents that no longer exist are skipped.
    pub async fn restore_spool(&self) -> Result<usize> {
        let Some(path) = &self.spool_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let content = tokio::fs::read_to_string(path).await?;
        let messages: Vec<AgentMessage> = serde_json::from_str(&content)?;
        let mut restored = 0;
        for message in messages {
            let (id, to) = (message.id.clone(), message.to.clone());
            match self.send(message) {
                Ok(_) => restored += 1,
                Err(e) => warn!(message_id = %id, to = %to, error = %e, "Skipping spooled message"),
            }
        }
        tokio::fs::remove_file(path).await?;
        info!(count = restored, "Restored spooled messages");
        Ok(restored)
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("state", &self.state)
            .field("bus", &self.bus)
            .field("llm", &self.llm)
            .finish()
    }
}

fn generate_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    if slug.is_empty() {
        format!("agent-{}", &suffix[..8])
    } else {
        format!("{}-{}", slug, &suffix[..8])
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
