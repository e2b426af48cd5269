//! Runtime registries: agents, ancestry, compute status, active set.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::agent::Agent;
use crate::bus::{ActiveSet, AgentMessage};
use crate::error::{MeshError, Result};
use crate::events::{EventHub, RuntimeEvent};

use super::lock::KeyedLock;
use super::status::AgentComputeStatus;

/// Ownership graph entry for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMeta {
    pub parent_agent_id: Option<String>,
    pub role_id: Option<String>,
}

#[derive(Default)]
struct Registry {
    agents: HashMap<String, Arc<Agent>>,
    meta: HashMap<String, AgentMeta>,
    statuses: HashMap<String, AgentComputeStatus>,
    /// Registration order; the scheduler scans it with a rotating cursor.
    order: Vec<String>,
}

/// Shared registries for one running mesh.
///
/// Registry reads and writes take a short synchronous lock. Multi-step
/// mutations for one agent (spawn, terminate) are serialized by callers
/// through [`RuntimeState::acquire_lock`].
pub struct RuntimeState {
    registry: RwLock<Registry>,
    active: Arc<ActiveSet>,
    locks: KeyedLock,
    events: Arc<EventHub>,
}

impl RuntimeState {
    pub fn new(events: Arc<EventHub>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            active: Arc::new(ActiveSet::new()),
            locks: KeyedLock::new(),
            events,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active_set(&self) -> &Arc<ActiveSet> {
        &self.active
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Serialize registry mutations for one agent id.
    pub async fn acquire_lock(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire_lock(agent_id).await
    }

    /// Forget lock entries for agents that no longer need them.
    pub fn prune_locks(&self) {
        self.locks.prune();
    }

    /// Add an agent with status `idle`.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Config` if the id is already registered.
    pub fn register(&self, agent: Arc<Agent>, meta: AgentMeta) -> Result<()> {
        let mut reg = self.write();
        if reg.agents.contains_key(&agent.id) {
            return Err(MeshError::Config(format!(
                "agent {} is already registered",
                agent.id
            )));
        }
        let id = agent.id.clone();
        reg.order.push(id.clone());
        reg.meta.insert(id.clone(), meta);
        reg.statuses.insert(id.clone(), AgentComputeStatus::Idle);
        reg.agents.insert(id, agent);
        Ok(())
    }

    /// Remove an agent from every registry.
    pub fn unregister(&self, agent_id: &str) -> Option<Arc<Agent>> {
        let mut reg = self.write();
        reg.order.retain(|id| id != agent_id);
        reg.meta.remove(agent_id);
        reg.statuses.remove(agent_id);
        reg.agents.remove(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.read().agents.contains_key(agent_id)
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.read().agents.get(agent_id).cloned()
    }

    pub fn agent_count(&self) -> usize {
        self.read().agents.len()
    }

    /// Agent ids in registration order.
    pub fn agent_ids(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn meta(&self, agent_id: &str) -> Option<AgentMeta> {
        self.read().meta.get(agent_id).cloned()
    }

    pub fn parent_of(&self, agent_id: &str) -> Option<String> {
        self.read()
            .meta
            .get(agent_id)
            .and_then(|m| m.parent_agent_id.clone())
    }

    /// Direct children, in registration order.
    pub fn children_of(&self, agent_id: &str) -> Vec<String> {
        let reg = self.read();
        reg.order
            .iter()
            .filter(|id| {
                reg.meta
                    .get(*id)
                    .and_then(|m| m.parent_agent_id.as_deref())
                    == Some(agent_id)
            })
            .cloned()
            .collect()
    }

    pub fn status(&self, agent_id: &str) -> Option<AgentComputeStatus> {
        self.read().statuses.get(agent_id).copied()
    }

    /// Snapshot of every agent's status, in registration order.
    pub fn statuses(&self) -> Vec<(String, AgentComputeStatus)> {
        let reg = self.read();
        reg.order
            .iter()
            .filter_map(|id| reg.statuses.get(id).map(|s| (id.clone(), *s)))
            .collect()
    }

    /// The only way to change an agent's compute status.
    ///
    /// Applies the transition if the state machine allows it, emits
    /// [`RuntimeEvent::StatusChanged`] for real changes and returns the
    /// previous status.
    ///
    /// # Errors
    ///
    /// `MeshError::NotFound` for unknown agents, `MeshError::InvalidTransition`
    /// for moves the state machine forbids.
    pub fn set_agent_compute_status(
        &self,
        agent_id: &str,
        status: AgentComputeStatus,
    ) -> Result<AgentComputeStatus> {
        let previous = {
            let mut reg = self.write();
            let current = reg
                .statuses
                .get_mut(agent_id)
                .ok_or_else(|| MeshError::NotFound(format!("agent {}", agent_id)))?;
            let previous = *current;
            if !previous.can_transition_to(status) {
                return Err(MeshError::InvalidTransition {
                    agent_id: agent_id.to_string(),
                    from: previous.to_string(),
                    to: status.to_string(),
                });
            }
            *current = status;
            previous
        };

        if previous != status {
            debug!(agent_id = %agent_id, from = %previous, to = %status, "Compute status changed");
            self.events.emit(RuntimeEvent::StatusChanged {
                agent_id: agent_id.to_string(),
                from: previous,
                to: status,
            });
        }
        Ok(previous)
    }

    /// Append a message to an active agent's interruption queue.
    ///
    /// Hands the message back if the agent is not processing anything.
    pub fn add_interruption(
        &self,
        agent_id: &str,
        message: AgentMessage,
    ) -> std::result::Result<(), AgentMessage> {
        self.active.add_interruption(agent_id, message)
    }

    pub fn is_active(&self, agent_id: &str) -> bool {
        self.active.is_active(agent_id)
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("agents", &self.agent_ids())
            .field("active", &self.active.active_agents())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, FnBehavior};
    use AgentComputeStatus::*;

    fn agent(id: &str) -> Arc<Agent> {
        Arc::new(Agent::new(id, id, "", Arc::new(FnBehavior::noop())))
    }

    fn child_of(parent: &str) -> AgentMeta {
        AgentMeta {
            parent_agent_id: Some(parent.to_string()),
            role_id: None,
        }
    }

    fn state() -> RuntimeState {
        RuntimeState::new(Arc::new(EventHub::default()))
    }

    #[test]
    fn test_register_and_unregister() {
        let state = state();
        state.register(agent("a"), AgentMeta::default()).unwrap();
        assert!(state.register(agent("a"), AgentMeta::default()).is_err());
        assert_eq!(state.status("a"), Some(Idle));

        assert!(state.unregister("a").is_some());
        assert!(!state.contains("a"));
        assert!(state.status("a").is_none());
        assert!(state.agent_ids().is_empty());
    }

    #[test]
    fn test_status_transitions_emit_events() {
        let state = state();
        let mut rx = state.events().subscribe();
        state.register(agent("a"), AgentMeta::default()).unwrap();

        assert_eq!(state.set_agent_compute_status("a", WaitingLlm).unwrap(), Idle);
        // Same status: no event.
        state.set_agent_compute_status("a", WaitingLlm).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            RuntimeEvent::StatusChanged {
                agent_id: "a".into(),
                from: Idle,
                to: WaitingLlm
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let state = state();
        state.register(agent("a"), AgentMeta::default()).unwrap();
        state.set_agent_compute_status("a", Terminating).unwrap();

        let err = state.set_agent_compute_status("a", Idle).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTransition { .. }));
        assert_eq!(state.status("a"), Some(Terminating));

        let err = state.set_agent_compute_status("ghost", Idle).unwrap_err();
        assert!(matches!(err, MeshError::NotFound(_)));
    }

    #[test]
    fn test_parent_and_children() {
        let state = state();
        state.register(agent("root"), AgentMeta::default()).unwrap();
        state.register(agent("c1"), child_of("root")).unwrap();
        state.register(agent("c2"), child_of("root")).unwrap();
        state.register(agent("g1"), child_of("c1")).unwrap();
        state.register(agent("other"), AgentMeta::default()).unwrap();

        assert_eq!(state.children_of("root"), vec!["c1", "c2"]);
        assert!(state.children_of("g1").is_empty());
        assert_eq!(state.parent_of("g1").as_deref(), Some("c1"));
    }

    #[test]
    fn test_interruption_requires_active() {
        let state = state();
        let msg = AgentMessage::text("x", "a", "hi");
        assert!(state.add_interruption("a", msg.clone()).is_err());

        assert!(state.active_set().try_activate("a"));
        assert!(state.add_interruption("a", msg).is_ok());
        assert_eq!(state.active_set().interruption_count("a"), 1);
    }
}
