//! Active-processing set and per-agent interruption queues.
//!
//! Membership in the set is what makes an agent "active": the scheduler
//! activates an agent before dispatching a message and the processing task
//! finishes it afterwards. Interruption queues only exist for active agents,
//! so checking activity and queueing an interruption happen under one lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use super::AgentMessage;

#[derive(Debug, Default)]
pub struct ActiveSet {
    entries: Mutex<HashMap<String, VecDeque<AgentMessage>>>,
    drained: Notify,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<AgentMessage>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the agent active. Returns `false` if it already was.
    pub fn try_activate(&self, agent_id: &str) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(agent_id) {
            return false;
        }
        entries.insert(agent_id.to_string(), VecDeque::new());
        true
    }

    pub fn is_active(&self, agent_id: &str) -> bool {
        self.lock().contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn active_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Queues an interruption for an active agent.
    ///
    /// Hands the message back when the agent is not active so the caller can
    /// queue it normally.
    pub fn add_interruption(
        &self,
        agent_id: &str,
        message: AgentMessage,
    ) -> std::result::Result<(), AgentMessage> {
        match self.lock().get_mut(agent_id) {
            Some(queue) => {
                queue.push_back(message);
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Drains the agent's interruption queue.
    pub fn take_interruptions(&self, agent_id: &str) -> Vec<AgentMessage> {
        self.lock()
            .get_mut(agent_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn interruption_count(&self, agent_id: &str) -> usize {
        self.lock().get(agent_id).map_or(0, VecDeque::len)
    }

    /// Deactivates the agent and returns interruptions that were never consumed.
    pub fn finish(&self, agent_id: &str) -> Vec<AgentMessage> {
        let (leftovers, now_empty) = {
            let mut entries = self.lock();
            let leftovers = entries
                .remove(agent_id)
                .map(Vec::from)
                .unwrap_or_default();
            (leftovers, entries.is_empty())
        };
        if now_empty {
            self.drained.notify_waiters();
        }
        leftovers
    }

    /// Resolves once no agent is active.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
