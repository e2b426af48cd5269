//! Message Bus Module
//!
//! This module provides the per-agent message queues for AgentMesh.
//! The `MessageBus` holds one FIFO queue per recipient agent, a holding area
//! for delayed messages, and an outbound channel for recipients that are not
//! agents (for example the human user).
//!
//! # Architecture
//!
//! ```text
//!  send ──┬── deliver_at in future ──> delayed ──(deliver_due_messages)──┐
//!         │                                                              │
//!         └── due now ──> recipient active? ── yes ──> interruption listener
//!                               │                         │ (declined)
//!                               no                        ▼
//!                               └──────────────────> per-agent queue ──> scheduler
//! ```
//!
//! # Example
//!
//! ```
//! use agentmesh::bus::{AgentMessage, Disposition, MessageBus};
//!
//! let bus = MessageBus::new();
//! let receipt = bus.send(AgentMessage::text("user", "planner", "hello"));
//! assert_eq!(receipt.disposition, Disposition::Queued);
//! assert_eq!(bus.get_pending_count(), 1);
//!
//! let msg = bus.receive_next("planner").unwrap();
//! assert_eq!(msg.as_text(), "hello");
//! ```

pub mod active;
pub mod message;

pub use active::ActiveSet;
pub use message::{AgentMessage, Disposition, SendReceipt};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// Called when a message is sent to an agent that is mid-flight.
///
/// Returning `None` means the listener took ownership of the message;
/// returning it back makes the bus queue it normally.
pub type InterruptionListener = Arc<dyn Fn(AgentMessage) -> Option<AgentMessage> + Send + Sync>;

#[derive(Default)]
struct Queues {
    live: HashMap<String, VecDeque<AgentMessage>>,
    delayed: Vec<AgentMessage>,
}

/// Per-agent message queues with delayed delivery and interruption signaling.
///
/// All operations take `&self`; the bus is shared as `Arc<MessageBus>`.
pub struct MessageBus {
    queues: Mutex<Queues>,
    active: Arc<ActiveSet>,
    arrivals: Notify,
    seq: AtomicU64,
    listener: RwLock<Option<InterruptionListener>>,
    outbound_tx: mpsc::UnboundedSender<AgentMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AgentMessage>>,
}

impl MessageBus {
    /// Creates a bus with its own active set.
    pub fn new() -> Self {
        Self::with_active_set(Arc::new(ActiveSet::new()))
    }

    /// Creates a bus that consults `active` to detect busy recipients.
    pub fn with_active_set(active: Arc<ActiveSet>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            queues: Mutex::new(Queues::default()),
            active,
            arrivals: Notify::new(),
            seq: AtomicU64::new(0),
            listener: RwLock::new(None),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    fn queues(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The active set this bus consults.
    pub fn active_set(&self) -> &Arc<ActiveSet> {
        &self.active
    }

    /// Registers the "interruption needed" listener, replacing any previous one.
    pub fn set_interruption_listener(&self, listener: InterruptionListener) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Sends a message to an agent.
    ///
    /// The caller is responsible for rejecting unknown recipients first.
    pub fn send(&self, mut message: AgentMessage) -> SendReceipt {
        message.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = message.id.clone();

        if !message.is_due(Utc::now()) {
            debug!(message_id = %message_id, to = %message.to, "Message delayed");
            self.queues().delayed.push(message);
            return SendReceipt {
                message_id,
                disposition: Disposition::Delayed,
            };
        }

        let disposition = self.deliver_now(message);
        SendReceipt {
            message_id,
            disposition,
        }
    }

    fn deliver_now(&self, message: AgentMessage) -> Disposition {
        let message = if self.active.is_active(&message.to) {
            let listener = self
                .listener
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            match listener {
                Some(listener) => match listener(message) {
                    None => return Disposition::Interrupted,
                    Some(declined) => declined,
                },
                None => message,
            }
        } else {
            message
        };

        self.enqueue(message);
        Disposition::Queued
    }

    fn enqueue(&self, message: AgentMessage) {
        debug!(message_id = %message.id, to = %message.to, "Message queued");
        self.queues()
            .live
            .entry(message.to.clone())
            .or_default()
            .push_back(message);
        self.arrivals.notify_one();
    }

    /// Dequeues the head of an agent's queue.
    pub fn receive_next(&self, agent_id: &str) -> Option<AgentMessage> {
        let mut queues = self.queues();
        let queue = queues.live.get_mut(agent_id)?;
        let message = queue.pop_front();
        if queue.is_empty() {
            queues.live.remove(agent_id);
        }
        message
    }

    /// Puts messages back at the head of their recipients' queues, preserving order.
    pub fn requeue_front(&self, messages: Vec<AgentMessage>) {
        if messages.is_empty() {
            return;
        }
        {
            let mut queues = self.queues();
            for message in messages.into_iter().rev() {
                queues
                    .live
                    .entry(message.to.clone())
                    .or_default()
                    .push_front(message);
            }
        }
        self.arrivals.notify_one();
    }

    /// Whether any agent has a live (due) message waiting.
    pub fn has_pending(&self) -> bool {
        self.queues().live.values().any(|q| !q.is_empty())
    }

    /// Whether a specific agent has a live message waiting.
    pub fn has_pending_for(&self, agent_id: &str) -> bool {
        self.queues()
            .live
            .get(agent_id)
            .is_some_and(|q| !q.is_empty())
    }

    /// Number of live messages across all queues (delayed messages excluded).
    pub fn get_pending_count(&self) -> usize {
        self.queues().live.values().map(VecDeque::len).sum()
    }

    /// Number of live messages for one agent.
    pub fn pending_count_for(&self, agent_id: &str) -> usize {
        self.queues().live.get(agent_id).map_or(0, VecDeque::len)
    }

    /// Suspends until a message arrives or the timeout elapses.
    ///
    /// Returns `true` if woken by an arrival (or an explicit [`wake`](Self::wake)).
    pub async fn wait_for_message(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.arrivals.notified())
            .await
            .is_ok()
    }

    /// Wakes a pending [`wait_for_message`](Self::wait_for_message).
    pub fn wake(&self) {
        self.arrivals.notify_one();
    }

    /// Moves delayed messages whose delivery time has passed into the live queues.
    ///
    /// Returns how many were delivered.
    pub fn deliver_due_messages(&self) -> usize {
        let now = Utc::now();
        let due = {
            let mut queues = self.queues();
            let (due, later): (Vec<_>, Vec<_>) = queues
                .delayed
                .drain(..)
                .partition(|m| m.is_due(now));
            queues.delayed = later;
            due
        };
        self.deliver_batch(due)
    }

    fn deliver_batch(&self, mut batch: Vec<AgentMessage>) -> usize {
        batch.sort_by(|a, b| a.deliver_at.cmp(&b.deliver_at).then(a.seq.cmp(&b.seq)));
        let count = batch.len();
        for message in batch {
            self.deliver_now(message);
        }
        count
    }

    pub fn get_delayed_count(&self) -> usize {
        self.queues().delayed.len()
    }

    /// Delivers every delayed message immediately, regardless of its delivery time.
    pub fn force_deliver_all_delayed(&self) -> usize {
        let all = std::mem::take(&mut self.queues().delayed);
        self.deliver_batch(all)
    }

    /// Discards every delayed message and returns them.
    pub fn drop_all_delayed(&self) -> Vec<AgentMessage> {
        std::mem::take(&mut self.queues().delayed)
    }

    /// Removes and returns every queued (live and delayed) message for an agent.
    pub fn clear_queue(&self, agent_id: &str) -> Vec<AgentMessage> {
        let mut queues = self.queues();
        let mut cleared: Vec<AgentMessage> = queues
            .live
            .remove(agent_id)
            .map(Vec::from)
            .unwrap_or_default();
        let (mine, others): (Vec<_>, Vec<_>) = queues
            .delayed
            .drain(..)
            .partition(|m| m.to == agent_id);
        queues.delayed = others;
        cleared.extend(mine);
        cleared
    }

    /// Sequence number of the most recently sent message.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Removes live messages sent at or before `max_seq`, in send order.
    pub fn take_spool(&self, max_seq: u64) -> Vec<AgentMessage> {
        let mut queues = self.queues();
        let mut spooled = Vec::new();
        for queue in queues.live.values_mut() {
            let (old, new): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|m| m.seq <= max_seq);
            *queue = new;
            spooled.extend(old);
        }
        queues.live.retain(|_, q| !q.is_empty());
        spooled.sort_by_key(|m| m.seq);
        spooled
    }

    /// Publishes a message for an external (non-agent) recipient.
    pub fn publish_outbound(&self, message: AgentMessage) {
        // The receiver lives as long as the bus, so this only fails during teardown.
        let _ = self.outbound_tx.send(message);
    }

    /// Waits for the next outbound message.
    pub async fn consume_outbound(&self) -> Option<AgentMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Takes the next outbound message if one is ready.
    pub fn try_consume_outbound(&self) -> Option<AgentMessage> {
        self.outbound_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("pending", &self.get_pending_count())
            .field("delayed", &self.get_delayed_count())
            .field("seq", &self.current_seq())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_fifo_per_agent() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "1"));
        bus.send(AgentMessage::text("u", "b", "x"));
        bus.send(AgentMessage::text("u", "a", "2"));

        assert_eq!(bus.get_pending_count(), 3);
        assert_eq!(bus.pending_count_for("a"), 2);
        assert_eq!(bus.receive_next("a").unwrap().as_text(), "1");
        assert_eq!(bus.receive_next("a").unwrap().as_text(), "2");
        assert!(bus.receive_next("a").is_none());
        assert!(bus.has_pending());
        assert!(!bus.has_pending_for("a"));
    }

    #[test]
    fn test_seq_is_stamped_in_send_order() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "1"));
        bus.send(AgentMessage::text("u", "a", "2"));
        assert_eq!(bus.receive_next("a").unwrap().seq, 1);
        assert_eq!(bus.receive_next("a").unwrap().seq, 2);
        assert_eq!(bus.current_seq(), 2);
    }

    #[test]
    fn test_delayed_invisible_until_due() {
        let bus = MessageBus::new();
        let receipt = bus.send(AgentMessage::text("u", "a", "later").with_delay_ms(60_000));
        assert_eq!(receipt.disposition, Disposition::Delayed);
        assert_eq!(bus.get_pending_count(), 0);
        assert_eq!(bus.get_delayed_count(), 1);
        assert_eq!(bus.deliver_due_messages(), 0);
        assert!(bus.receive_next("a").is_none());
    }

    #[test]
    fn test_due_delayed_messages_are_delivered() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "soon").with_delay_ms(60_000));
        {
            // Pretend the delivery time has passed.
            let mut queues = bus.queues();
            queues.delayed[0].deliver_at = Some(Utc::now() - ChronoDuration::seconds(1));
        }
        assert_eq!(bus.deliver_due_messages(), 1);
        assert_eq!(bus.get_delayed_count(), 0);
        assert_eq!(bus.receive_next("a").unwrap().as_text(), "soon");
    }

    #[test]
    fn test_force_deliver_and_drop_delayed() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "1").with_delay_ms(60_000));
        bus.send(AgentMessage::text("u", "a", "2").with_delay_ms(30_000));
        assert_eq!(bus.force_deliver_all_delayed(), 2);
        // Ordered by delivery time.
        assert_eq!(bus.receive_next("a").unwrap().as_text(), "2");

        bus.send(AgentMessage::text("u", "b", "3").with_delay_ms(60_000));
        assert_eq!(bus.drop_all_delayed().len(), 1);
        assert_eq!(bus.get_delayed_count(), 0);
    }

    #[test]
    fn test_busy_recipient_triggers_listener() {
        let active = Arc::new(ActiveSet::new());
        let bus = MessageBus::with_active_set(active.clone());
        {
            let active = active.clone();
            bus.set_interruption_listener(Arc::new(move |msg: AgentMessage| {
                let to = msg.to.clone();
                active.add_interruption(&to, msg).err()
            }));
        }

        active.try_activate("a");
        let receipt = bus.send(AgentMessage::text("u", "a", "ping"));
        assert_eq!(receipt.disposition, Disposition::Interrupted);
        assert_eq!(bus.get_pending_count(), 0);
        assert_eq!(active.interruption_count("a"), 1);

        // Idle recipient: queued normally.
        let receipt = bus.send(AgentMessage::text("u", "b", "pong"));
        assert_eq!(receipt.disposition, Disposition::Queued);
    }

    #[test]
    fn test_declined_interruption_is_queued() {
        let active = Arc::new(ActiveSet::new());
        let bus = MessageBus::with_active_set(active.clone());
        bus.set_interruption_listener(Arc::new(Some));

        active.try_activate("a");
        let receipt = bus.send(AgentMessage::text("u", "a", "ping"));
        assert_eq!(receipt.disposition, Disposition::Queued);
        assert_eq!(bus.pending_count_for("a"), 1);
    }

    #[test]
    fn test_requeue_front_preserves_order() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "3"));
        bus.requeue_front(vec![
            AgentMessage::text("u", "a", "1"),
            AgentMessage::text("u", "a", "2"),
        ]);
        let texts: Vec<String> = std::iter::from_fn(|| bus.receive_next("a"))
            .map(|m| m.as_text())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_clear_queue_includes_delayed() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "1"));
        bus.send(AgentMessage::text("u", "a", "2").with_delay_ms(60_000));
        bus.send(AgentMessage::text("u", "b", "3").with_delay_ms(60_000));

        let cleared = bus.clear_queue("a");
        assert_eq!(cleared.len(), 2);
        assert_eq!(bus.get_pending_count(), 0);
        assert_eq!(bus.get_delayed_count(), 1);
    }

    #[test]
    fn test_take_spool_keeps_later_messages() {
        let bus = MessageBus::new();
        bus.send(AgentMessage::text("u", "a", "old-a"));
        bus.send(AgentMessage::text("u", "b", "old-b"));
        let stop = bus.current_seq();
        bus.send(AgentMessage::text("u", "a", "new-a"));

        let spooled = bus.take_spool(stop);
        assert_eq!(
            spooled.iter().map(|m| m.as_text()).collect::<Vec<_>>(),
            vec!["old-a", "old-b"]
        );
        assert_eq!(bus.get_pending_count(), 1);
        assert_eq!(bus.receive_next("a").unwrap().as_text(), "new-a");
    }

    #[tokio::test]
    async fn test_wait_for_message_times_out() {
        let bus = MessageBus::new();
        assert!(!bus.wait_for_message(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wait_for_message_wakes_on_send() {
        let bus = Arc::new(MessageBus::new());
        let sender = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sender.send(AgentMessage::text("u", "a", "hi"));
        });
        assert!(bus.wait_for_message(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_outbound_roundtrip() {
        let bus = MessageBus::new();
        assert!(bus.try_consume_outbound().is_none());
        bus.publish_outbound(AgentMessage::text("a", "user", "done"));
        let msg = bus.consume_outbound().await.unwrap();
        assert_eq!(msg.to, "user");
    }
}
