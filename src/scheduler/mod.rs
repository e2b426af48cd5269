//! Message scheduler for AgentMesh
//!
//! The scheduler is the producer-consumer loop between the [`MessageBus`]
//! and agent behaviors. Each [`tick`](MessageScheduler::tick):
//!
//! 1. moves due delayed messages into the live queues,
//! 2. scans agents from a rotating cursor and, if a concurrency permit is
//!    free, dequeues one message for the first idle, inactive agent with a
//!    non-empty queue, marks it active and spawns its processing,
//! 3. reports whether it dispatched, and if not why, so the caller can
//!    wait for an arrival or back off.
//!
//! At most one message is dispatched per tick. Concurrency is bounded by a
//! [`Semaphore`] sized from `llm.max_concurrent_requests`, so agent-level
//! parallelism follows the provider's request budget.
//!
//! [`MessageBus`]: crate::bus::MessageBus

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::runtime::AgentRuntime;

/// Result of a single scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// One message was handed to an agent.
    Dispatched { agent_id: String, message_id: String },
    /// All concurrency permits are in use.
    Saturated,
    /// Messages are pending, but every recipient is busy or stopped.
    Blocked,
    /// Nothing is pending.
    Idle,
    /// The scheduler no longer accepts dispatches.
    ShutDown,
}

/// Why a bounded run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEnd {
    /// The configured number of dispatches was reached.
    StepLimit,
    /// Several consecutive ticks saw no pending or active work.
    Completed,
    /// Shutdown was requested while running.
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: u64,
    pub ticks: u64,
    pub end: RunEnd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Bus sequence number at the stop request.
    pub stop_seq: u64,
    /// Delayed messages delivered early.
    pub delivered_delayed: usize,
    /// Delayed messages discarded (forced exit only).
    pub dropped_delayed: usize,
    /// Whether every in-flight message finished.
    pub drained: bool,
    /// Queued messages sent before the stop request, removed and persisted.
    pub spooled: usize,
    /// Conversations written to storage.
    pub conversations_saved: usize,
}

pub struct MessageScheduler {
    runtime: Arc<AgentRuntime>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    cursor: AtomicUsize,
    accepting: AtomicBool,
    steps: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl MessageScheduler {
    /// Scheduler using the runtime's scheduler and LLM settings.
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        let config = runtime.config().scheduler.clone();
        let max_concurrent = runtime.llm().max_concurrent_requests().max(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            runtime,
            config,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            cursor: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            steps: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Messages currently being processed.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Messages dispatched since creation.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run one scheduling iteration. Never waits.
    pub fn tick(&self) -> TickOutcome {
        if !self.is_accepting() {
            return TickOutcome::ShutDown;
        }

        let bus = self.runtime.bus();
        let due = bus.deliver_due_messages();
        if due > 0 {
            debug!(count = due, "Delivered due delayed messages");
        }

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return TickOutcome::Saturated;
        };

        let state = self.runtime.state();
        let ids = state.agent_ids();
        if ids.is_empty() {
            return self.quiet_outcome();
        }
        let start = self.cursor.load(Ordering::Relaxed) % ids.len();

        for offset in 0..ids.len() {
            let index = (start + offset) % ids.len();
            let agent_id = &ids[index];

            if !bus.has_pending_for(agent_id)
                || !state.status(agent_id).is_some_and(|s| s.is_eligible())
            {
                continue;
            }
            if !state.active_set().try_activate(agent_id) {
                continue;
            }
            // Status may have changed between the check and the activation.
            if !state.status(agent_id).is_some_and(|s| s.is_eligible()) {
                self.runtime.finish_processing(agent_id);
                continue;
            }
            let Some(message) = bus.receive_next(agent_id) else {
                self.runtime.finish_processing(agent_id);
                continue;
            };

            self.cursor.store(index + 1, Ordering::Relaxed);
            self.steps.fetch_add(1, Ordering::Relaxed);
            let message_id = message.id.clone();
            debug!(agent_id = %agent_id, message_id = %message_id, "Dispatching message");

            let runtime = self.runtime.clone();
            let id = agent_id.clone();
            tokio::spawn(async move {
                runtime.process_message(&id, message).await;
                drop(permit);
            });

            return TickOutcome::Dispatched {
                agent_id: agent_id.clone(),
                message_id,
            };
        }

        self.quiet_outcome()
    }

    fn quiet_outcome(&self) -> TickOutcome {
        if self.runtime.bus().has_pending() {
            TickOutcome::Blocked
        } else {
            TickOutcome::Idle
        }
    }

    /// No schedulable, delayed or in-flight work.
    fn is_quiescent(&self) -> bool {
        !self.runtime.has_schedulable_pending()
            && self.runtime.bus().get_delayed_count() == 0
            && self.runtime.state().active_set().is_empty()
    }

    async fn pause(&self, outcome: &TickOutcome) {
        let wait = match outcome {
            TickOutcome::Idle => Duration::from_millis(self.config.idle_wait_ms),
            _ => Duration::from_millis(self.config.busy_backoff_ms),
        };
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return;
        }
        tokio::select! {
            _ = self.runtime.bus().wait_for_message(wait) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// Spawn the always-on loop. It exits once [`shutdown`](Self::shutdown)
    /// is called.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        info!(max_concurrent = self.max_concurrent, "Scheduler started");
        tokio::spawn(async move {
            loop {
                match scheduler.tick() {
                    TickOutcome::ShutDown => break,
                    TickOutcome::Dispatched { .. } => tokio::task::yield_now().await,
                    outcome => scheduler.pause(&outcome).await,
                }
            }
            info!(steps = scheduler.steps(), "Scheduler loop exited");
        })
    }

    /// Bounded run: dispatch until `max_steps` messages have been handed out
    /// (falls back to `scheduler.max_steps`), or until
    /// `idle_ticks_to_complete` consecutive ticks find no work at all.
    pub async fn run(&self, max_steps: Option<u64>) -> RunReport {
        let limit = max_steps.or(self.config.max_steps);
        let needed = self.config.idle_ticks_to_complete.max(1);
        let (mut steps, mut ticks, mut idle_ticks) = (0u64, 0u64, 0u32);

        let end = loop {
            if limit.is_some_and(|l| steps >= l) {
                break RunEnd::StepLimit;
            }
            ticks += 1;
            let outcome = self.tick();
            match outcome {
                TickOutcome::ShutDown => break RunEnd::ShutDown,
                TickOutcome::Dispatched { .. } => {
                    steps += 1;
                    idle_ticks = 0;
                    tokio::task::yield_now().await;
                }
                outcome => {
                    if self.is_quiescent() {
                        idle_ticks += 1;
                        if idle_ticks >= needed {
                            break RunEnd::Completed;
                        }
                    } else {
                        idle_ticks = 0;
                    }
                    self.pause(&outcome).await;
                }
            }
        };

        info!(steps = steps, ticks = ticks, end = ?end, "Bounded run finished");
        RunReport { steps, ticks, end }
    }

    /// Graceful shutdown.
    ///
    /// Stops dispatching, delivers delayed messages early (or drops them
    /// when `force` is set), waits up to `drain_timeout_secs` for in-flight
    /// messages (skipped when forced, which aborts their LLM calls instead),
    /// then removes and persists every queued message sent before the stop
    /// request. Messages sent afterwards stay queued.
    pub async fn shutdown(&self, force: bool) -> Result<ShutdownReport> {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let runtime = &self.runtime;
        let bus = runtime.bus();
        let active = runtime.state().active_set();
        let stop_seq = bus.current_seq();
        info!(stop_seq = stop_seq, force = force, in_flight = active.len(), "Scheduler shutting down");

        let mut report = ShutdownReport {
            stop_seq,
            ..Default::default()
        };

        if force {
            let dropped = bus.drop_all_delayed();
            if !dropped.is_empty() {
                warn!(count = dropped.len(), "Forced exit: dropping delayed messages");
            }
            report.dropped_delayed = dropped.len();
            for agent_id in active.active_agents() {
                runtime.llm().abort(&agent_id);
            }
            report.drained = active.is_empty();
        } else {
            report.delivered_delayed = bus.force_deliver_all_delayed();
            let timeout = Duration::from_secs(self.config.drain_timeout_secs);
            report.drained = tokio::time::timeout(timeout, active.wait_drained())
                .await
                .is_ok();
            if !report.drained {
                warn!(
                    still_active = ?active.active_agents(),
                    timeout_secs = self.config.drain_timeout_secs,
                    "Drain timed out"
                );
            }
        }

        let spooled = bus.take_spool(stop_seq);
        report.spooled = spooled.len();
        if !spooled.is_empty() && runtime.config().storage_path().is_none() {
            warn!(count = spooled.len(), "No storage configured, discarding queued messages");
        }
        let persisted = runtime.persist(&spooled).await?;
        report.conversations_saved = persisted.conversations;

        info!(
            drained = report.drained,
            spooled = report.spooled,
            conversations = report.conversations_saved,
            "Scheduler stopped"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for MessageScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageScheduler")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .field("steps", &self.steps())
            .finish()
    }
}
