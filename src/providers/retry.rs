//! Retrying LLM client with exponential backoff and per-agent abort.
//!
//! Wraps any [`LLMProvider`] so one logical chat call becomes up to
//! `max_retries` attempts, with `base_delay_ms * 2^attempt` between them.
//! Every attempt is recorded in the shared [`MetricsCollector`]; retries
//! are announced as [`RuntimeEvent::LlmRetry`]. A call in flight for an agent
//! (including its backoff sleep) can be cancelled with [`LlmClient::abort`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use agentmesh::providers::{LlmClient, ScriptedProvider};
//!
//! let client = LlmClient::new(Arc::new(ScriptedProvider::new()))
//!     .with_max_retries(5)
//!     .with_base_delay_ms(500);
//! assert_eq!(client.max_retries(), 5);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{MeshError, Result};
use crate::events::{EventHub, RuntimeEvent};
use crate::session::Message;
use crate::utils::metrics::MetricsCollector;

use super::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};

/// Backoff before attempt `attempt + 1`: `base_delay_ms * 2^attempt`.
///
/// No jitter: agents failing together retry together.
pub fn compute_delay(attempt: u32, base_delay_ms: u64) -> u64 {
    base_delay_ms.saturating_mul(1u64 << attempt.min(32))
}

pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    model: Option<String>,
    options: ChatOptions,
    max_retries: u32,
    base_delay_ms: u64,
    max_concurrent_requests: usize,
    metrics: Arc<MetricsCollector>,
    events: Option<Arc<EventHub>>,
    in_flight: Mutex<HashMap<String, (u64, watch::Sender<bool>)>>,
    next_call: AtomicU64,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider.name())
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .finish()
    }
}

impl LlmClient {
    /// Create a client with default settings: 3 attempts, 1s base delay,
    /// 3 concurrent requests.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: None,
            options: ChatOptions::default(),
            max_retries: 3,
            base_delay_ms: 1_000,
            max_concurrent_requests: 3,
            metrics: Arc::new(MetricsCollector::new()),
            events: None,
            in_flight: Mutex::new(HashMap::new()),
            next_call: AtomicU64::new(0),
        }
    }

    /// Create a client from the `llm` config section.
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &LlmConfig) -> Self {
        let model = (config.model != "default").then(|| config.model.clone());
        let mut client = Self::new(provider)
            .with_max_retries(config.max_retries)
            .with_base_delay_ms(config.base_delay_ms)
            .with_max_concurrent_requests(config.max_concurrent_requests)
            .with_options(
                ChatOptions::new()
                    .with_max_tokens(config.max_tokens)
                    .with_temperature(config.temperature),
            );
        client.model = model;
        client
    }

    /// Total attempts per call (at least one).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_events(mut self, events: Arc<EventHub>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The upstream concurrent-request budget. The scheduler sizes its
    /// agent concurrency from this.
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Whether a call is currently in flight for the agent.
    pub fn is_in_flight(&self, agent_id: &str) -> bool {
        self.lock_in_flight().contains_key(agent_id)
    }

    /// Cancel the agent's in-flight call.
    ///
    /// The call resolves with [`MeshError::Aborted`]. Returns `false` if no
    /// call was in flight. Turns already applied to the conversation are
    /// not touched.
    pub fn abort(&self, agent_id: &str) -> bool {
        match self.lock_in_flight().get(agent_id) {
            Some((_, tx)) => {
                let _ = tx.send(true);
                debug!(agent_id = %agent_id, "LLM call abort requested");
                true
            }
            None => false,
        }
    }

    fn lock_in_flight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, (u64, watch::Sender<bool>)>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, agent_id: &str) -> (InFlight<'_>, watch::Receiver<bool>) {
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        self.lock_in_flight()
            .insert(agent_id.to_string(), (call_id, tx));
        (
            InFlight {
                client: self,
                agent_id: agent_id.to_string(),
                call_id,
            },
            rx,
        )
    }

    /// One logical chat call on behalf of `agent_id`, retried with backoff.
    ///
    /// Errors the provider classifies as permanent are returned after the
    /// first attempt; aborts are never retried.
    pub async fn chat(
        &self,
        agent_id: &str,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<LLMResponse> {
        let (_in_flight, mut abort_rx) = self.register(agent_id);
        let options = self.options.clone().with_user(agent_id);
        let model = self.model.as_deref();
        let mut last_err: Option<MeshError> = None;

        for attempt in 0..self.max_retries {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = wait_aborted(&mut abort_rx) => Err(MeshError::Aborted(agent_id.to_string())),
                r = self.provider.chat(messages.clone(), tools.clone(), model, options.clone()) => r,
            };
            let latency = started.elapsed();

            let err = match result {
                Ok(mut response) => {
                    response.normalize_usage();
                    let (prompt, completion) = response
                        .usage
                        .map_or((0, 0), |u| (u.prompt_tokens as u64, u.completion_tokens as u64));
                    self.metrics
                        .record_llm_attempt(latency, true, prompt, completion);
                    debug!(
                        agent_id = %agent_id,
                        attempt = attempt + 1,
                        latency_ms = latency.as_millis() as u64,
                        prompt_tokens = prompt,
                        completion_tokens = completion,
                        "LLM call succeeded"
                    );
                    return Ok(response);
                }
                Err(err) if err.is_abort() => return Err(err),
                Err(err) => err,
            };

            self.metrics.record_llm_attempt(latency, false, 0, 0);
            if !err.is_retryable() || attempt + 1 >= self.max_retries {
                last_err = Some(err);
                break;
            }

            let delay_ms = compute_delay(attempt, self.base_delay_ms);
            warn!(
                agent_id = %agent_id,
                provider = self.provider.name(),
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay_ms,
                error = %err,
                "LLM call failed, retrying"
            );
            if let Some(events) = &self.events {
                events.emit(RuntimeEvent::LlmRetry {
                    agent_id: agent_id.to_string(),
                    attempt: attempt + 1,
                    delay_ms,
                    error: err.to_string(),
                });
            }
            last_err = Some(err);

            tokio::select! {
                biased;
                _ = wait_aborted(&mut abort_rx) => return Err(MeshError::Aborted(agent_id.to_string())),
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }

        Err(last_err
            .unwrap_or_else(|| MeshError::Provider("retry loop made no attempt".to_string())))
    }
}

/// Deregisters an in-flight call when dropped, unless a newer call replaced it.
struct InFlight<'a> {
    client: &'a LlmClient,
    agent_id: String,
    call_id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut map = self.client.lock_in_flight();
        if map.get(&self.agent_id).is_some_and(|(id, _)| *id == self.call_id) {
            map.remove(&self.agent_id);
        }
    }
}

async fn wait_aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can abort this call any more.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails a configurable number of times before succeeding.
    struct FailThenSucceedProvider {
        calls: AtomicU32,
        target_failures: u32,
        permanent: bool,
    }

    impl FailThenSucceedProvider {
        fn new(target_failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                target_failures,
                permanent: false,
            }
        }

        fn permanent() -> Self {
            Self {
                permanent: true,
                ..Self::new(u32::MAX)
            }
        }
    }

    #[async_trait]
    impl LLMProvider for FailThenSucceedProvider {
        fn name(&self) -> &str {
            "fail-then-succeed"
        }

        fn default_model(&self) -> &str {
            "test-model"
        }

        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            options: ChatOptions,
        ) -> Result<LLMResponse> {
            assert!(options.user.is_some());
            let count = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(ProviderError::Auth("bad key".into()).into());
            }
            if count < self.target_failures {
                Err(MeshError::Provider("HTTP 503 overloaded".into()))
            } else {
                Ok(LLMResponse::text("recovered")
                    .with_raw_usage(serde_json::json!({"input_tokens": 12, "output_tokens": 3})))
            }
        }
    }

    /// Never answers.
    struct HangingProvider;

    #[async_trait]
    impl LLMProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        fn default_model(&self) -> &str {
            "test-model"
        }

        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_compute_delay() {
        assert_eq!(compute_delay(0, 1000), 1000);
        assert_eq!(compute_delay(1, 1000), 2000);
        assert_eq!(compute_delay(2, 1000), 4000);
        assert_eq!(compute_delay(60, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_from_config() {
        let config = LlmConfig {
            max_retries: 0,
            max_concurrent_requests: 5,
            ..Default::default()
        };
        let client = LlmClient::from_config(Arc::new(HangingProvider), &config);
        assert_eq!(client.max_retries(), 1);
        assert_eq!(client.max_concurrent_requests(), 5);
        assert!(client.model.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let provider = Arc::new(FailThenSucceedProvider::new(2));
        let client = LlmClient::new(provider.clone());

        let response = client.chat("a1", vec![], vec![]).await.unwrap();
        assert_eq!(response.content, "recovered");
        assert_eq!(response.usage.unwrap().prompt_tokens, 12);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let llm = client.metrics().llm_metrics();
        assert_eq!(llm.attempts, 3);
        assert_eq!(llm.failures, 2);
        assert_eq!(llm.prompt_tokens, 12);
        assert!(!client.is_in_flight("a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let provider = Arc::new(FailThenSucceedProvider::permanent());
        let client = LlmClient::new(provider.clone());

        let err = client.chat("a1", vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, MeshError::ProviderTyped(ProviderError::Auth(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_events_emitted() {
        let events = Arc::new(EventHub::default());
        let mut rx = events.subscribe();
        let client = LlmClient::new(Arc::new(FailThenSucceedProvider::new(10)))
            .with_max_retries(3)
            .with_events(events);

        assert!(client.chat("a1", vec![], vec![]).await.is_err());

        let mut delays = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RuntimeEvent::LlmRetry { delay_ms, .. } = event {
                delays.push(delay_ms);
            }
        }
        assert_eq!(delays, vec![1000, 2000]);
    }

    #[tokio::test]
    async fn test_abort_cancels_in_flight_call() {
        let client = Arc::new(LlmClient::new(Arc::new(HangingProvider)));
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.chat("a1", vec![], vec![]).await })
        };

        while !client.is_in_flight("a1") {
            tokio::task::yield_now().await;
        }
        assert!(client.abort("a1"));

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_abort());
        assert!(!client.is_in_flight("a1"));
        assert!(!client.abort("a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_backoff() {
        let client = Arc::new(
            LlmClient::new(Arc::new(FailThenSucceedProvider::new(10))).with_base_delay_ms(60_000),
        );
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.chat("a1", vec![], vec![]).await })
        };

        // First attempt fails immediately; the client is now sleeping.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.abort("a1"));
        assert!(call.await.unwrap().unwrap_err().is_abort());
    }
}
