//! Tool and LLM execution metrics collector.
//!
//! Provides a lightweight, thread-safe metrics collector for tracking tool
//! execution and LLM attempt statistics across all agents. Uses interior
//! mutability via `Mutex` so all recording methods take `&self`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-tool execution statistics.
#[derive(Debug, Clone, Default)]
pub struct ToolMetrics {
    /// Total number of calls made to this tool.
    pub call_count: u64,
    /// Number of calls that resulted in an error.
    pub error_count: u64,
    /// Cumulative duration of all calls.
    pub total_duration: Duration,
    /// Shortest call duration observed.
    pub min_duration: Option<Duration>,
    /// Longest call duration observed.
    pub max_duration: Option<Duration>,
}

impl ToolMetrics {
    /// Returns the average call duration, or `None` if no calls have been recorded.
    pub fn average_duration(&self) -> Option<Duration> {
        if self.call_count == 0 {
            return None;
        }
        Some(self.total_duration / self.call_count as u32)
    }

    /// Returns the success rate as a value between 0.0 and 1.0.
    ///
    /// If no calls have been recorded, returns 1.0 (100%).
    pub fn success_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 1.0;
        }
        (self.call_count - self.error_count) as f64 / self.call_count as f64
    }

    fn record(&mut self, duration: Duration, success: bool) {
        self.call_count += 1;
        if !success {
            self.error_count += 1;
        }
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |d| d.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |d| d.max(duration)));
    }
}

/// Aggregated statistics over individual LLM attempts (not logical calls).
#[derive(Debug, Clone, Default)]
pub struct LlmMetrics {
    pub attempts: u64,
    pub failures: u64,
    pub total_latency: Duration,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Engine-wide metrics collector.
///
/// Thread-safe via interior `Mutex`. All recording methods take `&self`,
/// making it easy to share across async tasks via `Arc<MetricsCollector>`.
#[derive(Debug)]
pub struct MetricsCollector {
    tools: Mutex<HashMap<String, ToolMetrics>>,
    llm: Mutex<LlmMetrics>,
    started: Instant,
}

impl MetricsCollector {
    /// Creates a new metrics collector. The clock starts immediately.
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
            llm: Mutex::new(LlmMetrics::default()),
            started: Instant::now(),
        }
    }

    /// Records a single tool call.
    pub fn record_tool_call(&self, tool_name: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools
            .entry(tool_name.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Records one LLM attempt with its latency and, on success, token counts.
    pub fn record_llm_attempt(
        &self,
        latency: Duration,
        success: bool,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        let mut llm = self.llm.lock().unwrap_or_else(|e| e.into_inner());
        llm.attempts += 1;
        if !success {
            llm.failures += 1;
        }
        llm.total_latency += latency;
        llm.prompt_tokens += prompt_tokens;
        llm.completion_tokens += completion_tokens;
    }

    /// Returns a clone of the metrics for a specific tool, or `None` if the
    /// tool has never been called.
    pub fn tool_metrics(&self, tool_name: &str) -> Option<ToolMetrics> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.get(tool_name).cloned()
    }

    /// Returns a snapshot of the LLM attempt counters.
    pub fn llm_metrics(&self) -> LlmMetrics {
        self.llm.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns the sum of `call_count` across all tools.
    pub fn total_tool_calls(&self) -> u64 {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.values().map(|m| m.call_count).sum()
    }

    /// Produces a human-readable summary.
    ///
    /// Example output:
    /// ```text
    /// Uptime: 45s | LLM: 9 attempts (1 failed), avg 1.2s | Tokens: 1500 in / 800 out | Tools: 12 calls (2 errors)
    ///   send_message: 5 calls, avg 200us, 100% success
    /// ```
    pub fn summary(&self) -> String {
        let llm = self.llm_metrics();
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());

        let total_calls: u64 = tools.values().map(|m| m.call_count).sum();
        let total_errors: u64 = tools.values().map(|m| m.error_count).sum();
        let avg_llm = if llm.attempts == 0 {
            "N/A".to_string()
        } else {
            format_duration(llm.total_latency / llm.attempts as u32)
        };

        let mut summary = format!(
            "Uptime: {}s | LLM: {} attempts ({} failed), avg {} | Tokens: {} in / {} out | Tools: {} calls ({} errors)",
            self.started.elapsed().as_secs(),
            llm.attempts,
            llm.failures,
            avg_llm,
            llm.prompt_tokens,
            llm.completion_tokens,
            total_calls,
            total_errors,
        );

        let mut entries: Vec<_> = tools.iter().collect();
        entries.sort_by(|a, b| b.1.call_count.cmp(&a.1.call_count).then(a.0.cmp(b.0)));

        for (name, metrics) in entries {
            let avg = match metrics.average_duration() {
                Some(d) => format_duration(d),
                None => "N/A".to_string(),
            };
            let success_pct = (metrics.success_rate() * 100.0).round() as u64;
            summary.push_str(&format!(
                "\n  {}: {} calls, avg {}, {}% success",
                name, metrics.call_count, avg, success_pct,
            ));
        }

        summary
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a duration in a human-friendly way.
fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{}us", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.total_tool_calls(), 0);
        assert_eq!(collector.llm_metrics().attempts, 0);
    }

    #[test]
    fn test_record_tool_call_min_max() {
        let collector = MetricsCollector::new();
        collector.record_tool_call("send_message", Duration::from_millis(100), true);
        collector.record_tool_call("send_message", Duration::from_millis(20), false);

        let metrics = collector.tool_metrics("send_message").unwrap();
        assert_eq!(metrics.call_count, 2);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.min_duration, Some(Duration::from_millis(20)));
        assert_eq!(metrics.max_duration, Some(Duration::from_millis(100)));
        assert_eq!(metrics.average_duration(), Some(Duration::from_millis(60)));
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_llm_attempts() {
        let collector = MetricsCollector::new();
        collector.record_llm_attempt(Duration::from_millis(10), false, 0, 0);
        collector.record_llm_attempt(Duration::from_millis(30), true, 120, 40);

        let llm = collector.llm_metrics();
        assert_eq!(llm.attempts, 2);
        assert_eq!(llm.failures, 1);
        assert_eq!(llm.prompt_tokens, 120);
        assert_eq!(llm.completion_tokens, 40);
        assert_eq!(llm.total_latency, Duration::from_millis(40));
    }

    #[test]
    fn test_summary_lists_tools_by_call_count() {
        let collector = MetricsCollector::new();
        collector.record_tool_call("spawn_agent", Duration::from_micros(500), true);
        collector.record_tool_call("send_message", Duration::from_millis(2), true);
        collector.record_tool_call("send_message", Duration::from_millis(2), true);

        let summary = collector.summary();
        let send_pos = summary.find("send_message").unwrap();
        let spawn_pos = summary.find("spawn_agent").unwrap();
        assert!(send_pos < spawn_pos);
        assert!(summary.contains("Tools: 3 calls (0 errors)"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(500)), "500us");
        assert_eq!(format_duration(Duration::from_millis(200)), "200ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }
}
