//! Conversation management for AgentMesh
//!
//! This module owns one ordered turn list per agent, the token usage the
//! provider last reported for it, and the context-window status derived from
//! that usage.
//!
//! # Example
//!
//! ```
//! use agentmesh::config::ContextConfig;
//! use agentmesh::session::{ConversationManager, ContextLevel, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ConversationManager::new_memory(&ContextConfig::default());
//!     manager.ensure("planner", "You plan trips.").await;
//!     manager.append("planner", Message::user("Go to Rome")).await.unwrap();
//!
//!     assert_eq!(manager.len("planner").await, 2);
//!     let status = manager.get_context_status("planner").await;
//!     assert_eq!(status.level, ContextLevel::Normal);
//! }
//! ```
//!
//! # Persistence
//!
//! When created with `with_path()`, conversations are written to
//! `<path>/<agent>.json` on compression and by `flush_all()`, and can be
//! reloaded with `load_all()`.

pub mod context;
pub mod types;

pub use context::{ContextLevel, ContextLimit, ContextStatus};
pub use types::{Conversation, Message, Role, ToolCall};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::compaction::summarize_history;
use crate::config::ContextConfig;
use crate::error::{MeshError, Result};
use crate::providers::Usage;

/// Outcome of [`ConversationManager::compress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressReport {
    pub compressed: bool,
    pub original_count: usize,
    pub new_count: usize,
}

/// Per-agent conversations and context-window bookkeeping.
///
/// Cheap to clone; clones share the same conversations.
pub struct ConversationManager {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
    limit: ContextLimit,
    keep_recent: usize,
    max_turns: usize,
    storage_path: Option<PathBuf>,
}

impl ConversationManager {
    /// Create an in-memory manager without persistence.
    pub fn new_memory(config: &ContextConfig) -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            limit: ContextLimit::from(config),
            keep_recent: config.keep_recent,
            max_turns: config.max_turns,
            storage_path: None,
        }
    }

    /// Create a manager that persists conversations under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_path(config: &ContextConfig, path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            storage_path: Some(path),
            ..Self::new_memory(config)
        })
    }

    pub fn limit(&self) -> ContextLimit {
        self.limit
    }

    /// Create the agent's conversation if it does not exist yet.
    pub async fn ensure(&self, agent_id: &str, system_prompt: &str) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(agent_id.to_string())
            .or_insert_with(|| Conversation::new(agent_id, system_prompt));
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.conversations.read().await.contains_key(agent_id)
    }

    /// Append a turn.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Session` if the agent has no conversation.
    pub async fn append(&self, agent_id: &str, message: Message) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let conv = conversations
            .get_mut(agent_id)
            .ok_or_else(|| MeshError::Session(format!("no conversation for {}", agent_id)))?;
        conv.push(message);
        Ok(())
    }

    /// Number of turns (0 if the agent has no conversation).
    pub async fn len(&self, agent_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map_or(0, Conversation::len)
    }

    /// Mark the current end of the conversation as the start of the message
    /// being processed. Returns the marked index.
    pub async fn begin_message(&self, agent_id: &str) -> usize {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(agent_id) {
            Some(conv) => {
                let point = conv.len();
                conv.rollback_point = Some(point);
                point
            }
            None => 0,
        }
    }

    /// Drop every turn added since [`begin_message`](Self::begin_message),
    /// wherever compression has moved them. Returns the number of turns removed.
    pub async fn rollback_message(&self, agent_id: &str) -> usize {
        let mut conversations = self.conversations.write().await;
        let Some(conv) = conversations.get_mut(agent_id) else {
            return 0;
        };
        let Some(point) = conv.rollback_point.take() else {
            return 0;
        };
        let before = conv.len();
        conv.messages.truncate(point.max(1));
        conv.updated_at = chrono::Utc::now();
        before - conv.len()
    }

    /// Forget the rollback point once the message is settled.
    pub async fn end_message(&self, agent_id: &str) {
        if let Some(conv) = self.conversations.write().await.get_mut(agent_id) {
            conv.rollback_point = None;
        }
    }

    /// Copy of the agent's turns, for building an LLM request.
    pub async fn snapshot(&self, agent_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub async fn update_token_usage(&self, agent_id: &str, usage: Usage) {
        if let Some(conv) = self.conversations.write().await.get_mut(agent_id) {
            conv.usage = Some(usage);
        }
    }

    pub async fn get_token_usage(&self, agent_id: &str) -> Option<Usage> {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .and_then(|c| c.usage.clone())
    }

    /// Classify the agent's last reported prompt usage against the window.
    pub async fn get_context_status(&self, agent_id: &str) -> ContextStatus {
        let prompt_tokens = self
            .get_token_usage(agent_id)
            .await
            .map_or(0, |u| u.prompt_tokens as u64);
        self.limit.status(prompt_tokens)
    }

    /// The banner appended to the agent's next user turn.
    pub async fn build_context_status_prompt(&self, agent_id: &str) -> String {
        let mut banner = self.get_context_status(agent_id).await.banner();
        if let Some(warning) = self.check_and_warn(agent_id).await {
            banner.push('\n');
            banner.push_str(&warning);
        }
        banner
    }

    /// Raw turn-count ceiling, independent of token usage.
    ///
    /// Returns a warning for the model when the conversation has reached
    /// `max_turns`.
    pub async fn check_and_warn(&self, agent_id: &str) -> Option<String> {
        let turns = self.len(agent_id).await;
        if turns < self.max_turns {
            return None;
        }
        crate::log_component!(
            warn,
            "context",
            "Conversation turn count over ceiling",
            agent_id = agent_id,
            turns = turns,
            max_turns = self.max_turns,
        );
        Some(format!(
            "[history has {} turns, limit {}] Summarize it with compress_context.",
            turns, self.max_turns
        ))
    }

    /// Replace older history with a summary, keeping the most recent turns.
    ///
    /// A no-op when the conversation has at most `keep_recent + 1` turns.
    /// Clears the cached token usage and persists the result when storage
    /// is configured.
    pub async fn compress(
        &self,
        agent_id: &str,
        summary: &str,
        keep_recent: Option<usize>,
    ) -> Result<CompressReport> {
        let keep = keep_recent.unwrap_or(self.keep_recent);
        let report = {
            let mut conversations = self.conversations.write().await;
            let conv = conversations
                .get_mut(agent_id)
                .ok_or_else(|| MeshError::Session(format!("no conversation for {}", agent_id)))?;
            let original_count = conv.len();
            // Turns of the message in flight are never folded into the summary.
            let keep = match conv.rollback_point {
                Some(point) => keep.max(original_count.saturating_sub(point)),
                None => keep,
            };
            match summarize_history(&conv.messages, keep, summary) {
                Some(compressed) => {
                    if let Some(point) = conv.rollback_point {
                        conv.rollback_point =
                            Some(compressed.len() - original_count.saturating_sub(point));
                    }
                    conv.messages = compressed;
                    conv.usage = None;
                    conv.updated_at = chrono::Utc::now();
                    CompressReport {
                        compressed: true,
                        original_count,
                        new_count: conv.len(),
                    }
                }
                None => CompressReport {
                    compressed: false,
                    original_count,
                    new_count: original_count,
                },
            }
        };

        if report.compressed {
            info!(
                agent_id = %agent_id,
                original = report.original_count,
                new = report.new_count,
                "Conversation compressed"
            );
            self.flush(agent_id).await?;
        }
        Ok(report)
    }

    /// Forget the agent's conversation, in memory and on disk.
    pub async fn remove(&self, agent_id: &str) -> Result<()> {
        self.conversations.write().await.remove(agent_id);
        if let Some(ref storage_path) = self.storage_path {
            let file_path = storage_path.join(format!("{}.json", sanitize_key(agent_id)));
            if file_path.exists() {
                tokio::fs::remove_file(&file_path).await?;
            }
        }
        Ok(())
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Write one conversation to disk. No-op without storage.
    pub async fn flush(&self, agent_id: &str) -> Result<()> {
        let Some(ref storage_path) = self.storage_path else {
            return Ok(());
        };
        let content = {
            let conversations = self.conversations.read().await;
            match conversations.get(agent_id) {
                Some(conv) => serde_json::to_string_pretty(conv)?,
                None => return Ok(()),
            }
        };
        let file_path = storage_path.join(format!("{}.json", sanitize_key(agent_id)));
        tokio::fs::write(&file_path, content).await?;
        debug!(agent_id = %agent_id, path = %file_path.display(), "Conversation flushed");
        Ok(())
    }

    /// Write every conversation to disk. Returns how many were written.
    pub async fn flush_all(&self) -> Result<usize> {
        if self.storage_path.is_none() {
            return Ok(0);
        }
        let ids = self.agent_ids().await;
        for id in &ids {
            self.flush(id).await?;
        }
        Ok(ids.len())
    }

    /// Load every persisted conversation, replacing in-memory copies.
    ///
    /// Unreadable files are skipped with a warning.
    pub async fn load_all(&self) -> Result<usize> {
        let Some(ref storage_path) = self.storage_path else {
            return Ok(0);
        };
        let mut loaded = 0;
        let mut dir_entries = tokio::fs::read_dir(storage_path).await?;
        while let Some(entry) = dir_entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(MeshError::from)
                .and_then(|content| Ok(serde_json::from_str::<Conversation>(&content)?));
            match parsed {
                Ok(conv) if conv.messages.first().is_some_and(|m| m.role == Role::System) => {
                    self.conversations
                        .write()
                        .await
                        .insert(conv.agent_id.clone(), conv);
                    loaded += 1;
                }
                Ok(_) => warn!(path = %path.display(), "Skipping conversation without system turn"),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable conversation"),
            }
        }
        Ok(loaded)
    }
}

impl Clone for ConversationManager {
    fn clone(&self) -> Self {
        Self {
            conversations: Arc::clone(&self.conversations),
            limit: self.limit,
            keep_recent: self.keep_recent,
            max_turns: self.max_turns,
            storage_path: self.storage_path.clone(),
        }
    }
}

/// Percent-encode characters that are unsafe in filenames.
fn sanitize_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() * 3);
    for c in key.chars() {
        match c {
            '/' => result.push_str("%2F"),
            '\\' => result.push_str("%5C"),
            ':' => result.push_str("%3A"),
            '*' => result.push_str("%2A"),
            '?' => result.push_str("%3F"),
            '"' => result.push_str("%22"),
            '<' => result.push_str("%3C"),
            '>' => result.push_str("%3E"),
            '|' => result.push_str("%7C"),
            '%' => result.push_str("%25"),
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ContextConfig {
        ContextConfig {
            max_tokens: 1000,
            keep_recent: 3,
            max_turns: 6,
            ..Default::default()
        }
    }

    async fn manager_with_turns(turns: usize) -> ConversationManager {
        let manager = ConversationManager::new_memory(&small_config());
        manager.ensure("a", "sys").await;
        for i in 0..turns {
            manager
                .append("a", Message::user(&format!("turn {}", i)))
                .await
                .unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let manager = manager_with_turns(1).await;
        manager.ensure("a", "other prompt").await;
        let turns = manager.snapshot("a").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "sys");
    }

    #[tokio::test]
    async fn test_append_unknown_agent_fails() {
        let manager = ConversationManager::new_memory(&small_config());
        let err = manager.append("ghost", Message::user("x")).await.unwrap_err();
        assert!(matches!(err, MeshError::Session(_)));
    }

    #[tokio::test]
    async fn test_rollback_removes_turns_of_current_message() {
        let manager = manager_with_turns(3).await;
        assert_eq!(manager.begin_message("a").await, 4);
        manager.append("a", Message::user("new")).await.unwrap();
        manager.append("a", Message::assistant("reply")).await.unwrap();

        assert_eq!(manager.rollback_message("a").await, 2);
        assert_eq!(manager.len("a").await, 4);
        // The point is consumed.
        assert_eq!(manager.rollback_message("a").await, 0);

        manager.begin_message("a").await;
        manager.append("a", Message::user("kept")).await.unwrap();
        manager.end_message("a").await;
        assert_eq!(manager.rollback_message("a").await, 0);
        assert_eq!(manager.len("a").await, 5);
    }

    #[tokio::test]
    async fn test_compress_keeps_current_message_and_moves_rollback_point() {
        let manager = manager_with_turns(20).await;
        manager.begin_message("a").await;
        manager.append("a", Message::user("in flight")).await.unwrap();
        manager.append("a", Message::assistant("calling tool")).await.unwrap();
        manager.append("a", Message::tool_result("c1", "ok")).await.unwrap();

        // keep_recent smaller than the message's own turns is widened.
        let report = manager.compress("a", "old stuff", Some(1)).await.unwrap();
        assert!(report.compressed);
        let history = manager.snapshot("a").await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[2].content, "in flight");

        assert_eq!(manager.rollback_message("a").await, 3);
        let history = manager.snapshot("a").await;
        assert_eq!(history.len(), 2);
        assert!(history[1].content.starts_with("[history summary]"));
    }

    #[tokio::test]
    async fn test_context_status_from_usage() {
        let manager = manager_with_turns(1).await;
        assert_eq!(manager.get_context_status("a").await.level, ContextLevel::Normal);

        manager.update_token_usage("a", Usage::new(700, 10)).await;
        let status = manager.get_context_status("a").await;
        assert_eq!(status.level, ContextLevel::Warning);
        assert_eq!(status.prompt_tokens, 700);
    }

    #[tokio::test]
    async fn test_compress_noop_when_short() {
        let manager = manager_with_turns(3).await;
        let report = manager.compress("a", "summary", None).await.unwrap();
        assert_eq!(
            report,
            CompressReport {
                compressed: false,
                original_count: 4,
                new_count: 4
            }
        );
    }

    #[tokio::test]
    async fn test_compress_replaces_history_and_clears_usage() {
        let manager = manager_with_turns(8).await;
        manager.update_token_usage("a", Usage::new(900, 10)).await;

        let report = manager.compress("a", "the gist", None).await.unwrap();
        assert!(report.compressed);
        assert_eq!(report.original_count, 9);
        assert_eq!(report.new_count, 5);

        let turns = manager.snapshot("a").await;
        assert_eq!(turns[0].content, "sys");
        assert_eq!(turns[1].content, "[history summary] the gist");
        assert_eq!(turns[4].content, "turn 7");
        assert!(manager.get_token_usage("a").await.is_none());
    }

    #[tokio::test]
    async fn test_check_and_warn_turn_ceiling() {
        let manager = manager_with_turns(4).await;
        assert!(manager.check_and_warn("a").await.is_none());
        manager.append("a", Message::user("one more")).await.unwrap();
        let warning = manager.check_and_warn("a").await.unwrap();
        assert!(warning.contains("6 turns"));
        assert!(manager
            .build_context_status_prompt("a")
            .await
            .contains("compress_context"));
    }

    #[tokio::test]
    async fn test_flush_and_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations");
        {
            let manager = ConversationManager::with_path(&small_config(), path.clone()).unwrap();
            manager.ensure("team/lead", "sys").await;
            manager.append("team/lead", Message::user("hello")).await.unwrap();
            assert_eq!(manager.flush_all().await.unwrap(), 1);
        }
        assert!(path.join("team%2Flead.json").exists());

        let manager = ConversationManager::with_path(&small_config(), path).unwrap();
        assert_eq!(manager.load_all().await.unwrap(), 1);
        assert_eq!(manager.len("team/lead").await, 2);
    }

    #[tokio::test]
    async fn test_load_all_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let manager =
            ConversationManager::with_path(&small_config(), dir.path().to_path_buf()).unwrap();
        assert_eq!(manager.load_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConversationManager::with_path(&small_config(), dir.path().to_path_buf()).unwrap();
        manager.ensure("a", "sys").await;
        manager.flush("a").await.unwrap();
        assert!(dir.path().join("a.json").exists());

        manager.remove("a").await.unwrap();
        assert!(!dir.path().join("a.json").exists());
        assert!(!manager.contains("a").await);
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("simple"), "simple");
        assert_eq!(sanitize_key("a:b/c"), "a%3Ab%2Fc");
        assert_eq!(sanitize_key("100%"), "100%25");
    }
}
