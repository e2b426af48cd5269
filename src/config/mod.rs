//! Configuration management for AgentMesh
//!
//! This module provides configuration loading and saving.
//! Configuration is loaded from `~/.agentmesh/config.json` with environment variable overrides.

mod types;
pub mod validate;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the AgentMesh configuration directory path (~/.agentmesh)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentmesh")
    }

    /// Returns the path to the config file (~/.agentmesh/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `AGENTMESH_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Save configuration to a specific path as pretty-printed JSON.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges and cross-field constraints.
    ///
    /// Returns one human-readable line per problem.
    pub fn validate(&self) -> Vec<String> {
        validate::validate_semantics(self)
            .into_iter()
            .map(|d| format!("{}: {}", d.path, d.message))
            .collect()
    }

    /// Resolved storage directory, with `~` expanded.
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage.dir.as_deref().map(expand_home)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: AGENTMESH_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AGENTMESH_LLM_MODEL") {
            self.llm.model = val;
        }
        if let Ok(val) = std::env::var("AGENTMESH_LLM_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.llm.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("AGENTMESH_LLM_MAX_CONCURRENT_REQUESTS") {
            if let Ok(v) = val.parse() {
                self.llm.max_concurrent_requests = v;
            }
        }
        if let Ok(val) = std::env::var("AGENTMESH_AGENTS_MAX_TOOL_ROUNDS") {
            if let Ok(v) = val.parse() {
                self.agents.max_tool_rounds = v;
            }
        }
        if let Ok(val) = std::env::var("AGENTMESH_CONTEXT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.context.max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("AGENTMESH_STORAGE_DIR") {
            self.storage.dir = Some(val);
        }
        if let Ok(val) = std::env::var("AGENTMESH_LOG_LEVEL") {
            self.logging.level = val;
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.llm.max_retries, 3);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.agents.max_tool_rounds = 7;
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.agents.max_tool_rounds, 7);
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = Config::default();
        config.agents.max_tool_rounds = 0;
        let problems = config.validate();
        assert_eq!(problems, vec!["agents.max_tool_rounds: must be at least 1".to_string()]);
    }

    #[test]
    fn test_expand_home_plain_path() {
        assert_eq!(expand_home("/var/lib/mesh"), PathBuf::from("/var/lib/mesh"));
    }

    #[test]
    fn test_storage_path_none_by_default() {
        assert!(Config::default().storage_path().is_none());
    }
}
