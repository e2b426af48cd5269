//! Config command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use agentmesh::config::validate::{validate_config, validate_semantics, DiagnosticLevel};
use agentmesh::config::Config;

use super::ConfigAction;

pub(crate) fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => cmd_check(config_path),
        ConfigAction::Show => {
            let config = Config::load_from_path(config_path)
                .with_context(|| format!("Failed to load config {}", config_path.display()))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Validate configuration file.
fn cmd_check(config_path: &Path) -> Result<()> {
    println!("Config file: {}", config_path.display());

    if !config_path.exists() {
        println!("[OK] No config file found (using defaults)");
        return Ok(());
    }

    let content = std::fs::read_to_string(config_path).context("Failed to read config file")?;

    let raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            println!("[ERROR] Invalid JSON: {}", e);
            std::process::exit(1);
        }
    };

    let mut diagnostics = validate_config(&raw);
    match serde_json::from_value::<Config>(raw) {
        Ok(config) => diagnostics.extend(validate_semantics(&config)),
        Err(e) => println!("[ERROR] Config does not match the expected shape: {}", e),
    }
    for diag in &diagnostics {
        println!("{}", diag);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count();
    let warnings = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Warn)
        .count();

    if errors == 0 && warnings == 0 {
        println!("\nConfiguration looks good!");
    } else {
        println!("\nFound {} error(s), {} warning(s)", errors, warnings);
    }
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
