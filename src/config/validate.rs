//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

use super::Config;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &["llm", "agents", "context", "scheduler", "storage", "logging"];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    (
        "llm",
        &[
            "model",
            "max_tokens",
            "temperature",
            "max_retries",
            "base_delay_ms",
            "max_concurrent_requests",
        ],
    ),
    (
        "agents",
        &["max_tool_rounds", "intent_detection", "external_recipients"],
    ),
    (
        "context",
        &[
            "max_tokens",
            "warning_threshold",
            "critical_threshold",
            "hard_limit_threshold",
            "keep_recent",
            "max_turns",
        ],
    ),
    (
        "scheduler",
        &[
            "idle_wait_ms",
            "busy_backoff_ms",
            "drain_timeout_secs",
            "idle_ticks_to_complete",
            "max_steps",
        ],
    ),
    ("storage", &["dir"]),
    ("logging", &["format", "level", "file"]),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut matrix = vec![vec![0usize; b.len() + 1]; a.len() + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in matrix[0].iter_mut().enumerate() {
        *val = j;
    }

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            matrix[i + 1][j + 1] = std::cmp::min(
                std::cmp::min(matrix[i][j + 1] + 1, matrix[i + 1][j] + 1),
                matrix[i][j] + cost,
            );
        }
    }
    matrix[a.len()][b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic::error(path, message)
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::error("", "Config must be a JSON object"));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Ok,
        path: String::new(),
        message: "Valid JSON".to_string(),
    });

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key.clone(), key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, known) in KNOWN_SECTIONS {
        let Some(fields) = obj.get(*section).and_then(|v| v.as_object()) else {
            continue;
        };
        for key in fields.keys() {
            if !known.contains(&key.as_str()) {
                has_unknown = true;
                diagnostics.push(unknown_field(format!("{}.{}", section, key), key, known));
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: "All fields recognized".to_string(),
        });
    }

    diagnostics
}

/// Check value ranges and cross-field constraints of a parsed config.
///
/// Returns one diagnostic per problem; an empty list means the config is usable.
pub fn validate_semantics(config: &Config) -> Vec<Diagnostic> {
    let mut problems = Vec::new();

    let ctx = &config.context;
    let thresholds = [
        ("context.warning_threshold", ctx.warning_threshold),
        ("context.critical_threshold", ctx.critical_threshold),
        ("context.hard_limit_threshold", ctx.hard_limit_threshold),
    ];
    for (path, value) in thresholds {
        if !(value > 0.0 && value <= 1.0) {
            problems.push(Diagnostic::error(path, format!("{} is outside (0, 1]", value)));
        }
    }
    if !(ctx.warning_threshold < ctx.critical_threshold
        && ctx.critical_threshold < ctx.hard_limit_threshold)
    {
        problems.push(Diagnostic::error(
            "context",
            "thresholds must be ascending: warning < critical < hard_limit",
        ));
    }
    if ctx.max_tokens == 0 {
        problems.push(Diagnostic::error("context.max_tokens", "must be greater than 0"));
    }
    if config.llm.max_concurrent_requests == 0 {
        problems.push(Diagnostic::error(
            "llm.max_concurrent_requests",
            "must be at least 1",
        ));
    }
    if config.llm.max_retries == 0 {
        problems.push(Diagnostic::error("llm.max_retries", "must be at least 1"));
    }
    if config.agents.max_tool_rounds == 0 {
        problems.push(Diagnostic::error("agents.max_tool_rounds", "must be at least 1"));
    }
    if config.agents.intent_detection.enabled {
        for (i, pattern) in config.agents.intent_detection.patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(Diagnostic::error(
                    format!("agents.intent_detection.patterns[{}]", i),
                    format!("invalid regex: {}", e),
                ));
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("hello", "helo"), 1);
    }

    #[test]
    fn test_suggest_field_close_match() {
        let suggestion = suggest_field("scheduer", KNOWN_TOP_LEVEL);
        assert_eq!(suggestion.as_deref(), Some("did you mean 'scheduler'?"));
    }

    #[test]
    fn test_validate_config_not_object() {
        let diags = validate_config(&json!([1, 2]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
    }

    #[test]
    fn test_validate_config_unknown_nested_field() {
        let diags = validate_config(&json!({"llm": {"max_retry": 3}}));
        let errors: Vec<_> = diags
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "llm.max_retry");
        assert!(errors[0].message.contains("max_retries"));
    }

    #[test]
    fn test_validate_config_all_known() {
        let diags = validate_config(&json!({"context": {"max_tokens": 10}, "storage": {}}));
        assert!(diags.iter().all(|d| d.level == DiagnosticLevel::Ok));
    }

    #[test]
    fn test_validate_semantics_defaults_ok() {
        assert!(validate_semantics(&Config::default()).is_empty());
    }

    #[test]
    fn test_validate_semantics_thresholds_out_of_order() {
        let mut config = Config::default();
        config.context.warning_threshold = 0.95;
        let problems = validate_semantics(&config);
        assert!(problems.iter().any(|p| p.message.contains("ascending")));
    }

    #[test]
    fn test_validate_semantics_zero_budgets() {
        let mut config = Config::default();
        config.llm.max_concurrent_requests = 0;
        config.llm.max_retries = 0;
        let problems = validate_semantics(&config);
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_validate_semantics_bad_regex() {
        let mut config = Config::default();
        config.agents.intent_detection.patterns = vec!["(unclosed".to_string()];
        let problems = validate_semantics(&config);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].path.contains("patterns[0]"));
    }
}
