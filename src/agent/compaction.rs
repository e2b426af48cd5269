//! History compaction for agent conversations.
//!
//! Pure functions over `Vec<Message>`. The agent writes its own summary
//! (through the `compress_context` tool); these helpers only splice it in.

use crate::session::{Message, Role};

/// Prefix of the synthetic turn that replaces compressed history.
pub const SUMMARY_PREFIX: &str = "[history summary]";

/// Replace everything between the system turn and the `keep_recent` most
/// recent turns with a single summary turn.
///
/// Returns `None` when the history already fits in `keep_recent + 1` turns.
/// Otherwise the result is always `[system, summary, ..last keep_recent]`.
///
/// # Examples
/// ```
/// use agentmesh::session::Message;
/// use agentmesh::agent::compaction::summarize_history;
///
/// let msgs = vec![
///     Message::system("You are helpful."),
///     Message::user("Tell me about Rust"),
///     Message::assistant("Rust is a systems language..."),
///     Message::user("What about async?"),
///     Message::assistant("Async in Rust uses tokio..."),
/// ];
/// let result = summarize_history(&msgs, 2, "User asked about Rust and async.").unwrap();
/// assert_eq!(result.len(), 4); // system + summary + 2 recent
/// assert!(summarize_history(&result, 3, "again").is_none());
/// ```
pub fn summarize_history(
    messages: &[Message],
    keep_recent: usize,
    summary: &str,
) -> Option<Vec<Message>> {
    if messages.len() <= keep_recent + 1 {
        return None;
    }

    let system = match messages.first() {
        Some(first) if first.role == Role::System => first.clone(),
        _ => Message::system(""),
    };

    let tail_start = messages.len() - keep_recent;
    let mut result = Vec::with_capacity(keep_recent + 2);
    result.push(system);
    result.push(summary_turn(summary));
    result.extend_from_slice(&messages[tail_start..]);
    Some(result)
}

/// The synthetic turn that stands in for compressed history.
pub fn summary_turn(summary: &str) -> Message {
    Message::system(&format!("{} {}", SUMMARY_PREFIX, summary.trim()))
}

/// Whether a turn was produced by [`summary_turn`].
pub fn is_summary_turn(message: &Message) -> bool {
    message.role == Role::System && message.content.starts_with(SUMMARY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(turns: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys")];
        for i in 0..turns {
            msgs.push(Message::user(&format!("turn {}", i)));
        }
        msgs
    }

    #[test]
    fn test_noop_when_history_fits() {
        assert!(summarize_history(&history(10), 10, "s").is_none());
        assert!(summarize_history(&history(3), 10, "s").is_none());
    }

    #[test]
    fn test_compresses_to_keep_plus_two() {
        let msgs = history(11);
        let result = summarize_history(&msgs, 10, "earlier turns").unwrap();
        assert_eq!(result.len(), 12);
        assert_eq!(result[0].content, "sys");
        assert!(is_summary_turn(&result[1]));
        assert_eq!(result[1].content, "[history summary] earlier turns");
        assert_eq!(result[2].content, "turn 1");
        assert_eq!(result[11].content, "turn 10");
    }

    #[test]
    fn test_keep_zero() {
        let result = summarize_history(&history(4), 0, "all of it").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, Role::System);
        assert!(is_summary_turn(&result[1]));
    }

    #[test]
    fn test_repeated_compression_keeps_system_turn() {
        let once = summarize_history(&history(20), 5, "first").unwrap();
        let mut grown = once.clone();
        for i in 0..10 {
            grown.push(Message::assistant(&format!("more {}", i)));
        }
        let twice = summarize_history(&grown, 5, "second").unwrap();
        assert_eq!(twice[0].content, "sys");
        assert_eq!(twice[1].content, "[history summary] second");
        assert_eq!(twice.len(), 7);
    }

    #[test]
    fn test_summary_turn_detection() {
        assert!(!is_summary_turn(&Message::system("plain")));
        assert!(!is_summary_turn(&Message::user("[history summary] fake")));
    }
}
