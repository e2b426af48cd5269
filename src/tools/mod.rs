//! Tools module - tool definitions and execution for LLM function calling
//!
//! # Overview
//!
//! - `Tool` trait: the interface individual tools implement
//! - `ToolExecutor` trait: the boundary the tool-call loop dispatches through
//! - `ToolContext`: execution context (calling agent, task, runtime handle)
//! - `ToolRegistry`: name-indexed set of tools; the default executor
//!
//! # Built-in Tools
//!
//! - `send_message`: message another agent or an external recipient
//! - `spawn_agent`: create a child agent
//! - `compress_context`: summarize older history
//! - `wait_for_message`: yield until the next message
//!
//! Business tools (artifact stores, role lookup, prompt composition) are
//! outside this crate; register them with [`ToolRegistry::register`] or
//! supply a custom [`ToolExecutor`].

pub mod builtin;
mod registry;
mod types;

pub use builtin::{CompressContextTool, SendMessageTool, SpawnAgentTool, WaitForMessageTool};
pub use registry::ToolRegistry;
pub use types::{Tool, ToolContext, ToolExecutor, ToolOutput};
