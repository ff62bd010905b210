//! MCP server surface for the persistent Python session.
//!
//! This crate exposes a handler layer (`handler::McpHandler`) that owns one
//! [`pyrepl::ReplSession`] and maps MCP tool calls onto it: `execute_python`
//! runs snippets against the persistent namespace, `list_variables` inspects
//! it, and `install_package` extends the available package set at runtime.
//! Every tool answers with a single text content block carrying a JSON
//! document (the reset confirmation, which is plain prose, excepted).

pub mod handler;
