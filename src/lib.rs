//! finchat: the MCP plumbing behind the finance chat assistant.
//!
//! Runs a MongoDB MCP server as a child process, correlates JSON-RPC
//! traffic with it and exposes the tool calls and console activity to the
//! chat UI over HTTP.

pub mod api;
pub mod config;
pub mod logging;
pub mod mcp;
pub mod storage;
