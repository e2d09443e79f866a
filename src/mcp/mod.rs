//! MCP (Model Context Protocol) client implementation
//!
//! Runs one MCP server as a child process and talks JSON-RPC 2.0 to it over
//! stdio, one JSON document per line.

mod console;
mod coordinator;
mod correlator;
mod error;
mod framing;
mod manager;
mod market;
mod process;
mod protocol;
mod tool;
mod tracker;

pub use console::{
    CONSOLE_LOG_CAPACITY, ConsoleLog, ConsoleLogEntry, ConsoleLogStats, ConsoleLogSummary,
    LogCategory,
};
pub use coordinator::{Lifecycle, McpCoordinator};
pub use correlator::{FrameRouter, RequestCorrelator, pump};
pub use error::{McpError, McpResult};
pub use framing::{Frame, FrameReassembler, MalformedFrame};
pub use manager::{HealthConsoleLogs, HealthSnapshot, HealthToolCalls, McpManager, StatusSnapshot};
pub use market::{
    AggregateInput, AssetClass, CRYPTO_ASSETS, FindInput, ListCollectionsTool, MARKET_DATABASE,
    MarketAggregateTool, MarketFindTool, MarketToolError, STOCK_ASSETS, aggregate_params,
    find_params, market_tools,
};
pub use process::{FrameSink, PipeWriter, ProcessHandle, ProcessOutput, ProcessSpec};
pub use protocol::*;
pub use tool::{McpTool, Tool, ToolDefinition, ToolOutput, create_mcp_tools};
pub use tracker::{
    TOOL_CALL_HISTORY_CAPACITY, ToolCallOutcome, ToolCallRecord, ToolCallStats, ToolCallStatus,
    ToolCallSummary, ToolCallTracker,
};
