//! MCP Manager - owns the server process and everything observed through it.
//!
//! One manager is one server lifetime. Restarting means building a new
//! manager (see `McpCoordinator`), so cached tools and counters never outlive
//! the process they came from.

use super::console::{ConsoleLog, ConsoleLogSummary, LogCategory};
use super::coordinator::Lifecycle;
use super::correlator::{RequestCorrelator, pump};
use super::error::{McpError, McpResult};
use super::process::{FrameSink, ProcessHandle};
use super::protocol::{
    InitializeParams, InitializeResult, McpToolDef, ToolCallParams, ToolsListResult,
};
use super::tracker::{ToolCallOutcome, ToolCallSummary, ToolCallTracker};
use crate::config::McpConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Cap on the recent-entry count reported by the health snapshot
const HEALTH_RECENT_LOGS: usize = 10;

/// A live connection: the process and the correlator writing to it
struct Session {
    process: Arc<ProcessHandle>,
    correlator: Arc<RequestCorrelator>,
    /// Set before a deliberate kill so the exit is not reported as a crash
    stopping: Arc<AtomicBool>,
}

impl Session {
    async fn stop(&self) {
        crate::logging::info(&format!("Stopping MCP server '{}'", self.process.command()));
        self.stopping.store(true, Ordering::SeqCst);
        self.process.kill().await;
    }
}

pub struct McpManager {
    config: McpConfig,
    console: Arc<ConsoleLog>,
    tracker: ToolCallTracker,
    tools: RwLock<Vec<McpToolDef>>,
    session: RwLock<Option<Arc<Session>>>,
    initialized: AtomicBool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthToolCalls {
    pub total: u64,
    pub recent: usize,
    pub completed: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConsoleLogs {
    pub total: usize,
    pub recent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub mcp_server: String,
    pub available_tools: usize,
    pub tool_calls: HealthToolCalls,
    pub console_logs: HealthConsoleLogs,
    /// Seconds since the server process was spawned
    pub uptime: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HealthSnapshot {
    /// Shape reported when no manager could be obtained
    pub fn unavailable(note: impl Into<String>) -> Self {
        Self {
            status: "unavailable".to_string(),
            timestamp: Utc::now(),
            mcp_server: "not available".to_string(),
            available_tools: 0,
            tool_calls: HealthToolCalls {
                total: 0,
                recent: 0,
                completed: 0,
                error: 0,
            },
            console_logs: HealthConsoleLogs {
                total: 0,
                recent: 0,
            },
            uptime: 0.0,
            note: Some(note.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub health: HealthSnapshot,
    pub tool_calls: ToolCallSummary,
    pub console_logs: ConsoleLogSummary,
    pub available_tools: Vec<McpToolDef>,
}

impl McpManager {
    pub fn new(config: McpConfig) -> Self {
        let console = Arc::new(ConsoleLog::new());
        Self {
            config,
            tracker: ToolCallTracker::new(Arc::clone(&console)),
            console,
            tools: RwLock::new(Vec::new()),
            session: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_session(&self) -> Option<Arc<Session>> {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawn the server, run the handshake and load the tool list.
    ///
    /// Calling this again tears down the previous process first.
    pub async fn initialize(&self) -> McpResult<()> {
        if let Some(previous) = self.take_session() {
            previous.stop().await;
        }
        self.initialized.store(false, Ordering::SeqCst);
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.clear_history();

        let spec = self.config.process_spec().ok_or_else(|| {
            McpError::Initialization("MCP configuration not found".to_string())
        })?;

        crate::logging::info(&format!("Starting MCP server: {}", spec.command));
        let (process, output) = ProcessHandle::spawn(&spec)?;
        let process = Arc::new(process);
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&process) as Arc<dyn FrameSink>,
            Arc::clone(&self.console),
        ));

        tokio::spawn(pump(
            output.stdout,
            correlator.router(),
            self.config.fail_pending_on_exit,
        ));
        tokio::spawn(async move {
            let mut lines = BufReader::new(output.stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                crate::logging::server_stderr(&line);
            }
        });
        let stopping = Arc::new(AtomicBool::new(false));
        let console = Arc::clone(&self.console);
        let exited = process.on_exit();
        let deliberate = Arc::clone(&stopping);
        tokio::spawn(async move {
            let code = exited.await;
            if deliberate.load(Ordering::SeqCst) {
                return;
            }
            let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
            console.append(
                LogCategory::Error,
                format!("MCP Server process exited with code {}", code),
                None,
            );
        });

        let session = Arc::new(Session {
            process,
            correlator,
            stopping,
        });
        *self.session.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&session));

        if let Err(e) = self.start_session(&session).await {
            crate::logging::error(&format!("MCP server failed to initialize: {}", e));
            self.take_session();
            session.stop().await;
            return Err(e.into_initialization());
        }

        self.initialized.store(true, Ordering::SeqCst);
        let count = self.tool_count();
        self.console.append(
            LogCategory::Lifecycle,
            format!("MCP Server initialized with {} tools", count),
            None,
        );
        Ok(())
    }

    async fn start_session(&self, session: &Session) -> McpResult<()> {
        let deadline = self.config.list_timeout();

        if self.config.handshake {
            let params = serde_json::to_value(InitializeParams::finchat())?;
            let result = session
                .correlator
                .send("initialize", params, deadline)
                .await?;
            match serde_json::from_value::<InitializeResult>(result) {
                Ok(info) => {
                    let server = info
                        .server_info
                        .map(|s| format!("{} {}", s.name, s.version.unwrap_or_default()))
                        .unwrap_or_else(|| "unnamed server".to_string());
                    crate::logging::info(&format!(
                        "MCP server ready: {} (protocol {})",
                        server.trim(),
                        info.protocol_version.as_deref().unwrap_or("unknown")
                    ))
                }
                Err(e) => crate::logging::warn(&format!(
                    "Unexpected initialize result from MCP server: {}",
                    e
                )),
            }
            session
                .correlator
                .notify("notifications/initialized", None)
                .await?;
        }

        let result = session
            .correlator
            .send("tools/list", json!({}), deadline)
            .await?;
        let listed: ToolsListResult = serde_json::from_value(result)?;
        let names: Vec<&str> = listed.tools.iter().map(|t| t.name.as_str()).collect();
        crate::logging::info(&format!("Available tools: {:?}", names));
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = listed.tools;
        Ok(())
    }

    /// Invoke a server tool, recording the call in the tracker and console.
    pub async fn call_tool(&self, name: &str, params: Value) -> McpResult<Value> {
        let call = self.tracker.track(name, params.clone());

        let session = match self.current_session() {
            Some(session) if session.process.is_running() => session,
            _ => {
                let err = McpError::NotRunning;
                self.tracker
                    .update(call.id, ToolCallOutcome::error(err.to_string()));
                return Err(err);
            }
        };

        let request_params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments: params,
        })?;
        self.console.append(
            LogCategory::Outbound,
            "Sending MCP request:",
            Some(json!({ "method": "tools/call", "params": request_params.clone() })),
        );

        match session
            .correlator
            .send("tools/call", request_params, self.config.tool_timeout())
            .await
        {
            Ok(result) => {
                self.console.append(
                    LogCategory::Inbound,
                    "MCP result received:",
                    Some(result.clone()),
                );
                self.tracker
                    .update(call.id, ToolCallOutcome::Completed(result.clone()));
                Ok(result)
            }
            Err(e) => {
                let detail = match &e {
                    McpError::ToolInvocation { code, message } => {
                        json!({ "code": code, "message": message })
                    }
                    other => Value::String(other.to_string()),
                };
                self.tracker.update(call.id, ToolCallOutcome::Error(detail));
                Err(e)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.current_session()
            .is_some_and(|session| session.process.is_running())
    }

    pub fn tools(&self) -> Vec<McpToolDef> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn console(&self) -> &Arc<ConsoleLog> {
        &self.console
    }

    pub fn tool_calls(&self) -> ToolCallSummary {
        self.tracker.summary()
    }

    pub fn console_logs(&self) -> ConsoleLogSummary {
        self.console.summary()
    }

    pub fn health(&self) -> HealthSnapshot {
        let calls = self.tracker.summary();
        let session = self.current_session();
        let running = session
            .as_ref()
            .is_some_and(|session| session.process.is_running());
        let uptime = session
            .as_ref()
            .map(|session| session.process.uptime().as_secs_f64())
            .unwrap_or(0.0);

        HealthSnapshot {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            mcp_server: if running { "running" } else { "not running" }.to_string(),
            available_tools: self.tool_count(),
            tool_calls: HealthToolCalls {
                total: calls.total_calls,
                recent: calls.recent_calls.len(),
                completed: calls.stats.completed,
                error: calls.stats.error,
            },
            console_logs: HealthConsoleLogs {
                total: self.console.len(),
                recent: self.console.len().min(HEALTH_RECENT_LOGS),
            },
            uptime,
            note: None,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            health: self.health(),
            tool_calls: self.tracker.summary(),
            console_logs: self.console.summary(),
            available_tools: self.tools(),
        }
    }

    /// Forget tool call history and console entries. The process, the tool
    /// list and the request id sequence are untouched.
    pub fn clear_history(&self) {
        self.tracker.clear();
        self.console.clear();
    }

    /// Stop the server process. Idempotent.
    pub async fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        if let Some(session) = self.take_session() {
            session.stop().await;
        }
    }
}

#[async_trait]
impl Lifecycle for McpManager {
    async fn initialize(&self) -> McpResult<()> {
        McpManager::initialize(self).await
    }

    async fn shutdown(&self) {
        McpManager::shutdown(self).await
    }
}
