//! Tool call history for the status panel

use super::console::{ConsoleLog, LogCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const TOOL_CALL_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Executing,
    Completed,
    Error,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ToolCallStatus::Executing)
    }
}

/// How a call ended; the payload lands in `result` or `error` accordingly.
#[derive(Debug, Clone)]
pub enum ToolCallOutcome {
    Completed(Value),
    Error(Value),
}

impl ToolCallOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        ToolCallOutcome::Error(Value::String(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub params: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallStats {
    pub completed: usize,
    pub executing: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSummary {
    pub total_calls: u64,
    pub recent_calls: Vec<ToolCallRecord>,
    pub stats: ToolCallStats,
}

#[derive(Default)]
struct TrackerState {
    /// Calls since the last clear
    total: u64,
    /// Last id handed out; never reset, so a stale update cannot land on a newer record
    last_id: u64,
    history: VecDeque<ToolCallRecord>,
}

pub struct ToolCallTracker {
    state: Mutex<TrackerState>,
    capacity: usize,
    console: Arc<ConsoleLog>,
}

impl ToolCallTracker {
    pub fn new(console: Arc<ConsoleLog>) -> Self {
        Self::with_capacity(console, TOOL_CALL_HISTORY_CAPACITY)
    }

    pub fn with_capacity(console: Arc<ConsoleLog>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            capacity,
            console,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new call in `executing` state and return a copy of it.
    pub fn track(&self, tool: &str, params: Value) -> ToolCallRecord {
        let record = {
            let mut state = self.state();
            state.total += 1;
            state.last_id += 1;
            let record = ToolCallRecord {
                id: state.last_id,
                timestamp: Utc::now(),
                tool: tool.to_string(),
                params,
                status: ToolCallStatus::Executing,
                result: None,
                error: None,
                completed_at: None,
            };
            state.history.push_back(record.clone());
            while state.history.len() > self.capacity {
                state.history.pop_front();
            }
            record
        };

        self.console.append(
            LogCategory::Tool,
            format!("MCP Tool Call #{}: {}", record.id, record.tool),
            Some(record.params.clone()),
        );
        record
    }

    /// Move a call to its terminal state. Unknown ids (evicted or from before
    /// a clear) and calls already finished are left alone; returns whether the
    /// record changed.
    pub fn update(&self, id: u64, outcome: ToolCallOutcome) -> bool {
        {
            let mut state = self.state();
            let Some(record) = state.history.iter_mut().find(|r| r.id == id) else {
                return false;
            };
            if record.status.is_terminal() {
                crate::logging::debug(&format!(
                    "Ignoring status update for finished tool call #{}",
                    id
                ));
                return false;
            }
            record.completed_at = Some(Utc::now());
            match &outcome {
                ToolCallOutcome::Completed(result) => {
                    record.status = ToolCallStatus::Completed;
                    record.result = Some(result.clone());
                }
                ToolCallOutcome::Error(error) => {
                    record.status = ToolCallStatus::Error;
                    record.error = Some(error.clone());
                }
            }
        }

        match outcome {
            ToolCallOutcome::Completed(_) => self.console.append(
                LogCategory::Success,
                format!("Tool Call #{} completed successfully", id),
                None,
            ),
            ToolCallOutcome::Error(error) => self.console.append(
                LogCategory::Error,
                format!("Tool Call #{} failed:", id),
                Some(error),
            ),
        }
        true
    }

    pub fn get(&self, id: u64) -> Option<ToolCallRecord> {
        self.state().history.iter().find(|r| r.id == id).cloned()
    }

    pub fn total_calls(&self) -> u64 {
        self.state().total
    }

    pub fn stats(&self) -> ToolCallStats {
        stats_for(&self.state().history)
    }

    pub fn summary(&self) -> ToolCallSummary {
        let state = self.state();
        ToolCallSummary {
            total_calls: state.total,
            recent_calls: state.history.iter().cloned().collect(),
            stats: stats_for(&state.history),
        }
    }

    /// Drop the history and restart the call count. Ids keep counting up.
    pub fn clear(&self) {
        let mut state = self.state();
        state.total = 0;
        state.history.clear();
    }
}

fn stats_for(history: &VecDeque<ToolCallRecord>) -> ToolCallStats {
    let mut stats = ToolCallStats::default();
    for record in history {
        match record.status {
            ToolCallStatus::Completed => stats.completed += 1,
            ToolCallStatus::Executing => stats.executing += 1,
            ToolCallStatus::Error => stats.error += 1,
        }
    }
    stats
}
