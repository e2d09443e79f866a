//! Bounded console log shown next to the chat
//!
//! Each entry carries an explicit category. The message text still starts
//! with the category glyph because the UI renders and filters on it, but the
//! statistics are counted from the stored category, not by scanning text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const CONSOLE_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// Request written to the server
    Outbound,
    /// Response read from the server
    Inbound,
    Notification,
    Warning,
    Error,
    Success,
    /// A tool call was submitted
    Tool,
    /// Process start/stop, resets
    Lifecycle,
}

impl LogCategory {
    pub fn glyph(&self) -> &'static str {
        match self {
            LogCategory::Outbound => "📤",
            LogCategory::Inbound => "📥",
            LogCategory::Notification => "📢",
            LogCategory::Warning => "⚠️",
            LogCategory::Error => "❌",
            LogCategory::Success => "✅",
            LogCategory::Tool => "🔧",
            LogCategory::Lifecycle => "🚀",
        }
    }

    pub fn counts_as_info(&self) -> bool {
        matches!(self, LogCategory::Outbound | LogCategory::Inbound)
    }

    pub fn counts_as_error(&self) -> bool {
        matches!(self, LogCategory::Warning | LogCategory::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    pub category: LogCategory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLogStats {
    pub info: usize,
    pub notifications: usize,
    pub errors: usize,
    pub success: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogSummary {
    pub logs: Vec<ConsoleLogEntry>,
    pub total_logs: usize,
    pub stats: ConsoleLogStats,
}

pub struct ConsoleLog {
    entries: Mutex<VecDeque<ConsoleLogEntry>>,
    capacity: usize,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::with_capacity(CONSOLE_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<ConsoleLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry, evicting the oldest past capacity. Mirrored to the
    /// file log.
    pub fn append(&self, category: LogCategory, message: impl AsRef<str>, data: Option<Value>) {
        let message = format!("{} {}", category.glyph(), message.as_ref());

        let line = match &data {
            Some(data) => format!("{} {}", message, data),
            None => message.clone(),
        };
        match category {
            LogCategory::Error => crate::logging::error(&line),
            LogCategory::Warning => crate::logging::warn(&line),
            _ => crate::logging::info(&line),
        }

        let mut entries = self.entries();
        entries.push_back(ConsoleLogEntry {
            timestamp: Utc::now(),
            message,
            data,
            category,
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// The last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<ConsoleLogEntry> {
        let entries = self.entries();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> ConsoleLogStats {
        stats_for(self.entries().iter())
    }

    pub fn summary(&self) -> ConsoleLogSummary {
        let logs: Vec<ConsoleLogEntry> = self.entries().iter().cloned().collect();
        ConsoleLogSummary {
            total_logs: logs.len(),
            stats: stats_for(logs.iter()),
            logs,
        }
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

fn stats_for<'a>(entries: impl Iterator<Item = &'a ConsoleLogEntry>) -> ConsoleLogStats {
    let mut stats = ConsoleLogStats::default();
    for entry in entries {
        let category = entry.category;
        if category.counts_as_info() {
            stats.info += 1;
        }
        if category == LogCategory::Notification {
            stats.notifications += 1;
        }
        if category.counts_as_error() {
            stats.errors += 1;
        }
        if category == LogCategory::Success {
            stats.success += 1;
        }
    }
    stats
}
