//! Logging infrastructure for finchat
//!
//! Logs to ~/.finchat/logs/ with one file per day. Debug lines are only
//! written when tracing is on (`--trace` or `FINCHAT_TRACE`).

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);
static TRACE: AtomicBool = AtomicBool::new(false);
static CONTEXT: Mutex<Option<String>> = Mutex::new(None);

/// Label prefixed to every line, e.g. the CLI command being run
pub fn set_context(label: &str) {
    if let Ok(mut ctx) = CONTEXT.lock() {
        *ctx = Some(label.to_string());
    }
}

fn context_prefix() -> String {
    match CONTEXT.lock().ok().and_then(|ctx| ctx.clone()) {
        Some(label) => format!("[{}] ", label),
        None => String::new(),
    }
}

pub struct Logger {
    file: File,
    path: PathBuf,
}

impl Logger {
    fn new() -> Option<Self> {
        let log_dir = log_dir()?;
        crate::storage::ensure_dir(&log_dir).ok()?;

        let path = log_dir.join(log_file_name());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;

        Some(Self { file, path })
    }

    fn write(&mut self, level: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let ctx = context_prefix();
        let line = format!("[{}] [{}] {}{}\n", timestamp, level, ctx, message);
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.flush();
    }
}

fn log_dir() -> Option<PathBuf> {
    crate::storage::finchat_dir().ok().map(|dir| dir.join("logs"))
}

fn log_file_name() -> String {
    format!("finchat-{}.log", Local::now().format("%Y-%m-%d"))
}

/// Initialize the logger (call once at startup)
pub fn init() {
    let Ok(mut guard) = LOGGER.lock() else {
        return;
    };
    if guard.is_none() {
        *guard = Logger::new();
    }
    if std::env::var("FINCHAT_TRACE").is_ok() {
        TRACE.store(true, Ordering::Relaxed);
    }
}

/// Turn debug output on or off for the rest of the process
pub fn set_trace(enabled: bool) {
    TRACE.store(enabled, Ordering::Relaxed);
}

pub fn trace_enabled() -> bool {
    TRACE.load(Ordering::Relaxed)
}

fn write(level: &str, message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write(level, message);
        }
    }
}

/// Log an info message
pub fn info(message: &str) {
    write("INFO", message);
}

/// Log an error message
pub fn error(message: &str) {
    write("ERROR", message);
}

/// Log a warning message
pub fn warn(message: &str) {
    write("WARN", message);
}

/// Log a debug message (only when tracing)
pub fn debug(message: &str) {
    if trace_enabled() {
        write("DEBUG", message);
    }
}

/// One line of the MCP server's stderr
pub fn server_stderr(line: &str) {
    write("WARN", &format!("[mcp stderr] {}", truncate(line, 2000)));
}

/// Get path to the active log file
pub fn log_path() -> Option<PathBuf> {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            return Some(logger.path.clone());
        }
    }
    Some(log_dir()?.join(log_file_name()))
}

/// Clean up old logs (keep last 7 days)
pub fn cleanup_old_logs() {
    let Some(log_dir) = log_dir() else {
        return;
    };
    let Ok(entries) = fs::read_dir(&log_dir) else {
        return;
    };
    let cutoff = Local::now() - chrono::Duration::days(7);
    for entry in entries.flatten() {
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified: chrono::DateTime<Local> = modified.into();
                if modified < cutoff {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
