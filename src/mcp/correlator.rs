//! Request/response correlation over a single stdout stream
//!
//! Every request gets a fresh id and a slot in the pending table before its
//! frame is written, so a fast reply can never be missed. The reader task
//! routes each response to the slot with the same id; notifications go to the
//! console log and never touch a slot. A slot is owned by a
//! [`Subscription`] guard that removes it on every exit path (reply, server
//! error, write failure, timeout, caller dropped), so the table cannot grow
//! with abandoned requests.

use super::console::{ConsoleLog, LogCategory};
use super::error::{McpError, McpResult};
use super::framing::{Frame, FrameReassembler};
use super::process::FrameSink;
use super::protocol::{IncomingFrame, JsonRpcError, JsonRpcRequest, NOTIFICATION_MESSAGE};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

type Reply = Result<Value, JsonRpcError>;

const READ_CHUNK: usize = 8192;
const ERROR_TERMS: [&str; 3] = ["error", "Error", "ERROR"];

#[derive(Default)]
struct PendingTable {
    slots: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    /// Set once the stream ended and pending requests were failed
    closed: AtomicBool,
}

impl PendingTable {
    fn slots(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps one request's slot registered; dropping it deregisters.
struct Subscription {
    id: u64,
    table: Arc<PendingTable>,
}

impl Subscription {
    fn register(table: &Arc<PendingTable>, id: u64) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        // `closed` is read under the slots lock so a concurrent close either
        // drains this slot or is seen here. After close the sender is dropped
        // right away and the receiver reports the exit.
        let mut slots = table.slots();
        if !table.closed.load(Ordering::SeqCst) {
            slots.insert(id, tx);
        }
        drop(slots);
        (
            Self {
                id,
                table: Arc::clone(table),
            },
            rx,
        )
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.table.slots().remove(&self.id);
    }
}

pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    sink: Arc<dyn FrameSink>,
    console: Arc<ConsoleLog>,
}

impl RequestCorrelator {
    pub fn new(sink: Arc<dyn FrameSink>, console: Arc<ConsoleLog>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(PendingTable::default()),
            sink,
            console,
        }
    }

    /// Next request id: 1, 2, 3, ... never reused for this correlator.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Handle for the reader side
    pub fn router(&self) -> FrameRouter {
        FrameRouter {
            pending: Arc::clone(&self.pending),
            console: Arc::clone(&self.console),
        }
    }

    /// Requests currently waiting for a reply
    pub fn in_flight(&self) -> usize {
        self.pending.slots().len()
    }

    /// Send one request and wait for its reply or the deadline.
    pub async fn send(&self, method: &str, params: Value, deadline: Duration) -> McpResult<Value> {
        let id = self.allocate_id();
        let frame = JsonRpcRequest::new(id, method, params).to_frame()?;

        let (_subscription, reply) = Subscription::register(&self.pending, id);
        // The deadline covers the write too: a server that stops reading
        // stdin fills the pipe and would otherwise block the write forever.
        let exchange = async {
            self.sink.write_frame(&frame).await?;
            crate::logging::debug(&format!("-> #{} {}", id, method));
            Ok::<_, McpError>(reply.await)
        };

        match tokio::time::timeout(deadline, exchange).await {
            Ok(Err(write_err)) => Err(write_err),
            Ok(Ok(Ok(Ok(result)))) => Ok(result),
            Ok(Ok(Ok(Err(err)))) => {
                let message = if err.message.is_empty() {
                    "MCP Server error".to_string()
                } else {
                    err.message
                };
                Err(McpError::ToolInvocation {
                    code: err.code,
                    message,
                })
            }
            Ok(Ok(Err(_))) => Err(McpError::ProcessExited { id }),
            Err(_) => {
                crate::logging::warn(&format!(
                    "MCP request #{} ({}) timed out after {:?}",
                    id, method, deadline
                ));
                Err(McpError::RequestTimeout {
                    method: method.to_string(),
                    id,
                })
            }
        }
    }

    /// Fire-and-forget notification (no id, no reply)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let frame = super::protocol::JsonRpcNotification::new(method, params).to_frame()?;
        self.sink.write_frame(&frame).await
    }
}

/// Reader-side half of the correlator: dispatches decoded frames.
#[derive(Clone)]
pub struct FrameRouter {
    pending: Arc<PendingTable>,
    console: Arc<ConsoleLog>,
}

impl FrameRouter {
    pub fn route(&self, frame: Frame) {
        match frame {
            Ok(value) => self.route_value(value),
            Err(bad) => {
                crate::logging::debug(&format!("Malformed frame: {}", bad.reason));
                self.console.append(
                    LogCategory::Warning,
                    "Skipping malformed JSON line:",
                    Some(Value::String(bad.line)),
                );
            }
        }
    }

    pub fn route_value(&self, value: Value) {
        match IncomingFrame::classify(value) {
            IncomingFrame::Response { id, outcome } => {
                let slot = self.pending.slots().remove(&id);
                match slot {
                    Some(tx) => {
                        // The waiter may have given up between removal and send.
                        let _ = tx.send(outcome);
                    }
                    None => crate::logging::debug(&format!(
                        "Dropping response for unknown or expired request #{}",
                        id
                    )),
                }
            }
            IncomingFrame::Notification { method, params } => {
                self.on_notification(&method, params);
            }
            IncomingFrame::Other(value) => {
                crate::logging::debug(&format!("Ignoring unexpected frame: {}", value));
            }
        }
    }

    fn on_notification(&self, method: &str, params: Value) {
        if method != NOTIFICATION_MESSAGE {
            crate::logging::debug(&format!("MCP notification {}: {}", method, params));
            return;
        }

        let data = params.get("data").cloned().unwrap_or(Value::Null);
        let text = match &data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if ERROR_TERMS.iter().any(|term| text.contains(term)) {
            crate::logging::debug(&format!("MCP notification (suppressed): {}", text));
            return;
        }
        self.console
            .append(LogCategory::Notification, "MCP notification:", Some(data));
    }

    /// The stream ended. With `fail_pending`, every waiting request fails
    /// now with `ProcessExited`; otherwise they run out their deadlines.
    pub fn close(&self, fail_pending: bool) {
        if !fail_pending {
            return;
        }
        let dropped: Vec<_> = {
            let mut slots = self.pending.slots();
            self.pending.closed.store(true, Ordering::SeqCst);
            slots.drain().collect()
        };
        if !dropped.is_empty() {
            crate::logging::warn(&format!(
                "MCP server output closed with {} request(s) pending",
                dropped.len()
            ));
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.slots().len()
    }
}

/// Read the server's stdout until EOF, reassembling and routing frames.
pub async fn pump<R>(mut reader: R, router: FrameRouter, fail_pending_on_exit: bool)
where
    R: AsyncRead + Unpin,
{
    let mut reassembler = FrameReassembler::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for frame in reassembler.push(&buf[..n]) {
                    router.route(frame);
                }
            }
            Err(e) => {
                crate::logging::error(&format!("Error reading MCP server output: {}", e));
                break;
            }
        }
    }
    if let Some(frame) = reassembler.finish() {
        router.route(frame);
    }
    router.close(fail_pending_on_exit);
}
