//! Child process ownership for one MCP server

use super::error::{McpError, McpResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

/// Something newline-delimited frames can be written to.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_frame(&self, frame: &str) -> McpResult<()>;
}

/// Serializes writes to one async byte stream so frames never interleave.
pub struct PipeWriter<W> {
    inner: tokio::sync::Mutex<Option<W>>,
}

impl<W: AsyncWrite + Unpin + Send> PipeWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Some(writer)),
        }
    }

    /// Drop the underlying writer, closing the stream
    pub async fn close(&self) {
        self.inner.lock().await.take();
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for PipeWriter<W> {
    async fn write_frame(&self, frame: &str) -> McpResult<()> {
        let mut guard = self.inner.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| McpError::Write("stream closed".to_string()))?;
        let result = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            // A broken pipe is permanent; later writes fail fast.
            guard.take();
            return Err(McpError::Write(e.to_string()));
        }
        Ok(())
    }
}

/// What to launch
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Output streams handed to whoever reads them
pub struct ProcessOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A running (or finished) server process.
///
/// The child itself lives in a watcher task so exit is observed even when
/// nobody is talking to the process. `running` flips to false as soon as the
/// exit is reaped.
pub struct ProcessHandle {
    command: String,
    pid: Option<u32>,
    stdin: PipeWriter<ChildStdin>,
    running: Arc<AtomicBool>,
    exit_code: Arc<Mutex<Option<i32>>>,
    exited: watch::Receiver<bool>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    started_at: Instant,
}

impl ProcessHandle {
    pub fn spawn(spec: &ProcessSpec) -> McpResult<(Self, ProcessOutput)> {
        let spawn_error = |message: String| McpError::Spawn {
            command: spec.command.clone(),
            message,
        };

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let pid = child.id();
        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    let _ = child.start_kill();
                    return Err(spawn_error("stdio pipes unavailable".to_string()));
                }
            };

        let running = Arc::new(AtomicBool::new(true));
        let exit_code = Arc::new(Mutex::new(None));
        let (exited_tx, exited) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(watch_child(
            child,
            kill_rx,
            Arc::clone(&running),
            Arc::clone(&exit_code),
            exited_tx,
        ));

        crate::logging::info(&format!(
            "Spawned MCP server '{}' (pid {:?})",
            spec.command, pid
        ));

        let handle = Self {
            command: spec.command.clone(),
            pid,
            stdin: PipeWriter::new(stdin),
            running,
            exit_code,
            exited,
            kill_tx: Mutex::new(Some(kill_tx)),
            started_at: Instant::now(),
        };
        Ok((handle, ProcessOutput { stdout, stderr }))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Exit status once the process has been reaped. `None` while running or
    /// when it was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Write raw bytes to the server's stdin
    pub async fn write(&self, frame: &str) -> McpResult<()> {
        if !self.is_running() {
            return Err(McpError::Write("MCP server process has exited".to_string()));
        }
        self.stdin.write_frame(frame).await
    }

    /// Terminate the process and wait until it has been reaped. Safe to call
    /// any number of times.
    pub async fn kill(&self) {
        let kill_tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = kill_tx {
            let _ = tx.send(());
        }
        self.stdin.close().await;
        self.wait_for_exit().await;
    }

    /// A detached future resolving to the exit code once the process is gone.
    /// Holding it does not keep the process alive.
    pub fn on_exit(&self) -> BoxFuture<'static, Option<i32>> {
        let mut exited = self.exited.clone();
        let exit_code = Arc::clone(&self.exit_code);
        async move {
            let _ = exited.wait_for(|done| *done).await;
            *exit_code.lock().unwrap_or_else(PoisonError::into_inner)
        }
        .boxed()
    }

    /// Resolves once the process is gone, whatever the reason.
    pub async fn wait_for_exit(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|done| *done).await;
    }
}

#[async_trait]
impl FrameSink for ProcessHandle {
    async fn write_frame(&self, frame: &str) -> McpResult<()> {
        self.write(frame).await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let kill_tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = kill_tx {
            let _ = tx.send(());
        }
    }
}

async fn watch_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    running: Arc<AtomicBool>,
    exit_code: Arc<Mutex<Option<i32>>>,
    exited_tx: watch::Sender<bool>,
) {
    let exited_on_its_own = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    let status = match exited_on_its_own {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                crate::logging::warn(&format!("Failed to signal MCP server: {}", e));
            }
            child.wait().await
        }
    };

    let code = status.as_ref().ok().and_then(|s| s.code());
    *exit_code.lock().unwrap_or_else(PoisonError::into_inner) = code;
    running.store(false, Ordering::SeqCst);
    let _ = exited_tx.send(true);

    match status {
        Ok(status) => crate::logging::info(&format!("MCP server exited: {}", status)),
        Err(e) => crate::logging::error(&format!("Failed to wait on MCP server: {}", e)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn spec(command: &str, args: &[&str]) -> ProcessSpec {
        ProcessSpec {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_write_reaches_child_stdin() {
        let (handle, output) = ProcessHandle::spawn(&spec("cat", &[])).unwrap();
        assert!(handle.is_running());
        assert!(handle.pid().is_some());
        assert_eq!(handle.command(), "cat");

        handle.write("{\"id\":1}\n").await.unwrap();
        let mut lines = BufReader::new(output.stdout).lines();
        let echoed = lines.next_line().await.unwrap();
        assert_eq!(echoed.as_deref(), Some("{\"id\":1}"));

        handle.kill().await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_kill_twice_is_harmless() {
        let (handle, _output) = ProcessHandle::spawn(&spec("cat", &[])).unwrap();
        handle.kill().await;
        handle.kill().await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let err = ProcessHandle::spawn(&spec("finchat-no-such-binary", &[]))
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, McpError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_spontaneous_exit_clears_running() {
        let (handle, _output) = ProcessHandle::spawn(&spec("sh", &["-c", "exit 3"])).unwrap();
        handle.wait_for_exit().await;
        assert!(!handle.is_running());
        assert_eq!(handle.exit_code(), Some(3));

        let err = handle.write("{}\n").await.unwrap_err();
        assert!(matches!(err, McpError::Write(_)));
    }

    #[tokio::test]
    async fn test_on_exit_outlives_handle() {
        let (handle, _output) = ProcessHandle::spawn(&spec("sh", &["-c", "exit 7"])).unwrap();
        let exited = handle.on_exit();
        drop(handle);
        // Dropping the handle kills the child; either way the future resolves
        let _ = exited.await;
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let mut spec = spec("sh", &["-c", "echo \"$FINCHAT_PROBE\""]);
        spec.env
            .insert("FINCHAT_PROBE".to_string(), "hello".to_string());
        let (handle, output) = ProcessHandle::spawn(&spec).unwrap();
        let mut lines = BufReader::new(output.stdout).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        handle.wait_for_exit().await;
    }
}
