// src/mcp/transport.rs
// Stdio transport for MCP child processes: one dedicated reader task fans out
// responses to per-request-id waiters and notifications to a log sink, while
// writes to stdin are serialized through a single lock. This is what lets a
// single MCP session serve several concurrent `call()`s, each correlated by
// JSON-RPC id, instead of the one-request-one-response model a naive
// implementation would have.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::notifications::parse_notification;
use super::protocol::JsonRpcResponse;

type WaiterMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// A log sink for unsolicited server notifications. Invocations must be
/// best-effort and must never block the reader loop.
pub type LogSink = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// One JSON-RPC-over-stdio session with one child process.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    waiters: WaiterMap,
    next_id: AtomicI64,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the child process and start the dedicated stdout reader task.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        log_sink: Option<LogSink>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().context("failed to spawn MCP server process")?;

        let stdin = child.stdin.take().context("failed to get child stdin")?;
        let stdout = child.stdout.take().context("failed to get child stdout")?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => debug!("[MCP:stderr] {}", line.trim()),
                    }
                }
            });
        }

        let waiters: WaiterMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_handle = spawn_reader(stdout, waiters.clone(), log_sink);

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            waiters,
            next_id: AtomicI64::new(1),
            reader_handle: Mutex::new(Some(reader_handle)),
        })
    }

    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and await its id-correlated response, bounded by
    /// `timeout_ms`. Concurrent calls are safe: each registers its own waiter
    /// before the write happens, so the reader can never race ahead of
    /// registration.
    pub async fn call(&self, id: i64, message: &str, timeout_ms: u64) -> Result<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().await;
            waiters.insert(id, tx);
        }

        if let Err(e) = self.write_line(message).await {
            self.waiters.lock().await.remove(&id);
            return Err(e);
        }

        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                anyhow::bail!("MCP transport closed before a response to request {} arrived", id)
            }
            Err(_) => {
                self.waiters.lock().await.remove(&id);
                anyhow::bail!("timed out waiting {}ms for response to request {}", timeout_ms, id)
            }
        }
    }

    /// Send a message with no response expected (a JSON-RPC notification).
    pub async fn send_notification(&self, message: &str) -> Result<()> {
        self.write_line(message).await
    }

    async fn write_line(&self, message: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(message.as_bytes())
            .await
            .context("failed to write to MCP stdin")?;
        stdin.write_all(b"\n").await.context("failed to write newline")?;
        stdin.flush().await.context("failed to flush stdin")?;
        Ok(())
    }

    /// Whether the child process is still alive.
    pub async fn is_connected(&self) -> bool {
        match self.child.lock().await.try_wait() {
            Ok(None) => true,
            _ => false,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}

fn spawn_reader(
    stdout: tokio::process::ChildStdout,
    waiters: WaiterMap,
    log_sink: Option<LogSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("[MCP] stdout closed, reader task exiting");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    dispatch_line(trimmed, &waiters, &log_sink).await;
                }
                Err(e) => {
                    warn!("[MCP] error reading stdout: {}", e);
                    break;
                }
            }
        }
        // Fail any still-outstanding waiters so callers don't hang forever.
        let mut waiters = waiters.lock().await;
        waiters.clear();
    })
}

async fn dispatch_line(line: &str, waiters: &WaiterMap, log_sink: &Option<LogSink>) {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("[MCP] failed to parse line as JSON: {} ({})", e, line);
            return;
        }
    };

    if value.get("id").is_some() {
        match serde_json::from_value::<JsonRpcResponse>(value.clone()) {
            Ok(response) => {
                if let Some(id) = response.id {
                    let mut waiters_guard = waiters.lock().await;
                    if let Some(tx) = waiters_guard.remove(&id) {
                        let _ = tx.send(response);
                    } else {
                        debug!("[MCP] no waiter for response id {}", id);
                    }
                }
            }
            Err(e) => warn!("[MCP] failed to parse id-bearing message: {}", e),
        }
        return;
    }

    if let Some(notification) = parse_notification(line) {
        if let Some(sink) = log_sink {
            let sink = sink.clone();
            let payload = serde_json::to_value(&notification).unwrap_or(serde_json::Value::Null);
            tokio::spawn(async move {
                sink(payload);
            });
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        debug!("[MCP] dropping stdio transport, killing child process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_single_call() {
        // `cat` echoes stdin to stdout verbatim, one line at a time, which is
        // enough to exercise the id-correlated request/response path end to
        // end without a real MCP server binary.
        let result = StdioTransport::spawn("cat", &[], &HashMap::new(), None).await;
        let Ok(transport) = result else { return };

        let id = transport.next_id();
        let request = serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"ok":true}}).to_string();
        let response = transport.call(id, &request, 2_000).await;
        assert!(response.is_ok());
        assert_eq!(response.unwrap().id, Some(id));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_multiplexed_by_id() {
        let result = StdioTransport::spawn("cat", &[], &HashMap::new(), None).await;
        let Ok(transport) = result else { return };
        let transport = Arc::new(transport);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let t = transport.clone();
            handles.push(tokio::spawn(async move {
                let id = t.next_id();
                let request =
                    serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"id":id}}).to_string();
                let response = t.call(id, &request, 2_000).await.unwrap();
                assert_eq!(response.id, Some(id));
            }));
        }

        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_timeout_when_no_response_arrives() {
        // `sleep` never writes anything to stdout, so the waiter will time out.
        let result = StdioTransport::spawn("sleep", &["5".to_string()], &HashMap::new(), None).await;
        let Ok(transport) = result else { return };

        let id = transport.next_id();
        let request = serde_json::json!({"jsonrpc":"2.0","id":id,"method":"noop"}).to_string();
        let response = transport.call(id, &request, 100).await;
        assert!(response.is_err());
    }
}
