// src/orchestrator/status.rs
// Status Streamer: a thin wrapper over the HTTP response body that writes
// newline-delimited JSON progress events during a single request. Writes
// are best-effort — a failed write is logged and the request continues so
// that side effects already committed by collaborators stay consistent.

use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::llm::StoreFormat;

pub struct StatusStreamer<W> {
    sink: Mutex<W>,
    /// Cancelled once a write fails, which for the axum duplex bridge means
    /// the client disconnected and dropped its half of the pipe. The loop
    /// observes this at its next safe point instead of being told directly.
    disconnected: CancellationToken,
}

impl<W: AsyncWrite + Unpin + Send> StatusStreamer<W> {
    pub fn new(sink: W) -> Self {
        Self { sink: Mutex::new(sink), disconnected: CancellationToken::new() }
    }

    /// Shares this streamer's disconnect signal with an existing token so a
    /// failed write cancels the same token the loop is already watching.
    pub fn with_cancellation(sink: W, cancel: CancellationToken) -> Self {
        Self { sink: Mutex::new(sink), disconnected: cancel }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    async fn write_line(&self, value: Value) {
        let mut line = match serde_json::to_string(&value) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "[STATUS] failed to serialize ndjson line");
                return;
            }
        };
        line.push('\n');
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.write_all(line.as_bytes()).await {
            warn!(error = %e, "[STATUS] write failed, client likely disconnected");
            self.disconnected.cancel();
        }
    }

    pub async fn emit(&self, message: impl Into<String>) {
        let payload = serde_json::json!({
            "type": "status",
            "message": message.into(),
            "id": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.write_line(payload).await;
    }

    pub async fn result(&self, store_format: &StoreFormat) {
        let payload = serde_json::json!({ "type": "result", "data": store_format });
        self.write_line(payload).await;
    }

    pub async fn error(&self, err: &OrchestratorError) {
        let payload = serde_json::json!({
            "type": "error",
            "kind": err.kind(),
            "message": err.to_string(),
        });
        self.write_line(payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Segment;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn emits_well_formed_ndjson_lines() {
        let (client, mut server) = tokio::io::duplex(4096);
        let streamer = StatusStreamer::new(client);
        streamer.emit("calling filesystem-read_file").await;
        let store_format = StoreFormat {
            thinking: None,
            conversation: vec![Segment::Text { content: "ok".to_string() }],
            artifacts: vec![],
        };
        streamer.result(&store_format).await;
        drop(streamer);

        let mut buf = Vec::new();
        server.read_buf(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "status");
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "result");
    }

    #[tokio::test]
    async fn dropped_peer_cancels_the_shared_token() {
        let (client, server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let streamer = StatusStreamer::with_cancellation(client, cancel.clone());
        drop(server);

        // The duplex write buffer is small; enough writes force a flush
        // against the now-dropped peer and surface the broken pipe.
        for i in 0..100 {
            streamer.emit(format!("status {i}")).await;
            if cancel.is_cancelled() {
                break;
            }
        }
        assert!(cancel.is_cancelled(), "write failures against a dropped peer should cancel the token");
    }
}
