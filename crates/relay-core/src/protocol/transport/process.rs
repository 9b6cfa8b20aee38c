//! Local-process transport
//!
//! Spawns the server as a subprocess and exchanges newline-delimited
//! JSON-RPC over its stdin/stdout. A reader task parses stdout lines into
//! messages; its channel closing marks the session dead. stderr is
//! inherited so server logs stay visible to the operator.

use super::Transport;
use crate::protocol::error::WireError;
use crate::protocol::wire::WireMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Subprocess transport speaking NDJSON over stdio
pub struct ProcessTransport {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    receiver: Option<mpsc::Receiver<WireMessage>>,
    reader_handle: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl ProcessTransport {
    /// Spawn the server process with the given (already-resolved)
    /// environment and start the stdout reader.
    pub async fn spawn(
        command: impl AsRef<str>,
        args: &[impl AsRef<str>],
        env: &HashMap<String, String>,
    ) -> Result<Self, WireError> {
        let mut cmd = Command::new(command.as_ref());
        cmd.args(args.iter().map(|a| a.as_ref()))
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            WireError::connection(format!(
                "failed to spawn server '{}': {}",
                command.as_ref(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WireError::connection("no stdin handle on spawned server"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WireError::connection("no stdout handle on spawned server"))?;

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(100);
        let reader_handle = tokio::spawn(read_lines(stdout, tx, Arc::clone(&connected)));

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            receiver: Some(rx),
            reader_handle: Some(reader_handle),
            connected,
        })
    }
}

/// Reader task: one JSON-RPC message per stdout line. Ends (dropping the
/// channel sender) on EOF or read error.
async fn read_lines(
    stdout: ChildStdout,
    tx: mpsc::Sender<WireMessage>,
    connected: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("server closed its stdout");
                break;
            }
            Ok(_) => match serde_json::from_str::<WireMessage>(line.trim()) {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dropping unparseable line from server");
                }
            },
            Err(e) => {
                warn!(error = %e, "stdout read failed");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send(&mut self, message: WireMessage) -> Result<(), WireError> {
        let stdin = self.stdin.as_mut().ok_or(WireError::NotInitialized)?;

        let json = serde_json::to_string(&message)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    fn take_receiver(&mut self) -> Option<mpsc::Receiver<WireMessage>> {
        self.receiver.take()
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.connected.store(false, Ordering::SeqCst);

        // Dropping stdin signals EOF to the server
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            tokio::select! {
                result = child.wait() => {
                    result.map_err(|e| WireError::transport(e.to_string()))?;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    child.kill().await.ok();
                }
            }
        }

        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.await;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        // Best effort cleanup without waiting
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}
