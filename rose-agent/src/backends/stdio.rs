// ABOUTME: Inference through a local command: request JSON on stdin, reply text on stdout.
// ABOUTME: One process per request, killed when the timeout elapses.

use crate::traits::InferenceBackend;
use crate::types::ChatTurn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Serialize)]
struct StdioRequest<'a> {
    agent_id: &'a str,
    messages: &'a [ChatTurn],
}

pub struct StdioInference {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl StdioInference {
    pub fn new(command: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            args,
            timeout,
        }
    }

    async fn run(&self, request: Vec<u8>) -> Result<String> {
        tracing::debug!(command = %self.command, args = ?self.args, "Spawning inference command");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn inference command {}", self.command))?;

        let mut stdin = child.stdin.take().context("Failed to capture stdin")?;
        // Feed stdin while stdout is drained, or a chatty command fills both pipes and stalls
        let write = async move {
            let written = stdin.write_all(&request).await;
            // Closing stdin signals end of request
            drop(stdin);
            match written {
                // A command that exits without reading stdin is reported by its exit status
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.context("Inference command failed")?;
        written.context("Failed to write inference request")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Inference command exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }

        let reply = String::from_utf8(output.stdout).context("Inference reply is not UTF-8")?;
        let reply = reply.trim_end().to_string();
        if reply.is_empty() {
            anyhow::bail!("Inference command produced no output");
        }
        Ok(reply)
    }
}

#[async_trait]
impl InferenceBackend for StdioInference {
    fn name(&self) -> &'static str {
        "stdio"
    }

    async fn generate(&self, agent_id: &str, transcript: &[ChatTurn]) -> Result<String> {
        let request = serde_json::to_vec(&StdioRequest {
            agent_id,
            messages: transcript,
        })?;

        match tokio::time::timeout(self.timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!(
                "Inference command {} timed out after {:?}",
                self.command,
                self.timeout
            ),
        }
    }
}
