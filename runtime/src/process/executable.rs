//! Out-of-process stage.
//!
//! Runs an external binary that speaks the processor message framing: the
//! input message goes to its stdin, its stdout becomes the output message.

use std::collections::BTreeMap;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use transport_core::error::{Result, TransportError};

use super::{ProcessContext, ResourceStreamProcessor};

/// Executable stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableSpec {
    pub bin: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

pub struct Executable {
    spec: ExecutableSpec,
}

impl Executable {
    pub fn new(spec: ExecutableSpec) -> Self {
        Self { spec }
    }

    fn failed(&self, message: impl Into<String>) -> TransportError {
        TransportError::ProcessFailed {
            bin: self.spec.bin.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ResourceStreamProcessor for Executable {
    async fn process(
        &self,
        ctx: &ProcessContext,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        tracing::debug!(stage = %ctx.stage(), bin = %self.spec.bin, "Spawning stage process");

        let mut child = Command::new(&self.spec.bin)
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("Failed to spawn: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failed("stdin not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.failed("stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.failed("stderr not captured"))?;

        // stdin must be closed once the message is written so the child sees EOF
        let feed = async move {
            let copied = tokio::io::copy(input, &mut stdin).await;
            drop(stdin);
            copied
        };
        let forward = async { tokio::io::copy(&mut stdout, &mut *output).await };
        let diagnostics = async {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        };

        let (fed, forwarded, diagnostics, status) = ctx
            .run(async {
                let (fed, forwarded, diagnostics) = tokio::join!(feed, forward, diagnostics);
                let status = child.wait().await?;
                Ok::<_, TransportError>((fed, forwarded, diagnostics, status))
            })
            .await?;

        let diagnostics = String::from_utf8_lossy(&diagnostics.unwrap_or_default())
            .trim()
            .to_string();
        if !diagnostics.is_empty() {
            tracing::debug!(bin = %self.spec.bin, stderr = %diagnostics, "Stage process stderr");
        }

        if !status.success() {
            return Err(self.failed(format!("exited with {}: {}", status, diagnostics)));
        }
        match fed {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }
        forwarded?;
        output.flush().await?;
        Ok(())
    }
}
