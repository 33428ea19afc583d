//! Post-renderers: external filters over rendered manifests
//!
//! A post-renderer receives a YAML stream on stdin and writes the
//! replacement stream on stdout. It runs after templating and before the
//! manifest is split.

use async_trait::async_trait;
use rudder_core::PostRendererConfig;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{KubeError, Result};

#[async_trait]
pub trait PostRenderer: Send + Sync {
    async fn run(&self, manifest: String) -> Result<String>;
}

/// Runs an external command as a post-renderer
#[derive(Debug, Clone, PartialEq)]
pub struct ExecPostRenderer {
    command: String,
    args: Vec<String>,
}

impl ExecPostRenderer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl From<&PostRendererConfig> for ExecPostRenderer {
    fn from(config: &PostRendererConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl PostRenderer for ExecPostRenderer {
    async fn run(&self, manifest: String) -> Result<String> {
        tracing::debug!(command = %self.command, bytes = manifest.len(), "running post-renderer");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KubeError::PostRender(format!("failed to start '{}': {}", self.command, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| KubeError::PostRender("post-renderer stdin unavailable".to_string()))?;

        // feed stdin concurrently so a large manifest cannot fill both pipes
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(manifest.as_bytes()).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| KubeError::PostRender(format!("'{}': {}", self.command, e)))?;

        match writer.await {
            Ok(Ok(())) => {}
            // the command may exit without reading everything; its status decides
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(KubeError::PostRender(format!("writing to '{}': {}", self.command, e))),
            Err(e) => return Err(KubeError::PostRender(e.to_string())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KubeError::PostRender(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| KubeError::PostRender(format!("'{}' produced invalid UTF-8: {}", self.command, e)))
    }
}
