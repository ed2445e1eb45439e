//! The external batch annotation tool.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};
use variantflow_shared::{AnnotationConfig, Result, VariantFlowError};

/// One synchronous batch call: positional text in, JSON lines out.
#[async_trait]
pub trait AnnotationTool: Send + Sync {
    /// Run the tool over one batch and return its raw stdout.
    ///
    /// Any failure to run the tool is an [`VariantFlowError::Annotation`];
    /// the caller aborts the whole task on it.
    async fn run_batch(&self, input: String) -> Result<String>;
}

/// Ensembl VEP run offline against a local cache.
#[derive(Debug, Clone)]
pub struct VepCommand {
    pub tool_path: String,
    pub cache_dir: String,
    pub assembly: String,
    pub fork_count: u32,
}

impl VepCommand {
    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self {
            tool_path: config.tool_path.clone(),
            cache_dir: config.cache_dir.clone(),
            assembly: config.assembly.clone(),
            fork_count: config.effective_fork_count(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["--cache", "--offline", "--dir_cache"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(self.cache_dir.clone());
        args.push("--assembly".into());
        args.push(self.assembly.clone());
        args.extend(
            ["--format", "vcf", "--json", "--symbol", "--no_stats", "--fork"]
                .into_iter()
                .map(String::from),
        );
        args.push(self.fork_count.to_string());
        args.push("-o".into());
        args.push("STDOUT".into());
        args
    }
}

#[async_trait]
impl AnnotationTool for VepCommand {
    async fn run_batch(&self, input: String) -> Result<String> {
        let mut child = Command::new(&self.tool_path)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VariantFlowError::Annotation(format!(
                    "failed to start {}: {e}",
                    self.tool_path
                ))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            VariantFlowError::Annotation("failed to capture annotation tool stdin".into())
        })?;

        // Feed stdin concurrently so a chatty tool cannot fill its stdout
        // pipe while we are still writing.
        let writer = tokio::spawn(async move {
            let written = stdin.write_all(input.as_bytes()).await;
            drop(stdin);
            written
        });

        let output = child.wait_with_output().await.map_err(|e| {
            VariantFlowError::Annotation(format!("annotation tool wait failed: {e}"))
        })?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "annotation tool closed stdin early"),
            Err(e) => debug!(error = %e, "stdin writer task aborted"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(status = ?output.status, %stderr, "annotation tool failed");
            return Err(VariantFlowError::Annotation(format!(
                "annotation tool exited with {}: {stderr}",
                output.status
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            VariantFlowError::Annotation(format!("annotation tool emitted non-UTF-8 output: {e}"))
        })
    }
}
