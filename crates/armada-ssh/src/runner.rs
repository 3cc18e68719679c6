//! Command runner seam
//!
//! `SshClient` shells out to the system `ssh` binary through this trait so
//! tests can script remote behaviour without a network.

use crate::error::SshError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Raw outcome of a spawned process.
#[derive(Debug, Clone)]
pub struct RawOutput {
    /// Process exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a local program, capturing its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<RawOutput, SshError>;
}

/// Real runner that spawns processes on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<RawOutput, SshError> {
        tracing::debug!(%program, ?args, "spawning command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SshError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        Ok(RawOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
