//! SSH error types
//!
//! The taxonomy callers rely on: connection failures are retryable,
//! authentication failures never are, command failures carry the remote
//! exit code and output.

use thiserror::Error;

/// SSH execution errors
#[derive(Error, Debug)]
pub enum SshError {
    /// The transport could not reach the remote host (refused, timed out,
    /// unreachable). The only retryable kind.
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// The remote host rejected our key. Never retried.
    #[error("authentication to {host} failed: {message}")]
    Authentication { host: String, message: String },

    /// The remote command exited non-zero.
    #[error("remote command exited with {exit_code}: {command}")]
    Command {
        command: String,
        exit_code: i32,
        /// Captured stdout+stderr for diagnosis.
        output: String,
    },

    /// The local `ssh` binary could not be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// A port-forward tunnel could not be established or fell over.
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// A bounded wait (SSH reachability, tunnel listener) ran out.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl SshError {
    /// Whether this failure is transient and worth a backoff retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

impl From<armada_core::WaitError> for SshError {
    fn from(e: armada_core::WaitError) -> Self {
        Self::Timeout(e.what)
    }
}

pub type Result<T> = std::result::Result<T, SshError>;
