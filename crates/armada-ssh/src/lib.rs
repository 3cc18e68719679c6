//! Remote execution over SSH
//!
//! Wraps the system `ssh` client: one authenticated session per logical
//! command, plus local port-forward tunnels. Failures are classified once
//! at this boundary into a closed set of kinds (connection, authentication,
//! command) so upstream code retries or aborts structurally instead of
//! inspecting error text.

pub mod client;
pub mod error;
pub mod runner;
pub mod tunnel;

pub use client::{CommandOutput, SshClient, DEFAULT_SSH_USER};
pub use error::{Result, SshError};
pub use runner::{CommandRunner, ProcessRunner, RawOutput};
pub use tunnel::with_local_forward;
