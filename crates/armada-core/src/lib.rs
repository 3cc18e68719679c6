//! Armada core primitives
//!
//! This crate carries the pieces every other Armada crate leans on:
//!
//! - **Resolved configuration model** ([`config`]): the topology, provider
//!   credentials and SSH key material handed to us by the configuration
//!   loader. Armada never parses configuration files itself; it consumes
//!   an already-resolved [`config::FleetConfig`].
//! - **Step reporting** ([`report`]): the sink through which every phase
//!   announces start/success/failure before errors propagate.
//! - **Wait primitives** ([`wait`]): bounded polling, exponential backoff
//!   retry and cooperative cancellation, used to tolerate eventual
//!   consistency in cloud APIs and transient failures on the SSH channel
//!   while letting an operator abort a stuck run.

pub mod config;
pub mod error;
pub mod report;
pub mod wait;

// Re-exports
pub use config::{FleetConfig, ProviderCredentials, ServerGroup, SshKeyPair, Topology};
pub use error::{CancelledError, ConfigError, WaitError};
pub use report::{RecordingReporter, StepReporter, TracingReporter};
pub use tokio_util::sync::CancellationToken;
pub use wait::{poll, retry_with_backoff, with_cancellation};
