//! Core error types

use thiserror::Error;

/// Errors raised while validating the resolved configuration.
///
/// Configuration errors are always fatal and never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("topology declares no server groups")]
    EmptyTopology,

    #[error("topology declares zero servers across all groups")]
    NoServers,

    #[error("server group '{group}' is declared more than once")]
    DuplicateGroup { group: String },

    #[error("invalid group name '{group}': {reason}")]
    InvalidGroupName { group: String, reason: String },

    #[error("invalid prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("missing credentials for provider '{provider}'")]
    MissingCredentials { provider: String },
}

/// Error returned when an operation is abandoned because its cancellation
/// token fired.
#[derive(Error, Debug)]
#[error("{what} cancelled")]
pub struct CancelledError {
    /// Human-readable description of what was abandoned.
    pub what: String,
}

/// Error returned when a bounded poll exhausts its attempt budget.
#[derive(Error, Debug)]
#[error("timed out waiting for {what} (after {attempts} attempts)")]
pub struct WaitError {
    /// Human-readable description of what was awaited.
    pub what: String,

    /// Attempts made before giving up.
    pub attempts: u32,
}
