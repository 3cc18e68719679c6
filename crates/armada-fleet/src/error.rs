//! Fleet reconciliation error types

use crate::key::ServerKey;
use armada_cloud::CloudError;
use armada_core::{CancelledError, ConfigError};
use armada_ssh::SshError;
use thiserror::Error;

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The declared topology would delete the master server. The master
    /// hosts the cluster control plane and is never deletable; shrinking
    /// the first group to zero is a configuration mistake, not a request.
    #[error("topology change would delete master server '{key}'")]
    MasterDeletion { key: ServerKey },

    /// A reconciled server has no public address to hand to the
    /// bootstrapper.
    #[error("server '{key}' has no public IP")]
    MissingPublicIp { key: ServerKey },

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    /// The operator's cancellation token fired mid-run.
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
