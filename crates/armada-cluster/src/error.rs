//! Cluster bootstrap error types

use armada_fleet::ServerKey;
use armada_ssh::SshError;
use thiserror::Error;

/// Cluster bootstrap errors
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Reconciliation produced no servers to bootstrap.
    #[error("server set is empty, nothing to bootstrap")]
    EmptySet,

    /// Boot-time provisioning reported a hard failure.
    #[error("cloud-init failed on {host}: {output}")]
    CloudInit { host: String, output: String },

    /// A multi-node server is missing its address on the private network.
    #[error("server '{key}' has no private IP on the cluster network")]
    MissingPrivateIp { key: ServerKey },

    /// The private address exists but no interface on the host carries it.
    #[error("no interface on {host} carries address {ip}")]
    InterfaceNotFound { host: String, ip: String },

    /// The control plane produced an empty join token.
    #[error("control plane on {host} issued an empty join token")]
    EmptyToken { host: String },

    /// `kubectl get nodes -o json` output did not match the expected shape.
    #[error("failed to decode node listing: {0}")]
    NodeDecode(#[from] serde_json::Error),

    /// A bounded wait on cluster state ran out of attempts.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The operator's cancellation token fired mid-bootstrap.
    #[error(transparent)]
    Cancelled(#[from] armada_core::CancelledError),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

impl From<armada_core::WaitError> for ClusterError {
    fn from(e: armada_core::WaitError) -> Self {
        Self::Timeout(e.what)
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
