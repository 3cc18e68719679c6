//! Compute provider trait definition

use crate::error::Result;
use crate::types::{
    CreateServerRequest, FirewallRecord, FirewallRule, NetworkRecord, ServerFilter, ServerRecord,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Options for the post-create wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Require a public IPv4 before declaring the server ready.
    ///
    /// Private-only nodes set this to false.
    pub require_public_ip: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            require_public_ip: true,
        }
    }
}

/// Outcome of a best-effort detach during deletion.
///
/// Detaching a server from its firewall/network before deletion can race
/// the provider ("already detached"); the outcome is recorded instead of
/// silently swallowed so callers and tests can observe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetachOutcome {
    Detached,
    AlreadyDetached,
    Failed { message: String },
}

/// Account/identity information returned by `validate_credentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Human-readable account identity (email, organization, ...).
    pub account: String,
}

/// Compute provider abstraction
///
/// One implementation per cloud. All creation calls are idempotent by
/// name: `find_or_create_*` performs a name lookup first and returns the
/// existing record rather than creating a duplicate; this is what makes
/// repeated reconciliation runs safe.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Canonical provider name (e.g. "hetzner", "scaleway").
    fn name(&self) -> &str;

    /// Verify credentials against the provider API.
    ///
    /// Absent credentials surface as [`crate::CloudError::MissingCredentials`]
    /// at client construction, never here.
    async fn validate_credentials(&self) -> Result<AccountInfo>;

    /// Look up a server by name.
    ///
    /// Returns [`crate::CloudError::NotFound`] if no such server exists;
    /// callers test with `is_not_found()`.
    async fn find_server(&self, name: &str) -> Result<ServerRecord>;

    /// Find a server by name or create it, waiting until it is running
    /// (and has a public IP per `wait`).
    async fn find_or_create_server(
        &self,
        request: &CreateServerRequest,
        wait: WaitOptions,
    ) -> Result<ServerRecord>;

    /// List servers matching `filter`.
    async fn list_servers(&self, filter: &ServerFilter) -> Result<Vec<ServerRecord>>;

    /// Delete a server by id.
    ///
    /// Detaches the server from every firewall and network it is attached
    /// to (recording, not raising, "already detached"), issues the delete,
    /// then polls until the provider reports the server gone. A provider
    /// "not found" anywhere along the way counts as success.
    async fn delete_server(&self, id: &str) -> Result<Vec<DetachOutcome>>;

    /// Poll until the server is running (and has a public IP per `wait`).
    async fn wait_for_server(&self, id: &str, wait: WaitOptions) -> Result<ServerRecord>;

    /// Poll until the provider no longer knows the server.
    async fn wait_for_server_deletion(&self, id: &str) -> Result<()>;

    /// Find a firewall by name or create it with `rules`.
    async fn find_or_create_firewall(
        &self,
        name: &str,
        rules: &[FirewallRule],
    ) -> Result<FirewallRecord>;

    /// Delete a firewall by id; "not found" counts as success.
    async fn delete_firewall(&self, id: &str) -> Result<()>;

    /// Find a private network by name or create it with `ip_range`.
    async fn find_or_create_network(&self, name: &str, ip_range: &str) -> Result<NetworkRecord>;

    /// Delete a network by id; "not found" counts as success.
    async fn delete_network(&self, id: &str) -> Result<()>;

    /// Find an uploaded SSH key by name or upload `public_key` under it.
    /// Returns the provider's key resource id.
    async fn find_or_create_ssh_key(&self, name: &str, public_key: &str) -> Result<String>;
}
