//! Resolved configuration model
//!
//! Armada's entry point is a [`FleetConfig`] produced by an external
//! configuration loader. Nothing here reads files: topology, credentials
//! and key material arrive fully resolved.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A named class of interchangeable servers.
///
/// Immutable for the duration of a run. The first group in the declared
/// topology is special: its first server hosts the cluster control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    /// Group name, e.g. "web" or "worker".
    pub name: String,

    /// Provider instance type, e.g. "cx22" or "DEV1-M".
    pub instance_type: String,

    /// Desired replica count.
    pub count: u32,
}

/// The declared desired topology: an ordered list of server groups.
///
/// Order matters: it fixes which server key is the master.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    pub groups: Vec<ServerGroup>,
}

impl Topology {
    pub fn new(groups: Vec<ServerGroup>) -> Self {
        Self { groups }
    }

    /// Validate the topology invariants.
    ///
    /// Group names become part of server names (`<prefix>-<group>-<index>`),
    /// so they must be usable as DNS-ish labels. Dashes inside group names
    /// are fine; the name parser splits on the *last* dash for the index.
    /// A count of zero is legal (scale-to-zero); whether zero is *safe*
    /// for the first group is the reconciler's call, since deleting the
    /// master is a reconciliation-time invariant violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::EmptyTopology);
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigError::DuplicateGroup {
                    group: group.name.clone(),
                });
            }
            validate_label(&group.name).map_err(|reason| ConfigError::InvalidGroupName {
                group: group.name.clone(),
                reason,
            })?;
        }
        if self.total_count() == 0 {
            return Err(ConfigError::NoServers);
        }
        Ok(())
    }

    /// The group whose first server is the cluster master.
    pub fn first_group(&self) -> Option<&ServerGroup> {
        self.groups.first()
    }

    /// Total declared server count across all groups.
    pub fn total_count(&self) -> u32 {
        self.groups.iter().map(|g| g.count).sum()
    }

    /// Whether this topology declares exactly one server.
    pub fn is_single_node(&self) -> bool {
        self.total_count() == 1
    }

    pub fn get(&self, name: &str) -> Option<&ServerGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// Credentials for a compute provider, keyed by provider name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderCredentials {
    Hetzner {
        api_token: String,
    },
    Scaleway {
        access_key: String,
        secret_key: String,
        project_id: String,
        zone: String,
    },
}

impl ProviderCredentials {
    /// Canonical provider name, as used by the provider factory.
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Hetzner { .. } => "hetzner",
            Self::Scaleway { .. } => "scaleway",
        }
    }
}

/// SSH key pair used for every managed server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyPair {
    /// Path to the private key on the operator's machine.
    pub private_key_path: String,

    /// Public key material, uploaded to the provider at first run.
    pub public_key: String,
}

/// The fully resolved configuration the core consumes.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Naming prefix for every managed resource.
    pub prefix: String,

    /// Environment label ("production", "staging", ...).
    pub environment: String,

    /// Declared server topology.
    pub topology: Topology,

    /// Provider credentials.
    pub credentials: ProviderCredentials,

    /// SSH key pair for remote access.
    pub ssh_key: SshKeyPair,

    /// Server location / region passed through to the provider.
    pub location: String,

    /// OS image for new servers.
    pub image: String,
}

impl FleetConfig {
    /// Validate prefix and topology together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_label(&self.prefix).map_err(|reason| ConfigError::InvalidPrefix {
            prefix: self.prefix.clone(),
            reason,
        })?;
        self.topology.validate()
    }
}

fn validate_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err("must not start or end with '-'".to_string());
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("only lowercase letters, digits and '-' are allowed".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, count: u32) -> ServerGroup {
        ServerGroup {
            name: name.to_string(),
            instance_type: "cx22".to_string(),
            count,
        }
    }

    #[test]
    fn test_valid_topology() {
        let topology = Topology::new(vec![group("web", 2), group("worker", 1)]);
        assert!(topology.validate().is_ok());
        assert_eq!(topology.total_count(), 3);
        assert!(!topology.is_single_node());
        assert_eq!(topology.first_group().unwrap().name, "web");
    }

    #[test]
    fn test_empty_topology_rejected() {
        let topology = Topology::default();
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::EmptyTopology)
        ));
    }

    #[test]
    fn test_zero_count_is_legal_desired_state() {
        let topology = Topology::new(vec![group("web", 1), group("worker", 0)]);
        assert!(topology.validate().is_ok());
        assert_eq!(topology.total_count(), 1);
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let topology = Topology::new(vec![group("web", 1), group("web", 2)]);
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::DuplicateGroup { .. })
        ));
    }

    #[test]
    fn test_invalid_group_name_rejected() {
        let topology = Topology::new(vec![group("Web_1", 1)]);
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::InvalidGroupName { .. })
        ));
    }

    #[test]
    fn test_single_node_topology() {
        let topology = Topology::new(vec![group("master", 1)]);
        assert!(topology.is_single_node());
    }

    #[test]
    fn test_dashed_group_name_allowed() {
        let topology = Topology::new(vec![group("background-worker", 2)]);
        assert!(topology.validate().is_ok());
    }
}
