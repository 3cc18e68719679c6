//! Normalized resource records
//!
//! Provider-agnostic views of the resources Armada manages. Provider
//! clients fold their wire payloads into these shapes; nothing downstream
//! ever sees a provider DTO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a server, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

impl ServerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Provider-agnostic view of a virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Provider-assigned identifier.
    pub id: String,

    /// Server name (`<prefix>-<group>-<index>` for managed servers).
    pub name: String,

    pub status: ServerStatus,

    /// Public IPv4, absent for private-only nodes.
    pub public_ipv4: Option<String>,

    /// Private IPv4 on the shared network, absent until attached.
    pub private_ipv4: Option<String>,

    pub instance_type: String,
    pub image: String,
    pub location: String,

    /// Provider labels/tags.
    pub labels: HashMap<String, String>,

    pub created_at: DateTime<Utc>,
}

/// Normalized firewall rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRecord {
    pub id: String,
    pub name: String,
    pub rules: Vec<FirewallRule>,
}

/// A single inbound firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// "tcp", "udp" or "icmp".
    pub protocol: String,

    /// Port or port range ("22", "6443", "30000-32767"); empty for icmp.
    pub port: Option<String>,

    /// Source CIDRs.
    pub source_ips: Vec<String>,
}

impl FirewallRule {
    pub fn tcp(port: &str) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port: Some(port.to_string()),
            source_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
        }
    }
}

/// Normalized private L3 network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,

    /// Network CIDR, e.g. "10.0.0.0/16".
    pub ip_range: String,
}

/// Normalized block volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    pub name: String,
    pub size_gb: u32,

    /// Server the volume is attached to, if any.
    pub server_id: Option<String>,
}

/// Normalized managed TLS certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: String,
    pub name: String,
    pub domains: Vec<String>,
    pub not_after: Option<DateTime<Utc>>,
}

/// Request to create a server, provider-independent.
#[derive(Debug, Clone)]
pub struct CreateServerRequest {
    pub name: String,
    pub instance_type: String,
    pub image: String,
    pub location: String,

    /// SSH key resource ids to authorize.
    pub ssh_key_ids: Vec<String>,

    /// Firewall to attach at creation.
    pub firewall_id: Option<String>,

    /// Private network to attach at creation.
    pub network_id: Option<String>,

    /// Cloud-init user data executed on first boot.
    pub user_data: Option<String>,

    pub labels: HashMap<String, String>,
}

/// Filter for `list_servers`.
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    /// Only servers whose name starts with this prefix.
    pub name_prefix: Option<String>,

    /// Only servers carrying all of these labels.
    pub labels: HashMap<String, String>,
}

impl ServerFilter {
    pub fn by_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
            labels: HashMap::new(),
        }
    }

    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &ServerRecord) -> bool {
        if let Some(prefix) = &self.name_prefix
            && !record.name.starts_with(prefix.as_str())
        {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| record.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ServerRecord {
        ServerRecord {
            id: "1".to_string(),
            name: name.to_string(),
            status: ServerStatus::Running,
            public_ipv4: Some("203.0.113.10".to_string()),
            private_ipv4: None,
            instance_type: "cx22".to_string(),
            image: "ubuntu-24.04".to_string(),
            location: "fsn1".to_string(),
            labels: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_by_prefix() {
        let filter = ServerFilter::by_prefix("armada-");
        assert!(filter.matches(&record("armada-web-1")));
        assert!(!filter.matches(&record("other-web-1")));
    }

    #[test]
    fn test_filter_by_labels() {
        let mut filter = ServerFilter::default();
        filter
            .labels
            .insert("managed-by".to_string(), "armada".to_string());

        let mut managed = record("armada-web-1");
        managed
            .labels
            .insert("managed-by".to_string(), "armada".to_string());

        assert!(filter.matches(&managed));
        assert!(!filter.matches(&record("armada-web-1")));
    }

    #[test]
    fn test_status_running() {
        assert!(ServerStatus::Running.is_running());
        assert!(!ServerStatus::Pending.is_running());
    }
}
