//! Hetzner Cloud provider implementation

use crate::api::{HetznerApi, HzCreateServer, HzFirewallAttachment, HzFirewallRule, HzServer, HzServerType};
use crate::error::HetznerError;
use armada_cloud::{
    AccountInfo, CloudError, ComputeProvider, CreateServerRequest, DetachOutcome, FirewallRecord,
    FirewallRule, NetworkRecord, ServerFilter, ServerRecord, ServerStatus, WaitOptions,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;

const WAIT_ATTEMPTS: u32 = 60;
const WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Hetzner Cloud provider
pub struct HetznerProvider {
    api: HetznerApi,

    /// Server-type catalog, fetched once per client instance.
    server_types: OnceCell<Vec<HzServerType>>,
}

impl HetznerProvider {
    pub fn new(api_token: impl Into<String>) -> armada_cloud::Result<Self> {
        let api = HetznerApi::new(api_token).map_err(CloudError::from)?;
        Ok(Self {
            api,
            server_types: OnceCell::new(),
        })
    }

    #[doc(hidden)]
    pub fn with_api(api: HetznerApi) -> Self {
        Self {
            api,
            server_types: OnceCell::new(),
        }
    }

    async fn server_types(&self) -> Result<&Vec<HzServerType>, HetznerError> {
        self.server_types
            .get_or_try_init(|| self.api.list_server_types())
            .await
    }

    fn to_record(server: HzServer) -> ServerRecord {
        ServerRecord {
            id: server.id.to_string(),
            name: server.name,
            status: normalize_status(&server.status),
            public_ipv4: server.public_net.ipv4.map(|ip| ip.ip),
            private_ipv4: server.private_net.iter().find_map(|n| n.ip.clone()),
            instance_type: server.server_type.name,
            image: server
                .image
                .and_then(|i| i.name)
                .unwrap_or_else(|| "unknown".to_string()),
            location: server.datacenter.location.name,
            labels: server.labels,
            created_at: server.created,
        }
    }

    async fn fetch_record(&self, id: i64) -> armada_cloud::Result<Option<ServerRecord>> {
        let server = self.api.get_server(id).await.map_err(CloudError::from)?;
        Ok(server.map(Self::to_record))
    }
}

fn normalize_status(status: &str) -> ServerStatus {
    match status {
        "running" => ServerStatus::Running,
        "initializing" | "starting" | "rebuilding" | "migrating" => ServerStatus::Pending,
        "stopping" | "deleting" => ServerStatus::Stopping,
        "off" => ServerStatus::Stopped,
        _ => ServerStatus::Pending,
    }
}

fn parse_id(id: &str, resource: &str) -> armada_cloud::Result<i64> {
    id.parse::<i64>()
        .map_err(|_| CloudError::InvalidConfig(format!("invalid {resource} id '{id}'")))
}

#[async_trait]
impl ComputeProvider for HetznerProvider {
    fn name(&self) -> &str {
        "hetzner"
    }

    async fn validate_credentials(&self) -> armada_cloud::Result<AccountInfo> {
        // The cloud API has no account endpoint; a successful authenticated
        // list call proves the token works.
        self.api.list_server_types().await.map_err(CloudError::from)?;
        Ok(AccountInfo {
            account: "hetzner cloud project".to_string(),
        })
    }

    async fn find_server(&self, name: &str) -> armada_cloud::Result<ServerRecord> {
        self.api
            .get_server_by_name(name)
            .await
            .map_err(CloudError::from)?
            .map(Self::to_record)
            .ok_or_else(|| CloudError::not_found("server", name))
    }

    async fn find_or_create_server(
        &self,
        request: &CreateServerRequest,
        wait: WaitOptions,
    ) -> armada_cloud::Result<ServerRecord> {
        if let Some(existing) = self
            .api
            .get_server_by_name(&request.name)
            .await
            .map_err(CloudError::from)?
        {
            tracing::debug!(name = %request.name, "server already exists");
            return self.wait_for_server(&existing.id.to_string(), wait).await;
        }

        let types = self.server_types().await.map_err(CloudError::from)?;
        if !types.iter().any(|t| t.name == request.instance_type) {
            return Err(CloudError::InvalidConfig(format!(
                "unknown Hetzner server type '{}'",
                request.instance_type
            )));
        }

        let ssh_keys = request
            .ssh_key_ids
            .iter()
            .map(|id| parse_id(id, "ssh key"))
            .collect::<armada_cloud::Result<Vec<_>>>()?;
        let firewalls = match &request.firewall_id {
            Some(id) => vec![HzFirewallAttachment {
                firewall: parse_id(id, "firewall")?,
            }],
            None => Vec::new(),
        };
        let networks = match &request.network_id {
            Some(id) => vec![parse_id(id, "network")?],
            None => Vec::new(),
        };

        tracing::info!(name = %request.name, server_type = %request.instance_type, "creating server");
        let created = self
            .api
            .create_server(&HzCreateServer {
                name: request.name.clone(),
                server_type: request.instance_type.clone(),
                image: request.image.clone(),
                location: request.location.clone(),
                ssh_keys,
                firewalls,
                networks,
                user_data: request.user_data.clone(),
                labels: request.labels.clone(),
            })
            .await
            .map_err(CloudError::from)?;

        self.wait_for_server(&created.id.to_string(), wait).await
    }

    async fn list_servers(&self, filter: &ServerFilter) -> armada_cloud::Result<Vec<ServerRecord>> {
        let servers = self.api.list_servers().await.map_err(CloudError::from)?;
        Ok(servers
            .into_iter()
            .map(Self::to_record)
            .filter(|r| filter.matches(r))
            .collect())
    }

    async fn delete_server(&self, id: &str) -> armada_cloud::Result<Vec<DetachOutcome>> {
        let numeric_id = parse_id(id, "server")?;
        let Some(server) = self.api.get_server(numeric_id).await.map_err(CloudError::from)? else {
            // Already gone, deletion is idempotent.
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();

        for firewall in &server.public_net.firewalls {
            let outcome = match self
                .api
                .remove_firewall_from_server(firewall.id, numeric_id)
                .await
            {
                Ok(()) => DetachOutcome::Detached,
                Err(e) if e.is_not_found() => DetachOutcome::AlreadyDetached,
                Err(e) => DetachOutcome::Failed {
                    message: e.to_string(),
                },
            };
            if let DetachOutcome::Failed { message } = &outcome {
                tracing::warn!(firewall = firewall.id, %message, "firewall detach failed, continuing");
            }
            outcomes.push(outcome);
        }

        for net in &server.private_net {
            let outcome = match self
                .api
                .detach_server_from_network(numeric_id, net.network)
                .await
            {
                Ok(()) => DetachOutcome::Detached,
                Err(e) if e.is_not_found() => DetachOutcome::AlreadyDetached,
                Err(e) => DetachOutcome::Failed {
                    message: e.to_string(),
                },
            };
            if let DetachOutcome::Failed { message } = &outcome {
                tracing::warn!(network = net.network, %message, "network detach failed, continuing");
            }
            outcomes.push(outcome);
        }

        tracing::info!(server = %server.name, id = numeric_id, "deleting server");
        match self.api.delete_server(numeric_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.wait_for_server_deletion(id).await?;
        Ok(outcomes)
    }

    async fn wait_for_server(&self, id: &str, wait: WaitOptions) -> armada_cloud::Result<ServerRecord> {
        let numeric_id = parse_id(id, "server")?;
        let what = format!("server {id} to be running");

        armada_core::poll(WAIT_ATTEMPTS, WAIT_INTERVAL, &what, || async {
            let record = self.fetch_record(numeric_id).await?;
            Ok(record.filter(|r| {
                r.status.is_running() && (!wait.require_public_ip || r.public_ipv4.is_some())
            }))
        })
        .await?
    }

    async fn wait_for_server_deletion(&self, id: &str) -> armada_cloud::Result<()> {
        let numeric_id = parse_id(id, "server")?;
        let what = format!("server {id} to be deleted");

        armada_core::poll(WAIT_ATTEMPTS, WAIT_INTERVAL, &what, || async {
            match self.fetch_record(numeric_id).await? {
                None => Ok(Some(())),
                Some(_) => Ok(None),
            }
        })
        .await?
    }

    async fn find_or_create_firewall(
        &self,
        name: &str,
        rules: &[FirewallRule],
    ) -> armada_cloud::Result<FirewallRecord> {
        if let Some(existing) = self
            .api
            .get_firewall_by_name(name)
            .await
            .map_err(CloudError::from)?
        {
            return Ok(firewall_record(existing));
        }

        let wire_rules = rules
            .iter()
            .map(|r| HzFirewallRule {
                direction: "in".to_string(),
                protocol: r.protocol.clone(),
                port: r.port.clone(),
                source_ips: r.source_ips.clone(),
            })
            .collect();

        tracing::info!(%name, "creating firewall");
        let created = self
            .api
            .create_firewall(name, wire_rules)
            .await
            .map_err(CloudError::from)?;
        Ok(firewall_record(created))
    }

    async fn delete_firewall(&self, id: &str) -> armada_cloud::Result<()> {
        match self.api.delete_firewall(parse_id(id, "firewall")?).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_or_create_network(
        &self,
        name: &str,
        ip_range: &str,
    ) -> armada_cloud::Result<NetworkRecord> {
        if let Some(existing) = self
            .api
            .get_network_by_name(name)
            .await
            .map_err(CloudError::from)?
        {
            return Ok(network_record(existing));
        }

        tracing::info!(%name, %ip_range, "creating network");
        let created = self
            .api
            .create_network(name, ip_range)
            .await
            .map_err(CloudError::from)?;
        Ok(network_record(created))
    }

    async fn delete_network(&self, id: &str) -> armada_cloud::Result<()> {
        match self.api.delete_network(parse_id(id, "network")?).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_or_create_ssh_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> armada_cloud::Result<String> {
        if let Some(existing) = self
            .api
            .get_ssh_key_by_name(name)
            .await
            .map_err(CloudError::from)?
        {
            return Ok(existing.id.to_string());
        }

        tracing::info!(%name, "uploading ssh key");
        let created = self
            .api
            .create_ssh_key(name, public_key)
            .await
            .map_err(CloudError::from)?;
        Ok(created.id.to_string())
    }
}

fn firewall_record(firewall: crate::api::HzFirewall) -> FirewallRecord {
    FirewallRecord {
        id: firewall.id.to_string(),
        name: firewall.name,
        rules: firewall
            .rules
            .into_iter()
            .filter(|r| r.direction == "in")
            .map(|r| FirewallRule {
                protocol: r.protocol,
                port: r.port,
                source_ips: r.source_ips,
            })
            .collect(),
    }
}

fn network_record(network: crate::api::HzNetwork) -> NetworkRecord {
    NetworkRecord {
        id: network.id.to_string(),
        name: network.name,
        ip_range: network.ip_range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_normalization() {
        assert_eq!(normalize_status("running"), ServerStatus::Running);
        assert_eq!(normalize_status("initializing"), ServerStatus::Pending);
        assert_eq!(normalize_status("off"), ServerStatus::Stopped);
        assert_eq!(normalize_status("deleting"), ServerStatus::Stopping);
        // Unknown states are treated as still-pending rather than an error.
        assert_eq!(normalize_status("unknown-future"), ServerStatus::Pending);
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id("not-a-number", "server").unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }
}
