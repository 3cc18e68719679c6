//! Scaleway provider implementation

use crate::api::{ScalewayApi, ScwCreateServer, ScwSecurityGroupRule, ScwServer};
use armada_cloud::{
    AccountInfo, CloudError, ComputeProvider, CreateServerRequest, DetachOutcome, FirewallRecord,
    FirewallRule, NetworkRecord, ServerFilter, ServerRecord, ServerStatus, WaitOptions,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

const WAIT_ATTEMPTS: u32 = 60;
const WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Scaleway provider
pub struct ScalewayProvider {
    api: ScalewayApi,

    /// Commercial-type catalog, fetched once per client instance.
    server_types: OnceCell<Vec<String>>,
}

impl ScalewayProvider {
    pub fn new(
        secret_key: impl Into<String>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> armada_cloud::Result<Self> {
        let api = ScalewayApi::new(secret_key, project_id, zone).map_err(CloudError::from)?;
        Ok(Self {
            api,
            server_types: OnceCell::new(),
        })
    }

    #[doc(hidden)]
    pub fn with_api(api: ScalewayApi) -> Self {
        Self {
            api,
            server_types: OnceCell::new(),
        }
    }

    fn to_record(server: ScwServer) -> ServerRecord {
        ServerRecord {
            id: server.id,
            name: server.name,
            status: normalize_state(&server.state),
            public_ipv4: server.public_ip.map(|ip| ip.address),
            private_ipv4: server
                .private_nics
                .iter()
                .flat_map(|nic| nic.private_ips.iter())
                .map(|ip| ip.address.clone())
                .next(),
            instance_type: server.commercial_type,
            image: server
                .image
                .and_then(|i| i.name)
                .unwrap_or_else(|| "unknown".to_string()),
            location: server.zone,
            labels: tags_to_labels(&server.tags),
            created_at: server.creation_date,
        }
    }

    async fn fetch_record(&self, id: &str) -> armada_cloud::Result<Option<ServerRecord>> {
        let server = self.api.get_server(id).await.map_err(CloudError::from)?;
        Ok(server.map(Self::to_record))
    }
}

fn normalize_state(state: &str) -> ServerStatus {
    match state {
        "running" => ServerStatus::Running,
        "starting" => ServerStatus::Pending,
        "stopping" => ServerStatus::Stopping,
        "stopped" | "stopped in place" => ServerStatus::Stopped,
        _ => ServerStatus::Pending,
    }
}

/// Scaleway has flat string tags; managed labels travel as `key=value`.
fn tags_to_labels(tags: &[String]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|t| t.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn labels_to_tags(labels: &HashMap<String, String>) -> Vec<String> {
    let mut tags: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    tags.sort();
    tags
}

fn rule_to_wire(rule: &FirewallRule, ip_range: &str) -> ScwSecurityGroupRule {
    let (from, to) = match rule.port.as_deref() {
        Some(port) => match port.split_once('-') {
            Some((a, b)) => (a.parse().ok(), b.parse().ok()),
            None => {
                let p = port.parse().ok();
                (p, p)
            }
        },
        None => (None, None),
    };
    ScwSecurityGroupRule {
        action: "accept".to_string(),
        direction: "inbound".to_string(),
        protocol: rule.protocol.to_uppercase(),
        dest_port_from: from,
        dest_port_to: to,
        ip_range: ip_range.to_string(),
    }
}

#[async_trait]
impl ComputeProvider for ScalewayProvider {
    fn name(&self) -> &str {
        "scaleway"
    }

    async fn validate_credentials(&self) -> armada_cloud::Result<AccountInfo> {
        self.api.list_server_types().await.map_err(CloudError::from)?;
        Ok(AccountInfo {
            account: "scaleway project".to_string(),
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
            return self.wait_for_server(&existing.id, wait).await;
        }

        let types = self
            .server_types
            .get_or_try_init(|| self.api.list_server_types())
            .await
            .map_err(CloudError::from)?;
        if !types.iter().any(|t| t == &request.instance_type) {
            return Err(CloudError::InvalidConfig(format!(
                "unknown Scaleway commercial type '{}'",
                request.instance_type
            )));
        }

        tracing::info!(name = %request.name, commercial_type = %request.instance_type, "creating server");
        let created = self
            .api
            .create_server(&ScwCreateServer {
                name: request.name.clone(),
                commercial_type: request.instance_type.clone(),
                image: request.image.clone(),
                dynamic_ip_required: wait.require_public_ip,
                tags: labels_to_tags(&request.labels),
                security_group: request.firewall_id.clone(),
            })
            .await
            .map_err(CloudError::from)?;

        if let Some(user_data) = &request.user_data {
            self.api
                .set_cloud_init(&created.id, user_data)
                .await
                .map_err(CloudError::from)?;
        }
        if let Some(network_id) = &request.network_id {
            self.api
                .create_private_nic(&created.id, network_id)
                .await
                .map_err(CloudError::from)?;
        }

        // Scaleway servers are created powered off.
        self.api
            .server_action(&created.id, "poweron")
            .await
            .map_err(CloudError::from)?;

        self.wait_for_server(&created.id, wait).await
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
        let Some(server) = self.api.get_server(id).await.map_err(CloudError::from)? else {
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        for nic in &server.private_nics {
            let outcome = match self.api.delete_private_nic(id, &nic.id).await {
                Ok(()) => DetachOutcome::Detached,
                Err(e) if e.is_not_found() => DetachOutcome::AlreadyDetached,
                Err(e) => DetachOutcome::Failed {
                    message: e.to_string(),
                },
            };
            if let DetachOutcome::Failed { message } = &outcome {
                tracing::warn!(nic = %nic.id, %message, "private nic detach failed, continuing");
            }
            outcomes.push(outcome);
        }

        tracing::info!(server = %server.name, %id, "terminating server");
        match self.api.server_action(id, "terminate").await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.wait_for_server_deletion(id).await?;
        Ok(outcomes)
    }

    async fn wait_for_server(&self, id: &str, wait: WaitOptions) -> armada_cloud::Result<ServerRecord> {
        let what = format!("server {id} to be running");

        armada_core::poll(WAIT_ATTEMPTS, WAIT_INTERVAL, &what, || async {
            let record = self.fetch_record(id).await?;
            Ok(record.filter(|r| {
                r.status.is_running() && (!wait.require_public_ip || r.public_ipv4.is_some())
            }))
        })
        .await?
    }

    async fn wait_for_server_deletion(&self, id: &str) -> armada_cloud::Result<()> {
        let what = format!("server {id} to be deleted");

        armada_core::poll(WAIT_ATTEMPTS, WAIT_INTERVAL, &what, || async {
            match self.fetch_record(id).await? {
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
            .get_security_group_by_name(name)
            .await
            .map_err(CloudError::from)?
        {
            return Ok(FirewallRecord {
                id: existing.id,
                name: existing.name,
                rules: rules.to_vec(),
            });
        }

        tracing::info!(%name, "creating security group");
        let created = self
            .api
            .create_security_group(name)
            .await
            .map_err(CloudError::from)?;

        for rule in rules {
            for ip_range in &rule.source_ips {
                self.api
                    .create_security_group_rule(&created.id, &rule_to_wire(rule, ip_range))
                    .await
                    .map_err(CloudError::from)?;
            }
        }

        Ok(FirewallRecord {
            id: created.id,
            name: created.name,
            rules: rules.to_vec(),
        })
    }

    async fn delete_firewall(&self, id: &str) -> armada_cloud::Result<()> {
        match self.api.delete_security_group(id).await {
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
            .get_private_network_by_name(name)
            .await
            .map_err(CloudError::from)?
        {
            let range = existing
                .subnets
                .first()
                .map(|s| s.subnet.clone())
                .unwrap_or_else(|| ip_range.to_string());
            return Ok(NetworkRecord {
                id: existing.id,
                name: existing.name,
                ip_range: range,
            });
        }

        tracing::info!(%name, %ip_range, "creating private network");
        let created = self
            .api
            .create_private_network(name, ip_range)
            .await
            .map_err(CloudError::from)?;
        let range = created
            .subnets
            .first()
            .map(|s| s.subnet.clone())
            .unwrap_or_else(|| ip_range.to_string());
        Ok(NetworkRecord {
            id: created.id,
            name: created.name,
            ip_range: range,
        })
    }

    async fn delete_network(&self, id: &str) -> armada_cloud::Result<()> {
        match self.api.delete_private_network(id).await {
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
            return Ok(existing.id);
        }

        tracing::info!(%name, "uploading ssh key");
        let created = self
            .api
            .create_ssh_key(name, public_key)
            .await
            .map_err(CloudError::from)?;
        Ok(created.id)
    }
}
