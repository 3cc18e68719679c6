//! Raw Scaleway API client
//!
//! Covers the Instance API (servers, security groups, user data), the VPC
//! API (private networks) and the IAM API (SSH keys). The instance API is
//! zone-scoped while VPC is region-scoped; the region is derived from the
//! configured zone (`fr-par-1` → `fr-par`).

use crate::error::{Result, ScalewayError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const API_ROOT: &str = "https://api.scaleway.com";
const PER_PAGE: u32 = 50;

/// Scaleway API client
#[derive(Debug)]
pub struct ScalewayApi {
    http: reqwest::Client,
    root: String,
    secret_key: String,
    project_id: String,
    zone: String,
    region: String,
}

impl ScalewayApi {
    pub fn new(
        secret_key: impl Into<String>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Result<Self> {
        let secret_key = secret_key.into();
        let project_id = project_id.into();
        let zone = zone.into();

        if secret_key.is_empty() {
            return Err(ScalewayError::MissingCredentials(
                "SCW_SECRET_KEY is empty".to_string(),
            ));
        }
        if project_id.is_empty() {
            return Err(ScalewayError::MissingCredentials(
                "SCW_DEFAULT_PROJECT_ID is empty".to_string(),
            ));
        }
        let region = zone
            .rsplit_once('-')
            .map(|(region, _)| region.to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ScalewayError::InvalidZone(zone.clone()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            root: API_ROOT.to_string(),
            secret_key,
            project_id,
            zone,
            region,
        })
    }

    /// Point the client at a different endpoint. Used by tests.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    fn instance_url(&self, path: &str) -> String {
        format!("{}/instance/v1/zones/{}{}", self.root, self.zone, path)
    }

    fn vpc_url(&self, path: &str) -> String {
        format!("{}/vpc/v2/regions/{}{}", self.root, self.region, path)
    }

    fn iam_url(&self, path: &str) -> String {
        format!("{}/iam/v1alpha1{}", self.root, path)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        tracing::debug!(%method, %url, "scaleway api request");

        let mut req = self
            .http
            .request(method, &url)
            .header("X-Auth-Token", &self.secret_key)
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ScalewayError::Unauthorized);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ScalewayError::not_found("resource", url));
        }
        if !status.is_success() {
            let message = response
                .json::<ScwErrorBody>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(ScalewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        if text.is_empty() {
            return serde_json::from_str("null").map_err(|e| ScalewayError::Decode(e.to_string()));
        }
        serde_json::from_str(&text).map_err(|e| ScalewayError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        self.request(reqwest::Method::GET, url, None).await
    }

    async fn post<T: DeserializeOwned>(&self, url: String, body: serde_json::Value) -> Result<T> {
        self.request(reqwest::Method::POST, url, Some(body)).await
    }

    async fn delete(&self, url: String) -> Result<()> {
        let _: serde_json::Value = self.request(reqwest::Method::DELETE, url, None).await?;
        Ok(())
    }

    // --- servers ---

    /// List every server in the project, walking pagination.
    pub async fn list_servers(&self) -> Result<Vec<ScwServer>> {
        let mut servers = Vec::new();
        let mut page = 1u32;
        loop {
            let response: ScwServersResponse = self
                .get(self.instance_url(&format!(
                    "/servers?project={}&page={page}&per_page={PER_PAGE}",
                    self.project_id
                )))
                .await?;
            let fetched = response.servers.len() as u32;
            servers.extend(response.servers);
            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(servers)
    }

    /// Exact-name lookup. The API's `name=` filter matches substrings, so
    /// the exact match is applied client-side.
    pub async fn get_server_by_name(&self, name: &str) -> Result<Option<ScwServer>> {
        let response: ScwServersResponse = self
            .get(self.instance_url(&format!(
                "/servers?project={}&name={name}",
                self.project_id
            )))
            .await?;
        Ok(response.servers.into_iter().find(|s| s.name == name))
    }

    pub async fn get_server(&self, id: &str) -> Result<Option<ScwServer>> {
        match self
            .get::<ScwServerResponse>(self.instance_url(&format!("/servers/{id}")))
            .await
        {
            Ok(response) => Ok(Some(response.server)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_server(&self, request: &ScwCreateServer) -> Result<ScwServer> {
        let mut body =
            serde_json::to_value(request).map_err(|e| ScalewayError::Decode(e.to_string()))?;
        body["project"] = serde_json::json!(self.project_id);
        let response: ScwServerResponse = self.post(self.instance_url("/servers"), body).await?;
        Ok(response.server)
    }

    /// Upload cloud-init user data for a server.
    pub async fn set_cloud_init(&self, id: &str, user_data: &str) -> Result<()> {
        let url = self.instance_url(&format!("/servers/{id}/user_data/cloud-init"));
        tracing::debug!(%url, "scaleway api request (user data)");
        let response = self
            .http
            .patch(&url)
            .header("X-Auth-Token", &self.secret_key)
            .header("Content-Type", "text/plain")
            .body(user_data.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ScalewayError::Api {
                status: response.status().as_u16(),
                message: "failed to set cloud-init user data".to_string(),
            });
        }
        Ok(())
    }

    /// Issue a power action ("poweron", "poweroff", "terminate").
    pub async fn server_action(&self, id: &str, action: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                self.instance_url(&format!("/servers/{id}/action")),
                serde_json::json!({ "action": action }),
            )
            .await?;
        Ok(())
    }

    // --- private NICs (server <-> private network attachment) ---

    pub async fn list_private_nics(&self, server_id: &str) -> Result<Vec<ScwPrivateNic>> {
        let response: ScwPrivateNicsResponse = self
            .get(self.instance_url(&format!("/servers/{server_id}/private_nics")))
            .await?;
        Ok(response.private_nics)
    }

    pub async fn create_private_nic(
        &self,
        server_id: &str,
        private_network_id: &str,
    ) -> Result<ScwPrivateNic> {
        let response: ScwPrivateNicResponse = self
            .post(
                self.instance_url(&format!("/servers/{server_id}/private_nics")),
                serde_json::json!({ "private_network_id": private_network_id }),
            )
            .await?;
        Ok(response.private_nic)
    }

    pub async fn delete_private_nic(&self, server_id: &str, nic_id: &str) -> Result<()> {
        self.delete(self.instance_url(&format!(
            "/servers/{server_id}/private_nics/{nic_id}"
        )))
        .await
    }

    // --- security groups ---

    pub async fn get_security_group_by_name(&self, name: &str) -> Result<Option<ScwSecurityGroup>> {
        let response: ScwSecurityGroupsResponse = self
            .get(self.instance_url(&format!(
                "/security_groups?project={}&name={name}",
                self.project_id
            )))
            .await?;
        Ok(response.security_groups.into_iter().find(|g| g.name == name))
    }

    pub async fn create_security_group(&self, name: &str) -> Result<ScwSecurityGroup> {
        let response: ScwSecurityGroupResponse = self
            .post(
                self.instance_url("/security_groups"),
                serde_json::json!({
                    "name": name,
                    "project": self.project_id,
                    "inbound_default_policy": "drop",
                    "outbound_default_policy": "accept",
                    "stateful": true,
                }),
            )
            .await?;
        Ok(response.security_group)
    }

    pub async fn create_security_group_rule(
        &self,
        group_id: &str,
        rule: &ScwSecurityGroupRule,
    ) -> Result<()> {
        let body = serde_json::to_value(rule).map_err(|e| ScalewayError::Decode(e.to_string()))?;
        let _: serde_json::Value = self
            .post(
                self.instance_url(&format!("/security_groups/{group_id}/rules")),
                body,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_security_group(&self, id: &str) -> Result<()> {
        self.delete(self.instance_url(&format!("/security_groups/{id}")))
            .await
    }

    // --- private networks (VPC, region-scoped) ---

    pub async fn get_private_network_by_name(&self, name: &str) -> Result<Option<ScwPrivateNetwork>> {
        let response: ScwPrivateNetworksResponse = self
            .get(self.vpc_url(&format!(
                "/private-networks?project_id={}&name={name}",
                self.project_id
            )))
            .await?;
        Ok(response
            .private_networks
            .into_iter()
            .find(|n| n.name == name))
    }

    pub async fn create_private_network(&self, name: &str, subnet: &str) -> Result<ScwPrivateNetwork> {
        let response: ScwPrivateNetwork = self
            .post(
                self.vpc_url("/private-networks"),
                serde_json::json!({
                    "name": name,
                    "project_id": self.project_id,
                    "subnets": [subnet],
                }),
            )
            .await?;
        Ok(response)
    }

    pub async fn delete_private_network(&self, id: &str) -> Result<()> {
        self.delete(self.vpc_url(&format!("/private-networks/{id}")))
            .await
    }

    // --- ssh keys (IAM, global) ---

    pub async fn get_ssh_key_by_name(&self, name: &str) -> Result<Option<ScwSshKey>> {
        let response: ScwSshKeysResponse = self
            .get(self.iam_url(&format!(
                "/ssh-keys?project_id={}&name={name}",
                self.project_id
            )))
            .await?;
        Ok(response.ssh_keys.into_iter().find(|k| k.name == name))
    }

    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<ScwSshKey> {
        let response: ScwSshKey = self
            .post(
                self.iam_url("/ssh-keys"),
                serde_json::json!({
                    "name": name,
                    "public_key": public_key,
                    "project_id": self.project_id,
                }),
            )
            .await?;
        Ok(response)
    }

    /// List commercial instance types available in the zone. Memoized by
    /// the provider layer.
    pub async fn list_server_types(&self) -> Result<Vec<String>> {
        let response: ScwServerTypesResponse =
            self.get(self.instance_url("/products/servers")).await?;
        Ok(response.servers.into_keys().collect())
    }
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct ScwErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ScwServersResponse {
    servers: Vec<ScwServer>,
}

#[derive(Debug, Deserialize)]
struct ScwServerResponse {
    server: ScwServer,
}

/// Server payload from the Scaleway Instance API.
#[derive(Debug, Clone, Deserialize)]
pub struct ScwServer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub commercial_type: String,
    pub public_ip: Option<ScwPublicIp>,
    #[serde(default)]
    pub private_nics: Vec<ScwPrivateNic>,
    pub image: Option<ScwImageRef>,
    pub zone: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub security_group: Option<ScwSecurityGroupRef>,
    pub creation_date: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwPublicIp {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwImageRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwSecurityGroupRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwPrivateNic {
    pub id: String,
    pub private_network_id: String,
    #[serde(default)]
    pub private_ips: Vec<ScwPrivateIp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwPrivateIp {
    pub address: String,
}

/// Server creation request body; `project` is injected by the client.
#[derive(Debug, Clone, Serialize)]
pub struct ScwCreateServer {
    pub name: String,
    pub commercial_type: String,
    pub image: String,
    pub dynamic_ip_required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScwPrivateNicsResponse {
    private_nics: Vec<ScwPrivateNic>,
}

#[derive(Debug, Deserialize)]
struct ScwPrivateNicResponse {
    private_nic: ScwPrivateNic,
}

#[derive(Debug, Deserialize)]
struct ScwSecurityGroupsResponse {
    security_groups: Vec<ScwSecurityGroup>,
}

#[derive(Debug, Deserialize)]
struct ScwSecurityGroupResponse {
    security_group: ScwSecurityGroup,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwSecurityGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScwSecurityGroupRule {
    /// "accept" or "drop".
    pub action: String,
    /// "inbound" or "outbound".
    pub direction: String,
    /// "TCP", "UDP", "ICMP" or "ANY".
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_port_from: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_port_to: Option<u16>,
    pub ip_range: String,
}

#[derive(Debug, Deserialize)]
struct ScwPrivateNetworksResponse {
    private_networks: Vec<ScwPrivateNetwork>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwPrivateNetwork {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<ScwSubnet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwSubnet {
    pub subnet: String,
}

#[derive(Debug, Deserialize)]
struct ScwSshKeysResponse {
    ssh_keys: Vec<ScwSshKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScwSshKey {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ScwServerTypesResponse {
    servers: std::collections::HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_derived_from_zone() {
        let api = ScalewayApi::new("secret", "project", "fr-par-1").unwrap();
        assert!(api.vpc_url("/private-networks").contains("/regions/fr-par/"));
        assert!(api.instance_url("/servers").contains("/zones/fr-par-1/"));
    }

    #[test]
    fn test_invalid_zone_rejected() {
        let err = ScalewayApi::new("secret", "project", "weird").unwrap_err();
        assert!(matches!(err, ScalewayError::InvalidZone(_)));
    }

    #[test]
    fn test_empty_secret_key_rejected() {
        let err = ScalewayApi::new("", "project", "fr-par-1").unwrap_err();
        assert!(matches!(err, ScalewayError::MissingCredentials(_)));
    }

    #[test]
    fn test_server_payload_decodes() {
        let json = serde_json::json!({
            "id": "11111111-2222-3333-4444-555555555555",
            "name": "armada-web-1",
            "state": "running",
            "commercial_type": "DEV1-M",
            "public_ip": { "address": "203.0.113.20" },
            "private_nics": [{
                "id": "nic-1",
                "private_network_id": "pn-1",
                "private_ips": [{ "address": "10.0.0.3" }]
            }],
            "image": { "name": "Ubuntu 24.04 Noble Numbat" },
            "zone": "fr-par-1",
            "tags": ["managed-by=armada"],
            "security_group": { "id": "sg-1" },
            "creation_date": "2026-01-05T09:00:00+00:00"
        });

        let server: ScwServer = serde_json::from_value(json).unwrap();
        assert_eq!(server.state, "running");
        assert_eq!(server.public_ip.unwrap().address, "203.0.113.20");
        assert_eq!(server.private_nics[0].private_ips[0].address, "10.0.0.3");
    }
}
