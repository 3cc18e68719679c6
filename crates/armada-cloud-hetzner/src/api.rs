//! Raw Hetzner Cloud API client
//!
//! Thin wrapper over the REST endpoints we use: servers, firewalls,
//! networks and SSH keys. Pagination and error classification happen
//! here; normalization into `armada-cloud` records happens in
//! [`crate::provider`].

use crate::error::{HetznerError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";
const PER_PAGE: u32 = 50;

/// Hetzner Cloud API client
#[derive(Debug)]
pub struct HetznerApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HetznerApi {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(HetznerError::MissingToken);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        })
    }

    /// Point the client at a different endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "hetzner api request");

        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(HetznerError::Unauthorized);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(HetznerError::not_found("resource", path));
        }
        if !status.is_success() {
            let message = response
                .json::<HzErrorResponse>()
                .await
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(HetznerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        if text.is_empty() {
            // DELETE endpoints may answer 204 with no body.
            return serde_json::from_str("null")
                .map_err(|e| HetznerError::Decode(e.to_string()));
        }
        serde_json::from_str(&text).map_err(|e| HetznerError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let _: serde_json::Value = self.request(reqwest::Method::DELETE, path, None).await?;
        Ok(())
    }

    // --- servers ---

    /// List every server, walking pagination.
    pub async fn list_servers(&self) -> Result<Vec<HzServer>> {
        let mut servers = Vec::new();
        let mut page = 1u32;
        loop {
            let response: HzServersResponse = self
                .get(&format!("/servers?page={page}&per_page={PER_PAGE}"))
                .await?;
            servers.extend(response.servers);
            match response.meta.and_then(|m| m.pagination.next_page) {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(servers)
    }

    /// Exact-name lookup.
    pub async fn get_server_by_name(&self, name: &str) -> Result<Option<HzServer>> {
        let response: HzServersResponse = self.get(&format!("/servers?name={name}")).await?;
        Ok(response.servers.into_iter().find(|s| s.name == name))
    }

    pub async fn get_server(&self, id: i64) -> Result<Option<HzServer>> {
        match self.get::<HzServerResponse>(&format!("/servers/{id}")).await {
            Ok(response) => Ok(Some(response.server)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_server(&self, request: &HzCreateServer) -> Result<HzServer> {
        let body = serde_json::to_value(request).map_err(|e| HetznerError::Decode(e.to_string()))?;
        let response: HzServerResponse = self.post("/servers", body).await?;
        Ok(response.server)
    }

    pub async fn delete_server(&self, id: i64) -> Result<()> {
        self.delete(&format!("/servers/{id}")).await
    }

    // --- firewalls ---

    pub async fn get_firewall_by_name(&self, name: &str) -> Result<Option<HzFirewall>> {
        let response: HzFirewallsResponse = self.get(&format!("/firewalls?name={name}")).await?;
        Ok(response.firewalls.into_iter().find(|f| f.name == name))
    }

    pub async fn create_firewall(&self, name: &str, rules: Vec<HzFirewallRule>) -> Result<HzFirewall> {
        let response: HzFirewallResponse = self
            .post(
                "/firewalls",
                serde_json::json!({ "name": name, "rules": rules }),
            )
            .await?;
        Ok(response.firewall)
    }

    pub async fn delete_firewall(&self, id: i64) -> Result<()> {
        self.delete(&format!("/firewalls/{id}")).await
    }

    /// Remove the firewall from a server.
    pub async fn remove_firewall_from_server(&self, firewall_id: i64, server_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                &format!("/firewalls/{firewall_id}/actions/remove_from_resources"),
                serde_json::json!({
                    "remove_from": [{ "type": "server", "server": { "id": server_id } }]
                }),
            )
            .await?;
        Ok(())
    }

    // --- networks ---

    pub async fn get_network_by_name(&self, name: &str) -> Result<Option<HzNetwork>> {
        let response: HzNetworksResponse = self.get(&format!("/networks?name={name}")).await?;
        Ok(response.networks.into_iter().find(|n| n.name == name))
    }

    pub async fn create_network(&self, name: &str, ip_range: &str) -> Result<HzNetwork> {
        let response: HzNetworkResponse = self
            .post(
                "/networks",
                serde_json::json!({
                    "name": name,
                    "ip_range": ip_range,
                    "subnets": [{
                        "type": "cloud",
                        "ip_range": ip_range,
                        "network_zone": "eu-central",
                    }],
                }),
            )
            .await?;
        Ok(response.network)
    }

    pub async fn delete_network(&self, id: i64) -> Result<()> {
        self.delete(&format!("/networks/{id}")).await
    }

    pub async fn detach_server_from_network(&self, server_id: i64, network_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                &format!("/servers/{server_id}/actions/detach_from_network"),
                serde_json::json!({ "network": network_id }),
            )
            .await?;
        Ok(())
    }

    // --- ssh keys ---

    pub async fn get_ssh_key_by_name(&self, name: &str) -> Result<Option<HzSshKey>> {
        let response: HzSshKeysResponse = self.get(&format!("/ssh_keys?name={name}")).await?;
        Ok(response.ssh_keys.into_iter().find(|k| k.name == name))
    }

    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<HzSshKey> {
        let response: HzSshKeyResponse = self
            .post(
                "/ssh_keys",
                serde_json::json!({ "name": name, "public_key": public_key }),
            )
            .await?;
        Ok(response.ssh_key)
    }

    // --- server types ---

    /// List server types. Result is memoized by the provider layer.
    pub async fn list_server_types(&self) -> Result<Vec<HzServerType>> {
        let response: HzServerTypesResponse = self.get("/server_types?per_page=50").await?;
        Ok(response.server_types)
    }
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct HzErrorResponse {
    error: HzErrorBody,
}

#[derive(Debug, Deserialize)]
struct HzErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct HzMeta {
    pagination: HzPagination,
}

#[derive(Debug, Deserialize)]
struct HzPagination {
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct HzServersResponse {
    servers: Vec<HzServer>,
    meta: Option<HzMeta>,
}

#[derive(Debug, Deserialize)]
struct HzServerResponse {
    server: HzServer,
}

/// Server payload from the Hetzner API.
#[derive(Debug, Clone, Deserialize)]
pub struct HzServer {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub public_net: HzPublicNet,
    #[serde(default)]
    pub private_net: Vec<HzPrivateNet>,
    pub server_type: HzServerTypeRef,
    pub image: Option<HzImageRef>,
    pub datacenter: HzDatacenter,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzPublicNet {
    pub ipv4: Option<HzIpv4>,
    #[serde(default)]
    pub firewalls: Vec<HzFirewallRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzIpv4 {
    pub ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzFirewallRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzPrivateNet {
    pub network: i64,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzServerTypeRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzImageRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzDatacenter {
    pub location: HzLocation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzLocation {
    pub name: String,
}

/// Server creation request body.
#[derive(Debug, Clone, Serialize)]
pub struct HzCreateServer {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub location: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub firewalls: Vec<HzFirewallAttachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HzFirewallAttachment {
    pub firewall: i64,
}

#[derive(Debug, Deserialize)]
struct HzFirewallsResponse {
    firewalls: Vec<HzFirewall>,
}

#[derive(Debug, Deserialize)]
struct HzFirewallResponse {
    firewall: HzFirewall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzFirewall {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<HzFirewallRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HzFirewallRule {
    pub direction: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub source_ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HzNetworksResponse {
    networks: Vec<HzNetwork>,
}

#[derive(Debug, Deserialize)]
struct HzNetworkResponse {
    network: HzNetwork,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzNetwork {
    pub id: i64,
    pub name: String,
    pub ip_range: String,
}

#[derive(Debug, Deserialize)]
struct HzSshKeysResponse {
    ssh_keys: Vec<HzSshKey>,
}

#[derive(Debug, Deserialize)]
struct HzSshKeyResponse {
    ssh_key: HzSshKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzSshKey {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct HzServerTypesResponse {
    server_types: Vec<HzServerType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HzServerType {
    pub id: i64,
    pub name: String,
    pub cores: u32,
    pub memory: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_payload_decodes() {
        let json = serde_json::json!({
            "id": 42,
            "name": "armada-web-1",
            "status": "running",
            "public_net": {
                "ipv4": { "ip": "203.0.113.10" },
                "firewalls": [{ "id": 7, "status": "applied" }]
            },
            "private_net": [{ "network": 9, "ip": "10.0.0.2" }],
            "server_type": { "name": "cx22" },
            "image": { "name": "ubuntu-24.04" },
            "datacenter": { "location": { "name": "fsn1" } },
            "labels": { "managed-by": "armada" },
            "created": "2026-01-05T09:00:00+00:00"
        });

        let server: HzServer = serde_json::from_value(json).unwrap();
        assert_eq!(server.id, 42);
        assert_eq!(server.public_net.ipv4.unwrap().ip, "203.0.113.10");
        assert_eq!(server.private_net[0].network, 9);
        assert_eq!(server.labels["managed-by"], "armada");
    }

    #[test]
    fn test_create_body_omits_empty_fields() {
        let request = HzCreateServer {
            name: "armada-web-1".to_string(),
            server_type: "cx22".to_string(),
            image: "ubuntu-24.04".to_string(),
            location: "fsn1".to_string(),
            ssh_keys: Vec::new(),
            firewalls: Vec::new(),
            networks: Vec::new(),
            user_data: None,
            labels: HashMap::new(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("ssh_keys").is_none());
        assert!(value.get("user_data").is_none());
    }
}
