//! End-to-end reconciliation against an in-memory provider.
//!
//! Exercises the convergence properties that matter across runs: fresh
//! fleets, repeated runs, scale-up, scale-down with drain, and the
//! non-deletable master.

use armada_cloud::{
    AccountInfo, CloudError, ComputeProvider, CreateServerRequest, DetachOutcome, FirewallRecord,
    FirewallRule, NetworkRecord, ServerFilter, ServerRecord, ServerStatus, WaitOptions,
};
use armada_core::{
    CancellationToken, FleetConfig, ProviderCredentials, RecordingReporter, ServerGroup,
    SshKeyPair, Topology,
};
use armada_fleet::{
    DrainOutcome, NodeDrainer, Reconciler, ReconcileError, ServerKey, ServerSet,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    servers: HashMap<String, ServerRecord>,
    firewalls: HashMap<String, FirewallRecord>,
    networks: HashMap<String, NetworkRecord>,
    ssh_keys: HashMap<String, String>,
    next_id: u32,
    creates: u32,
    deletes: u32,
    events: Vec<String>,
}

/// In-memory provider with the same idempotent-by-name semantics as the
/// real clients.
#[derive(Default)]
struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn creates(&self) -> u32 {
        self.state.lock().unwrap().creates
    }

    fn deletes(&self) -> u32 {
        self.state.lock().unwrap().deletes
    }

    fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn has_network(&self, name: &str) -> bool {
        self.state.lock().unwrap().networks.contains_key(name)
    }

    fn has_ssh_key(&self, name: &str) -> bool {
        self.state.lock().unwrap().ssh_keys.contains_key(name)
    }

    fn has_firewall(&self, name: &str) -> bool {
        self.state.lock().unwrap().firewalls.contains_key(name)
    }

    fn record_event(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }

    fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .servers
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ComputeProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn validate_credentials(&self) -> armada_cloud::Result<AccountInfo> {
        Ok(AccountInfo {
            account: "mock@example.com".to_string(),
        })
    }

    async fn find_server(&self, name: &str) -> armada_cloud::Result<ServerRecord> {
        self.state
            .lock()
            .unwrap()
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found("server", name))
    }

    async fn find_or_create_server(
        &self,
        request: &CreateServerRequest,
        _wait: WaitOptions,
    ) -> armada_cloud::Result<ServerRecord> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.servers.get(&request.name) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        state.creates += 1;
        let n = state.next_id;
        let record = ServerRecord {
            id: format!("srv-{n}"),
            name: request.name.clone(),
            status: ServerStatus::Running,
            public_ipv4: Some(format!("203.0.113.{n}")),
            private_ipv4: request.network_id.as_ref().map(|_| format!("10.0.0.{n}")),
            instance_type: request.instance_type.clone(),
            image: request.image.clone(),
            location: request.location.clone(),
            labels: request.labels.clone(),
            created_at: Utc::now(),
        };
        state.servers.insert(request.name.clone(), record.clone());
        state.events.push(format!("create {}", request.name));
        Ok(record)
    }

    async fn list_servers(&self, filter: &ServerFilter) -> armada_cloud::Result<Vec<ServerRecord>> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<ServerRecord> = state
            .servers
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn delete_server(&self, id: &str) -> armada_cloud::Result<Vec<DetachOutcome>> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .servers
            .values()
            .find(|r| r.id == id)
            .map(|r| r.name.clone());
        if let Some(name) = name {
            state.servers.remove(&name);
            state.deletes += 1;
            state.events.push(format!("delete {name}"));
        }
        Ok(Vec::new())
    }

    async fn wait_for_server(
        &self,
        id: &str,
        _wait: WaitOptions,
    ) -> armada_cloud::Result<ServerRecord> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .values()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| CloudError::not_found("server", id))
    }

    async fn wait_for_server_deletion(&self, _id: &str) -> armada_cloud::Result<()> {
        Ok(())
    }

    async fn find_or_create_firewall(
        &self,
        name: &str,
        rules: &[FirewallRule],
    ) -> armada_cloud::Result<FirewallRecord> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .firewalls
            .entry(name.to_string())
            .or_insert_with(|| FirewallRecord {
                id: format!("fw-{name}"),
                name: name.to_string(),
                rules: rules.to_vec(),
            });
        Ok(record.clone())
    }

    async fn delete_firewall(&self, _id: &str) -> armada_cloud::Result<()> {
        Ok(())
    }

    async fn find_or_create_network(
        &self,
        name: &str,
        ip_range: &str,
    ) -> armada_cloud::Result<NetworkRecord> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .networks
            .entry(name.to_string())
            .or_insert_with(|| NetworkRecord {
                id: format!("net-{name}"),
                name: name.to_string(),
                ip_range: ip_range.to_string(),
            });
        Ok(record.clone())
    }

    async fn delete_network(&self, _id: &str) -> armada_cloud::Result<()> {
        Ok(())
    }

    async fn find_or_create_ssh_key(
        &self,
        name: &str,
        _public_key: &str,
    ) -> armada_cloud::Result<String> {
        let mut state = self.state.lock().unwrap();
        let id = state
            .ssh_keys
            .entry(name.to_string())
            .or_insert_with(|| format!("key-{name}"))
            .clone();
        Ok(id)
    }
}

/// Drainer that records which nodes it was asked to drain.
struct RecordingDrainer {
    provider: Arc<MockProvider>,
}

#[async_trait]
impl NodeDrainer for RecordingDrainer {
    async fn drain_and_remove(&self, node_name: &str) -> DrainOutcome {
        self.provider.record_event(format!("drain {node_name}"));
        DrainOutcome::Drained
    }
}

fn config(groups: &[(&str, u32)]) -> FleetConfig {
    FleetConfig {
        prefix: "armada".to_string(),
        environment: "production".to_string(),
        topology: Topology::new(
            groups
                .iter()
                .map(|(name, count)| ServerGroup {
                    name: name.to_string(),
                    instance_type: "cx22".to_string(),
                    count: *count,
                })
                .collect(),
        ),
        credentials: ProviderCredentials::Hetzner {
            api_token: "token".to_string(),
        },
        ssh_key: SshKeyPair {
            private_key_path: "/tmp/id_ed25519".to_string(),
            public_key: "ssh-ed25519 AAAA test".to_string(),
        },
        location: "nbg1".to_string(),
        image: "ubuntu-24.04".to_string(),
    }
}

fn reconciler(provider: Arc<MockProvider>, groups: &[(&str, u32)]) -> Reconciler {
    Reconciler::new(provider, config(groups)).without_ssh_wait()
}

async fn converge(provider: &Arc<MockProvider>, groups: &[(&str, u32)]) -> ServerSet {
    reconciler(provider.clone(), groups).run().await.unwrap()
}

#[tokio::test]
async fn test_fresh_fleet_creates_everything() {
    let provider = MockProvider::new();
    let set = converge(&provider, &[("web", 2), ("worker", 1)]).await;

    assert_eq!(set.len(), 3);
    assert_eq!(provider.creates(), 3);
    assert_eq!(provider.deletes(), 0);

    let master = set.master().unwrap();
    assert_eq!(master.key, ServerKey::new("web", 1));
    assert!(set.is_new(&master.key));

    let workers: Vec<_> = set.workers().map(|e| e.key.clone()).collect();
    assert_eq!(
        workers,
        vec![ServerKey::new("web", 2), ServerKey::new("worker", 1)]
    );
    assert_eq!(
        provider.server_names(),
        vec!["armada-web-1", "armada-web-2", "armada-worker-1"]
    );

    // Multi-node fleets get the shared private network.
    assert!(provider.has_network("armada-network"));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let provider = MockProvider::new();
    let first = converge(&provider, &[("web", 2), ("worker", 1)]).await;
    let second = converge(&provider, &[("web", 2), ("worker", 1)]).await;

    assert_eq!(provider.creates(), 3);
    assert_eq!(provider.deletes(), 0);
    assert!(second.new_keys().is_empty());

    // Identities and addresses are stable across runs.
    for entry in first.iter() {
        let again = second.get(&entry.key).unwrap();
        assert_eq!(again.id, entry.id);
        assert_eq!(again.public_ip, entry.public_ip);
    }
}

#[tokio::test]
async fn test_scale_down_deletes_highest_indices_first() {
    let provider = MockProvider::new();
    converge(&provider, &[("app", 3), ("db", 1)]).await;

    let set = converge(&provider, &[("app", 1), ("db", 1)]).await;

    assert_eq!(provider.deletes(), 2);
    assert_eq!(set.len(), 2);
    assert!(set.new_keys().is_empty());
    assert_eq!(set.master().unwrap().key, ServerKey::new("app", 1));

    let deletions: Vec<String> = provider
        .events()
        .into_iter()
        .filter(|e| e.starts_with("delete "))
        .collect();
    assert_eq!(
        deletions,
        vec!["delete armada-app-3", "delete armada-app-2"]
    );
}

#[tokio::test]
async fn test_scale_up_creates_only_missing_indices() {
    let provider = MockProvider::new();
    let before = converge(&provider, &[("app", 1)]).await;
    let master_id = before.master().unwrap().id.clone();

    let after = converge(&provider, &[("app", 3)]).await;

    assert_eq!(provider.creates(), 3);
    assert_eq!(provider.deletes(), 0);
    assert_eq!(after.len(), 3);
    assert_eq!(after.master().unwrap().id, master_id);
    assert!(!after.is_new(&ServerKey::new("app", 1)));
    assert!(after.is_new(&ServerKey::new("app", 2)));
    assert!(after.is_new(&ServerKey::new("app", 3)));
}

#[tokio::test]
async fn test_master_survives_every_topology_change() {
    let provider = MockProvider::new();
    let first = converge(&provider, &[("web", 3), ("db", 2)]).await;
    let master_id = first.master().unwrap().id.clone();

    let second = converge(&provider, &[("web", 1), ("db", 0)]).await;
    assert_eq!(second.master().unwrap().id, master_id);

    let third = converge(&provider, &[("web", 2), ("db", 1)]).await;
    assert_eq!(third.master().unwrap().id, master_id);
}

#[tokio::test]
async fn test_scaling_first_group_to_zero_fails() {
    let provider = MockProvider::new();
    converge(&provider, &[("web", 1), ("db", 1)]).await;

    let err = reconciler(provider.clone(), &[("web", 0), ("db", 1)])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::MasterDeletion { .. }));
    // Nothing was touched.
    assert_eq!(provider.deletes(), 0);
    assert_eq!(
        provider.server_names(),
        vec!["armada-db-1", "armada-web-1"]
    );
}

#[tokio::test]
async fn test_rejected_plan_provisions_nothing() {
    // The diff runs before shared-resource provisioning, so a plan that
    // would delete the master leaves a pristine account pristine.
    let provider = MockProvider::new();
    let err = reconciler(provider.clone(), &[("web", 0), ("db", 1)])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::MasterDeletion { .. }));
    assert_eq!(provider.creates(), 0);
    assert!(!provider.has_ssh_key("armada"));
    assert!(!provider.has_firewall("armada-firewall"));
    assert!(!provider.has_network("armada-network"));
}

#[tokio::test]
async fn test_single_node_fleet_skips_private_network() {
    let provider = MockProvider::new();
    let set = converge(&provider, &[("master", 1)]).await;

    assert_eq!(set.len(), 1);
    assert!(!provider.has_network("armada-network"));
    assert_eq!(set.master().unwrap().private_ip, None);
}

#[tokio::test]
async fn test_drain_runs_before_each_deletion() {
    let provider = MockProvider::new();
    converge(&provider, &[("app", 3)]).await;

    let drainer = Arc::new(RecordingDrainer {
        provider: provider.clone(),
    });
    let reporter = Arc::new(RecordingReporter::new());
    Reconciler::new(provider.clone(), config(&[("app", 1)]))
        .without_ssh_wait()
        .with_drainer(drainer)
        .with_reporter(reporter.clone())
        .run()
        .await
        .unwrap();

    let events: Vec<String> = provider
        .events()
        .into_iter()
        .filter(|e| !e.starts_with("create "))
        .collect();
    assert_eq!(
        events,
        vec![
            "drain armada-app-3",
            "delete armada-app-3",
            "drain armada-app-2",
            "delete armada-app-2",
        ]
    );
    assert!(reporter.failed_steps().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_touches_nothing() {
    let provider = MockProvider::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reconciler(provider.clone(), &[("web", 2)])
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled(_)));
    assert_eq!(provider.creates(), 0);
    assert!(!provider.has_ssh_key("armada"));
}

#[tokio::test]
async fn test_servers_outside_managed_naming_are_untouched() {
    let provider = MockProvider::new();

    // A server someone created by hand, inside the prefix but outside the
    // declared groups.
    let stray = CreateServerRequest {
        name: "armada-bastion-1".to_string(),
        instance_type: "cx22".to_string(),
        image: "ubuntu-24.04".to_string(),
        location: "nbg1".to_string(),
        ssh_key_ids: Vec::new(),
        firewall_id: None,
        network_id: None,
        user_data: None,
        labels: HashMap::new(),
    };
    provider
        .find_or_create_server(&stray, WaitOptions::default())
        .await
        .unwrap();

    let set = converge(&provider, &[("web", 1)]).await;

    assert_eq!(set.len(), 1);
    assert!(provider
        .server_names()
        .contains(&"armada-bastion-1".to_string()));
}
