//! Fleet reconciler
//!
//! Converges live provider state toward the declared topology: lists
//! managed servers by name prefix, diffs against the expanded desired
//! keys, creates what is missing (bounded fan-out), drains and deletes
//! what is extraneous, and assembles the canonical [`ServerSet`].

use crate::cloud_init;
use crate::error::{ReconcileError, Result};
use crate::key::ServerKey;
use crate::set::{ServerSet, ServerSetEntry};
use armada_cloud::{
    ComputeProvider, CreateServerRequest, FirewallRule, ServerFilter, ServerRecord, WaitOptions,
};
use armada_core::{
    CancellationToken, FleetConfig, ServerGroup, StepReporter, Topology, TracingReporter,
    with_cancellation,
};
use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_CONCURRENCY: usize = 4;
const NETWORK_IP_RANGE: &str = "10.0.0.0/16";

/// Outcome of a best-effort node drain before deletion.
///
/// Drain failures are recorded and *swallowed*: convergence of the fleet
/// takes precedence over guaranteed graceful eviction, so deletion
/// proceeds regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    Skipped { reason: String },
    Failed { message: String },
}

/// Drains a cluster node ahead of server deletion.
///
/// Implemented by the cluster-control client; reconciliation of a fleet
/// with no cluster yet uses [`NoopDrainer`].
#[async_trait]
pub trait NodeDrainer: Send + Sync {
    async fn drain_and_remove(&self, node_name: &str) -> DrainOutcome;
}

/// Drainer for fleets without a reachable cluster.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDrainer;

#[async_trait]
impl NodeDrainer for NoopDrainer {
    async fn drain_and_remove(&self, _node_name: &str) -> DrainOutcome {
        DrainOutcome::Skipped {
            reason: "no cluster to drain".to_string(),
        }
    }
}

/// Shared per-prefix resources attached to every managed server.
#[derive(Debug, Clone)]
struct SharedResources {
    ssh_key_id: String,
    firewall_id: String,
    network_id: Option<String>,
}

/// Result of a reconciliation diff, before any provider mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diff {
    pub to_create: Vec<ServerKey>,
    pub to_delete: Vec<ServerKey>,
    pub unchanged: Vec<ServerKey>,
}

/// Compute desired vs existing keys.
///
/// `to_delete` is ordered highest index first within each group so the
/// surviving set stays dense and low indices (the master in particular)
/// are never touched by a scale-down.
pub(crate) fn compute_diff(topology: &Topology, existing: &HashSet<ServerKey>) -> Result<Diff> {
    let mut desired: Vec<ServerKey> = Vec::new();
    for group in &topology.groups {
        for index in 1..=group.count {
            desired.push(ServerKey::new(group.name.clone(), index));
        }
    }
    let desired_set: HashSet<&ServerKey> = desired.iter().collect();

    let to_create: Vec<ServerKey> = desired
        .iter()
        .filter(|k| !existing.contains(k))
        .cloned()
        .collect();
    let unchanged: Vec<ServerKey> = desired
        .iter()
        .filter(|k| existing.contains(k))
        .cloned()
        .collect();

    let mut to_delete: Vec<ServerKey> =
        existing.iter().filter(|k| !desired_set.contains(k)).cloned().collect();
    // Group declaration order, then highest index first.
    let group_order = |key: &ServerKey| {
        topology
            .groups
            .iter()
            .position(|g| g.name == key.group)
            .unwrap_or(usize::MAX)
    };
    to_delete.sort_by(|a, b| {
        group_order(a)
            .cmp(&group_order(b))
            .then_with(|| a.group.cmp(&b.group))
            .then_with(|| b.index.cmp(&a.index))
    });

    if let Some(first_group) = topology.first_group() {
        let master = ServerKey::new(first_group.name.clone(), 1);
        // A first group with zero replicas leaves the topology without a
        // control plane; whether or not the master currently exists, that
        // is an invariant violation, not a scale-down.
        if first_group.count == 0 || to_delete.contains(&master) {
            return Err(ReconcileError::MasterDeletion { key: master });
        }
    }

    Ok(Diff {
        to_create,
        to_delete,
        unchanged,
    })
}

/// Fleet reconciler
pub struct Reconciler {
    provider: Arc<dyn ComputeProvider>,
    drainer: Arc<dyn NodeDrainer>,
    reporter: Arc<dyn StepReporter>,
    config: FleetConfig,
    cancel: CancellationToken,
    concurrency: usize,
    wait_for_ssh: bool,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn ComputeProvider>, config: FleetConfig) -> Self {
        Self {
            provider,
            drainer: Arc::new(NoopDrainer),
            reporter: Arc::new(TracingReporter),
            config,
            cancel: CancellationToken::new(),
            concurrency: DEFAULT_CONCURRENCY,
            wait_for_ssh: true,
        }
    }

    /// Abort the run when `cancel` fires, wherever it happens to be
    /// waiting.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_drainer(mut self, drainer: Arc<dyn NodeDrainer>) -> Self {
        self.drainer = drainer;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StepReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Skip the post-create SSH reachability wait. Used by tests.
    pub fn without_ssh_wait(mut self) -> Self {
        self.wait_for_ssh = false;
        self
    }

    /// The master key for this topology: index 1 of the first group.
    pub fn master_key(&self) -> Option<ServerKey> {
        self.config
            .topology
            .first_group()
            .map(|g| ServerKey::new(g.name.clone(), 1))
    }

    /// Run one reconciliation pass and return the canonical server set.
    pub async fn run(&self) -> Result<ServerSet> {
        let set = with_cancellation(&self.cancel, "fleet reconciliation", self.converge()).await??;
        Ok(set)
    }

    async fn converge(&self) -> Result<ServerSet> {
        self.config.validate()?;
        let master_key = self
            .master_key()
            .expect("validated topology has a first group");

        // Observe and diff before touching anything, so an invalid plan
        // (a master deletion in particular) leaves the account as found.
        let existing = self.observe().await?;
        let existing_keys: HashSet<ServerKey> = existing.keys().cloned().collect();
        let diff = compute_diff(&self.config.topology, &existing_keys)?;

        tracing::info!(
            create = diff.to_create.len(),
            delete = diff.to_delete.len(),
            unchanged = diff.unchanged.len(),
            "reconciliation plan"
        );

        let shared = self.ensure_shared_resources().await?;
        let created = self.create_servers(&diff.to_create, &shared).await?;
        self.delete_servers(&diff.to_delete, &existing).await?;

        let mut entries = Vec::new();
        for key in &diff.unchanged {
            // Unchanged keys keep their observed record (same id, same
            // IPs), which is what makes repeated runs stable.
            entries.push(self.entry_for(key, &existing[key])?);
        }
        let mut new_keys = HashSet::new();
        for (key, record) in &created {
            entries.push(self.entry_for(key, record)?);
            new_keys.insert(key.clone());
        }

        let set = ServerSet::assemble(entries, &master_key, new_keys);

        if self.wait_for_ssh {
            self.wait_for_new_servers(&set).await?;
        }

        Ok(set)
    }

    fn entry_for(&self, key: &ServerKey, record: &ServerRecord) -> Result<ServerSetEntry> {
        let public_ip = record
            .public_ipv4
            .clone()
            .ok_or_else(|| ReconcileError::MissingPublicIp { key: key.clone() })?;
        Ok(ServerSetEntry {
            key: key.clone(),
            id: record.id.clone(),
            public_ip,
            private_ip: record.private_ipv4.clone(),
        })
    }

    /// Idempotently create the per-prefix SSH key, firewall and (for
    /// multi-node topologies) private network.
    async fn ensure_shared_resources(&self) -> Result<SharedResources> {
        let step = "provision shared resources";
        self.reporter.step_started(step);
        let start = Instant::now();

        let result: Result<SharedResources> = async {
            let ssh_key_id = self
                .provider
                .find_or_create_ssh_key(&self.config.prefix, &self.config.ssh_key.public_key)
                .await?;

            let firewall = self
                .provider
                .find_or_create_firewall(
                    &format!("{}-firewall", self.config.prefix),
                    &firewall_rules(),
                )
                .await?;

            let network_id = if self.config.topology.is_single_node() {
                None
            } else {
                let network = self
                    .provider
                    .find_or_create_network(
                        &format!("{}-network", self.config.prefix),
                        NETWORK_IP_RANGE,
                    )
                    .await?;
                Some(network.id)
            };

            Ok(SharedResources {
                ssh_key_id,
                firewall_id: firewall.id,
                network_id,
            })
        }
        .await;

        self.finish_step(step, start, &result);
        result
    }

    /// List managed servers and parse their names into keys. Servers whose
    /// names do not parse are unmanaged and invisible to reconciliation.
    async fn observe(&self) -> Result<HashMap<ServerKey, ServerRecord>> {
        let filter = ServerFilter::by_prefix(format!("{}-", self.config.prefix));
        let records = self.provider.list_servers(&filter).await?;

        let group_names: Vec<String> = self
            .config
            .topology
            .groups
            .iter()
            .map(|g| g.name.clone())
            .collect();

        let mut existing = HashMap::new();
        for record in records {
            match ServerKey::from_server_name(&record.name, &self.config.prefix, &group_names) {
                Some(key) => {
                    existing.insert(key, record);
                }
                None => {
                    tracing::debug!(name = %record.name, "ignoring server outside managed naming");
                }
            }
        }
        Ok(existing)
    }

    /// Create every missing server with a bounded concurrent fan-out,
    /// reducing results afterwards instead of mutating shared state.
    async fn create_servers(
        &self,
        to_create: &[ServerKey],
        shared: &SharedResources,
    ) -> Result<Vec<(ServerKey, ServerRecord)>> {
        let mut created = Vec::new();
        for chunk in to_create.chunks(self.concurrency) {
            let mut inflight = FuturesUnordered::new();
            for key in chunk {
                inflight.push(self.create_one(key.clone(), shared));
            }
            while let Some(result) = inflight.next().await {
                created.push(result?);
            }
        }
        // Stable output order regardless of completion order.
        created.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(created)
    }

    async fn create_one(
        &self,
        key: ServerKey,
        shared: &SharedResources,
    ) -> Result<(ServerKey, ServerRecord)> {
        let group = self
            .config
            .topology
            .get(&key.group)
            .expect("create keys come from declared groups");

        let step = format!("create server {key}");
        self.reporter.step_started(&step);
        let start = Instant::now();

        let result = self.provider_create(&key, group, shared).await;
        self.finish_step(&step, start, &result);
        result.map(|record| (key, record))
    }

    async fn provider_create(
        &self,
        key: &ServerKey,
        group: &ServerGroup,
        shared: &SharedResources,
    ) -> Result<ServerRecord> {
        let mut labels = HashMap::new();
        labels.insert("managed-by".to_string(), "armada".to_string());
        labels.insert("environment".to_string(), self.config.environment.clone());
        labels.insert("group".to_string(), key.group.clone());

        let request = CreateServerRequest {
            name: key.server_name(&self.config.prefix),
            instance_type: group.instance_type.clone(),
            image: self.config.image.clone(),
            location: self.config.location.clone(),
            ssh_key_ids: vec![shared.ssh_key_id.clone()],
            firewall_id: Some(shared.firewall_id.clone()),
            network_id: shared.network_id.clone(),
            user_data: Some(cloud_init::user_data(&self.config.environment)),
            labels,
        };

        let record = self
            .provider
            .find_or_create_server(&request, WaitOptions::default())
            .await?;
        Ok(record)
    }

    /// Drain and delete extraneous servers, highest indices first.
    ///
    /// The drain is best-effort: its outcome is recorded and reconciliation
    /// proceeds to deletion either way.
    async fn delete_servers(
        &self,
        to_delete: &[ServerKey],
        existing: &HashMap<ServerKey, ServerRecord>,
    ) -> Result<()> {
        for key in to_delete {
            let record = &existing[key];
            let node_name = &record.name;

            let outcome = self.drainer.drain_and_remove(node_name).await;
            match &outcome {
                DrainOutcome::Drained => {
                    tracing::info!(node = %node_name, "node drained")
                }
                DrainOutcome::Skipped { reason } => {
                    tracing::debug!(node = %node_name, %reason, "drain skipped")
                }
                DrainOutcome::Failed { message } => {
                    tracing::warn!(node = %node_name, %message, "drain failed, deleting anyway")
                }
            }

            let step = format!("delete server {key}");
            self.reporter.step_started(&step);
            let start = Instant::now();
            let result = self
                .provider
                .delete_server(&record.id)
                .await
                .map_err(ReconcileError::from);
            self.finish_step(&step, start, &result);
            result?;
        }
        Ok(())
    }

    /// Block until every newly created server accepts SSH.
    async fn wait_for_new_servers(&self, set: &ServerSet) -> Result<()> {
        for entry in set.iter().filter(|e| set.is_new(&e.key)) {
            let step = format!("wait for ssh on {}", entry.key);
            self.reporter.step_started(&step);
            let start = Instant::now();

            let client = armada_ssh::SshClient::new(
                entry.public_ip.clone(),
                self.config.ssh_key.private_key_path.clone(),
            );
            let result = client.wait_for_ssh().await.map_err(ReconcileError::from);
            self.finish_step(&step, start, &result);
            result?;
        }
        Ok(())
    }

    fn finish_step<T>(&self, step: &str, start: Instant, result: &Result<T>) {
        match result {
            Ok(_) => self.reporter.step_succeeded(step, start.elapsed()),
            Err(e) => self.reporter.step_failed(step, &e.to_string(), start.elapsed()),
        }
    }
}

/// Inbound rules for the shared firewall: SSH, HTTP(S), the cluster API
/// and the encrypted overlay port.
fn firewall_rules() -> Vec<FirewallRule> {
    vec![
        FirewallRule::tcp("22"),
        FirewallRule::tcp("80"),
        FirewallRule::tcp("443"),
        FirewallRule::tcp("6443"),
        FirewallRule {
            protocol: "udp".to_string(),
            port: Some("51820".to_string()),
            source_ips: vec![NETWORK_IP_RANGE.to_string()],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(groups: &[(&str, u32)]) -> Topology {
        Topology::new(
            groups
                .iter()
                .map(|(name, count)| ServerGroup {
                    name: name.to_string(),
                    instance_type: "cx22".to_string(),
                    count: *count,
                })
                .collect(),
        )
    }

    fn keys(pairs: &[(&str, u32)]) -> HashSet<ServerKey> {
        pairs.iter().map(|(g, i)| ServerKey::new(*g, *i)).collect()
    }

    #[test]
    fn test_diff_empty_account_creates_everything() {
        let diff = compute_diff(&topology(&[("web", 2), ("worker", 1)]), &HashSet::new()).unwrap();
        assert_eq!(
            diff.to_create,
            vec![
                ServerKey::new("web", 1),
                ServerKey::new("web", 2),
                ServerKey::new("worker", 1),
            ]
        );
        assert!(diff.to_delete.is_empty());
        assert!(diff.unchanged.is_empty());
    }

    #[test]
    fn test_diff_scale_down_removes_highest_indices_first() {
        let existing = keys(&[("app", 1), ("app", 2), ("app", 3), ("db", 1)]);
        let diff = compute_diff(&topology(&[("app", 1), ("db", 1)]), &existing).unwrap();
        assert_eq!(
            diff.to_delete,
            vec![ServerKey::new("app", 3), ServerKey::new("app", 2)]
        );
        assert_eq!(
            diff.unchanged,
            vec![ServerKey::new("app", 1), ServerKey::new("db", 1)]
        );
        assert!(diff.to_create.is_empty());
    }

    #[test]
    fn test_diff_scale_up_creates_only_missing_indices() {
        let existing = keys(&[("app", 1)]);
        let diff = compute_diff(&topology(&[("app", 3)]), &existing).unwrap();
        assert_eq!(
            diff.to_create,
            vec![ServerKey::new("app", 2), ServerKey::new("app", 3)]
        );
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn test_diff_refuses_to_delete_master() {
        // First group scaled to zero: its index 1 is the master, and the
        // diff must raise instead of inventing a promotion policy.
        let existing = keys(&[("web", 1), ("web", 2), ("db", 1)]);
        let err = compute_diff(&topology(&[("web", 0), ("db", 1)]), &existing).unwrap_err();
        assert!(matches!(err, ReconcileError::MasterDeletion { .. }));
    }

    #[test]
    fn test_diff_scale_to_zero_of_secondary_group() {
        let existing = keys(&[("web", 1), ("worker", 1), ("worker", 2)]);
        let diff = compute_diff(&topology(&[("web", 1), ("worker", 0)]), &existing).unwrap();
        assert_eq!(
            diff.to_delete,
            vec![ServerKey::new("worker", 2), ServerKey::new("worker", 1)]
        );
        assert_eq!(diff.unchanged, vec![ServerKey::new("web", 1)]);
    }

    #[test]
    fn test_firewall_rules_cover_cluster_ports() {
        let rules = firewall_rules();
        let ports: Vec<_> = rules.iter().filter_map(|r| r.port.as_deref()).collect();
        assert!(ports.contains(&"22"));
        assert!(ports.contains(&"6443"));
        assert!(ports.contains(&"51820"));
    }
}
