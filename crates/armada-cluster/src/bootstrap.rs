//! Cluster bootstrapper
//!
//! Turns a reconciled [`ServerSet`] into a joined k3s cluster. Roles are
//! positional: the first entry hosts the control plane, every other entry
//! joins as a worker. Single-node fleets take a fast path that never
//! touches the private network.
//!
//! The control plane must be fully up (token issued, kubectl reachable)
//! before any worker join starts; workers then bootstrap concurrently
//! and independently.

use crate::control::ClusterControl;
use crate::error::{ClusterError, Result};
use armada_core::{
    CancellationToken, FleetConfig, StepReporter, TracingReporter, retry_with_backoff,
    with_cancellation,
};
use armada_fleet::{ServerSet, ServerSetEntry};
use armada_ssh::{CommandRunner, SshClient, SshError};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_READY_ATTEMPTS: u32 = 60;
const DEFAULT_READY_INTERVAL: Duration = Duration::from_secs(5);

const INSTALLER_URL: &str = "https://get.k3s.io";
const INSTALLER_PATH: &str = "/tmp/k3s-install.sh";
const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
const GROUP_LABEL: &str = "armada/group";

/// Control-plane bootstrap phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlanePhase {
    AwaitingCloudInit,
    NetworkDiscovered,
    EngineInstalled,
    OrchestratorInstalled,
    TokenIssued,
    KubeConfigReady,
    RegistryAndIngressDeployed,
    NodeLabeled,
}

impl ControlPlanePhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCloudInit => "awaiting-cloud-init",
            Self::NetworkDiscovered => "network-discovered",
            Self::EngineInstalled => "engine-installed",
            Self::OrchestratorInstalled => "orchestrator-installed",
            Self::TokenIssued => "token-issued",
            Self::KubeConfigReady => "kube-config-ready",
            Self::RegistryAndIngressDeployed => "registry-and-ingress-deployed",
            Self::NodeLabeled => "node-labeled",
        }
    }
}

/// Worker bootstrap phases, in order. Run once per non-master entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    AwaitingCloudInit,
    NetworkDiscovered,
    Joined,
    Ready,
    NodeLabeled,
}

impl WorkerPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCloudInit => "awaiting-cloud-init",
            Self::NetworkDiscovered => "network-discovered",
            Self::Joined => "joined",
            Self::Ready => "ready",
            Self::NodeLabeled => "node-labeled",
        }
    }
}

/// A host's presence on the shared private network.
#[derive(Debug, Clone)]
struct PrivateEndpoint {
    ip: String,
    interface: String,
}

/// What the control-plane bootstrap hands to worker joins.
struct ControlPlane {
    token: String,
    kubeconfig: String,
    endpoint: Option<PrivateEndpoint>,
}

/// The bootstrapped cluster, handed to deploy/build components.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub server_set: ServerSet,

    /// Control-plane public address; also the API server address in
    /// [`Self::kubeconfig`].
    pub public_ip: String,

    /// Control-plane address on the private network; `None` for
    /// single-node fleets.
    pub private_ip: Option<String>,

    /// Admin kubeconfig, rewritten to the public address.
    pub kubeconfig: String,
}

/// Cluster bootstrapper
pub struct Bootstrapper {
    config: FleetConfig,
    reporter: Arc<dyn StepReporter>,
    runner: Option<Arc<dyn CommandRunner>>,
    cancel: CancellationToken,
    concurrency: usize,
    ready_attempts: u32,
    ready_interval: Duration,
}

impl Bootstrapper {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(TracingReporter),
            runner: None,
            cancel: CancellationToken::new(),
            concurrency: DEFAULT_CONCURRENCY,
            ready_attempts: DEFAULT_READY_ATTEMPTS,
            ready_interval: DEFAULT_READY_INTERVAL,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StepReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Route every SSH session through the given runner. Used by tests.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Abort the bootstrap when `cancel` fires, wherever it happens to be
    /// waiting.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_ready_budget(mut self, attempts: u32, interval: Duration) -> Self {
        self.ready_attempts = attempts;
        self.ready_interval = interval;
        self
    }

    fn ssh_client(&self, host: &str) -> SshClient {
        let client = SshClient::new(host, self.config.ssh_key.private_key_path.clone());
        match &self.runner {
            Some(runner) => client.with_runner(runner.clone()),
            None => client,
        }
    }

    fn node_name(&self, entry: &ServerSetEntry) -> String {
        entry.key.server_name(&self.config.prefix)
    }

    /// Bootstrap the whole set: control plane first, then workers.
    pub async fn run(&self, set: &ServerSet) -> Result<ClusterHandle> {
        let handle =
            with_cancellation(&self.cancel, "cluster bootstrap", self.bootstrap(set)).await??;
        Ok(handle)
    }

    async fn bootstrap(&self, set: &ServerSet) -> Result<ClusterHandle> {
        let master = set.master().ok_or(ClusterError::EmptySet)?;
        let multi_node = set.len() > 1;

        let master_ssh = self.ssh_client(&master.public_ip);
        let plane = self
            .bootstrap_control_plane(&master_ssh, master, multi_node)
            .await?;
        let control = ClusterControl::new(master_ssh);

        if multi_node {
            self.bootstrap_workers(set, &plane, &control).await?;
        }

        Ok(ClusterHandle {
            server_set: set.clone(),
            public_ip: master.public_ip.clone(),
            private_ip: plane.endpoint.as_ref().map(|e| e.ip.clone()),
            kubeconfig: plane.kubeconfig,
        })
    }

    async fn bootstrap_control_plane(
        &self,
        ssh: &SshClient,
        master: &ServerSetEntry,
        multi_node: bool,
    ) -> Result<ControlPlane> {
        let node_name = self.node_name(master);
        let step = |phase: ControlPlanePhase| format!("control-plane {}", phase.name());

        self.step(&step(ControlPlanePhase::AwaitingCloudInit), || {
            wait_for_cloud_init(ssh)
        })
        .await?;

        // Single-node fleets have no private network and skip discovery.
        let endpoint = if multi_node {
            let found = self
                .step(&step(ControlPlanePhase::NetworkDiscovered), || {
                    discover_private_endpoint(ssh, master)
                })
                .await?;
            Some(found)
        } else {
            None
        };

        self.step(&step(ControlPlanePhase::EngineInstalled), || async {
            ssh.execute(&format!(
                "curl -sfL {INSTALLER_URL} -o {INSTALLER_PATH} && chmod +x {INSTALLER_PATH}"
            ))
            .await?;
            Ok(())
        })
        .await?;

        self.step(&step(ControlPlanePhase::OrchestratorInstalled), || async {
            let command = server_install_command(&master.public_ip, endpoint.as_ref());
            ssh.execute(&command).await?;
            Ok(())
        })
        .await?;

        let token = self
            .step(&step(ControlPlanePhase::TokenIssued), || async {
                let output = ssh.execute(&format!("cat {TOKEN_PATH}")).await?;
                let token = output.output.trim().to_string();
                if token.is_empty() {
                    return Err(ClusterError::EmptyToken {
                        host: ssh.host().to_string(),
                    });
                }
                Ok(token)
            })
            .await?;

        let kubeconfig = self
            .step(&step(ControlPlanePhase::KubeConfigReady), || async {
                let output = ssh.execute(&format!("cat {KUBECONFIG_PATH}")).await?;
                Ok(rewrite_kubeconfig(&output.output, &master.public_ip))
            })
            .await?;

        self.step(
            &step(ControlPlanePhase::RegistryAndIngressDeployed),
            || async {
                // Ingress (traefik) ships with k3s; the registry is ours.
                ssh.execute(&registry_apply_command()).await?;
                ClusterControl::new(ssh.clone())
                    .wait_for_rollout("registry", "registry")
                    .await
            },
        )
        .await?;

        self.step(&step(ControlPlanePhase::NodeLabeled), || async {
            ClusterControl::new(ssh.clone())
                .label_node(&node_name, GROUP_LABEL, master.group())
                .await
        })
        .await?;

        Ok(ControlPlane {
            token,
            kubeconfig,
            endpoint,
        })
    }

    /// Join pending workers concurrently, bounded by `concurrency`.
    ///
    /// A worker is pending when it was created this run or is not yet
    /// observed Ready; workers already Ready from earlier runs are
    /// skipped, which is what makes repeated bootstrap runs cheap.
    async fn bootstrap_workers(
        &self,
        set: &ServerSet,
        plane: &ControlPlane,
        control: &ClusterControl,
    ) -> Result<()> {
        let ready: HashSet<String> = control
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| n.ready)
            .map(|n| n.name)
            .collect();

        let pending: Vec<&ServerSetEntry> = set
            .workers()
            .filter(|e| set.is_new(&e.key) || !ready.contains(&self.node_name(e)))
            .collect();

        for worker in set.workers() {
            if !pending.iter().any(|p| p.key == worker.key) {
                tracing::debug!(key = %worker.key, "worker already ready, skipping bootstrap");
            }
        }

        for chunk in pending.chunks(self.concurrency) {
            let mut inflight = FuturesUnordered::new();
            for worker in chunk {
                inflight.push(self.bootstrap_worker(worker, plane, control));
            }
            while let Some(result) = inflight.next().await {
                result?;
            }
        }
        Ok(())
    }

    async fn bootstrap_worker(
        &self,
        worker: &ServerSetEntry,
        plane: &ControlPlane,
        control: &ClusterControl,
    ) -> Result<()> {
        let node_name = self.node_name(worker);
        let ssh = self.ssh_client(&worker.public_ip);
        let step = |phase: WorkerPhase| format!("worker {} {}", worker.key, phase.name());

        // Workers only exist on multi-node fleets, where the private
        // network is mandatory.
        let master_endpoint =
            plane
                .endpoint
                .as_ref()
                .ok_or_else(|| ClusterError::MissingPrivateIp {
                    key: worker.key.clone(),
                })?;

        self.step(&step(WorkerPhase::AwaitingCloudInit), || {
            wait_for_cloud_init(&ssh)
        })
        .await?;

        let endpoint = self
            .step(&step(WorkerPhase::NetworkDiscovered), || {
                discover_private_endpoint(&ssh, worker)
            })
            .await?;

        self.step(&step(WorkerPhase::Joined), || async {
            let command = agent_join_command(&master_endpoint.ip, &plane.token, &endpoint);
            ssh.execute(&command).await?;
            Ok(())
        })
        .await?;

        self.step(&step(WorkerPhase::Ready), || {
            control.wait_for_node_ready(&node_name, self.ready_attempts, self.ready_interval)
        })
        .await?;

        self.step(&step(WorkerPhase::NodeLabeled), || {
            control.label_node(&node_name, GROUP_LABEL, worker.group())
        })
        .await?;

        Ok(())
    }

    /// Run one phase through the step reporter, then propagate its result.
    async fn step<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.reporter.step_started(name);
        let start = Instant::now();
        let result = op().await;
        match &result {
            Ok(_) => self.reporter.step_succeeded(name, start.elapsed()),
            Err(e) => self
                .reporter
                .step_failed(name, &e.to_string(), start.elapsed()),
        }
        result
    }
}

/// Block until cloud-init finishes on the host.
///
/// `cloud-init status --wait` blocks by itself; exit code 2 means it
/// finished with recoverable errors, which is still a usable host.
async fn wait_for_cloud_init(ssh: &SshClient) -> Result<()> {
    let output = retry_with_backoff(3, 2.0, SshError::is_retryable, || {
        ssh.execute_unchecked("cloud-init status --wait")
    })
    .await?;

    match output.exit_code {
        0 | 2 => Ok(()),
        _ => Err(ClusterError::CloudInit {
            host: ssh.host().to_string(),
            output: output.output,
        }),
    }
}

/// Find the interface carrying the entry's private address.
async fn discover_private_endpoint(
    ssh: &SshClient,
    entry: &ServerSetEntry,
) -> Result<PrivateEndpoint> {
    let ip = entry
        .private_ip
        .clone()
        .ok_or_else(|| ClusterError::MissingPrivateIp {
            key: entry.key.clone(),
        })?;

    let output = ssh.execute("ip -4 -o addr show scope global").await?;
    let interface = parse_interface_for(&output.output, &ip).ok_or_else(|| {
        ClusterError::InterfaceNotFound {
            host: ssh.host().to_string(),
            ip: ip.clone(),
        }
    })?;

    Ok(PrivateEndpoint { ip, interface })
}

/// Pick the interface name out of `ip -4 -o addr` output.
///
/// One line per address: `2: enp7s0  inet 10.0.0.2/16 brd ...`.
fn parse_interface_for(output: &str, ip: &str) -> Option<String> {
    let needle = format!("{ip}/");
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let _index = fields.next()?;
        let interface = fields.next()?;
        let rest: Vec<&str> = fields.collect();
        if rest.iter().any(|f| f.starts_with(&needle)) {
            return Some(interface.to_string());
        }
    }
    None
}

/// k3s server install command for the control plane.
///
/// Multi-node binds the API server and overlay to the private network
/// with the encrypted wireguard backend; single-node installs with
/// minimal flags. The public IP goes into the TLS SANs either way so the
/// rewritten kubeconfig verifies.
fn server_install_command(public_ip: &str, endpoint: Option<&PrivateEndpoint>) -> String {
    let exec = match endpoint {
        Some(e) => format!(
            "server --node-ip {ip} --advertise-address {ip} --flannel-iface {iface} \
             --flannel-backend=wireguard-native --tls-san {public_ip}",
            ip = e.ip,
            iface = e.interface,
        ),
        None => format!("server --tls-san {public_ip}"),
    };
    format!("INSTALL_K3S_EXEC=\"{exec}\" sh {INSTALLER_PATH}")
}

/// k3s agent join command for a worker.
fn agent_join_command(master_ip: &str, token: &str, endpoint: &PrivateEndpoint) -> String {
    format!(
        "curl -sfL {INSTALLER_URL} | K3S_URL=https://{master_ip}:6443 K3S_TOKEN={token} \
         INSTALL_K3S_EXEC=\"agent --node-ip {ip} --flannel-iface {iface}\" sh -",
        ip = endpoint.ip,
        iface = endpoint.interface,
    )
}

/// Point the node-local kubeconfig at the public address.
fn rewrite_kubeconfig(kubeconfig: &str, public_ip: &str) -> String {
    kubeconfig.replace("127.0.0.1", public_ip)
}

/// In-cluster image registry, applied idempotently on every bootstrap.
fn registry_apply_command() -> String {
    let manifest = r#"apiVersion: v1
kind: Namespace
metadata:
  name: registry
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: registry
  namespace: registry
spec:
  replicas: 1
  selector:
    matchLabels:
      app: registry
  template:
    metadata:
      labels:
        app: registry
    spec:
      containers:
        - name: registry
          image: registry:2
          ports:
            - containerPort: 5000
---
apiVersion: v1
kind: Service
metadata:
  name: registry
  namespace: registry
spec:
  selector:
    app: registry
  ports:
    - port: 5000
      targetPort: 5000
"#;
    format!("cat <<'EOF' | kubectl apply -f -\n{manifest}EOF")
}
