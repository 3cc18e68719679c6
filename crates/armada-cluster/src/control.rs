//! Cluster-admin control client
//!
//! Runs `kubectl` on the control-plane node over its SSH channel. All
//! cluster state is read fresh per call; nothing is cached between calls.

use crate::error::{ClusterError, Result};
use armada_core::poll;
use armada_fleet::{DrainOutcome, NodeDrainer};
use armada_ssh::SshClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DRAIN_TIMEOUT: &str = "120s";

/// One cluster node as reported by the control plane.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub name: String,
    pub ready: bool,
    pub labels: HashMap<String, String>,
}

#[derive(Deserialize)]
struct KubeNodeList {
    items: Vec<KubeNode>,
}

#[derive(Deserialize)]
struct KubeNode {
    metadata: KubeMetadata,
    status: KubeNodeStatus,
}

#[derive(Deserialize)]
struct KubeMetadata {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Deserialize)]
struct KubeNodeStatus {
    #[serde(default)]
    conditions: Vec<KubeCondition>,
}

#[derive(Deserialize)]
struct KubeCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl KubeNode {
    fn into_status(self) -> NodeStatus {
        let ready = self
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True");
        NodeStatus {
            name: self.metadata.name,
            ready,
            labels: self.metadata.labels,
        }
    }
}

/// Privileged cluster-admin operations, executed on the control plane.
#[derive(Clone)]
pub struct ClusterControl {
    ssh: SshClient,
}

impl ClusterControl {
    pub fn new(ssh: SshClient) -> Self {
        Self { ssh }
    }

    async fn kubectl(&self, args: &str) -> Result<String> {
        let output = self.ssh.execute(&format!("kubectl {args}")).await?;
        Ok(output.output)
    }

    /// List every node the control plane knows about.
    pub async fn list_nodes(&self) -> Result<Vec<NodeStatus>> {
        let raw = self.kubectl("get nodes -o json").await?;
        let list: KubeNodeList = serde_json::from_str(&raw)?;
        Ok(list.items.into_iter().map(KubeNode::into_status).collect())
    }

    pub async fn find_node(&self, name: &str) -> Result<Option<NodeStatus>> {
        let nodes = self.list_nodes().await?;
        Ok(nodes.into_iter().find(|n| n.name == name))
    }

    /// Block until the named node reports the Ready condition.
    pub async fn wait_for_node_ready(
        &self,
        name: &str,
        attempts: u32,
        interval: Duration,
    ) -> Result<()> {
        let what = format!("node {name} to become ready");
        poll(attempts, interval, &what, || async {
            let node = self.find_node(name).await?;
            Ok::<_, ClusterError>(match node {
                Some(n) if n.ready => Some(()),
                _ => None,
            })
        })
        .await?
    }

    pub async fn cordon_node(&self, name: &str) -> Result<()> {
        self.kubectl(&format!("cordon {name}")).await?;
        Ok(())
    }

    /// Evict workloads from a node ahead of its deletion.
    pub async fn drain_node(&self, name: &str) -> Result<()> {
        self.kubectl(&format!(
            "drain {name} --ignore-daemonsets --delete-emptydir-data --timeout={DRAIN_TIMEOUT}"
        ))
        .await?;
        Ok(())
    }

    /// Remove a node from cluster membership.
    pub async fn delete_node(&self, name: &str) -> Result<()> {
        self.kubectl(&format!("delete node {name}")).await?;
        Ok(())
    }

    pub async fn label_node(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.kubectl(&format!("label node {name} {key}={value} --overwrite"))
            .await?;
        Ok(())
    }

    /// Block until a deployment's rollout completes.
    pub async fn wait_for_rollout(&self, namespace: &str, deployment: &str) -> Result<()> {
        self.kubectl(&format!(
            "rollout status deployment/{deployment} -n {namespace} --timeout=180s"
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NodeDrainer for ClusterControl {
    /// Cordon, drain and remove a node ahead of server deletion.
    ///
    /// Never raises: the reconciler deletes the server regardless, so
    /// every failure here folds into a [`DrainOutcome`] for the caller to
    /// record. Deletion from cluster membership is still attempted after
    /// a failed drain so the node does not linger as NotReady.
    async fn drain_and_remove(&self, node_name: &str) -> DrainOutcome {
        match self.find_node(node_name).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return DrainOutcome::Skipped {
                    reason: format!("{node_name} is not a cluster member"),
                }
            }
            Err(e) => {
                return DrainOutcome::Failed {
                    message: format!("listing nodes failed: {e}"),
                }
            }
        }

        if let Err(e) = self.cordon_node(node_name).await {
            return DrainOutcome::Failed {
                message: format!("cordon failed: {e}"),
            };
        }

        if let Err(e) = self.drain_node(node_name).await {
            let _ = self.delete_node(node_name).await;
            return DrainOutcome::Failed {
                message: format!("drain failed: {e}"),
            };
        }

        match self.delete_node(node_name).await {
            Ok(()) => DrainOutcome::Drained,
            Err(e) => DrainOutcome::Failed {
                message: format!("node deletion failed: {e}"),
            },
        }
    }
}
