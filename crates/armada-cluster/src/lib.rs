//! Armada cluster bootstrap
//!
//! Consumes the canonical server set produced by fleet reconciliation and
//! turns it into a joined k3s cluster:
//!
//! ```text
//!   ServerSet ──▶ Bootstrapper ──▶ ClusterHandle
//!                     │
//!                     ├─ control plane (first entry): k3s server,
//!                     │  join token, kubeconfig, registry + ingress
//!                     └─ workers (rest): k3s agent join, concurrent
//! ```
//!
//! [`control::ClusterControl`] is the cluster-admin side: `kubectl` over
//! the control plane's SSH channel. It also implements the reconciler's
//! drain seam, so scale-downs evict workloads before servers are deleted.

pub mod bootstrap;
pub mod control;
pub mod error;

pub use bootstrap::{Bootstrapper, ClusterHandle, ControlPlanePhase, WorkerPhase};
pub use control::{ClusterControl, NodeStatus};
pub use error::{ClusterError, Result};
