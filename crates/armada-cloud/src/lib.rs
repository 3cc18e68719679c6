//! Armada compute provider abstraction
//!
//! This crate defines the normalized types and the [`ComputeProvider`]
//! trait every cloud backend implements, so the fleet reconciler and the
//! cluster bootstrapper can treat Hetzner, Scaleway (and future providers)
//! identically.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            armada-fleet / armada-cluster         │
//! │        (reconciliation, cluster bootstrap)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                armada-cloud                      │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │         Provider Abstraction              │   │
//! │  │  trait ComputeProvider { ... }            │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  Normalized  │  │  Structured  │             │
//! │  │   records    │  │    errors    │             │
//! │  └──────────────┘  └──────────────┘             │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │    hetzner    │ │   scaleway    │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```
//!
//! Provider clients speak their provider's REST API and leak none of it
//! past this boundary: callers only ever see [`ServerRecord`] and friends,
//! and test errors structurally via [`CloudError`] helpers instead of
//! matching message text.

pub mod error;
pub mod provider;
pub mod types;

// Re-exports
pub use error::{CloudError, Result};
pub use provider::{AccountInfo, ComputeProvider, DetachOutcome, WaitOptions};
pub use types::{
    CertificateRecord, CreateServerRequest, FirewallRecord, FirewallRule, NetworkRecord,
    ServerFilter, ServerRecord, ServerStatus, VolumeRecord,
};
