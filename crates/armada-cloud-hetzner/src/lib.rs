//! Hetzner Cloud provider for Armada
//!
//! Speaks the Hetzner Cloud API (JSON over HTTPS, bearer token) and folds
//! its payloads into the normalized records of `armada-cloud`. Nothing
//! Hetzner-specific leaks past [`HetznerProvider`].

pub mod api;
pub mod error;
pub mod provider;

pub use error::{HetznerError, Result};
pub use provider::HetznerProvider;
