//! Scaleway provider for Armada
//!
//! Speaks the Scaleway Instance, VPC and IAM APIs (JSON over HTTPS,
//! `X-Auth-Token` auth) and folds their payloads into the normalized
//! records of `armada-cloud`.

pub mod api;
pub mod error;
pub mod provider;

pub use error::{Result, ScalewayError};
pub use provider::ScalewayProvider;
