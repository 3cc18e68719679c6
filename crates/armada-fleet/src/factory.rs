//! Provider factory
//!
//! Single construction point keyed by the credentials variant, so callers
//! never name a concrete provider type. Adding a provider means adding a
//! crate, a credentials variant and one arm here. The compiler enforces
//! the full [`ComputeProvider`] contract per implementation.

use crate::error::Result;
use armada_cloud::ComputeProvider;
use armada_cloud_hetzner::HetznerProvider;
use armada_cloud_scaleway::ScalewayProvider;
use armada_core::ProviderCredentials;
use std::sync::Arc;

/// Build the provider client for the resolved credentials.
pub fn provider_for(credentials: &ProviderCredentials) -> Result<Arc<dyn ComputeProvider>> {
    let provider: Arc<dyn ComputeProvider> = match credentials {
        ProviderCredentials::Hetzner { api_token } => Arc::new(HetznerProvider::new(api_token)?),
        ProviderCredentials::Scaleway {
            secret_key,
            project_id,
            zone,
            ..
        } => Arc::new(ScalewayProvider::new(secret_key, project_id, zone)?),
    };
    Ok(provider)
}
