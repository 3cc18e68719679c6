//! Hetzner provider error types

use armada_cloud::CloudError;
use thiserror::Error;

/// Hetzner API errors, classified once at the wire boundary.
#[derive(Error, Debug)]
pub enum HetznerError {
    #[error("HCLOUD_TOKEN is not configured")]
    MissingToken,

    #[error("{resource} '{name}' not found")]
    NotFound { resource: String, name: String },

    #[error("authentication rejected by Hetzner API")]
    Unauthorized,

    #[error("Hetzner API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl HetznerError {
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<HetznerError> for CloudError {
    fn from(e: HetznerError) -> Self {
        match e {
            HetznerError::MissingToken => CloudError::MissingCredentials {
                provider: "hetzner".to_string(),
                detail: "HCLOUD_TOKEN is not configured".to_string(),
            },
            HetznerError::NotFound { resource, name } => CloudError::NotFound { resource, name },
            HetznerError::Unauthorized => {
                CloudError::AuthenticationFailed("Hetzner API rejected the token".to_string())
            }
            HetznerError::Api { status, message } => CloudError::Api { status, message },
            HetznerError::Transport(e) => CloudError::Transport(e.to_string()),
            HetznerError::Decode(msg) => CloudError::Decode(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, HetznerError>;
