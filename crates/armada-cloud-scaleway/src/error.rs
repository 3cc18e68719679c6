//! Scaleway provider error types

use armada_cloud::CloudError;
use thiserror::Error;

/// Scaleway API errors, classified once at the wire boundary.
#[derive(Error, Debug)]
pub enum ScalewayError {
    #[error("Scaleway credentials are not configured: {0}")]
    MissingCredentials(String),

    #[error("{resource} '{name}' not found")]
    NotFound { resource: String, name: String },

    #[error("authentication rejected by Scaleway API")]
    Unauthorized,

    #[error("Scaleway API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("invalid zone '{0}': expected e.g. 'fr-par-1'")]
    InvalidZone(String),
}

impl ScalewayError {
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

impl From<ScalewayError> for CloudError {
    fn from(e: ScalewayError) -> Self {
        match e {
            ScalewayError::MissingCredentials(detail) => CloudError::MissingCredentials {
                provider: "scaleway".to_string(),
                detail,
            },
            ScalewayError::NotFound { resource, name } => CloudError::NotFound { resource, name },
            ScalewayError::Unauthorized => {
                CloudError::AuthenticationFailed("Scaleway API rejected the keys".to_string())
            }
            ScalewayError::Api { status, message } => CloudError::Api { status, message },
            ScalewayError::Transport(e) => CloudError::Transport(e.to_string()),
            ScalewayError::Decode(msg) => CloudError::Decode(msg),
            ScalewayError::InvalidZone(zone) => {
                CloudError::InvalidConfig(format!("invalid Scaleway zone '{zone}'"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ScalewayError>;
