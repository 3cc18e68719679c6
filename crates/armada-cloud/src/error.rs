//! Compute provider error types
//!
//! A closed set of error kinds, decided once inside each provider client.
//! Callers test structurally (`is_not_found`, `is_authentication`), never
//! by matching message text, so "does this exist" logic stays
//! provider-independent.

use thiserror::Error;

/// Compute provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Required credentials are absent from the resolved configuration.
    #[error("missing credentials for provider '{provider}': {detail}")]
    MissingCredentials { provider: String, detail: String },

    /// The named resource does not exist at the provider.
    #[error("{resource} '{name}' not found")]
    NotFound { resource: String, name: String },

    /// The provider rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Provider API returned an error response.
    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to the provider.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Response payload did not match the expected shape.
    #[error("unexpected provider response: {0}")]
    Decode(String),

    /// A bounded wait on provider state ran out of attempts.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The requested provider/configuration combination is invalid.
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
}

impl CloudError {
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }

    /// Structural test for "the resource does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Structural test for rejected credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }
}

impl From<armada_core::WaitError> for CloudError {
    fn from(e: armada_core::WaitError) -> Self {
        Self::Timeout(e.what)
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_structural() {
        let err = CloudError::not_found("server", "armada-web-1");
        assert!(err.is_not_found());
        assert!(!err.is_authentication());

        let err = CloudError::Api {
            status: 500,
            message: "not found".to_string(),
        };
        // Message text never decides classification.
        assert!(!err.is_not_found());
    }
}
