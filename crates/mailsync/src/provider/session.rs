//! Credential session: authenticated HTTP on behalf of one integration
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic. Refresh policy
//! deliberately lives with the external credential authority: a rejected
//! credential surfaces as `ProviderError::Unauthorized` and is never
//! retried here.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::ProviderError;
use crate::models::IntegrationId;

/// A ready-to-use bearer credential for one integration
#[derive(Debug, Clone)]
pub struct Credential {
    pub bearer_token: String,
}

impl Credential {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
        }
    }
}

/// Error from the credential authority
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The stored grant is expired or revoked; the user must re-authorize
    #[error("credential expired; re-authorization required")]
    Expired,

    /// No credential is on file for the integration
    #[error("no credential found for integration {0}")]
    Missing(String),

    #[error("failed to load credential: {0}")]
    Unavailable(String),
}

/// External collaborator that issues and refreshes OAuth tokens.
///
/// The engine only ever sees a decrypted, ready-to-use bearer token;
/// storage and encryption of grants are the authority's concern.
pub trait CredentialAuthority: Send + Sync {
    fn credential(&self, integration_id: &IntegrationId) -> Result<Credential, CredentialError>;
}

/// Authenticated HTTP session for one integration's credential
pub struct CredentialSession {
    agent: ureq::Agent,
    credential: Credential,
}

impl CredentialSession {
    /// Create a session with a global request timeout.
    ///
    /// Every provider call suspends on network I/O; the timeout bounds how
    /// long a single slow call can wedge a sync run.
    pub fn new(credential: Credential, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            credential,
        }
    }

    /// GET a JSON resource with the bearer credential attached
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .agent
            .get(url)
            .header(
                "Authorization",
                &format!("Bearer {}", self.credential.bearer_token),
            )
            .call();

        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json()
                .map_err(|e| ProviderError::Decode(e.to_string())),
            Err(ureq::Error::StatusCode(401)) => Err(ProviderError::Unauthorized),
            Err(ureq::Error::StatusCode(code)) => Err(ProviderError::Status(code)),
            Err(e) => Err(ProviderError::Transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_error_display() {
        let err = CredentialError::Missing("i1".to_string());
        assert!(err.to_string().contains("i1"));
        assert!(CredentialError::Expired.to_string().contains("re-authorization"));
    }
}
