//! Credential handling for DNS provider APIs
//!
//! Credentials are loaded once at startup and passed by constructor
//! injection, never read ad hoc from the process environment at call sites.
//! The token lives in a [`Zeroizing`] wrapper so it is wiped from memory on
//! drop, and neither type ever includes it in Debug output or error
//! messages.

use zeroize::Zeroizing;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};

/// An opaque DNS provider API credential
#[derive(Clone)]
pub struct ProviderCredential {
    token: Zeroizing<String>,
}

impl ProviderCredential {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::config("provider credential cannot be empty"));
        }
        Ok(Self {
            token: Zeroizing::new(token),
        })
    }

    /// Access the raw token for an API call
    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// Holds the process's provider credentials for its lifetime
#[derive(Debug)]
pub struct CredentialStore {
    provider: ProviderCredential,
}

impl CredentialStore {
    /// Extract credentials from provider configuration, once, at startup
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        match config {
            ProviderConfig::Cloudflare { api_token, .. } => Ok(Self {
                provider: ProviderCredential::new(api_token.clone())?,
            }),
        }
    }

    /// The held provider credential
    pub fn provider(&self) -> &ProviderCredential {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_rejected() {
        assert!(ProviderCredential::new("").is_err());
    }

    #[test]
    fn debug_never_shows_token() {
        let credential = ProviderCredential::new("super-secret-token").unwrap();
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("<REDACTED>"));

        let store = CredentialStore {
            provider: credential,
        };
        let debug = format!("{store:?}");
        assert!(!debug.contains("super-secret-token"));
    }

    #[test]
    fn from_config_extracts_token() {
        let config = ProviderConfig::Cloudflare {
            api_token: "token-value".to_string(),
            zone_id: None,
        };
        let store = CredentialStore::from_config(&config).unwrap();
        assert_eq!(store.provider().expose(), "token-value");
    }
}
