//! Configuration types for the certificate orchestrator
//!
//! This module defines all configuration structures used throughout the crate.
//! The daemon populates these from environment variables; library users can
//! construct them directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ACME directory URL (Let's Encrypt production)
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory URL (for testing)
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Main orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertomatConfig {
    /// DNS provider configuration
    pub provider: ProviderConfig,

    /// ACME account configuration
    #[serde(default)]
    pub acme: AcmeConfig,

    /// Certificate store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Propagation check settings
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Retry policy for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Renewal scheduler settings
    #[serde(default)]
    pub renewal: RenewalConfig,

    /// Orchestrator engine settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl CertomatConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()?;
        self.acme.validate()?;
        self.propagation.validate()?;
        self.retry.validate()?;
        self.renewal.validate()?;
        Ok(())
    }
}

/// DNS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token with Zone:DNS:Edit permissions
        api_token: String,
        /// Zone ID (optional, discovered from the record name if absent)
        zone_id: Option<String>,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare { api_token, .. } => {
                if api_token.is_empty() {
                    return Err(crate::Error::config("Cloudflare API token cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
        }
    }
}

/// ACME account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// ACME directory URL
    #[serde(default = "default_directory_url")]
    pub directory_url: String,

    /// Contact email for the ACME account
    #[serde(default)]
    pub contact: Option<String>,

    /// Path to the persisted account credentials JSON.
    /// A new account is registered (and persisted here) when the file
    /// does not exist yet.
    #[serde(default)]
    pub credentials_path: Option<String>,
}

impl AcmeConfig {
    /// Validate the ACME configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.directory_url.is_empty() {
            return Err(crate::Error::config("ACME directory URL cannot be empty"));
        }
        if !self.directory_url.starts_with("https://") && !self.directory_url.starts_with("http://")
        {
            return Err(crate::Error::config(format!(
                "ACME directory URL must be HTTP(S): {}",
                self.directory_url
            )));
        }
        Ok(())
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: default_directory_url(),
            contact: None,
            credentials_path: None,
        }
    }
}

/// Certificate store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-based certificate store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory certificate store (not persistent)
    #[default]
    Memory,
}

/// Resolver quorum required before a record counts as propagated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quorum {
    /// Every queried resolver must observe the value
    #[default]
    All,
    /// A simple majority of queried resolvers must observe the value
    Majority,
}

/// Propagation check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Maximum time to wait for a record to become visible (in seconds)
    #[serde(default = "default_propagation_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between resolver polls (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Resolver quorum
    #[serde(default)]
    pub quorum: Quorum,
}

impl PropagationConfig {
    /// Validate the propagation settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("propagation timeout must be > 0"));
        }
        Ok(())
    }

    /// Propagation timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_propagation_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            quorum: Quorum::default(),
        }
    }
}

/// Retry policy settings for DNS provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per operation (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay (in seconds)
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Backoff cap (in seconds)
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl RetryConfig {
    /// Validate the retry settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 {
            return Err(crate::Error::config("retry max_attempts must be >= 1"));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Renewal scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Renew certificates expiring within this many days
    #[serde(default = "default_renewal_window_days")]
    pub window_days: i64,

    /// Interval between renewal scans (in seconds)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl RenewalConfig {
    /// Validate the renewal settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.window_days <= 0 {
            return Err(crate::Error::config("renewal window must be > 0 days"));
        }
        if self.scan_interval_secs == 0 {
            return Err(crate::Error::config("renewal scan interval must be > 0"));
        }
        Ok(())
    }

    /// Renewal window as a `chrono::Duration`
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days)
    }

    /// Scan interval as a `Duration`
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            window_days: default_renewal_window_days(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

/// Orchestrator engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log) rather than
    /// blocking orchestration progress.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Timeout for each ACME validation/retrieval call (in seconds)
    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,
}

impl OrchestratorConfig {
    /// Validation timeout as a `Duration`
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            validation_timeout_secs: default_validation_timeout_secs(),
        }
    }
}

fn default_directory_url() -> String {
    LETS_ENCRYPT_PRODUCTION.to_string()
}

fn default_propagation_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_secs() -> u64 {
    1
}

fn default_max_delay_secs() -> u64 {
    30
}

fn default_renewal_window_days() -> i64 {
    30
}

fn default_scan_interval_secs() -> u64 {
    86_400
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_validation_timeout_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token(token: &str) -> CertomatConfig {
        CertomatConfig {
            provider: ProviderConfig::Cloudflare {
                api_token: token.to_string(),
                zone_id: None,
            },
            acme: AcmeConfig::default(),
            store: StoreConfig::default(),
            propagation: PropagationConfig::default(),
            retry: RetryConfig::default(),
            renewal: RenewalConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }

    #[test]
    fn empty_api_token_rejected() {
        assert!(config_with_token("").validate().is_err());
        assert!(config_with_token("token-value").validate().is_ok());
    }

    #[test]
    fn zero_propagation_timeout_rejected() {
        let mut config = config_with_token("token-value");
        config.propagation.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_attempts_rejected() {
        let mut config = config_with_token("token-value");
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_directory_rejected() {
        let mut config = config_with_token("token-value");
        config.acme.directory_url = "ftp://example.test/dir".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = config_with_token("token-value");
        assert!(config.validate().is_ok());
        assert_eq!(config.propagation.timeout(), Duration::from_secs(120));
        assert_eq!(config.renewal.window(), chrono::Duration::days(30));
    }
}
