//! Record manager: DNS provider calls under the retry policy
//!
//! Retry and backoff live here, not in providers. Providers are single-shot
//! API adapters; the manager decides whether a failure is worth retrying
//! based on [`crate::Error::class`], sleeps between attempts, and escalates
//! exhausted transient errors to a permanent [`crate::Error::RetriesExhausted`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::request::DnsChallenge;
use crate::traits::{DnsProvider, RecordHandle};

/// Bounded exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per operation (first try included)
    pub max_attempts: u32,
    /// Initial delay
    pub base_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    ///
    /// Doubles per attempt, capped: base, 2*base, 4*base, ... up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// DNS record lifecycle under the retry policy
#[derive(Clone)]
pub struct RecordManager {
    provider: Arc<dyn DnsProvider>,
    policy: RetryPolicy,
}

impl RecordManager {
    /// Create a record manager over a provider
    pub fn new(provider: Arc<dyn DnsProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Name of the wrapped provider
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Create the TXT record for a challenge, retrying transient failures
    pub async fn create(&self, challenge: &DnsChallenge) -> Result<RecordHandle> {
        let mut attempt = 1u32;
        loop {
            match self
                .provider
                .create_txt_record(&challenge.record_name, &challenge.record_value)
                .await
            {
                Ok(handle) => {
                    debug!(
                        record = %challenge.record_name,
                        id = %handle.record_id,
                        "TXT record created"
                    );
                    return Ok(handle);
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        record = %challenge.record_name,
                        attempt,
                        "transient create failure, retrying in {delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Delete a TXT record, retrying transient failures
    ///
    /// An already-absent record counts as a clean zone, not a failure.
    pub async fn delete(&self, handle: &RecordHandle) -> Result<()> {
        let mut attempt = 1u32;
        loop {
            match self.provider.delete_txt_record(handle).await {
                Ok(()) => {
                    debug!(record = %handle.record_name, "TXT record deleted");
                    return Ok(());
                }
                Err(Error::RecordNotFound(_)) => {
                    debug!(record = %handle.record_name, "TXT record already gone");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        record = %handle.record_name,
                        attempt,
                        "transient delete failure, retrying in {delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_secs: 2,
            max_delay_secs: 10,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
    }
}
