// # DNS Provider Trait
//
// Defines the interface for managing challenge TXT records via provider APIs.
//
// ## Implementations
//
// - Cloudflare: `certomat-provider-cloudflare` crate
// - Future: Route53, DigitalOcean, etc.
//
// ## Boundary
//
// Providers are single-shot API adapters. They must NOT implement retry or
// backoff logic (owned by `RecordManager`), must not cache state, and must
// not spawn background tasks. A failed call returns an error classified by
// the core taxonomy; the record manager decides whether to retry.

use async_trait::async_trait;

/// Handle to a TXT record created in a provider's zone
///
/// Everything the provider needs to delete the record later, plus the record
/// name for operator-facing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    /// Provider zone identifier
    pub zone_id: String,
    /// Provider record identifier
    pub record_id: String,
    /// Fully qualified record name (`_acme-challenge.<domain>`)
    pub record_name: String,
}

/// Trait for DNS provider implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Idempotency
///
/// `delete_txt_record` for a record that no longer exists should return
/// [`crate::Error::RecordNotFound`]; the record manager treats that as an
/// already-clean zone rather than a cleanup failure.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create a TXT record carrying a challenge value
    ///
    /// # Parameters
    ///
    /// - `record_name`: Fully qualified record name (`_acme-challenge.<domain>`)
    /// - `value`: The key-authorization digest the CA expects to find
    ///
    /// # Returns
    ///
    /// - `Ok(RecordHandle)`: The created record, sufficient for later deletion
    /// - `Err(Error)`: Classified by the core taxonomy; no retry here
    async fn create_txt_record(
        &self,
        record_name: &str,
        value: &str,
    ) -> Result<RecordHandle, crate::Error>;

    /// Delete a previously created TXT record
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The record is gone
    /// - `Err(Error::RecordNotFound)`: The record was already absent
    /// - `Err(Error)`: The delete failed; the record may still exist
    async fn delete_txt_record(&self, handle: &RecordHandle) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
