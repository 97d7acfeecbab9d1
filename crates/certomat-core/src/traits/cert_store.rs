// # Certificate Store Trait
//
// Defines the interface for persisting issued certificates.
//
// ## Purpose
//
// The renewal scheduler scans the store to find certificates approaching
// expiry. Records are keyed by the domain-set key, so a renewal supersedes
// the previous certificate for the same set.
//
// ## Implementations
//
// - File-based: JSON file with atomic writes and backup recovery
// - In-memory: testing and ephemeral deployments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::{Certificate, DomainSet};

/// Persisted form of an issued certificate
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredCertificate {
    /// Domains the certificate covers (normalized, sorted)
    pub domains: Vec<String>,
    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
    /// Certificate chain, PEM
    pub chain_pem: String,
    /// Private key, PEM
    pub private_key_pem: String,
    /// When the originating request was made
    pub requested_at: DateTime<Utc>,
}

impl StoredCertificate {
    /// Convert an issued certificate into its persisted form
    pub fn from_certificate(certificate: &Certificate) -> Self {
        Self {
            domains: certificate.domains.domains().to_vec(),
            issued_at: certificate.issued_at,
            expires_at: certificate.expires_at,
            chain_pem: certificate.chain_pem.clone(),
            private_key_pem: certificate.private_key_pem.clone(),
            requested_at: certificate.requested_at,
        }
    }

    /// Rebuild the in-memory certificate, re-validating invariants
    pub fn to_certificate(&self) -> Result<Certificate> {
        Certificate::new(
            DomainSet::new(self.domains.iter().cloned())?,
            self.issued_at,
            self.expires_at,
            self.chain_pem.clone(),
            self.private_key_pem.clone(),
            self.requested_at,
        )
    }

    /// Store key for this certificate (the domain-set key)
    pub fn set_key(&self) -> String {
        self.domains.join(",")
    }

    /// Whether this certificate expires within the given window from now
    pub fn expires_within(&self, window: chrono::Duration) -> bool {
        self.expires_at <= Utc::now() + window
    }
}

// Key material stays out of Debug output.
impl std::fmt::Debug for StoredCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCertificate")
            .field("domains", &self.domains)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("private_key_pem", &"<REDACTED>")
            .finish()
    }
}

/// Trait for certificate store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Implementation Guidelines
///
/// - Async I/O only; never block the runtime
/// - `flush()` must persist all pending changes
/// - Deleting an absent key is not an error
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Get the certificate stored for a domain-set key
    async fn get(&self, set_key: &str) -> Result<Option<StoredCertificate>>;

    /// Store (or supersede) the certificate for a domain-set key
    async fn put(&self, set_key: &str, certificate: &StoredCertificate) -> Result<()>;

    /// Remove the certificate for a domain-set key
    async fn delete(&self, set_key: &str) -> Result<()>;

    /// List all domain-set keys in the store
    async fn list(&self) -> Result<Vec<String>>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<()>;
}
