// # ACME Client Trait
//
// Wraps an external ACME protocol implementation behind a narrow interface.
// The orchestrator drives an order through three steps: obtain the per-domain
// challenges, request validation once the TXT records are visible, and
// retrieve the finalized certificate.
//
// ## Implementations
//
// - instant-acme: `certomat-acme` crate
//
// ## Boundary
//
// The wrapped client owns everything cryptographic: account keys, CSR
// construction, key-authorization digests. This crate treats it as an opaque
// capability and only translates orchestrator state into calls and its
// errors into the core taxonomy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One DNS-01 challenge the CA expects to be fulfilled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSpec {
    /// The domain being proven
    pub domain: String,
    /// The ACME challenge token
    pub token: String,
    /// The TXT value the CA will look for (key-authorization digest)
    pub dns_value: String,
}

/// Issued certificate material returned by the ACME client
#[derive(Clone)]
pub struct CertificateMaterial {
    /// Certificate chain, PEM
    pub chain_pem: String,
    /// Private key, PEM
    pub private_key_pem: String,
    /// Certificate notBefore
    pub not_before: DateTime<Utc>,
    /// Certificate notAfter
    pub not_after: DateTime<Utc>,
}

// Key material stays out of Debug output.
impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("private_key_pem", &"<REDACTED>")
            .finish()
    }
}

/// One in-flight ACME order
///
/// Owned by a single orchestration; methods take `&mut self` because the
/// underlying protocol state advances with each call.
#[async_trait]
pub trait AcmeOrder: Send {
    /// The challenges that still need fulfillment
    ///
    /// Domains whose authorization is already valid (cached by the CA) do
    /// not appear here; an order may legitimately need fewer challenges than
    /// it has domains.
    fn challenges(&self) -> Vec<ChallengeSpec>;

    /// Tell the CA the challenge for this domain is ready to be checked
    async fn request_validation(&mut self, domain: &str) -> Result<(), crate::Error>;

    /// Finalize the order and retrieve the issued certificate
    ///
    /// Blocks (bounded) while the CA validates and issues. A CA-side
    /// rejection surfaces as [`crate::Error::Validation`].
    async fn retrieve_certificate(&mut self) -> Result<CertificateMaterial, crate::Error>;
}

/// Trait for ACME client implementations
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Open a new order for a set of domains
    async fn begin_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>, crate::Error>;

    /// Revoke a previously issued certificate
    async fn revoke(&self, chain_pem: &str) -> Result<(), crate::Error>;
}
