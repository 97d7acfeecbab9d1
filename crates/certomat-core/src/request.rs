//! Core data model for certificate orchestration
//!
//! A [`DomainSet`] identifies a certificate request: the set is normalized
//! (lowercased, deduplicated, sorted) so that two requests for the same
//! domains always produce the same [`DomainSet::key`], which is the unit of
//! idempotency, the in-flight lock key, and the certificate store key.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Prefix for DNS-01 challenge record names
const CHALLENGE_LABEL: &str = "_acme-challenge";

/// Normalized, non-empty set of domain names
///
/// Construction validates every name (RFC 1035 label rules, with a leading
/// `*.` permitted for wildcard certificates), lowercases, deduplicates and
/// sorts. Identity of a certificate request is its domain set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    /// Build a domain set from raw user input
    pub fn new<I, S>(domains: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for domain in domains {
            let domain = domain.into().trim().to_ascii_lowercase();
            if domain.is_empty() {
                continue;
            }
            validate_domain_name(&domain)?;
            normalized.push(domain);
        }
        normalized.sort();
        normalized.dedup();
        if normalized.is_empty() {
            return Err(Error::invalid_input("domain set cannot be empty"));
        }
        Ok(Self(normalized))
    }

    /// The normalized domain names, sorted
    pub fn domains(&self) -> &[String] {
        &self.0
    }

    /// Number of domains in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A domain set is never empty, but the method keeps callers honest
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable identity key for this set
    ///
    /// Used for the in-flight lock and as the certificate store key.
    pub fn key(&self) -> String {
        self.0.join(",")
    }
}

impl std::fmt::Display for DomainSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Validate a domain name per RFC 1035 label rules
///
/// A single leading `*.` is accepted (wildcard certificates); the challenge
/// record for a wildcard is placed at the base name.
pub fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::invalid_input("domain name cannot be empty"));
    }

    let base = domain.strip_prefix("*.").unwrap_or(domain);
    if base.is_empty() || base.contains('*') {
        return Err(Error::invalid_input(format!(
            "invalid wildcard domain: '{domain}'"
        )));
    }

    // Total length limit (RFC 1035: 253 chars max)
    if base.len() > 253 {
        return Err(Error::invalid_input(format!(
            "domain name too long: {} chars (max 253)",
            base.len()
        )));
    }

    for label in base.split('.') {
        if label.is_empty() {
            return Err(Error::invalid_input(format!(
                "domain name has empty label: '{domain}'"
            )));
        }
        if label.len() > 63 {
            return Err(Error::invalid_input(format!(
                "domain label too long: {} chars (max 63): '{label}'",
                label.len()
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::invalid_input(format!(
                "domain label contains invalid characters: '{label}'"
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::invalid_input(format!(
                "domain label cannot start or end with a hyphen: '{label}'"
            )));
        }
    }

    Ok(())
}

/// Lifecycle status of a certificate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created, not yet picked up by an orchestration
    Pending,
    /// An orchestration is driving this request
    InProgress,
    /// A certificate was issued
    Issued,
    /// The orchestration ended in failure
    Failed,
}

/// One certificate request: the unit of idempotency
///
/// Identity is the domain set. Re-issuing an identical pending request must
/// not spawn a second orchestration; the orchestrator enforces this with its
/// in-flight map keyed by [`DomainSet::key`].
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    /// The domains the certificate must cover
    pub domains: DomainSet,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
    /// Current status
    pub status: RequestStatus,
}

impl CertificateRequest {
    /// Create a new pending request
    pub fn new(domains: DomainSet) -> Self {
        Self {
            domains,
            requested_at: Utc::now(),
            status: RequestStatus::Pending,
        }
    }
}

/// Per-challenge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// Challenge known, record not yet requested
    Pending,
    /// Record-create call issued
    RecordCreating,
    /// Record exists in the provider's zone
    RecordCreated,
    /// Record removed
    CleanedUp,
    /// Record could not be removed; requires operator follow-up
    CleanupFailed,
}

/// One DNS-01 challenge for one domain of a request
///
/// Owned exclusively by the orchestration processing its request. The record
/// value is the key-authorization digest supplied by the ACME client; this
/// crate never computes cryptographic proofs itself.
#[derive(Debug, Clone)]
pub struct DnsChallenge {
    /// The domain being proven
    pub domain: String,
    /// The ACME challenge token
    pub token: String,
    /// Derived TXT record name (`_acme-challenge.<domain>`)
    pub record_name: String,
    /// Expected TXT record value
    pub record_value: String,
    /// Lifecycle state
    pub state: ChallengeState,
}

impl DnsChallenge {
    /// Create a challenge for a domain
    ///
    /// For wildcard domains the challenge record sits at the base name:
    /// `*.example.test` is proven via `_acme-challenge.example.test`.
    pub fn new(
        domain: impl Into<String>,
        token: impl Into<String>,
        record_value: impl Into<String>,
    ) -> Self {
        let domain = domain.into();
        let base = domain.strip_prefix("*.").unwrap_or(&domain);
        let record_name = format!("{CHALLENGE_LABEL}.{base}");
        Self {
            domain,
            token: token.into(),
            record_name,
            record_value: record_value.into(),
            state: ChallengeState::Pending,
        }
    }
}

/// An issued certificate
///
/// Immutable once issued; renewal produces a superseding certificate rather
/// than mutating this one. Construction rejects an expiry that is not
/// strictly after the issuance timestamp.
#[derive(Clone)]
pub struct Certificate {
    /// Domains the certificate covers
    pub domains: DomainSet,
    /// Issuance timestamp (certificate notBefore)
    pub issued_at: DateTime<Utc>,
    /// Expiry timestamp (certificate notAfter)
    pub expires_at: DateTime<Utc>,
    /// Certificate chain, PEM
    pub chain_pem: String,
    /// Private key, PEM
    pub private_key_pem: String,
    /// When the originating request was made
    pub requested_at: DateTime<Utc>,
}

impl Certificate {
    /// Create a certificate, enforcing the expiry-after-issuance invariant
    pub fn new(
        domains: DomainSet,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        chain_pem: String,
        private_key_pem: String,
        requested_at: DateTime<Utc>,
    ) -> Result<Self> {
        if expires_at <= issued_at {
            return Err(Error::invalid_input(format!(
                "certificate expiry {expires_at} is not after issuance {issued_at}"
            )));
        }
        Ok(Self {
            domains,
            issued_at,
            expires_at,
            chain_pem,
            private_key_pem,
            requested_at,
        })
    }

    /// Whether this certificate expires within the given window from now
    pub fn expires_within(&self, window: chrono::Duration) -> bool {
        self.expires_at <= Utc::now() + window
    }
}

// Key material stays out of Debug output.
impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("domains", &self.domains)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("private_key_pem", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_set_normalizes() {
        let set = DomainSet::new(["B.example.test", "a.example.test", "b.example.test"]).unwrap();
        assert_eq!(set.domains(), ["a.example.test", "b.example.test"]);
        assert_eq!(set.key(), "a.example.test,b.example.test");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn empty_domain_set_rejected() {
        assert!(DomainSet::new(Vec::<String>::new()).is_err());
        assert!(DomainSet::new(["", "  "]).is_err());
    }

    #[test]
    fn invalid_domains_rejected() {
        assert!(DomainSet::new(["exa mple.test"]).is_err());
        assert!(DomainSet::new(["-bad.test"]).is_err());
        assert!(DomainSet::new(["double..dot.test"]).is_err());
        assert!(DomainSet::new(["a.*.test"]).is_err());
        let long_label = format!("{}.test", "a".repeat(64));
        assert!(DomainSet::new([long_label]).is_err());
    }

    #[test]
    fn wildcard_domains_accepted() {
        let set = DomainSet::new(["*.example.test"]).unwrap();
        assert_eq!(set.domains(), ["*.example.test"]);
    }

    #[test]
    fn challenge_record_name_derivation() {
        let challenge = DnsChallenge::new("www.example.test", "tok", "val");
        assert_eq!(challenge.record_name, "_acme-challenge.www.example.test");
        assert_eq!(challenge.state, ChallengeState::Pending);

        let wildcard = DnsChallenge::new("*.example.test", "tok", "val");
        assert_eq!(wildcard.record_name, "_acme-challenge.example.test");
    }

    #[test]
    fn certificate_expiry_must_follow_issuance() {
        let domains = DomainSet::new(["example.test"]).unwrap();
        let now = Utc::now();
        let err = Certificate::new(
            domains.clone(),
            now,
            now,
            "chain".into(),
            "key".into(),
            now,
        );
        assert!(err.is_err());

        let ok = Certificate::new(
            domains,
            now,
            now + chrono::Duration::days(90),
            "chain".into(),
            "key".into(),
            now,
        )
        .unwrap();
        assert!(ok.expires_at > ok.issued_at);
    }

    #[test]
    fn certificate_debug_redacts_key() {
        let domains = DomainSet::new(["example.test"]).unwrap();
        let now = Utc::now();
        let cert = Certificate::new(
            domains,
            now,
            now + chrono::Duration::days(1),
            "chain".into(),
            "super-secret-key".into(),
            now,
        )
        .unwrap();
        let debug = format!("{cert:?}");
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("<REDACTED>"));
    }
}
