//! Core traits for the certificate orchestrator
//!
//! This module defines the abstract interfaces the integration crates
//! implement.
//!
//! - [`DnsProvider`]: Create/delete challenge TXT records via a provider API
//! - [`AcmeClient`]/[`AcmeOrder`]: Drive an ACME order through an external client
//! - [`TxtResolver`]: Observe TXT records from a resolver's point of view
//! - [`CertificateStore`]: Persist issued certificates for renewal tracking

pub mod acme_client;
pub mod cert_store;
pub mod dns_provider;
pub mod txt_resolver;

pub use acme_client::{AcmeClient, AcmeOrder, CertificateMaterial, ChallengeSpec};
pub use cert_store::{CertificateStore, StoredCertificate};
pub use dns_provider::{DnsProvider, RecordHandle};
pub use txt_resolver::TxtResolver;
