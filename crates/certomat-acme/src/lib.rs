// # instant-acme Adapter
//
// Implements the core `AcmeClient`/`AcmeOrder` traits over the instant-acme
// crate. Everything cryptographic lives behind instant-acme and rcgen:
// account keys, key-authorization digests, CSR construction. This crate
// translates orchestrator calls into protocol steps and maps the client's
// errors into the core taxonomy.
//
// ## Account handling
//
// `connect` loads account credentials from the configured JSON file, or
// registers a fresh account and persists its credentials there (0600 on
// Unix) when the file does not exist yet.
//
// ## Order lifecycle
//
// begin_order: new order → pending authorizations → DNS-01 challenge specs
// request_validation: mark the domain's challenge ready
// retrieve_certificate: poll order status, finalize with a fresh keypair's
// CSR when Ready, fetch the chain when Valid; bounded polling throughout.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus, RevocationRequest,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use rustls_pki_types::CertificateDer;
use tokio::time::sleep;
use tracing::{debug, info};
use x509_parser::prelude::Pem;

use certomat_core::config::AcmeConfig;
use certomat_core::traits::{AcmeClient, AcmeOrder, CertificateMaterial, ChallengeSpec};
use certomat_core::{Error, Result};

/// Delay between order status polls
const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum order status polls before giving up (~2 minutes)
const MAX_ORDER_POLLS: u32 = 60;

/// Maximum certificate fetch attempts once the order is valid
const MAX_CERTIFICATE_FETCHES: u32 = 5;

/// ACME client over instant-acme
pub struct InstantAcmeClient {
    account: Account,
}

impl InstantAcmeClient {
    /// Load or register the ACME account described by the configuration
    pub async fn connect(config: &AcmeConfig) -> Result<Self> {
        match config.credentials_path.as_deref() {
            Some(path) if Path::new(path).exists() => {
                let json = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::acme(format!("failed to read account credentials: {e}")))?;
                let client = Self::from_credentials_json(&json).await?;
                debug!(path, "loaded ACME account credentials");
                Ok(client)
            }
            path => {
                let (client, credentials_json) =
                    Self::register(&config.directory_url, config.contact.as_deref()).await?;
                if let Some(path) = path {
                    persist_credentials(path, &credentials_json).await?;
                    info!(path, "registered ACME account and persisted credentials");
                } else {
                    info!("registered ephemeral ACME account (no credentials path configured)");
                }
                Ok(client)
            }
        }
    }

    /// Build a client from previously persisted credentials
    pub async fn from_credentials_json(json: &str) -> Result<Self> {
        let credentials: AccountCredentials = serde_json::from_str(json)?;
        let account = Account::from_credentials(credentials)
            .await
            .map_err(|e| Error::acme(format!("failed to load account: {e}")))?;
        Ok(Self { account })
    }

    /// Register a new account with the directory
    async fn register(directory_url: &str, contact: Option<&str>) -> Result<(Self, String)> {
        let mailto = contact.map(|email| format!("mailto:{email}"));
        let contacts: Vec<&str> = mailto.as_deref().into_iter().collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contacts,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
        )
        .await
        .map_err(|e| Error::acme(format!("failed to create account: {e}")))?;
        let credentials_json = serde_json::to_string(&credentials)?;
        Ok((Self { account }, credentials_json))
    }
}

/// Write account credentials with owner-only permissions
async fn persist_credentials(path: &str, json: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::acme(format!("failed to create credentials directory: {e}")))?;
        }
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| Error::acme(format!("failed to write account credentials: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::acme(format!("failed to set credentials permissions: {e}")))?;
    }
    Ok(())
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    async fn begin_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>> {
        debug!("opening ACME order for {}", domains.join(", "));
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|domain| Identifier::Dns(domain.clone()))
            .collect();
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| Error::acme(format!("failed to create order: {e}")))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| Error::acme(format!("failed to get authorizations: {e}")))?;

        let mut specs = Vec::new();
        let mut challenge_urls = HashMap::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                // Cached by the CA from a previous order; nothing to prove.
                AuthorizationStatus::Valid => continue,
                other => {
                    return Err(Error::acme(format!(
                        "unsupported authorization status: {other:?}"
                    )));
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| Error::acme("no DNS-01 challenge offered"))?;
            let Identifier::Dns(domain) = &authz.identifier;
            let dns_value = order.key_authorization(challenge).dns_value();

            challenge_urls.insert(domain.clone(), challenge.url.clone());
            specs.push(ChallengeSpec {
                domain: domain.clone(),
                token: challenge.token.clone(),
                dns_value,
            });
        }

        Ok(Box::new(InstantAcmeOrder {
            order,
            domains: domains.to_vec(),
            specs,
            challenge_urls,
            private_key_pem: None,
        }))
    }

    async fn revoke(&self, chain_pem: &str) -> Result<()> {
        let der = first_certificate_der(chain_pem)?;
        let certificate = CertificateDer::from(der);
        self.account
            .revoke(&RevocationRequest {
                certificate: &certificate,
                reason: None,
            })
            .await
            .map_err(|e| Error::acme(format!("failed to revoke certificate: {e}")))
    }
}

/// One in-flight instant-acme order
struct InstantAcmeOrder {
    order: Order,
    domains: Vec<String>,
    specs: Vec<ChallengeSpec>,
    challenge_urls: HashMap<String, String>,
    private_key_pem: Option<String>,
}

#[async_trait]
impl AcmeOrder for InstantAcmeOrder {
    fn challenges(&self) -> Vec<ChallengeSpec> {
        self.specs.clone()
    }

    async fn request_validation(&mut self, domain: &str) -> Result<()> {
        let url = self
            .challenge_urls
            .get(domain)
            .ok_or_else(|| Error::acme(format!("no pending challenge for {domain}")))?;
        debug!(domain, "marking challenge ready");
        self.order
            .set_challenge_ready(url)
            .await
            .map_err(|e| Error::acme(format!("failed to mark challenge ready: {e}")))
    }

    async fn retrieve_certificate(&mut self) -> Result<CertificateMaterial> {
        let mut polls = 0u32;
        loop {
            polls += 1;
            if polls > MAX_ORDER_POLLS {
                return Err(Error::timeout("ACME order did not settle in time"));
            }

            self.order
                .refresh()
                .await
                .map_err(|e| Error::acme(format!("failed to refresh order: {e}")))?;
            match self.order.state().status {
                OrderStatus::Pending | OrderStatus::Processing => {
                    debug!("order not settled, waiting");
                    sleep(ORDER_POLL_INTERVAL).await;
                }
                OrderStatus::Ready => {
                    debug!("order ready, submitting CSR");
                    let key = KeyPair::generate()
                        .map_err(|e| Error::acme(format!("failed to generate keypair: {e}")))?;
                    let csr = make_csr(&key, &self.domains)?;
                    self.private_key_pem = Some(key.serialize_pem());
                    self.order
                        .finalize(&csr)
                        .await
                        .map_err(|e| Error::acme(format!("failed to finalize order: {e}")))?;
                }
                OrderStatus::Valid => {
                    let chain_pem = self.fetch_chain().await?;
                    let private_key_pem = self.private_key_pem.take().ok_or_else(|| {
                        Error::acme("order became valid before a CSR was submitted")
                    })?;
                    let (not_before, not_after) = parse_validity(&chain_pem)?;
                    return Ok(CertificateMaterial {
                        chain_pem,
                        private_key_pem,
                        not_before,
                        not_after,
                    });
                }
                OrderStatus::Invalid => return Err(self.validation_failure().await),
            }
        }
    }
}

impl InstantAcmeOrder {
    /// Fetch the issued chain, allowing for issuance lag
    async fn fetch_chain(&mut self) -> Result<String> {
        let mut fetches = 0u32;
        loop {
            fetches += 1;
            match self
                .order
                .certificate()
                .await
                .map_err(|e| Error::acme(format!("failed to fetch certificate: {e}")))?
            {
                Some(chain) => return Ok(chain),
                None if fetches < MAX_CERTIFICATE_FETCHES => sleep(Duration::from_secs(1)).await,
                None => return Err(Error::timeout("issued certificate never became available")),
            }
        }
    }

    /// Build a per-domain rejection message out of an invalid order
    async fn validation_failure(&mut self) -> Error {
        if let Ok(authorizations) = self.order.authorizations().await {
            for authz in &authorizations {
                if matches!(authz.status, AuthorizationStatus::Invalid) {
                    let Identifier::Dns(domain) = &authz.identifier;
                    return Error::validation(format!(
                        "the CA rejected the DNS-01 challenge for {domain}"
                    ));
                }
            }
        }
        Error::validation("ACME order is invalid")
    }
}

/// Build a CSR for the domain set
fn make_csr(key: &KeyPair, domains: &[String]) -> Result<Vec<u8>> {
    let mut params = CertificateParams::new(domains.to_vec())
        .map_err(|e| Error::acme(format!("failed to build certificate params: {e}")))?;
    params.distinguished_name = DistinguishedName::new();
    let csr = params
        .serialize_request(key)
        .map_err(|e| Error::acme(format!("failed to serialize CSR: {e}")))?;
    Ok(csr.der().as_ref().to_vec())
}

/// DER bytes of the first (leaf) certificate in a PEM chain
fn first_certificate_der(chain_pem: &str) -> Result<Vec<u8>> {
    let pem = Pem::iter_from_buffer(chain_pem.as_bytes())
        .next()
        .transpose()
        .map_err(|e| Error::acme(format!("invalid certificate PEM: {e}")))?
        .ok_or_else(|| Error::acme("no certificate found in PEM"))?;
    Ok(pem.contents)
}

/// Validity interval of the leaf certificate
fn parse_validity(chain_pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let pem = Pem::iter_from_buffer(chain_pem.as_bytes())
        .next()
        .transpose()
        .map_err(|e| Error::acme(format!("invalid certificate PEM: {e}")))?
        .ok_or_else(|| Error::acme("no certificate found in PEM"))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::acme(format!("invalid X.509 certificate: {e}")))?;
    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| Error::acme("certificate notBefore out of range"))?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| Error::acme("certificate notAfter out of range"))?;
    Ok((not_before, not_after))
}
