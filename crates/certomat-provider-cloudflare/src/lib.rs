// # Cloudflare DNS Provider
//
// Implements the challenge TXT record lifecycle against the Cloudflare API
// v4. Single-shot by design:
//
// - One HTTP request per operation (plus zone discovery when needed)
// - Full error propagation: retries, backoff and rate limiting are owned by
//   the core `RecordManager`
// - HTTP timeout configured (30 seconds)
// - No caching, no background tasks
//
// ## Security
//
// The API token never appears in logs, Debug output or error messages.
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List zones: GET `/zones?name=...`
// - Create DNS record: POST `/zones/:zone_id/dns_records`
// - Delete DNS record: DELETE `/zones/:zone_id/dns_records/:record_id`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use certomat_core::credentials::ProviderCredential;
use certomat_core::traits::{DnsProvider, RecordHandle};
use certomat_core::{Error, Result};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// HTTP timeout for API requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL for challenge records; short, they live for one validation
const CHALLENGE_RECORD_TTL: u32 = 120;

/// Cloudflare DNS provider
///
/// Challenge records are created in the zone serving the record name. With
/// no `zone_id` preconfigured, the provider discovers the zone by walking
/// the candidate suffixes of the record name against `GET /zones?name=`.
pub struct CloudflareProvider {
    credential: ProviderCredential,
    zone_id: Option<String>,
    client: reqwest::Client,
}

// The credential's own Debug is redacted; keep the provider's consistent.
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("credential", &self.credential)
            .field("zone_id", &self.zone_id)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `credential`: API token with Zone:DNS:Edit permissions
    /// - `zone_id`: Optional zone ID; skips zone discovery when set
    pub fn new(credential: ProviderCredential, zone_id: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::provider("cloudflare", format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            credential,
            zone_id,
            client,
        })
    }

    /// Candidate zone names for a challenge record, most specific first
    ///
    /// `_acme-challenge.www.example.com` yields `www.example.com`,
    /// `example.com`. Single-label suffixes (bare TLDs) are skipped.
    fn zone_candidates(record_name: &str) -> Vec<String> {
        let base = record_name
            .strip_prefix("_acme-challenge.")
            .unwrap_or(record_name);
        let labels: Vec<&str> = base.split('.').collect();
        (0..labels.len().saturating_sub(1))
            .map(|i| labels[i..].join("."))
            .collect()
    }

    /// Map a reqwest transport error into the core taxonomy
    fn transport_error(err: reqwest::Error) -> Error {
        if err.is_timeout() || err.is_connect() {
            Error::timeout(format!("Cloudflare API request failed: {err}"))
        } else {
            Error::provider("cloudflare", format!("HTTP request failed: {err}"))
        }
    }

    /// Map a non-success HTTP status into the core taxonomy
    async fn status_error(context: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error response".to_string());

        match status.as_u16() {
            401 | 403 => Error::auth(format!(
                "invalid API token or insufficient permissions ({context}, status {status})"
            )),
            404 => Error::record_not_found(format!("{context} (status 404)")),
            429 => Error::rate_limited(format!("{context} (status 429)")),
            500..=599 => Error::provider_unavailable(
                "cloudflare",
                format!("{context}: {status} - {body}"),
            ),
            _ => Error::provider("cloudflare", format!("{context}: {status} - {body}")),
        }
    }

    /// Resolve the zone ID serving a record name
    async fn get_zone_id(&self, record_name: &str) -> Result<String> {
        if let Some(ref zone_id) = self.zone_id {
            tracing::debug!("using preconfigured zone ID");
            return Ok(zone_id.clone());
        }

        let candidates = Self::zone_candidates(record_name);
        if candidates.is_empty() {
            return Err(Error::invalid_input(format!(
                "cannot derive a zone from record name: {record_name}"
            )));
        }

        for candidate in &candidates {
            tracing::debug!(zone = %candidate, "looking up zone");
            let url = format!("{CLOUDFLARE_API_BASE}/zones?name={candidate}");
            let response = self
                .client
                .get(&url)
                .bearer_auth(self.credential.expose())
                .send()
                .await
                .map_err(Self::transport_error)?;

            if !response.status().is_success() {
                return Err(Self::status_error("zone lookup failed", response).await);
            }

            let json: Value = response.json().await.map_err(|e| {
                Error::provider("cloudflare", format!("failed to parse zone response: {e}"))
            })?;
            let zones = json["result"].as_array().ok_or_else(|| {
                Error::provider("cloudflare", "invalid zone response: result is not an array")
            })?;

            if let Some(zone) = zones.first() {
                let zone_id = zone["id"].as_str().ok_or_else(|| {
                    Error::provider("cloudflare", "invalid zone response: id is not a string")
                })?;
                tracing::debug!(zone = %candidate, zone_id, "zone found");
                return Ok(zone_id.to_string());
            }
        }

        Err(Error::zone_not_found(format!(
            "no Cloudflare zone serves {record_name}"
        )))
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn create_txt_record(&self, record_name: &str, value: &str) -> Result<RecordHandle> {
        let zone_id = self.get_zone_id(record_name).await?;

        tracing::info!(record = %record_name, "creating challenge TXT record");
        let url = format!("{CLOUDFLARE_API_BASE}/zones/{zone_id}/dns_records");
        let payload = serde_json::json!({
            "type": "TXT",
            "name": record_name,
            "content": value,
            "ttl": CHALLENGE_RECORD_TTL,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.credential.expose())
            .json(&payload)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error("record create failed", response).await);
        }

        let json: Value = response.json().await.map_err(|e| {
            Error::provider("cloudflare", format!("failed to parse create response: {e}"))
        })?;
        let record_id = json["result"]["id"].as_str().ok_or_else(|| {
            Error::provider("cloudflare", "invalid create response: id is not a string")
        })?;

        Ok(RecordHandle {
            zone_id,
            record_id: record_id.to_string(),
            record_name: record_name.to_string(),
        })
    }

    async fn delete_txt_record(&self, handle: &RecordHandle) -> Result<()> {
        tracing::info!(record = %handle.record_name, "deleting challenge TXT record");
        let url = format!(
            "{CLOUDFLARE_API_BASE}/zones/{}/dns_records/{}",
            handle.zone_id, handle.record_id
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map_err(Self::transport_error)?;

        if response.status().as_u16() == 404 {
            // Already gone; the record manager treats this as clean.
            return Err(Error::record_not_found(handle.record_name.clone()));
        }
        if !response.status().is_success() {
            return Err(Self::status_error("record delete failed", response).await);
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(zone_id: Option<&str>) -> CloudflareProvider {
        CloudflareProvider::new(
            ProviderCredential::new("secret-token-12345").unwrap(),
            zone_id.map(String::from),
        )
        .unwrap()
    }

    #[test]
    fn zone_candidates_walk_suffixes() {
        assert_eq!(
            CloudflareProvider::zone_candidates("_acme-challenge.www.example.com"),
            vec!["www.example.com", "example.com"]
        );
        assert_eq!(
            CloudflareProvider::zone_candidates("_acme-challenge.example.com"),
            vec!["example.com"]
        );
        assert_eq!(
            CloudflareProvider::zone_candidates("_acme-challenge.a.b.example.co.uk"),
            vec!["a.b.example.co.uk", "b.example.co.uk", "example.co.uk", "co.uk"]
        );
    }

    #[test]
    fn token_not_exposed_in_debug() {
        let provider = provider(None);
        let debug = format!("{provider:?}");
        assert!(!debug.contains("secret-token-12345"));
        assert!(debug.contains("CloudflareProvider"));
    }

    #[test]
    fn provider_name_is_cloudflare() {
        assert_eq!(provider(None).provider_name(), "cloudflare");
    }

    #[test]
    fn preconfigured_zone_is_kept() {
        let provider = provider(Some("zone-123"));
        assert_eq!(provider.zone_id.as_deref(), Some("zone-123"));
    }
}
