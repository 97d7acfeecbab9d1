//! Renewal scheduler
//!
//! Periodically scans the certificate store and re-invokes the orchestrator
//! for certificates approaching expiry. Renewals are serialized per domain
//! set (the orchestrator's in-flight lock guarantees at most one), and a
//! failed renewal waits for the next scheduled scan rather than retrying
//! immediately, so a broken domain cannot hammer the ACME or DNS provider.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::RenewalConfig;
use crate::error::Result;
use crate::orchestrator::ChallengeOrchestrator;
use crate::traits::{CertificateStore, StoredCertificate};

/// Periodic certificate renewal
pub struct RenewalScheduler {
    store: Arc<dyn CertificateStore>,
    orchestrator: Arc<ChallengeOrchestrator>,
    scan_interval: Duration,
    renewal_window: chrono::Duration,
}

impl RenewalScheduler {
    /// Create a scheduler over a store and orchestrator
    pub fn new(
        store: Arc<dyn CertificateStore>,
        orchestrator: Arc<ChallengeOrchestrator>,
        config: &RenewalConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            scan_interval: config.scan_interval(),
            renewal_window: config.window(),
        }
    }

    /// Run until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Test-only helper to run with a controlled shutdown signal
    ///
    /// Production code should use [`RenewalScheduler::run`], which shuts
    /// down on OS signals.
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(
        &self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.scan_interval.as_secs(),
            window_days = self.renewal_window.num_days(),
            "renewal scheduler started"
        );

        if let Some(mut rx) = shutdown_rx {
            loop {
                tokio::select! {
                    // The first tick fires immediately: one scan at startup.
                    _ = ticker.tick() => {
                        if let Err(err) = self.scan_once().await {
                            error!("renewal scan failed: {err}");
                        }
                    }
                    _ = &mut rx => {
                        info!("shutdown signal received");
                        break;
                    }
                }
            }
        } else {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.scan_once().await {
                            error!("renewal scan failed: {err}");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.store.flush().await?;
        info!("renewal scheduler stopped");
        Ok(())
    }

    /// Scan the store once, renewing every certificate inside the window
    ///
    /// Each domain set is considered at most once per scan. Returns the
    /// number of renewal attempts made.
    pub async fn scan_once(&self) -> Result<usize> {
        let keys = self.store.list().await?;
        debug!("renewal scan over {} certificate(s)", keys.len());

        let mut attempted = 0usize;
        for key in keys {
            let Some(stored) = self.store.get(&key).await? else {
                continue;
            };
            if !stored.expires_within(self.renewal_window) {
                debug!(set_key = %key, expires_at = %stored.expires_at, "not due for renewal");
                continue;
            }

            attempted += 1;
            info!(set_key = %key, expires_at = %stored.expires_at, "renewing certificate");
            if let Err(err) = self.renew_one(&key, &stored).await {
                // Next scheduled scan retries; no immediate retry.
                warn!(set_key = %key, "renewal failed, will retry on the next scan: {err}");
            }
        }
        Ok(attempted)
    }

    async fn renew_one(&self, key: &str, stored: &StoredCertificate) -> Result<()> {
        let certificate = stored.to_certificate()?;
        let handle = self.orchestrator.renew(&certificate)?;
        match handle.outcome().await.as_ref() {
            Ok(issuance) => {
                if !issuance.cleanup_warnings.is_empty() {
                    warn!(
                        set_key = %key,
                        domains = ?issuance.cleanup_warnings,
                        "renewal left challenge records behind; remove them manually"
                    );
                }
                let renewed = StoredCertificate::from_certificate(&issuance.certificate);
                self.store.put(key, &renewed).await?;
                info!(
                    set_key = %key,
                    expires_at = %issuance.certificate.expires_at,
                    "certificate renewed"
                );
                Ok(())
            }
            Err(err) => Err(crate::Error::other(format!("renewal failed: {err}"))),
        }
    }
}
