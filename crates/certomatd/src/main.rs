// # certomatd - Certificate Orchestration Daemon
//
// Thin integration layer over certomat-core: reads configuration from
// environment variables, wires the provider/ACME/resolver implementations
// into the orchestrator, and exposes the CLI surface. No orchestration
// logic lives here.
//
// ## Commands
//
// - `issue <domains...> [--out DIR]`: run one issuance and store the result
// - `renew <domain-set-key>`: renew a stored certificate
// - `revoke <domain-set-key>`: ACME-revoke and drop from the store
// - `run`: renewal scheduler until SIGTERM/SIGINT
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### DNS Provider
// - `CERTOMAT_PROVIDER_TYPE`: Provider type (cloudflare)
// - `CERTOMAT_PROVIDER_API_TOKEN`: API token (required)
// - `CERTOMAT_PROVIDER_ZONE_ID`: Zone ID (optional, discovered if unset)
//
// ### ACME
// - `CERTOMAT_ACME_DIRECTORY_URL`: Directory URL (default: Let's Encrypt production)
// - `CERTOMAT_ACME_CONTACT`: Contact email (optional)
// - `CERTOMAT_ACME_CREDENTIALS_PATH`: Account credentials JSON path (optional)
//
// ### Propagation
// - `CERTOMAT_RESOLVERS`: Comma-separated resolver IPs or `system` (default: 1.1.1.1,8.8.8.8)
// - `CERTOMAT_PROPAGATION_TIMEOUT_SECS`: Visibility deadline (default: 120)
// - `CERTOMAT_PROPAGATION_POLL_INTERVAL_SECS`: Poll delay (default: 5)
// - `CERTOMAT_PROPAGATION_QUORUM`: all | majority (default: all)
//
// ### Retry
// - `CERTOMAT_RETRY_MAX_ATTEMPTS`: Attempts per provider call (default: 5)
// - `CERTOMAT_RETRY_BASE_DELAY_SECS`: Initial backoff (default: 1)
// - `CERTOMAT_RETRY_MAX_DELAY_SECS`: Backoff cap (default: 30)
//
// ### Renewal
// - `CERTOMAT_RENEWAL_WINDOW_DAYS`: Renew within this window (default: 30)
// - `CERTOMAT_SCAN_INTERVAL_SECS`: Scan period (default: 86400)
//
// ### Store
// - `CERTOMAT_STORE_TYPE`: file | memory (default: file)
// - `CERTOMAT_STORE_PATH`: Store file path (required for file store)
//
// ### Logging
// - `CERTOMAT_LOG_LEVEL`: trace | debug | info | warn | error (default: info)
//
// ## Exit Codes
//
// - 0: success / clean shutdown
// - 1: configuration error
// - 2: permanent failure (retrying will not help)
// - 3: transient failure (worth retrying)
// - 4: runtime error (unexpected)

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use certomat_acme::InstantAcmeClient;
use certomat_core::config::{
    AcmeConfig, CertomatConfig, OrchestratorConfig, PropagationConfig, ProviderConfig, Quorum,
    RenewalConfig, RetryConfig, StoreConfig,
};
use certomat_core::traits::{AcmeClient, CertificateStore, StoredCertificate, TxtResolver};
use certomat_core::{
    ChallengeOrchestrator, CredentialStore, ErrorClass, FileCertificateStore,
    MemoryCertificateStore, OrchestrationError, RenewalScheduler,
};
use certomat_provider_cloudflare::CloudflareProvider;
use certomat_resolver::PublicResolver;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[derive(Parser)]
#[command(name = "certomatd", about = "ACME DNS-01 certificate issuance and renewal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Issue a certificate for a set of domains
    Issue {
        /// Domains the certificate must cover
        #[arg(required = true)]
        domains: Vec<String>,
        /// Also write fullchain.pem / privkey.pem into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Renew the stored certificate for a domain-set key
    Renew {
        /// Domain-set key (sorted domains joined with commas)
        set_key: String,
    },
    /// Revoke the stored certificate for a domain-set key
    Revoke {
        /// Domain-set key (sorted domains joined with commas)
        set_key: String,
    },
    /// Run the renewal scheduler until SIGTERM/SIGINT
    Run,
}

/// Exit codes distinguishing retryable from permanent failures
#[derive(Debug, Clone, Copy)]
enum CertomatExitCode {
    /// Success or clean shutdown
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Permanent failure: retrying will not help
    PermanentFailure = 2,
    /// Transient failure: worth retrying
    TransientFailure = 3,
    /// Runtime error (unexpected)
    RuntimeError = 4,
}

impl From<CertomatExitCode> for ExitCode {
    fn from(code: CertomatExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn exit_code_for(error: &OrchestrationError) -> CertomatExitCode {
    match error.reason.class() {
        ErrorClass::Transient => CertomatExitCode::TransientFailure,
        ErrorClass::Permanent => CertomatExitCode::PermanentFailure,
    }
}

/// Daemon configuration, read from the environment
struct EnvConfig {
    provider_type: String,
    provider_api_token: String,
    provider_zone_id: Option<String>,
    acme_directory_url: Option<String>,
    acme_contact: Option<String>,
    acme_credentials_path: Option<String>,
    resolvers: Vec<String>,
    propagation_timeout_secs: Option<u64>,
    propagation_poll_interval_secs: Option<u64>,
    propagation_quorum: String,
    retry_max_attempts: Option<u32>,
    retry_base_delay_secs: Option<u64>,
    retry_max_delay_secs: Option<u64>,
    renewal_window_days: Option<i64>,
    scan_interval_secs: Option<u64>,
    store_type: String,
    store_path: Option<String>,
    log_level: String,
}

impl EnvConfig {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            provider_type: env::var("CERTOMAT_PROVIDER_TYPE")
                .unwrap_or_else(|_| "cloudflare".to_string()),
            provider_api_token: env::var("CERTOMAT_PROVIDER_API_TOKEN")?,
            provider_zone_id: env::var("CERTOMAT_PROVIDER_ZONE_ID").ok(),
            acme_directory_url: env::var("CERTOMAT_ACME_DIRECTORY_URL").ok(),
            acme_contact: env::var("CERTOMAT_ACME_CONTACT").ok(),
            acme_credentials_path: env::var("CERTOMAT_ACME_CREDENTIALS_PATH").ok(),
            resolvers: env::var("CERTOMAT_RESOLVERS")
                .unwrap_or_else(|_| "1.1.1.1,8.8.8.8".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            propagation_timeout_secs: parse_env("CERTOMAT_PROPAGATION_TIMEOUT_SECS")?,
            propagation_poll_interval_secs: parse_env("CERTOMAT_PROPAGATION_POLL_INTERVAL_SECS")?,
            propagation_quorum: env::var("CERTOMAT_PROPAGATION_QUORUM")
                .unwrap_or_else(|_| "all".to_string()),
            retry_max_attempts: parse_env("CERTOMAT_RETRY_MAX_ATTEMPTS")?,
            retry_base_delay_secs: parse_env("CERTOMAT_RETRY_BASE_DELAY_SECS")?,
            retry_max_delay_secs: parse_env("CERTOMAT_RETRY_MAX_DELAY_SECS")?,
            renewal_window_days: parse_env("CERTOMAT_RENEWAL_WINDOW_DAYS")?,
            scan_interval_secs: parse_env("CERTOMAT_SCAN_INTERVAL_SECS")?,
            store_type: env::var("CERTOMAT_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("CERTOMAT_STORE_PATH").ok(),
            log_level: env::var("CERTOMAT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration before touching the network
    fn validate(&self) -> Result<()> {
        if self.provider_api_token.is_empty() {
            anyhow::bail!(
                "CERTOMAT_PROVIDER_API_TOKEN is required. \
                Set it via: export CERTOMAT_PROVIDER_API_TOKEN=your_token"
            );
        }

        if self.provider_api_token.len() < 20 {
            anyhow::bail!(
                "CERTOMAT_PROVIDER_API_TOKEN appears too short ({} chars). \
                Cloudflare tokens are typically 40 characters. \
                Verify your token is correct.",
                self.provider_api_token.len()
            );
        }

        // Catch obvious placeholder tokens before they hit the API.
        let token_lower = self.provider_api_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower.contains("example")
        {
            anyhow::bail!(
                "CERTOMAT_PROVIDER_API_TOKEN appears to be a placeholder. \
                Use an actual API token from your DNS provider."
            );
        }

        match self.provider_type.as_str() {
            "cloudflare" => {}
            other => anyhow::bail!(
                "CERTOMAT_PROVIDER_TYPE '{}' is not supported. Supported providers: cloudflare",
                other
            ),
        }

        if let Some(url) = &self.acme_directory_url
            && !url.starts_with("https://")
            && !url.starts_with("http://")
        {
            anyhow::bail!("CERTOMAT_ACME_DIRECTORY_URL must be HTTP(S). Got: {}", url);
        }

        if self.resolvers.is_empty() {
            anyhow::bail!(
                "CERTOMAT_RESOLVERS must contain at least one resolver. \
                Set it via: export CERTOMAT_RESOLVERS=1.1.1.1,8.8.8.8"
            );
        }

        match self.propagation_quorum.as_str() {
            "all" | "majority" => {}
            other => anyhow::bail!(
                "CERTOMAT_PROPAGATION_QUORUM '{}' is not valid. Valid values: all, majority",
                other
            ),
        }

        if let Some(timeout) = self.propagation_timeout_secs
            && !(10..=3600).contains(&timeout)
        {
            anyhow::bail!(
                "CERTOMAT_PROPAGATION_TIMEOUT_SECS must be between 10 and 3600. Got: {}",
                timeout
            );
        }

        if let Some(attempts) = self.retry_max_attempts
            && (attempts == 0 || attempts > 10)
        {
            anyhow::bail!(
                "CERTOMAT_RETRY_MAX_ATTEMPTS must be between 1 and 10. Got: {}",
                attempts
            );
        }

        if let Some(window) = self.renewal_window_days
            && !(1..=89).contains(&window)
        {
            anyhow::bail!(
                "CERTOMAT_RENEWAL_WINDOW_DAYS must be between 1 and 89. Got: {}",
                window
            );
        }

        match self.store_type.as_str() {
            "file" => {
                let Some(path) = self.store_path.as_deref() else {
                    anyhow::bail!(
                        "CERTOMAT_STORE_PATH is required when CERTOMAT_STORE_TYPE=file. \
                        Set it via: export CERTOMAT_STORE_PATH=/var/lib/certomat/certs.json"
                    );
                };
                if path.is_empty() {
                    anyhow::bail!("CERTOMAT_STORE_PATH cannot be empty");
                }
            }
            "memory" => {}
            other => anyhow::bail!(
                "CERTOMAT_STORE_TYPE '{}' is not supported. Supported types: file, memory",
                other
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "CERTOMAT_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                other
            ),
        }

        Ok(())
    }

    /// Build the core configuration
    fn to_core(&self) -> CertomatConfig {
        let acme_defaults = AcmeConfig::default();
        let propagation_defaults = PropagationConfig::default();
        let retry_defaults = RetryConfig::default();
        let renewal_defaults = RenewalConfig::default();

        CertomatConfig {
            provider: ProviderConfig::Cloudflare {
                api_token: self.provider_api_token.clone(),
                zone_id: self.provider_zone_id.clone(),
            },
            acme: AcmeConfig {
                directory_url: self
                    .acme_directory_url
                    .clone()
                    .unwrap_or(acme_defaults.directory_url),
                contact: self.acme_contact.clone(),
                credentials_path: self.acme_credentials_path.clone(),
            },
            store: match self.store_type.as_str() {
                "memory" => StoreConfig::Memory,
                _ => StoreConfig::File {
                    path: self.store_path.clone().unwrap_or_default(),
                },
            },
            propagation: PropagationConfig {
                timeout_secs: self
                    .propagation_timeout_secs
                    .unwrap_or(propagation_defaults.timeout_secs),
                poll_interval_secs: self
                    .propagation_poll_interval_secs
                    .unwrap_or(propagation_defaults.poll_interval_secs),
                quorum: match self.propagation_quorum.as_str() {
                    "majority" => Quorum::Majority,
                    _ => Quorum::All,
                },
            },
            retry: RetryConfig {
                max_attempts: self.retry_max_attempts.unwrap_or(retry_defaults.max_attempts),
                base_delay_secs: self
                    .retry_base_delay_secs
                    .unwrap_or(retry_defaults.base_delay_secs),
                max_delay_secs: self
                    .retry_max_delay_secs
                    .unwrap_or(retry_defaults.max_delay_secs),
            },
            renewal: RenewalConfig {
                window_days: self.renewal_window_days.unwrap_or(renewal_defaults.window_days),
                scan_interval_secs: self
                    .scan_interval_secs
                    .unwrap_or(renewal_defaults.scan_interval_secs),
            },
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Parse an optional numeric environment variable, rejecting garbage
fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return CertomatExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {e}");
        return CertomatExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return CertomatExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return CertomatExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(cli, config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Daemon error: {e}");
                CertomatExitCode::RuntimeError
            }
        }
    });

    code.into()
}

async fn run(cli: Cli, config: EnvConfig) -> Result<CertomatExitCode> {
    let core_config = config.to_core();

    // Credentials load once, here, and flow in by constructor injection.
    let credentials = CredentialStore::from_config(&core_config.provider)?;
    let provider = Arc::new(CloudflareProvider::new(
        credentials.provider().clone(),
        config.provider_zone_id.clone(),
    )?);

    let acme = Arc::new(InstantAcmeClient::connect(&core_config.acme).await?);

    let mut resolvers: Vec<Arc<dyn TxtResolver>> = Vec::new();
    for spec in &config.resolvers {
        resolvers.push(Arc::new(PublicResolver::from_spec(spec)?));
    }

    let store: Arc<dyn CertificateStore> = match &core_config.store {
        StoreConfig::File { path } => Arc::new(FileCertificateStore::new(path).await?),
        StoreConfig::Memory => Arc::new(MemoryCertificateStore::new()),
    };

    let (orchestrator, mut events) = ChallengeOrchestrator::new(
        provider,
        Arc::clone(&acme) as Arc<dyn AcmeClient>,
        resolvers,
        &core_config,
    )?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "orchestrator event");
        }
    });

    match cli.command {
        Command::Issue { domains, out } => {
            info!("issuing certificate for {}", domains.join(", "));
            let handle = orchestrator.issue(&domains)?;
            let set_key = handle.set_key().to_string();
            match handle.outcome().await.as_ref() {
                Ok(issuance) => {
                    report_cleanup_warnings(&issuance.cleanup_warnings);
                    let stored = StoredCertificate::from_certificate(&issuance.certificate);
                    store.put(&set_key, &stored).await?;
                    store.flush().await?;
                    if let Some(dir) = out {
                        write_material(&dir, &stored).await?;
                    }
                    info!(
                        set_key,
                        expires_at = %issuance.certificate.expires_at,
                        "certificate issued and stored"
                    );
                    Ok(CertomatExitCode::CleanShutdown)
                }
                Err(err) => {
                    error!(set_key, "issuance failed: {err}");
                    report_cleanup_warnings(&err.cleanup_warnings);
                    Ok(exit_code_for(err))
                }
            }
        }

        Command::Renew { set_key } => {
            let Some(stored) = store.get(&set_key).await? else {
                error!(set_key, "no stored certificate for this domain set");
                return Ok(CertomatExitCode::PermanentFailure);
            };
            let certificate = stored.to_certificate()?;
            let handle = orchestrator.renew(&certificate)?;
            match handle.outcome().await.as_ref() {
                Ok(issuance) => {
                    report_cleanup_warnings(&issuance.cleanup_warnings);
                    let renewed = StoredCertificate::from_certificate(&issuance.certificate);
                    store.put(&set_key, &renewed).await?;
                    store.flush().await?;
                    info!(
                        set_key,
                        expires_at = %issuance.certificate.expires_at,
                        "certificate renewed"
                    );
                    Ok(CertomatExitCode::CleanShutdown)
                }
                Err(err) => {
                    error!(set_key, "renewal failed: {err}");
                    report_cleanup_warnings(&err.cleanup_warnings);
                    Ok(exit_code_for(err))
                }
            }
        }

        Command::Revoke { set_key } => {
            let Some(stored) = store.get(&set_key).await? else {
                error!(set_key, "no stored certificate for this domain set");
                return Ok(CertomatExitCode::PermanentFailure);
            };
            match acme.revoke(&stored.chain_pem).await {
                Ok(()) => {
                    store.delete(&set_key).await?;
                    store.flush().await?;
                    info!(set_key, "certificate revoked and removed from the store");
                    Ok(CertomatExitCode::CleanShutdown)
                }
                Err(err) => {
                    error!(set_key, "revocation failed: {err}");
                    Ok(match err.class() {
                        ErrorClass::Transient => CertomatExitCode::TransientFailure,
                        ErrorClass::Permanent => CertomatExitCode::PermanentFailure,
                    })
                }
            }
        }

        Command::Run => {
            let scheduler = RenewalScheduler::new(store, orchestrator, &core_config.renewal);
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                let signal_name = wait_for_shutdown().await;
                info!("received {signal_name}, shutting down");
                let _ = shutdown_tx.send(());
            });
            scheduler.run_with_shutdown(Some(shutdown_rx)).await?;
            Ok(CertomatExitCode::CleanShutdown)
        }
    }
}

fn report_cleanup_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        warn!(
            domains = ?warnings,
            "challenge TXT records could not be removed; delete them manually"
        );
    }
}

/// Write certificate material for consumers (web servers etc.)
async fn write_material(dir: &PathBuf, stored: &StoredCertificate) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let chain_path = dir.join("fullchain.pem");
    let key_path = dir.join("privkey.pem");
    tokio::fs::write(&chain_path, &stored.chain_pem).await?;
    tokio::fs::write(&key_path, &stored.private_key_pem).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    info!("certificate material written to {}", dir.display());
    Ok(())
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> &'static str {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to set up SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = tokio::signal::ctrl_c() => "SIGINT",
    }
}

/// Wait for CTRL-C (non-Unix platforms)
#[cfg(not(unix))]
async fn wait_for_shutdown() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
