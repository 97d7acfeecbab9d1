//! Error types for the certificate orchestrator
//!
//! Every error classifies as either transient (worth retrying with backoff)
//! or permanent (fail immediately). Retry loops consult [`Error::class`]
//! instead of matching on individual variants.

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Retry classification for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff (rate limits, timeouts, 5xx)
    Transient,
    /// Retrying cannot help (auth failures, rejections, bad input)
    Permanent,
}

/// Core error type for the certificate orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication or permission failure against the DNS provider API
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Provider rate limit hit
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A network call did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Provider-side outage (5xx responses)
    #[error("provider unavailable ({provider}): {message}")]
    ProviderUnavailable {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Other provider-specific error
    #[error("provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// No DNS zone serves the requested record name
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// The record to delete no longer exists
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// ACME protocol or account error
    #[error("ACME error: {0}")]
    Acme(String),

    /// The certificate authority rejected a challenge
    #[error("validation failed: {0}")]
    Validation(String),

    /// A TXT record never became visible to the configured resolvers
    #[error("TXT record {record_name} not visible within {timeout_secs}s")]
    PropagationTimeout {
        /// Record name that was being polled
        record_name: String,
        /// Configured propagation timeout
        timeout_secs: u64,
    },

    /// A transient error survived every retry attempt
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made before giving up
        attempts: u32,
        /// The last transient error observed
        #[source]
        source: Box<Error>,
    },

    /// Invalid input (bad domain name, empty domain set, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Certificate store errors
    #[error("certificate store error: {0}")]
    Store(String),

    /// The orchestration was aborted by the caller
    #[error("orchestration cancelled")]
    Cancelled,

    /// Network-related errors
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for retry decisions
    ///
    /// `RetriesExhausted` is permanent by definition: it records that the
    /// transient path has already been exhausted.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::RateLimited(_)
            | Error::Timeout(_)
            | Error::ProviderUnavailable { .. }
            | Error::PropagationTimeout { .. }
            | Error::Network(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether this error is worth retrying
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a transient provider-outage error
    pub fn provider_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a "zone not found" error
    pub fn zone_not_found(msg: impl Into<String>) -> Self {
        Self::ZoneNotFound(msg.into())
    }

    /// Create a "record not found" error
    pub fn record_not_found(msg: impl Into<String>) -> Self {
        Self::RecordNotFound(msg.into())
    }

    /// Create an ACME error
    pub fn acme(msg: impl Into<String>) -> Self {
        Self::Acme(msg.into())
    }

    /// Create a validation-rejection error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a certificate store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
