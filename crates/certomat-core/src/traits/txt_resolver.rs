// # TXT Resolver Trait
//
// Defines the interface for observing TXT records from a resolver's point of
// view. The propagation checker polls one or more of these until a quorum
// observes the expected challenge value.
//
// ## Implementations
//
// - Public/system resolvers: `certomat-resolver` crate
//
// Resolvers outside the DNS provider's own infrastructure catch real
// propagation rather than provider-side acknowledgment.

use async_trait::async_trait;

/// Trait for a single resolver endpoint
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Look up the TXT values currently visible for a record name
    ///
    /// A name with no records (NXDOMAIN / empty answer) is `Ok(vec![])`,
    /// not an error; transport failures are errors.
    async fn lookup_txt(&self, record_name: &str) -> Result<Vec<String>, crate::Error>;

    /// Human-readable name of this resolver (for logging)
    fn resolver_name(&self) -> String;
}
