//! Propagation checker: gate orchestration on real record visibility
//!
//! Polls one or more resolvers until a quorum observes the expected TXT
//! value. Resolvers should sit outside the DNS provider's own
//! infrastructure so the check catches actual propagation rather than
//! provider-side acknowledgment. The wait is deadline-bounded: the checker
//! returns `false` on timeout, never hangs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::Quorum;
use crate::error::Result;
use crate::traits::TxtResolver;

impl Quorum {
    /// Whether `visible` observations out of `total` resolvers satisfy the quorum
    pub fn met(&self, visible: usize, total: usize) -> bool {
        match self {
            Quorum::All => visible == total,
            Quorum::Majority => visible * 2 > total,
        }
    }
}

/// Polls resolvers for challenge record visibility
#[derive(Clone)]
pub struct PropagationChecker {
    resolvers: Vec<Arc<dyn TxtResolver>>,
    quorum: Quorum,
}

impl PropagationChecker {
    /// Create a checker over a non-empty set of resolvers
    pub fn new(resolvers: Vec<Arc<dyn TxtResolver>>, quorum: Quorum) -> Result<Self> {
        if resolvers.is_empty() {
            return Err(crate::Error::config(
                "propagation checker needs at least one resolver",
            ));
        }
        Ok(Self { resolvers, quorum })
    }

    /// Number of configured resolvers
    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    /// Wait until a quorum of resolvers observes `expected` at `record_name`
    ///
    /// Returns `true` once the quorum is met, `false` if the deadline passes
    /// first. A resolver lookup error counts as not-visible for that round.
    pub async fn await_visible(
        &self,
        record_name: &str,
        expected: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut round = 0u32;
        loop {
            round += 1;
            let mut visible = 0usize;
            for resolver in &self.resolvers {
                match resolver.lookup_txt(record_name).await {
                    Ok(values) if values.iter().any(|v| v == expected) => visible += 1,
                    Ok(_) => {
                        trace!(
                            resolver = %resolver.resolver_name(),
                            record = %record_name,
                            "expected TXT value not yet visible"
                        );
                    }
                    Err(err) => {
                        debug!(
                            resolver = %resolver.resolver_name(),
                            record = %record_name,
                            "TXT lookup failed: {err}"
                        );
                    }
                }
            }

            if self.quorum.met(visible, self.resolvers.len()) {
                debug!(
                    record = %record_name,
                    round,
                    visible,
                    total = self.resolvers.len(),
                    "propagation quorum met"
                );
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(record = %record_name, round, "propagation deadline passed");
                return false;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}
