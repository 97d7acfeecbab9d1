//! Challenge orchestration state machine
//!
//! Drives one certificate request end to end:
//!
//! ```text
//! Pending → RecordCreating → AwaitingPropagation → Validating
//!                                   │                  │
//!                                   └──────► RecordCleanup ◄──────┘
//!                                                 │
//!                                         {Issued | Failed}
//! ```
//!
//! The structural invariant replacing shell-style trap hooks: no path from
//! RecordCreating reaches a terminal state without passing through
//! RecordCleanup. Cleanup for a challenge never begins before its
//! record-create call has definitively completed, and a cleanup failure is
//! reported alongside the terminal result, never allowed to mask the
//! originating error.
//!
//! ## Concurrency
//!
//! Per-domain record creation and propagation checks fan out as parallel
//! tasks; the transition to Validating is a join barrier. At most one
//! orchestration runs per domain set: `issue` checks-and-sets an in-flight
//! map atomically and returns the existing handle for a duplicate request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::CertomatConfig;
use crate::error::Error;
use crate::propagation::PropagationChecker;
use crate::records::{RecordManager, RetryPolicy};
use crate::request::{
    Certificate, CertificateRequest, ChallengeState, DnsChallenge, DomainSet, RequestStatus,
};
use crate::traits::{AcmeClient, DnsProvider, RecordHandle, TxtResolver};

/// States of one orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationState {
    /// Request accepted, in-flight lock held, nothing started
    Pending,
    /// Per-domain record-create calls in flight
    RecordCreating,
    /// Records created, polling resolvers for visibility
    AwaitingPropagation,
    /// Quorum reached, CA validation/retrieval in flight
    Validating,
    /// Removing challenge records (runs on every path)
    RecordCleanup,
    /// Terminal: certificate issued
    Issued,
    /// Terminal: request failed
    Failed,
}

impl OrchestrationState {
    /// Whether the transition to `next` is legal
    pub fn can_transition_to(self, next: OrchestrationState) -> bool {
        use OrchestrationState::*;
        matches!(
            (self, next),
            (Pending, RecordCreating)
                | (Pending, Failed)
                | (RecordCreating, AwaitingPropagation)
                | (RecordCreating, RecordCleanup)
                | (AwaitingPropagation, Validating)
                | (AwaitingPropagation, RecordCleanup)
                | (Validating, RecordCleanup)
                | (RecordCleanup, Issued)
                | (RecordCleanup, Failed)
        )
    }

    /// Whether this state is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, OrchestrationState::Issued | OrchestrationState::Failed)
    }
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestrationState::Pending => "pending",
            OrchestrationState::RecordCreating => "record-creating",
            OrchestrationState::AwaitingPropagation => "awaiting-propagation",
            OrchestrationState::Validating => "validating",
            OrchestrationState::RecordCleanup => "record-cleanup",
            OrchestrationState::Issued => "issued",
            OrchestrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// The orchestration moved to a new state
    StateChanged {
        set_key: String,
        state: OrchestrationState,
    },

    /// A challenge TXT record was created
    RecordCreated { domain: String, record_name: String },

    /// A challenge TXT record could not be created
    RecordCreateFailed { domain: String, error: String },

    /// A challenge record became visible to the resolver quorum
    PropagationConfirmed { domain: String },

    /// A challenge record never became visible within the timeout
    PropagationTimedOut { domain: String },

    /// The CA rejected (or errored on) a challenge
    ValidationFailed { domain: String, error: String },

    /// A challenge record could not be removed during cleanup
    CleanupFailed { domain: String, error: String },

    /// Terminal: certificate issued
    Issued {
        set_key: String,
        expires_at: DateTime<Utc>,
    },

    /// Terminal: orchestration failed
    Failed { set_key: String, error: String },
}

/// Successful terminal result
#[derive(Debug, Clone)]
pub struct Issuance {
    /// The issued certificate
    pub certificate: Certificate,
    /// Domains whose challenge record could not be removed (operator follow-up)
    pub cleanup_warnings: Vec<String>,
}

/// Failed terminal result
///
/// Carries the originating failure plus any cleanup failures; the latter
/// never replace the former.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct OrchestrationError {
    /// Why the orchestration failed
    #[source]
    pub reason: Error,
    /// Domains whose challenge record could not be removed (operator follow-up)
    pub cleanup_warnings: Vec<String>,
}

/// Terminal outcome of one orchestration
pub type Outcome = std::result::Result<Issuance, OrchestrationError>;

/// Cancellation signal shared between handles and the driver task
#[derive(Default)]
struct AbortSignal {
    notify: Notify,
    cancelled: AtomicBool,
}

impl AbortSignal {
    fn trigger(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled_wait(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Handle to one in-flight (or completed) orchestration
///
/// Duplicate `issue` calls for the same pending domain set receive clones of
/// the same handle; all of them resolve to the same shared outcome.
#[derive(Clone)]
pub struct IssueHandle {
    set_key: String,
    outcome_rx: watch::Receiver<Option<Arc<Outcome>>>,
    abort: Arc<AbortSignal>,
}

impl IssueHandle {
    /// The domain-set key this orchestration is locked on
    pub fn set_key(&self) -> &str {
        &self.set_key
    }

    /// Request cancellation: best-effort cleanup, then `Failed(Cancelled)`
    pub fn abort(&self) {
        self.abort.trigger();
    }

    /// Wait for the terminal outcome
    pub async fn outcome(mut self) -> Arc<Outcome> {
        loop {
            {
                let current = self.outcome_rx.borrow_and_update();
                if let Some(outcome) = current.as_ref() {
                    return Arc::clone(outcome);
                }
            }
            if self.outcome_rx.changed().await.is_err() {
                return Arc::new(Err(OrchestrationError {
                    reason: Error::other("orchestration task ended without reporting an outcome"),
                    cleanup_warnings: Vec::new(),
                }));
            }
        }
    }
}

/// The challenge orchestrator
///
/// Composes the record manager, propagation checker and ACME client into the
/// state machine above. Construction returns the orchestrator plus the
/// receiving end of its event channel.
pub struct ChallengeOrchestrator {
    inner: Arc<Inner>,
}

/// Shared core: the driver tasks hold this beyond `issue`'s return
struct Inner {
    records: RecordManager,
    acme: Arc<dyn AcmeClient>,
    propagation: PropagationChecker,
    propagation_timeout: Duration,
    poll_interval: Duration,
    validation_timeout: Duration,

    /// Domain-set key → in-flight handle; the at-most-one-per-set lock
    in_flight: Mutex<HashMap<String, IssueHandle>>,

    event_tx: mpsc::Sender<OrchestratorEvent>,
}

impl ChallengeOrchestrator {
    /// Create a new orchestrator
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver yields
    /// orchestration events for monitoring/logging.
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        acme: Arc<dyn AcmeClient>,
        resolvers: Vec<Arc<dyn TxtResolver>>,
        config: &CertomatConfig,
    ) -> crate::Result<(Arc<Self>, mpsc::Receiver<OrchestratorEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.orchestrator.event_channel_capacity);
        let inner = Arc::new(Inner {
            records: RecordManager::new(provider, RetryPolicy::from_config(&config.retry)),
            acme,
            propagation: PropagationChecker::new(resolvers, config.propagation.quorum)?,
            propagation_timeout: config.propagation.timeout(),
            poll_interval: config.propagation.poll_interval(),
            validation_timeout: config.orchestrator.validation_timeout(),
            in_flight: Mutex::new(HashMap::new()),
            event_tx: tx,
        });

        Ok((Arc::new(Self { inner }), rx))
    }

    /// Issue a certificate for a set of domains
    ///
    /// If an orchestration for the same domain set is already pending, the
    /// existing in-flight handle is returned instead of starting a duplicate.
    pub fn issue(&self, domains: &[String]) -> crate::Result<IssueHandle> {
        let set = DomainSet::new(domains.iter().cloned())?;
        Ok(self.start(CertificateRequest::new(set)))
    }

    /// Renew a certificate: same state machine, reusing its domain set
    pub fn renew(&self, certificate: &Certificate) -> crate::Result<IssueHandle> {
        Ok(self.start(CertificateRequest::new(certificate.domains.clone())))
    }

    /// Check-and-set the in-flight lock, spawning the driver on a miss
    fn start(&self, request: CertificateRequest) -> IssueHandle {
        let set_key = request.domains.key();

        let mut in_flight = self.inner.in_flight.lock().unwrap();
        if let Some(existing) = in_flight.get(&set_key) {
            debug!(set_key, "orchestration already in flight, returning existing handle");
            return existing.clone();
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        let abort = Arc::new(AbortSignal::default());
        let handle = IssueHandle {
            set_key: set_key.clone(),
            outcome_rx,
            abort: Arc::clone(&abort),
        };
        in_flight.insert(set_key.clone(), handle.clone());
        drop(in_flight);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.drive(request, abort).await;
            // Release the lock before publishing so a waiter reacting to the
            // outcome can immediately start a fresh orchestration.
            inner.in_flight.lock().unwrap().remove(&set_key);
            let _ = outcome_tx.send(Some(Arc::new(outcome)));
        });

        handle
    }
}

impl Inner {
    /// Drive one request through the state machine
    async fn drive(&self, mut request: CertificateRequest, abort: Arc<AbortSignal>) -> Outcome {
        let set_key = request.domains.key();
        let mut state = OrchestrationState::Pending;
        self.emit(OrchestratorEvent::StateChanged {
            set_key: set_key.clone(),
            state,
        });
        request.status = RequestStatus::InProgress;
        info!(set_key, "starting certificate orchestration");

        // The ACME order comes first: it is the source of challenge tokens
        // and TXT values. Failure here predates any DNS mutation, so there
        // is nothing to clean up.
        let mut order = tokio::select! {
            result = self.acme.begin_order(request.domains.domains()) => match result {
                Ok(order) => order,
                Err(err) => return self.fail(&set_key, &mut request, &mut state, err, Vec::new()),
            },
            _ = abort.cancelled_wait() => {
                return self.fail(&set_key, &mut request, &mut state, Error::Cancelled, Vec::new());
            }
        };

        // Domains with a cached-valid authorization need no challenge; an
        // empty list legitimately skips straight to retrieval.
        let challenges: Vec<DnsChallenge> = order
            .challenges()
            .into_iter()
            .map(|spec| DnsChallenge::new(spec.domain, spec.token, spec.dns_value))
            .collect();

        // Pending → RecordCreating: fan out one create per challenge.
        self.transition(&set_key, &mut state, OrchestrationState::RecordCreating);
        let mut create_tasks = JoinSet::new();
        for challenge in challenges.iter().cloned() {
            let records = self.records.clone();
            create_tasks.spawn(async move {
                let mut challenge = challenge;
                challenge.state = ChallengeState::RecordCreating;
                let result = records.create(&challenge).await;
                if result.is_ok() {
                    challenge.state = ChallengeState::RecordCreated;
                }
                (challenge, result)
            });
        }

        // Join barrier: every create call runs to definitive completion
        // before any cleanup decision, so cleanup can never race an
        // in-flight create.
        let mut created: Vec<(DnsChallenge, RecordHandle)> = Vec::new();
        let mut first_error: Option<Error> = None;
        while let Some(joined) = create_tasks.join_next().await {
            match joined {
                Ok((challenge, Ok(handle))) => {
                    self.emit(OrchestratorEvent::RecordCreated {
                        domain: challenge.domain.clone(),
                        record_name: handle.record_name.clone(),
                    });
                    created.push((challenge, handle));
                }
                Ok((challenge, Err(err))) => {
                    self.emit(OrchestratorEvent::RecordCreateFailed {
                        domain: challenge.domain.clone(),
                        error: err.to_string(),
                    });
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(Error::other(format!("record task failed: {join_err}")));
                    }
                }
            }
        }
        if first_error.is_none() && abort.is_cancelled() {
            first_error = Some(Error::Cancelled);
        }
        if let Some(err) = first_error {
            // Best-effort rollback of whatever was already created.
            self.transition(&set_key, &mut state, OrchestrationState::RecordCleanup);
            let warnings = self.cleanup(&created).await;
            return self.fail(&set_key, &mut request, &mut state, err, warnings);
        }

        // RecordCreating → AwaitingPropagation: poll every record until the
        // resolver quorum sees it, bounded by the configured timeout.
        self.transition(&set_key, &mut state, OrchestrationState::AwaitingPropagation);
        let mut poll_tasks = JoinSet::new();
        for (challenge, _) in created.iter() {
            let checker = self.propagation.clone();
            let challenge = challenge.clone();
            let timeout = self.propagation_timeout;
            let interval = self.poll_interval;
            poll_tasks.spawn(async move {
                let visible = checker
                    .await_visible(&challenge.record_name, &challenge.record_value, timeout, interval)
                    .await;
                (challenge, visible)
            });
        }

        let mut propagation_error: Option<Error> = None;
        loop {
            tokio::select! {
                joined = poll_tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((challenge, true))) => {
                        self.emit(OrchestratorEvent::PropagationConfirmed {
                            domain: challenge.domain.clone(),
                        });
                    }
                    Some(Ok((challenge, false))) => {
                        self.emit(OrchestratorEvent::PropagationTimedOut {
                            domain: challenge.domain.clone(),
                        });
                        if propagation_error.is_none() {
                            propagation_error = Some(Error::PropagationTimeout {
                                record_name: challenge.record_name.clone(),
                                timeout_secs: self.propagation_timeout.as_secs(),
                            });
                        }
                    }
                    Some(Err(join_err)) => {
                        if propagation_error.is_none() {
                            propagation_error =
                                Some(Error::other(format!("propagation task failed: {join_err}")));
                        }
                    }
                },
                _ = abort.cancelled_wait() => {
                    // Polling has no side effects; safe to abandon mid-flight.
                    poll_tasks.abort_all();
                    propagation_error = Some(Error::Cancelled);
                    break;
                }
            }
        }
        if let Some(err) = propagation_error {
            self.transition(&set_key, &mut state, OrchestrationState::RecordCleanup);
            let warnings = self.cleanup(&created).await;
            return self.fail(&set_key, &mut request, &mut state, err, warnings);
        }

        // AwaitingPropagation → Validating: tell the CA each challenge is
        // ready, then retrieve the finalized certificate.
        self.transition(&set_key, &mut state, OrchestrationState::Validating);
        let mut validation_error: Option<Error> = None;
        for (challenge, _) in created.iter() {
            let result = tokio::select! {
                result = tokio::time::timeout(
                    self.validation_timeout,
                    order.request_validation(&challenge.domain),
                ) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::timeout(format!(
                        "ACME validation request for {} timed out",
                        challenge.domain
                    ))),
                },
                _ = abort.cancelled_wait() => Err(Error::Cancelled),
            };
            if let Err(err) = result {
                self.emit(OrchestratorEvent::ValidationFailed {
                    domain: challenge.domain.clone(),
                    error: err.to_string(),
                });
                validation_error = Some(err);
                break;
            }
        }

        let material = if validation_error.is_none() {
            let result = tokio::select! {
                result = tokio::time::timeout(
                    self.validation_timeout,
                    order.retrieve_certificate(),
                ) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::timeout("ACME certificate retrieval timed out")),
                },
                _ = abort.cancelled_wait() => Err(Error::Cancelled),
            };
            match result {
                Ok(material) => Some(material),
                Err(err) => {
                    if let Error::Validation(ref message) = err {
                        self.emit(OrchestratorEvent::ValidationFailed {
                            domain: set_key.clone(),
                            error: message.clone(),
                        });
                    }
                    validation_error = Some(err);
                    None
                }
            }
        } else {
            None
        };

        // Validating → RecordCleanup: unconditional, success or failure.
        self.transition(&set_key, &mut state, OrchestrationState::RecordCleanup);
        let warnings = self.cleanup(&created).await;

        match (validation_error, material) {
            (Some(err), _) => self.fail(&set_key, &mut request, &mut state, err, warnings),
            (None, Some(material)) => {
                let certificate = match Certificate::new(
                    request.domains.clone(),
                    material.not_before,
                    material.not_after,
                    material.chain_pem,
                    material.private_key_pem,
                    request.requested_at,
                ) {
                    Ok(certificate) => certificate,
                    Err(err) => {
                        return self.fail(&set_key, &mut request, &mut state, err, warnings);
                    }
                };
                self.transition(&set_key, &mut state, OrchestrationState::Issued);
                request.status = RequestStatus::Issued;
                self.emit(OrchestratorEvent::Issued {
                    set_key: set_key.clone(),
                    expires_at: certificate.expires_at,
                });
                info!(
                    set_key,
                    expires_at = %certificate.expires_at,
                    "certificate issued"
                );
                if !warnings.is_empty() {
                    warn!(
                        set_key,
                        domains = ?warnings,
                        "issuance succeeded but some challenge records could not be removed"
                    );
                }
                Ok(Issuance {
                    certificate,
                    cleanup_warnings: warnings,
                })
            }
            (None, None) => self.fail(
                &set_key,
                &mut request,
                &mut state,
                Error::other("ACME client returned neither certificate nor error"),
                warnings,
            ),
        }
    }

    /// Delete every created record, collecting the domains that failed
    ///
    /// Runs to completion even when cancelled: cleanup is the one stage that
    /// must not be interrupted.
    async fn cleanup(&self, created: &[(DnsChallenge, RecordHandle)]) -> Vec<String> {
        let mut delete_tasks = JoinSet::new();
        for (challenge, handle) in created.iter() {
            let records = self.records.clone();
            let domain = challenge.domain.clone();
            let handle = handle.clone();
            delete_tasks.spawn(async move {
                let result = records.delete(&handle).await;
                (domain, result)
            });
        }

        let mut warnings = Vec::new();
        while let Some(joined) = delete_tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((domain, Err(err))) => {
                    warn!(domain, "challenge record could not be removed: {err}");
                    self.emit(OrchestratorEvent::CleanupFailed {
                        domain: domain.clone(),
                        error: err.to_string(),
                    });
                    warnings.push(domain);
                }
                Err(join_err) => {
                    warn!("cleanup task failed: {join_err}");
                }
            }
        }
        warnings.sort();
        warnings
    }

    /// Move to the failed terminal state and build the outcome
    fn fail(
        &self,
        set_key: &str,
        request: &mut CertificateRequest,
        state: &mut OrchestrationState,
        reason: Error,
        cleanup_warnings: Vec<String>,
    ) -> Outcome {
        self.transition(set_key, state, OrchestrationState::Failed);
        request.status = RequestStatus::Failed;
        self.emit(OrchestratorEvent::Failed {
            set_key: set_key.to_string(),
            error: reason.to_string(),
        });
        warn!(set_key, "orchestration failed: {reason}");
        if !cleanup_warnings.is_empty() {
            warn!(
                set_key,
                domains = ?cleanup_warnings,
                "challenge records left behind; remove them manually"
            );
        }
        Err(OrchestrationError {
            reason,
            cleanup_warnings,
        })
    }

    /// Advance the state machine, emitting the transition
    fn transition(
        &self,
        set_key: &str,
        state: &mut OrchestrationState,
        next: OrchestrationState,
    ) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal transition {state} -> {next}"
        );
        debug!(set_key, from = %state, to = %next, "state transition");
        *state = next;
        self.emit(OrchestratorEvent::StateChanged {
            set_key: set_key.to_string(),
            state: next,
        });
    }

    /// Emit an event without blocking orchestration progress
    fn emit(&self, event: OrchestratorEvent) {
        if self.event_tx.try_send(event).is_err() {
            // Channel full or receiver gone; orchestration must not stall on
            // slow observers.
            warn!("event channel full, dropping event");
        }
    }
}
