//! Contract: cancellation cleans up before surfacing
//!
//! Aborting an in-flight orchestration triggers an immediate best-effort
//! cleanup pass over any records already created, then fails with the
//! cancellation as the reason. A cleanup failure during cancellation is a
//! distinct warning, never conflated with the cancellation cause.

mod common;

use std::time::{Duration, Instant};

use common::*;

use certomat_core::config::PropagationConfig;
use certomat_core::error::Error;

/// Config that parks the orchestration in AwaitingPropagation for a while
fn parked_config() -> certomat_core::CertomatConfig {
    let mut config = fast_config();
    config.propagation = PropagationConfig {
        timeout_secs: 30,
        poll_interval_secs: 1,
        quorum: certomat_core::Quorum::All,
    };
    config
}

#[tokio::test]
async fn abort_during_propagation_cleans_up_and_reports_cancelled() {
    let provider = MockDnsProvider::new();
    let acme = MockAcmeClient::new();
    let resolver = ScriptedResolver::never(provider.zone_handle());
    let h = harness_with(provider, acme, resolver, parked_config());

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();

    // Let the orchestration create its record and start polling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.provider.records_in_zone().len(), 1, "record exists while parked");

    let started = Instant::now();
    handle.abort();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("cancelled");
    assert!(matches!(error.reason, Error::Cancelled));
    assert!(error.cleanup_warnings.is_empty());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must not wait out the propagation timeout"
    );

    assert!(h.provider.records_in_zone().is_empty(), "record cleaned up on abort");
    assert_eq!(h.provider.delete_count(), 1);
}

#[tokio::test]
async fn cleanup_failure_during_cancellation_stays_distinct() {
    let provider = MockDnsProvider::new();
    let acme = MockAcmeClient::new();
    let resolver = ScriptedResolver::never(provider.zone_handle());
    let h = harness_with(provider, acme, resolver, parked_config());

    h.provider
        .fail_delete("_acme-challenge.example.test", Error::auth("token revoked"));

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("cancelled");
    // The cause is the cancellation; the failed cleanup is a warning.
    assert!(matches!(error.reason, Error::Cancelled));
    assert_eq!(error.cleanup_warnings, vec!["example.test".to_string()]);
    assert_eq!(h.provider.records_in_zone().len(), 1);
}

#[tokio::test]
async fn abort_after_completion_is_a_no_op() {
    let h = harness(1);

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let duplicate = handle.clone();
    handle.outcome().await.as_ref().as_ref().expect("issuance succeeds");

    // Aborting a finished orchestration changes nothing.
    duplicate.abort();
    duplicate.outcome().await.as_ref().as_ref().expect("outcome unchanged");
}
