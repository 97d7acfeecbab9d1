//! Contract: no orphan TXT records survive orchestration
//!
//! For every completed orchestration, success or failure, the provider zone
//! ends in the state it started in. The only exception is a cleanup failure,
//! which must be reported on the terminal result, never silently swallowed,
//! and never allowed to mask the originating error.

mod common;

use common::*;

use certomat_core::error::{Error, ErrorClass};
use certomat_core::{OrchestrationState, OrchestratorEvent};

#[tokio::test]
async fn issued_flow_leaves_no_residual_records() {
    // Provider always succeeds; resolver reports the TXT value on the
    // second poll.
    let mut h = harness(2);

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let outcome = handle.outcome().await;

    let issuance = outcome.as_ref().as_ref().expect("issuance succeeds");
    assert!(issuance.certificate.expires_at > issuance.certificate.issued_at);
    assert_eq!(issuance.certificate.domains.domains(), ["example.test"]);
    assert!(issuance.cleanup_warnings.is_empty());

    // The record was created, polled at least twice, then removed.
    assert!(h.provider.records_in_zone().is_empty(), "no orphan records");
    assert_eq!(h.provider.create_count(), 1);
    assert_eq!(h.provider.delete_count(), 1);
    assert!(h.resolver.lookup_count("_acme-challenge.example.test") >= 2);

    // The state machine walked every stage in order.
    let states: Vec<_> = drain_events(&mut h.events)
        .into_iter()
        .filter_map(|event| match event {
            OrchestratorEvent::StateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            OrchestrationState::Pending,
            OrchestrationState::RecordCreating,
            OrchestrationState::AwaitingPropagation,
            OrchestrationState::Validating,
            OrchestrationState::RecordCleanup,
            OrchestrationState::Issued,
        ]
    );
}

#[tokio::test]
async fn permanent_create_error_fails_without_cleanup() {
    let h = harness(1);
    h.provider
        .fail_create("_acme-challenge.bad.test", Error::auth("invalid token"));

    let handle = h.orchestrator.issue(&domains(&["bad.test"])).unwrap();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("orchestration fails");
    assert_eq!(error.reason.class(), ErrorClass::Permanent);
    assert!(matches!(error.reason, Error::Authentication(_)));
    assert!(error.cleanup_warnings.is_empty());

    // No record was ever created, so nothing was cleaned up.
    assert!(h.provider.records_in_zone().is_empty());
    assert_eq!(h.provider.create_count(), 1, "permanent errors do not retry");
    assert_eq!(h.provider.delete_count(), 0, "nothing to clean up");
}

#[tokio::test]
async fn validation_failure_cleans_up_before_returning() {
    let h = harness(1);
    h.acme.fail_validation("example.test");

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("validation fails");
    assert!(matches!(error.reason, Error::Validation(_)));
    assert!(error.cleanup_warnings.is_empty());

    // The record existed during validation and is gone afterwards.
    assert_eq!(h.provider.create_count(), 1);
    assert_eq!(h.provider.delete_count(), 1);
    assert!(h.provider.records_in_zone().is_empty());
}

#[tokio::test]
async fn partial_create_failure_rolls_back_created_records() {
    let h = harness(1);
    h.provider
        .fail_create("_acme-challenge.b.example.test", Error::auth("invalid token"));

    let handle = h
        .orchestrator
        .issue(&domains(&["a.example.test", "b.example.test"]))
        .unwrap();
    let outcome = handle.outcome().await;

    // The whole request is atomic: one domain failing fails the set.
    let error = outcome.as_ref().as_ref().expect_err("request fails as a whole");
    assert!(matches!(error.reason, Error::Authentication(_)));

    // The record that was created got rolled back.
    assert_eq!(h.provider.create_count(), 2);
    assert_eq!(h.provider.delete_count(), 1);
    assert!(h.provider.records_in_zone().is_empty());
}

#[tokio::test]
async fn cleanup_failure_is_reported_but_never_masks_the_cause() {
    let h = harness(1);
    h.acme.fail_validation("example.test");
    // Permanent delete failure: the record stays behind.
    h.provider
        .fail_delete("_acme-challenge.example.test", Error::auth("token revoked"));

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("orchestration fails");
    // The terminal reason is still the validation failure...
    assert!(matches!(error.reason, Error::Validation(_)));
    // ...and the cleanup failure rides along as a warning.
    assert_eq!(error.cleanup_warnings, vec!["example.test".to_string()]);

    // The residual record is exactly the reported one.
    assert_eq!(h.provider.records_in_zone().len(), 1);
}

#[tokio::test]
async fn acme_order_failure_fails_before_any_record_exists() {
    let h = harness(1);
    h.acme.fail_begin(Error::acme("account key rejected"));

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("order open fails");
    assert!(matches!(error.reason, Error::Acme(_)));
    assert_eq!(h.provider.create_count(), 0);
    assert_eq!(h.provider.delete_count(), 0);
}
