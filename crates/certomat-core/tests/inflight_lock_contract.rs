//! Contract: at most one orchestration per domain set
//!
//! The in-flight lock is acquired at Pending and released only at a terminal
//! state. A second `issue` call for the same pending domain set returns the
//! existing in-flight handle rather than starting a duplicate; distinct
//! domain sets are independent.

mod common;

use std::sync::Arc;

use common::*;

#[tokio::test]
async fn duplicate_issue_returns_existing_handle() {
    let h = harness(1);

    // Both calls land before the driver task gets a chance to run, so the
    // second observes the first still pending.
    let first = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let second = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    assert_eq!(first.set_key(), second.set_key());

    let outcome_a = first.outcome().await;
    let outcome_b = second.outcome().await;

    // Same orchestration, same shared outcome.
    assert!(Arc::ptr_eq(&outcome_a, &outcome_b));
    assert_eq!(h.acme.begin_count(), 1, "no duplicate ACME order");
    assert_eq!(h.provider.create_count(), 1, "no duplicate record");
}

#[tokio::test]
async fn domain_set_identity_ignores_order_and_case() {
    let h = harness(1);

    let first = h
        .orchestrator
        .issue(&domains(&["b.example.test", "a.example.test"]))
        .unwrap();
    let second = h
        .orchestrator
        .issue(&domains(&["A.example.test", "b.example.test", "a.example.test"]))
        .unwrap();

    assert_eq!(first.set_key(), "a.example.test,b.example.test");
    assert_eq!(first.set_key(), second.set_key());

    first.outcome().await.as_ref().as_ref().expect("issuance succeeds");
    assert_eq!(h.acme.begin_count(), 1);
}

#[tokio::test]
async fn distinct_domain_sets_run_independently() {
    let h = harness(1);

    let first = h.orchestrator.issue(&domains(&["a.example.test"])).unwrap();
    let second = h.orchestrator.issue(&domains(&["b.example.test"])).unwrap();
    assert_ne!(first.set_key(), second.set_key());

    first.outcome().await.as_ref().as_ref().expect("first succeeds");
    second.outcome().await.as_ref().as_ref().expect("second succeeds");

    assert_eq!(h.acme.begin_count(), 2);
    assert!(h.provider.records_in_zone().is_empty());
}

#[tokio::test]
async fn lock_released_at_terminal_state() {
    let h = harness(1);

    let first = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    first.outcome().await.as_ref().as_ref().expect("first issuance succeeds");

    // The set is no longer in flight; a new request starts a fresh
    // orchestration.
    let second = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    second.outcome().await.as_ref().as_ref().expect("second issuance succeeds");

    assert_eq!(h.acme.begin_count(), 2);
}

#[tokio::test]
async fn lock_released_after_failure_too() {
    let h = harness(1);
    h.acme.fail_validation("example.test");

    let first = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    first.outcome().await.as_ref().as_ref().expect_err("first attempt fails");

    let second = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    second.outcome().await.as_ref().as_ref().expect_err("still failing");

    assert_eq!(h.acme.begin_count(), 2, "failed runs release the lock as well");
}
