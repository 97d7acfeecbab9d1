//! Contract: propagation checks are deadline-bounded
//!
//! A record that never becomes visible produces `false` within the
//! configured timeout, not an unbounded hang, and the orchestrator turns
//! that into a clean failure with full record cleanup. Quorum policy
//! decides how many resolvers must agree.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;

use certomat_core::config::Quorum;
use certomat_core::error::Error;
use certomat_core::propagation::PropagationChecker;
use certomat_core::traits::TxtResolver;

fn zone_with_record(name: &str, value: &str) -> ZoneMap {
    let provider = MockDnsProvider::new();
    let zone = provider.zone_handle();
    zone.lock()
        .unwrap()
        .insert("rec-0".to_string(), (name.to_string(), value.to_string()));
    zone
}

#[tokio::test]
async fn returns_false_within_bounded_time_when_never_visible() {
    let zone = zone_with_record("_acme-challenge.example.test", "value");
    let resolver = ScriptedResolver::never(Arc::clone(&zone));
    let checker =
        PropagationChecker::new(vec![Arc::new(resolver)], Quorum::All).unwrap();

    let started = Instant::now();
    let visible = checker
        .await_visible(
            "_acme-challenge.example.test",
            "value",
            Duration::from_millis(300),
            Duration::from_millis(50),
        )
        .await;

    assert!(!visible, "a record that never propagates reports false");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "the check must not hang past its deadline"
    );
}

#[tokio::test]
async fn visible_after_enough_polls() {
    let zone = zone_with_record("_acme-challenge.example.test", "value");
    let resolver = ScriptedResolver::visible_after(Arc::clone(&zone), 3);
    let checker =
        PropagationChecker::new(vec![Arc::new(resolver.clone())], Quorum::All).unwrap();

    let visible = checker
        .await_visible(
            "_acme-challenge.example.test",
            "value",
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .await;

    assert!(visible);
    assert!(resolver.lookup_count("_acme-challenge.example.test") >= 3);
}

#[tokio::test]
async fn majority_quorum_tolerates_a_lagging_resolver() {
    let zone = zone_with_record("_acme-challenge.example.test", "value");
    let fast_a = ScriptedResolver::immediate(Arc::clone(&zone));
    let fast_b = ScriptedResolver::immediate(Arc::clone(&zone));
    let lagging = ScriptedResolver::never(Arc::clone(&zone));
    let resolvers: Vec<Arc<dyn TxtResolver>> =
        vec![Arc::new(fast_a), Arc::new(fast_b), Arc::new(lagging)];

    let majority = PropagationChecker::new(resolvers.clone(), Quorum::Majority).unwrap();
    assert!(
        majority
            .await_visible(
                "_acme-challenge.example.test",
                "value",
                Duration::from_millis(300),
                Duration::from_millis(20),
            )
            .await,
        "2 of 3 resolvers satisfy a majority quorum"
    );

    let all = PropagationChecker::new(resolvers, Quorum::All).unwrap();
    assert!(
        !all.await_visible(
            "_acme-challenge.example.test",
            "value",
            Duration::from_millis(300),
            Duration::from_millis(20),
        )
        .await,
        "the All quorum waits for every resolver"
    );
}

#[tokio::test]
async fn wrong_value_is_not_visibility() {
    let zone = zone_with_record("_acme-challenge.example.test", "stale-value");
    let resolver = ScriptedResolver::immediate(Arc::clone(&zone));
    let checker =
        PropagationChecker::new(vec![Arc::new(resolver)], Quorum::All).unwrap();

    let visible = checker
        .await_visible(
            "_acme-challenge.example.test",
            "expected-value",
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
        .await;

    assert!(!visible, "a stale TXT value must not satisfy the check");
}

#[tokio::test]
async fn orchestration_times_out_and_cleans_up() {
    let provider = MockDnsProvider::new();
    let acme = MockAcmeClient::new();
    let resolver = ScriptedResolver::never(provider.zone_handle());
    let h = harness_with(provider, acme, resolver, fast_config());

    let handle = h.orchestrator.issue(&domains(&["example.test"])).unwrap();
    let outcome = handle.outcome().await;

    let error = outcome.as_ref().as_ref().expect_err("propagation times out");
    assert!(matches!(error.reason, Error::PropagationTimeout { .. }));
    assert!(error.reason.is_transient(), "a timeout is worth retrying later");

    // The invisible record still got cleaned up.
    assert_eq!(h.provider.delete_count(), 1);
    assert!(h.provider.records_in_zone().is_empty());
}
