//! Contract: renewal fires iff a certificate is inside the window
//!
//! The scheduler renews exactly those certificates whose expiry falls within
//! the configured window, at most once per scan per domain set, and a failed
//! renewal waits for the next scan instead of retrying immediately.

mod common;

use std::sync::Arc;

use common::*;

use certomat_core::config::RenewalConfig;
use certomat_core::store::MemoryCertificateStore;
use certomat_core::traits::CertificateStore;
use certomat_core::RenewalScheduler;

fn scheduler_over(h: &Harness, store: Arc<MemoryCertificateStore>) -> RenewalScheduler {
    RenewalScheduler::new(
        store,
        Arc::clone(&h.orchestrator),
        &RenewalConfig {
            window_days: 30,
            scan_interval_secs: 1,
        },
    )
}

#[tokio::test]
async fn renews_only_certificates_within_the_window() {
    let h = harness(1);
    let store = Arc::new(MemoryCertificateStore::new());
    store.put("soon.test", &stored_cert("soon.test", 10)).await.unwrap();
    store.put("later.test", &stored_cert("later.test", 60)).await.unwrap();

    let scheduler = scheduler_over(&h, Arc::clone(&store));
    let attempted = scheduler.scan_once().await.unwrap();

    assert_eq!(attempted, 1, "only the certificate inside the window renews");
    assert_eq!(h.acme.begin_count(), 1);

    // The renewed certificate superseded the stored one.
    let renewed = store.get("soon.test").await.unwrap().unwrap();
    assert!(
        !renewed.expires_within(chrono::Duration::days(30)),
        "renewal pushed expiry outside the window"
    );

    // The untouched certificate kept its expiry.
    let untouched = store.get("later.test").await.unwrap().unwrap();
    assert!(!untouched.expires_within(chrono::Duration::days(30)));
}

#[tokio::test]
async fn nothing_due_means_no_renewal_attempts() {
    let h = harness(1);
    let store = Arc::new(MemoryCertificateStore::new());
    store.put("fresh.test", &stored_cert("fresh.test", 80)).await.unwrap();

    let scheduler = scheduler_over(&h, Arc::clone(&store));
    assert_eq!(scheduler.scan_once().await.unwrap(), 0);
    assert_eq!(h.acme.begin_count(), 0);
}

#[tokio::test]
async fn failed_renewal_waits_for_the_next_scan() {
    let h = harness(1);
    h.acme.fail_validation("soon.test");

    let store = Arc::new(MemoryCertificateStore::new());
    store.put("soon.test", &stored_cert("soon.test", 10)).await.unwrap();

    let scheduler = scheduler_over(&h, Arc::clone(&store));

    // First scan: exactly one attempt, which fails.
    assert_eq!(scheduler.scan_once().await.unwrap(), 1);
    assert_eq!(h.acme.begin_count(), 1, "no immediate retry inside a scan");
    let stored = store.get("soon.test").await.unwrap().unwrap();
    assert!(stored.expires_within(chrono::Duration::days(30)), "store unchanged");

    // Next scan retries.
    assert_eq!(scheduler.scan_once().await.unwrap(), 1);
    assert_eq!(h.acme.begin_count(), 2);
}

#[tokio::test]
async fn expired_certificate_is_renewed() {
    let h = harness(1);
    let store = Arc::new(MemoryCertificateStore::new());
    store
        .put("lapsed.test", &stored_cert("lapsed.test", -5))
        .await
        .unwrap();

    let scheduler = scheduler_over(&h, Arc::clone(&store));
    assert_eq!(scheduler.scan_once().await.unwrap(), 1);

    let renewed = store.get("lapsed.test").await.unwrap().unwrap();
    assert!(!renewed.expires_within(chrono::Duration::days(30)));
}

#[tokio::test]
async fn scheduler_scans_at_startup_and_shuts_down_cleanly() {
    let h = harness(1);
    let store = Arc::new(MemoryCertificateStore::new());
    store.put("soon.test", &stored_cert("soon.test", 10)).await.unwrap();

    let scheduler = Arc::new(scheduler_over(&h, Arc::clone(&store)));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_with_shutdown(Some(shutdown_rx)).await })
    };

    // The first interval tick fires immediately, so one scan happens right
    // away.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();
    runner.await.unwrap().expect("clean shutdown");

    assert!(h.acme.begin_count() >= 1, "startup scan renewed the due certificate");
    let renewed = store.get("soon.test").await.unwrap().unwrap();
    assert!(!renewed.expires_within(chrono::Duration::days(30)));
}
