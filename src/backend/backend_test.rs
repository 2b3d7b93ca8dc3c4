use std::collections::HashMap;
use std::sync::Arc;

use mockall::Sequence;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio::time::Instant;

use super::key_matches_any;
use super::Backend;
use super::MockStoreClient;
use crate::test_utils::enable_logger;
use crate::ClientError;

fn snapshot(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn key_matching_honors_boundaries() {
    assert!(key_matches_any("/db/host", &["/".to_string()]));
    assert!(key_matches_any("/db/host", &["/db".to_string()]));
    assert!(key_matches_any("/db", &["/db".to_string()]));
    assert!(!key_matches_any("/database", &["/db".to_string()]));
    assert!(!key_matches_any("/other", &["/db".to_string()]));
}

#[test]
fn prefixed_keys_prepends_the_prefix() {
    let client = MockStoreClient::new();
    let backend = Backend::new("mock", Arc::new(client))
        .with_prefix("/prod")
        .with_keys(vec!["/".to_string(), "/db".to_string()]);

    assert_eq!(backend.prefixed_keys(), vec!["/prod", "/prod/db"]);
}

#[tokio::test]
async fn refresh_strips_prefix_and_fills_store() {
    enable_logger();
    let mut client = MockStoreClient::new();
    client
        .expect_get_values()
        .withf(|keys| keys == ["/prod"])
        .returning(|_| Ok(snapshot(&[("/prod/db/host", "db1"), ("/prod/db/port", "5432")])));

    let backend = Backend::new("mock", Arc::new(client)).with_prefix("/prod");
    backend.refresh().await.unwrap();

    assert_eq!(backend.store().get("/db/host"), Some("db1".to_string()));
    assert_eq!(backend.store().get("/db/port"), Some("5432".to_string()));
    assert_eq!(backend.store().len(), 2);
}

#[tokio::test]
async fn refresh_replaces_previous_snapshot() {
    let mut client = MockStoreClient::new();
    let mut seq = Sequence::new();
    client
        .expect_get_values()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(snapshot(&[("/old", "1")])));
    client
        .expect_get_values()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(snapshot(&[("/new", "2")])));

    let backend = Backend::new("mock", Arc::new(client));
    backend.refresh().await.unwrap();
    backend.refresh().await.unwrap();

    assert!(!backend.store().exists("/old"));
    assert_eq!(backend.store().get("/new"), Some("2".to_string()));
}

#[tokio::test]
async fn refresh_error_carries_backend_name() {
    let mut client = MockStoreClient::new();
    client
        .expect_get_values()
        .returning(|_| Err(ClientError::Request("connection refused".to_string())));

    let backend = Backend::new("flaky", Arc::new(client));
    let err = backend.refresh().await.unwrap_err();

    assert_eq!(err.backend, "flaky");
    assert!(err.message.contains("connection refused"));
}

#[tokio::test]
async fn watch_emits_backend_on_every_change() {
    let mut client = MockStoreClient::new();
    client.expect_watch_prefix().returning(|_, _| Ok(()));

    let backend = Backend::new("watched", Arc::new(client)).with_watch(true);
    let (_cancel_tx, cancel_rx) = watch::channel(());
    let (process_tx, mut process_rx) = mpsc::channel(1);
    let (err_tx, _err_rx) = mpsc::channel(1);

    let task = tokio::spawn(backend.watch(cancel_rx, process_tx, err_tx));

    assert_eq!(process_rx.recv().await.unwrap().name, "watched");
    assert_eq!(process_rx.recv().await.unwrap().name, "watched");

    drop(process_rx);
    task.await.unwrap();
}

#[tokio::test]
async fn watch_stops_when_unsupported() {
    let mut client = MockStoreClient::new();
    client
        .expect_watch_prefix()
        .times(1)
        .returning(|_, _| Err(ClientError::WatchUnsupported));

    let backend = Backend::new("env", Arc::new(client)).with_watch(true);
    let (_cancel_tx, cancel_rx) = watch::channel(());
    let (process_tx, _process_rx) = mpsc::channel(1);
    let (err_tx, _err_rx) = mpsc::channel(1);

    // must terminate on its own without the cancel signal
    backend.watch(cancel_rx, process_tx, err_tx).await;
}

#[tokio::test(start_paused = true)]
async fn watch_reports_transient_errors_and_recovers() {
    let mut client = MockStoreClient::new();
    let mut seq = Sequence::new();
    client
        .expect_watch_prefix()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(ClientError::Request("timeout".to_string())));
    client
        .expect_watch_prefix()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let backend = Backend::new("flaky", Arc::new(client)).with_watch(true);
    let (_cancel_tx, cancel_rx) = watch::channel(());
    let (process_tx, mut process_rx) = mpsc::channel(1);
    let (err_tx, mut err_rx) = mpsc::channel(1);

    let task = tokio::spawn(backend.watch(cancel_rx, process_tx, err_tx));

    let err = err_rx.recv().await.unwrap();
    assert_eq!(err.backend, "flaky");

    // after the retry pause the watch re-arms and delivers the change
    assert_eq!(process_rx.recv().await.unwrap().name, "flaky");

    drop(process_rx);
    drop(err_rx);
    task.await.unwrap();
}

#[tokio::test]
async fn watch_exits_on_cancel() {
    let mut client = MockStoreClient::new();
    client.expect_watch_prefix().returning(|_, _| Ok(()));

    let backend = Backend::new("watched", Arc::new(client)).with_watch(true);
    let (cancel_tx, cancel_rx) = watch::channel(());
    // capacity 1 and nobody reading: the task blocks in send, cancel must
    // still win on the next loop turn
    let (process_tx, _process_rx) = mpsc::channel(1);
    let (err_tx, _err_rx) = mpsc::channel(1);

    let task = tokio::spawn(backend.watch(cancel_rx, process_tx, err_tx));
    tokio::task::yield_now().await;

    cancel_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("watch task should stop after cancel")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn tick_does_not_fire_at_time_zero() {
    let mut client = MockStoreClient::new();
    client.expect_get_values().never();

    let backend = Backend::new("polled", Arc::new(client)).with_interval(30);
    let (_cancel_tx, cancel_rx) = watch::channel(());
    let (process_tx, mut process_rx) = mpsc::channel(1);

    let started = Instant::now();
    let task = tokio::spawn(backend.tick(cancel_rx, process_tx));

    assert_eq!(process_rx.recv().await.unwrap().name, "polled");
    assert_eq!(started.elapsed(), Duration::from_secs(30));

    assert_eq!(process_rx.recv().await.unwrap().name, "polled");
    assert_eq!(started.elapsed(), Duration::from_secs(60));

    drop(process_rx);
    task.await.unwrap();
}
