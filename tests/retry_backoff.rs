mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, RecordingStore};
use handoff::{Config, Error, Manager};
use tempfile::tempdir;

#[test]
fn outage_replays_in_order_after_recovery() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(RecordingStore::unavailable());
    let config = Config {
        max_retries: 1000,
        backoff: Duration::from_millis(20),
        ..Config::default()
    };
    let manager =
        Manager::open(dir.path(), config, Some(store.clone() as _)).expect("manager open");

    for i in 0..3u8 {
        manager
            .append("kafka", "orders", &[i], b"payload")
            .expect("append");
    }

    // Let the pump chew on the outage for a few retry rounds.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(store.len(), 0);

    store.set_available(true);
    assert!(wait_until(Duration::from_secs(5), || store.len() == 3));
    let keys: Vec<u8> = store.records().iter().map(|(key, _)| key[0]).collect();
    assert_eq!(keys, vec![0, 1, 2]);

    manager.close().expect("manager close");
}

#[test]
fn exhausted_retries_surface_and_release_the_queue() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(RecordingStore::unavailable());
    let config = Config {
        max_retries: 2,
        backoff: Duration::from_millis(10),
        ..Config::default()
    };
    let manager =
        Manager::open(dir.path(), config, Some(store.clone() as _)).expect("manager open");
    let errors = manager.error_bus().expect("error bus");

    manager
        .append("kafka", "orders", b"poison", b"v")
        .expect("append poison");

    // The poisoned record is surfaced, not retried forever.
    let surfaced = errors
        .recv_timeout(Duration::from_secs(5))
        .expect("poison surfaced");
    assert!(matches!(surfaced.error, Error::Io(_)));

    // Later records still flow once the store recovers.
    store.set_available(true);
    manager
        .append("kafka", "orders", b"next", b"v")
        .expect("append next");
    assert!(wait_until(Duration::from_secs(5), || store.len() == 1));
    assert_eq!(store.records()[0].0, b"next");

    manager.close().expect("manager close");
}
