#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use handoff::{DownstreamStore, Error, Result};

/// Fake downstream store that records deliveries in order and can be
/// toggled unavailable.
pub struct RecordingStore {
    records: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    available: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> RecordingStore {
        RecordingStore {
            records: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn unavailable() -> RecordingStore {
        let store = RecordingStore::new();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }
}

impl DownstreamStore for RecordingStore {
    fn sync_publish(
        &self,
        _cluster: &str,
        _topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(i32, i64)> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "downstream unavailable",
            )));
        }
        let mut records = self.records.lock().expect("records lock");
        records.push((key.to_vec(), value.to_vec()));
        Ok((0, records.len() as i64 - 1))
    }
}

/// Number of segment files (purely numeric names) in a queue dir.
pub fn count_segments(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
        })
        .count()
}

/// Polls every 10ms until `done` returns true or the timeout elapses.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}
