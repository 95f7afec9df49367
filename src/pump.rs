//! Background workers that drain a queue into the downstream store.
//!
//! Each queue runs one pump and one housekeeper. The pump replays
//! blocks in append order with bounded retry; the housekeeper purges
//! consumed segments and checkpoints the cursor on a timer. Both stop
//! on the queue's shutdown signal and are joined by `Queue::close`.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};

use crate::block::Block;
use crate::error::Error;
use crate::queue::{ClusterTopic, Queue};
use crate::store::DownstreamStore;
use crate::wait::Signal;

/// How long the pump parks when the queue is drained and no producer
/// has signalled new data.
const IDLE_PARK: Duration = Duration::from_millis(100);

/// Error surfaced by a pump, tagged with the queue it came from.
#[derive(Debug)]
pub struct PumpError {
    pub queue: ClusterTopic,
    pub error: Error,
}

pub(crate) struct Pump {
    queue: Arc<Queue>,
    store: Option<Arc<dyn DownstreamStore>>,
    errors: Sender<PumpError>,
    signal: Arc<Signal>,
    max_retries: u32,
    backoff: Duration,
}

impl Pump {
    pub(crate) fn new(
        queue: Arc<Queue>,
        store: Option<Arc<dyn DownstreamStore>>,
        errors: Sender<PumpError>,
    ) -> Pump {
        let signal = queue.signal();
        let max_retries = queue.config().max_retries;
        let backoff = queue.config().backoff;
        Pump {
            queue,
            store,
            errors,
            signal,
            max_retries,
            backoff,
        }
    }

    pub(crate) fn run(&self) {
        if !self.drain(true) {
            return;
        }
        // Shutdown: push whatever is still queued, then checkpoint.
        self.flush_inflight();
    }

    /// Drains until `EndOfQueue`, then checkpoints the cursor. Used on
    /// the way out so acknowledged records don't wait for a restart.
    pub(crate) fn flush_inflight(&self) {
        if !self.drain(false) {
            return;
        }
        if let Err(err) = self.queue.checkpoint() {
            error!(
                "queue[{}] cursor checkpoint failed: {err}",
                self.queue.cluster_topic()
            );
        }
    }

    /// Core drain loop. With `wait_for_producers` the loop parks on an
    /// empty queue and leaves only on shutdown; without it the loop
    /// returns once the queue reports `EndOfQueue`. Returns false when
    /// the queue vanished under the worker.
    fn drain(&self, wait_for_producers: bool) -> bool {
        let mut retries = 0u32;
        let mut delivered = 0u64;
        loop {
            if wait_for_producers && self.signal.is_shutdown() {
                break;
            }

            let block = match self.queue.next() {
                Ok(block) => block,
                Err(Error::EndOfQueue) => {
                    if !wait_for_producers {
                        break;
                    }
                    if self.signal.wait_notified(IDLE_PARK) {
                        break;
                    }
                    continue;
                }
                Err(Error::NotOpen) => {
                    self.surface(Error::NotOpen);
                    return false;
                }
                Err(err) => {
                    // Damaged or unreadable segment: hop over it and
                    // keep delivering what comes after.
                    if let Err(skip) = self.queue.skip_cursor_segment() {
                        self.surface(skip);
                        self.surface(err);
                        if !wait_for_producers {
                            break;
                        }
                        if self.signal.wait_shutdown(self.backoff) {
                            break;
                        }
                        continue;
                    }
                    self.surface(err);
                    continue;
                }
            };

            match self.publish(&block) {
                Ok(_) => {
                    retries = 0;
                    delivered += 1;
                    self.queue.record_delivered();
                }
                Err(err) if retries >= self.max_retries => {
                    // Poisoned record: surface and move on so one bad
                    // block cannot wedge the queue.
                    self.surface(err);
                    retries = 0;
                }
                Err(err) => {
                    retries += 1;
                    warn!(
                        "queue[{}] publish failed (attempt {retries}/{}): {err}",
                        self.queue.cluster_topic(),
                        self.max_retries
                    );
                    if let Err(rollback) = self.queue.rollback(&block) {
                        // The record cannot be put back precisely;
                        // surface both and keep going.
                        self.surface(rollback);
                        self.surface(err);
                        retries = 0;
                        continue;
                    }
                    if wait_for_producers {
                        if self.signal.wait_shutdown(self.backoff) {
                            break;
                        }
                    } else {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        if delivered > 0 {
            debug!(
                "queue[{}] drained {delivered} records",
                self.queue.cluster_topic()
            );
        }
        true
    }

    fn publish(&self, block: &Block) -> crate::Result<(i32, i64)> {
        let ct = self.queue.cluster_topic();
        match &self.store {
            Some(store) => store.sync_publish(&ct.cluster, &ct.topic, &block.key, &block.value),
            None => Err(Error::NoDownstream),
        }
    }

    fn surface(&self, error: Error) {
        error!("queue[{}] {error}", self.queue.cluster_topic());
        let _ = self.errors.send(PumpError {
            queue: self.queue.cluster_topic().clone(),
            error,
        });
    }
}

pub(crate) struct Housekeeper {
    queue: Arc<Queue>,
    signal: Arc<Signal>,
    interval: Duration,
}

impl Housekeeper {
    pub(crate) fn new(queue: Arc<Queue>) -> Housekeeper {
        let signal = queue.signal();
        let interval = queue.config().purge_interval;
        Housekeeper {
            queue,
            signal,
            interval,
        }
    }

    pub(crate) fn run(&self) {
        loop {
            if self.signal.wait_shutdown(self.interval) {
                return;
            }
            if let Err(err) = self.queue.purge() {
                warn!("queue[{}] purge failed: {err}", self.queue.cluster_topic());
            }
            // A failed checkpoint is retried next tick; the latest
            // successful dump wins.
            if let Err(err) = self.queue.checkpoint() {
                warn!(
                    "queue[{}] cursor checkpoint failed: {err}",
                    self.queue.cluster_topic()
                );
            }
        }
    }
}
