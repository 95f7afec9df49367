//! Directory of hinted-handoff queues keyed by `(cluster, topic)`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};

use crate::block::Block;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pump::PumpError;
use crate::queue::{ClusterTopic, Queue};
use crate::store::DownstreamStore;

/// Owns every queue under one root directory, laid out as
/// `<root>/<cluster>/<topic>/`. Queues found on disk are opened
/// eagerly; new ones are created on first append. All pump errors fan
/// into a single bus.
pub struct Manager {
    root: PathBuf,
    config: Config,
    store: Option<Arc<dyn DownstreamStore>>,
    queues: Mutex<HashMap<ClusterTopic, Arc<Queue>>>,
    closed: AtomicBool,
    errors_tx: Sender<PumpError>,
    errors_rx: Mutex<Option<Receiver<PumpError>>>,
}

impl Manager {
    /// Opens the manager, restoring every queue already present under
    /// `root`. The store is shared by all pumps; pass `None` to spool
    /// to disk only (pumps will surface `NoDownstream`).
    pub fn open(
        root: impl Into<PathBuf>,
        config: Config,
        store: Option<Arc<dyn DownstreamStore>>,
    ) -> Result<Manager> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let (errors_tx, errors_rx) = mpsc::channel();
        let manager = Manager {
            root,
            config,
            store,
            queues: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        };
        for ct in manager.discover()? {
            if let Err(err) = manager.queue(&ct) {
                let _ = manager.close();
                return Err(err);
            }
        }
        Ok(manager)
    }

    /// Appends one record to the queue for `(cluster, topic)`,
    /// creating the queue on first use.
    pub fn append(&self, cluster: &str, topic: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let ct = ClusterTopic::new(cluster, topic);
        let queue = self.queue(&ct)?;
        queue.append(&Block::new(key.to_vec(), value.to_vec()))
    }

    /// Takes the receiving end of the pump error bus. Can be taken
    /// once; errors sent while nobody holds the receiver are dropped
    /// with the channel.
    pub fn error_bus(&self) -> Option<Receiver<PumpError>> {
        self.errors_rx.lock().ok()?.take()
    }

    /// Total bytes on disk across all queues.
    pub fn disk_usage(&self) -> i64 {
        let Ok(queues) = self.queues.lock() else {
            return 0;
        };
        queues.values().map(|queue| queue.disk_usage()).sum()
    }

    /// Closes every queue in parallel and waits for all of them.
    /// Returns the first error encountered.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let queues: Vec<Arc<Queue>> = {
            let mut map = self.lock_queues()?;
            map.drain().map(|(_, queue)| queue).collect()
        };

        let mut first_err = None;
        thread::scope(|scope| {
            let handles: Vec<_> = queues
                .iter()
                .map(|queue| scope.spawn(move || (queue.cluster_topic().clone(), queue.close())))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok((_, Ok(()))) => {}
                    Ok((ct, Err(err))) => {
                        warn!("queue[{ct}] close failed: {err}");
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                    Err(_) => {
                        if first_err.is_none() {
                            first_err = Some(Error::Corrupt("queue close worker panicked"));
                        }
                    }
                }
            }
        });

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn queue(&self, ct: &ClusterTopic) -> Result<Arc<Queue>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::NotOpen);
        }
        let mut queues = self.lock_queues()?;
        if let Some(queue) = queues.get(ct) {
            return Ok(queue.clone());
        }

        let dir = self.root.join(&ct.cluster).join(&ct.topic);
        let queue = Queue::open(ct.clone(), dir, self.config)?;
        queue.start(self.store.clone(), self.errors_tx.clone());
        queues.insert(ct.clone(), queue.clone());
        debug!("queue[{ct}] open");
        Ok(queue)
    }

    /// Walks `<root>/<cluster>/<topic>` for queues left by a previous
    /// run.
    fn discover(&self) -> Result<Vec<ClusterTopic>> {
        let mut found = Vec::new();
        for cluster_entry in fs::read_dir(&self.root)? {
            let cluster_entry = cluster_entry?;
            if !cluster_entry.file_type()?.is_dir() {
                continue;
            }
            let cluster = match cluster_entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            for topic_entry in fs::read_dir(cluster_entry.path())? {
                let topic_entry = topic_entry?;
                if !topic_entry.file_type()?.is_dir() {
                    continue;
                }
                let topic = match topic_entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                found.push(ClusterTopic::new(cluster.clone(), topic));
            }
        }
        Ok(found)
    }

    fn lock_queues(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ClusterTopic, Arc<Queue>>>> {
        self.queues
            .lock()
            .map_err(|_| Error::Corrupt("manager lock poisoned"))
    }
}
