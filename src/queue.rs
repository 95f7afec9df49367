//! One hinted-handoff queue per `(cluster, topic)`.
//!
//! A queue is a directory of monotonically numbered segment files plus
//! a cursor. Producers append to the tail segment; the pump reads at
//! the cursor; the housekeeper purges consumed segments behind it.
//!
//! ```text
//! ┌─────┐
//! │head │
//! ├─────┘
//! │
//! ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │segment 1 - 10MB │ │segment 2 - 10MB │ │segment 3 - 10MB │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!                          ▲                               ▲
//!                          │                               │
//!                       ┌───────┐                     ┌─────┐
//!                       │cursor │                     │tail │
//!                       └───────┘                     └─────┘
//! ```

use std::fmt;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::SystemTime;

use log::{debug, error, warn};

use crate::block::Block;
use crate::config::Config;
use crate::cursor::{Cursor, CURSOR_FILE, CURSOR_TMP_FILE};
use crate::error::{Error, Result};
use crate::pump::{Housekeeper, Pump, PumpError};
use crate::segment::{parse_segment_filename, segment_path, Segment, SegmentHandle, SharedSegment};
use crate::store::DownstreamStore;
use crate::wait::Signal;

/// `(cluster, topic)` identity of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterTopic {
    pub cluster: String,
    pub topic: String,
}

impl ClusterTopic {
    pub fn new(cluster: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for ClusterTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.topic)
    }
}

struct State {
    // Sorted by id, strictly increasing. First is head, last is tail.
    segments: Vec<SegmentHandle>,
    open: bool,
}

pub struct Queue {
    ct: ClusterTopic,
    dir: PathBuf,
    config: Config,
    state: RwLock<State>,
    // The cursor is single-reader: only the pump (or a flush caller)
    // takes it. None once the queue is closed.
    cursor: Mutex<Option<Cursor>>,
    signal: Arc<Signal>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    delivered: AtomicU64,
}

impl Queue {
    /// Opens the queue directory: loads existing segments, creates the
    /// first one when empty, restores the cursor. Workers are not
    /// running until `start`.
    pub fn open(ct: ClusterTopic, dir: impl Into<PathBuf>, config: Config) -> Result<Arc<Queue>> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut segments = load_segments(&dir, config.max_segment_size)?;
        if segments.is_empty() {
            let seg = Segment::open(1, segment_path(&dir, 1), config.max_segment_size)?;
            segments.push(SharedSegment::new(seg));
        }
        let cursor = Cursor::open(&dir, &segments)?;

        Ok(Arc::new(Queue {
            ct,
            dir,
            config,
            state: RwLock::new(State {
                segments,
                open: true,
            }),
            cursor: Mutex::new(Some(cursor)),
            signal: Arc::new(Signal::new()),
            workers: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
        }))
    }

    /// Spawns the pump and housekeeper workers. `close` stops and
    /// joins them.
    pub fn start(
        self: &Arc<Self>,
        store: Option<Arc<dyn DownstreamStore>>,
        errors: Sender<PumpError>,
    ) {
        let pump = Pump::new(Arc::clone(self), store, errors);
        let housekeeper = Housekeeper::new(Arc::clone(self));

        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        workers.push(std::thread::spawn(move || pump.run()));
        workers.push(std::thread::spawn(move || housekeeper.run()));
    }

    pub fn cluster_topic(&self) -> &ClusterTopic {
        &self.ct
    }

    /// Records delivered to the downstream store since open.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn signal(&self) -> Arc<Signal> {
        Arc::clone(&self.signal)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Appends a block to the tail, rotating to a new segment when the
    /// tail is full. Fails with `Full` when the queue quota would be
    /// exceeded.
    pub fn append(&self, block: &Block) -> Result<()> {
        {
            let mut state = self.write_state()?;
            if !state.open {
                return Err(Error::NotOpen);
            }

            if self.config.max_total_size > 0 {
                let mut total = 0i64;
                for seg in &state.segments {
                    total += seg.lock()?.disk_usage();
                }
                if total + block.size() > self.config.max_total_size {
                    return Err(Error::Full);
                }
            }

            let tail = state.segments.last().cloned().ok_or(Error::NotOpen)?;
            let appended = tail.lock()?.append(block);
            match appended {
                Ok(()) => {}
                Err(Error::SegmentFull) => {
                    let seg = self.add_segment(&mut state)?;
                    seg.lock()?.append(block)?;
                }
                Err(err) => return Err(err),
            }
        }
        self.signal.notify();
        Ok(())
    }

    /// Reads the next unconsumed block and advances the cursor.
    ///
    /// Single reader: only the pump or a flush caller may call this.
    pub fn next(&self) -> Result<Block> {
        let state = self.read_state()?;
        if !state.open {
            return Err(Error::NotOpen);
        }
        let mut guard = self.lock_cursor()?;
        let cursor = guard.as_mut().ok_or(Error::NotOpen)?;

        let seg = cursor.segment().clone();
        let read = seg.lock()?.read_one();
        match read {
            Ok(block) => {
                cursor.advance_offset(block.size())?;
                return Ok(block);
            }
            Err(Error::EndOfFile) => {}
            Err(err) => return Err(err),
        }

        // End of the current segment: either step into the next one or
        // report the queue drained.
        if !cursor.advance_segment(&state.segments)? {
            return Err(Error::EndOfQueue);
        }
        let seg = cursor.segment().clone();
        let read = seg.lock()?.read_one();
        match read {
            Ok(block) => {
                cursor.advance_offset(block.size())?;
                Ok(block)
            }
            // The tail exists but holds nothing yet.
            Err(Error::EndOfFile) => Err(Error::EndOfQueue),
            Err(err) => Err(err),
        }
    }

    /// Puts the most recent block returned by `next` back in front of
    /// the cursor. Fails when the rollback would cross the segment
    /// boundary that `next` already stepped over.
    pub fn rollback(&self, block: &Block) -> Result<()> {
        let state = self.read_state()?;
        if !state.open {
            return Err(Error::NotOpen);
        }
        let mut guard = self.lock_cursor()?;
        let cursor = guard.as_mut().ok_or(Error::NotOpen)?;
        cursor.advance_offset(-block.size())?;
        cursor.seek_current()
    }

    /// Removes consumed segments older than `max_age` from the front
    /// of the queue.
    pub(crate) fn purge(&self) -> Result<()> {
        let mut state = self.write_state()?;
        if !state.open {
            return Err(Error::NotOpen);
        }
        let cursor_segment = self
            .lock_cursor()?
            .as_ref()
            .map(|c| c.position().segment_id)
            .ok_or(Error::NotOpen)?;

        while state.segments.len() > 1 {
            let head = state.segments[0].clone();
            let (head_id, age) = {
                let guard = head.lock()?;
                (guard.id(), guard.last_modified().elapsed().unwrap_or_default())
            };
            if cursor_segment > head_id && age >= self.config.max_age {
                head.lock()?.remove()?;
                state.segments.remove(0);
                debug!("queue[{}] purged segment {head_id}", self.ct);
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Hops the cursor over its current (corrupt) segment to the next
    /// one at offset 0. When the corrupt segment is the tail, a fresh
    /// tail is allocated first so the cursor always lands on a live
    /// segment.
    pub(crate) fn skip_cursor_segment(&self) -> Result<()> {
        let mut state = self.write_state()?;
        if !state.open {
            return Err(Error::NotOpen);
        }
        let mut guard = self.lock_cursor()?;
        let cursor = guard.as_mut().ok_or(Error::NotOpen)?;

        let skipped = cursor.position().segment_id;
        let tail_id = state.segments.last().map_or(0, |s| s.id());
        if skipped >= tail_id {
            self.add_segment(&mut state)?;
        }
        if !cursor.advance_segment(&state.segments)? {
            return Err(Error::EndOfQueue);
        }
        warn!("queue[{}] skipped corrupt segment {skipped}", self.ct);
        Ok(())
    }

    /// Checkpoints the cursor to disk.
    pub fn checkpoint(&self) -> Result<()> {
        let guard = self.lock_cursor()?;
        let cursor = guard.as_ref().ok_or(Error::NotOpen)?;
        cursor.dump()
    }

    /// Stops and joins the workers (the pump flushes inflight records
    /// on its way out), closes all segments and checkpoints the
    /// cursor. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.signal.shutdown();
        let workers = {
            let mut guard = self
                .workers
                .lock()
                .map_err(|_| Error::Corrupt("queue lock poisoned"))?;
            mem::take(&mut *guard)
        };
        for worker in workers {
            if worker.join().is_err() {
                error!("queue[{}] worker panicked", self.ct);
            }
        }

        let mut state = self.write_state()?;
        if !state.open {
            return Ok(());
        }
        state.open = false;
        for seg in &state.segments {
            seg.lock()?.close()?;
        }
        state.segments.clear();
        drop(state);

        let mut guard = self.lock_cursor()?;
        if let Some(cursor) = guard.take() {
            cursor.dump()?;
        }
        Ok(())
    }

    /// Deletes the queue directory. Fails with `QueueOpen` while the
    /// queue is open.
    pub fn remove(&self) -> Result<()> {
        {
            let state = self.read_state()?;
            if state.open {
                return Err(Error::QueueOpen);
            }
        }
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Total bytes on disk across all segments.
    pub fn disk_usage(&self) -> i64 {
        let Ok(state) = self.state.read() else {
            return 0;
        };
        state
            .segments
            .iter()
            .filter_map(|seg| seg.lock().ok().map(|guard| guard.disk_usage()))
            .sum()
    }

    /// When the queue was last written to.
    pub fn last_modified(&self) -> Option<SystemTime> {
        let state = self.state.read().ok()?;
        let tail = state.segments.last()?;
        tail.lock().ok().map(|guard| guard.last_modified())
    }

    fn add_segment(&self, state: &mut State) -> Result<SegmentHandle> {
        let next_id = state.segments.last().map_or(1, |s| s.id() + 1);
        let seg = Segment::open(
            next_id,
            segment_path(&self.dir, next_id),
            self.config.max_segment_size,
        )?;
        let handle = SharedSegment::new(seg);
        state.segments.push(handle.clone());
        Ok(handle)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::Corrupt("queue lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::Corrupt("queue lock poisoned"))
    }

    fn lock_cursor(&self) -> Result<MutexGuard<'_, Option<Cursor>>> {
        self.cursor
            .lock()
            .map_err(|_| Error::Corrupt("queue lock poisoned"))
    }
}

fn load_segments(dir: &Path, max_segment_size: i64) -> Result<Vec<SegmentHandle>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == CURSOR_FILE || name == CURSOR_TMP_FILE {
            continue;
        }
        let Some(id) = parse_segment_filename(name) else {
            warn!("unexpected file in queue dir: {}", entry.path().display());
            continue;
        };
        let seg = Segment::open(id, entry.path(), max_segment_size)?;
        segments.push(SharedSegment::new(seg));
    }
    segments.sort_by_key(|s| s.id());
    Ok(segments)
}
