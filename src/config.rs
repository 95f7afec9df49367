use std::time::Duration;

/// Default segment rotation threshold: 10 MiB.
const DEFAULT_SEGMENT_SIZE: i64 = 10 * 1024 * 1024;
/// Default housekeeper cadence: 10 minutes.
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Default minimum age before a consumed segment is removed: 24 hours.
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
/// Default pump retry budget per record.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default pump retry sleep.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration shared by every queue a manager owns.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Segment size in bytes at which the queue rotates to a new tail.
    pub max_segment_size: i64,
    /// Maximum size in bytes of all segments before appends fail with
    /// `Full`. -1 means unlimited.
    pub max_total_size: i64,
    /// How often the housekeeper purges consumed segments and
    /// checkpoints the cursor.
    pub purge_interval: Duration,
    /// Minimum age before a consumed segment may be purged.
    pub max_age: Duration,
    /// How many times the pump retries a record before surfacing the
    /// error and moving on.
    pub max_retries: u32,
    /// How long the pump sleeps between retries.
    pub backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            max_total_size: -1,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            max_age: DEFAULT_MAX_AGE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}
