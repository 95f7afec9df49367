use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    /// Operation on a queue that is not open.
    #[error("queue not open")]
    NotOpen,
    /// Remove attempted on a queue that is still open.
    #[error("queue still open")]
    QueueOpen,
    /// Append would exceed the queue's total size quota.
    #[error("queue full")]
    Full,
    /// Internal: the tail segment cannot fit the block; the queue
    /// handles this by rotating to a new tail.
    #[error("segment full")]
    SegmentFull,
    /// Internal pump signal: the cursor has consumed everything up to
    /// the tail.
    #[error("end of queue")]
    EndOfQueue,
    /// Internal: clean end of the current segment file.
    #[error("end of segment")]
    EndOfFile,
    #[error("no downstream store configured")]
    NoDownstream,
}

pub type Result<T> = std::result::Result<T, Error>;
