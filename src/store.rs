use crate::Result;

/// Downstream publish store the pump replays into.
///
/// Implementations must be safe for concurrent use; all pumps share
/// one instance. The queue core only looks at success or failure, the
/// `(partition, offset)` pair is passed through for callers that care.
pub trait DownstreamStore: Send + Sync {
    fn sync_publish(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(i32, i64)>;
}
