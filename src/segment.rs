//! Append-only segment files.
//!
//! A segment is a run of contiguous frames named by its id, zero-padded
//! to 20 digits. Writes always go to the end through a dedicated append
//! descriptor; reads go through a second descriptor whose offset is the
//! segment's read position.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::block::Block;
use crate::{Error, Result};

/// Segment file name for an id (e.g. "00000000000000000042").
pub fn segment_filename(id: u64) -> String {
    format!("{:020}", id)
}

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(segment_filename(id))
}

/// Parses a purely numeric file name into a segment id.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse::<u64>().ok()
}

pub struct Segment {
    id: u64,
    path: PathBuf,
    writer: File,
    reader: File,
    size: i64,
    max_size: i64,
    last_modified: SystemTime,
}

impl Segment {
    /// Opens the segment file, creating it if absent. The read position
    /// starts at 0; size and mtime come from the file metadata.
    pub fn open(id: u64, path: impl Into<PathBuf>, max_size: i64) -> Result<Segment> {
        let path = path.into();
        let writer = OpenOptions::new().create(true).append(true).open(&path)?;
        let reader = File::open(&path)?;
        let meta = writer.metadata()?;
        let last_modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        Ok(Segment {
            id,
            path,
            writer,
            reader,
            size: meta.len() as i64,
            max_size,
            last_modified,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disk_usage(&self) -> i64 {
        self.size
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    /// Appends one framed block at the end of the file.
    ///
    /// Admission is checked before anything is written: a block that
    /// would push the file past `max_size` fails with `SegmentFull`.
    /// The write is fsynced before returning, so an acknowledged
    /// append survives a crash.
    pub fn append(&mut self, block: &Block) -> Result<()> {
        if self.size + block.size() > self.max_size {
            return Err(Error::SegmentFull);
        }

        let buf = block.encode();
        self.writer.write_all(&buf)?;
        self.writer.sync_data()?;
        self.size += buf.len() as i64;
        self.last_modified = SystemTime::now();
        Ok(())
    }

    /// Reads one block at the current read position, advancing it.
    ///
    /// Returns `EndOfFile` at a clean frame boundary with nothing
    /// left; a partial tail is `Corrupt`.
    pub fn read_one(&mut self) -> Result<Block> {
        Block::decode(&mut self.reader)
    }

    /// Moves the read position to `offset`.
    pub fn seek(&mut self, offset: i64) -> Result<()> {
        let offset =
            u64::try_from(offset).map_err(|_| Error::Corrupt("seek before segment start"))?;
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.writer.sync_all()?;
        Ok(())
    }

    /// Deletes the backing file.
    pub fn remove(&mut self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Shared handle to a segment. The id is immutable and readable without
/// taking the I/O lock.
pub(crate) struct SharedSegment {
    id: u64,
    seg: Mutex<Segment>,
}

pub(crate) type SegmentHandle = Arc<SharedSegment>;

impl SharedSegment {
    pub(crate) fn new(segment: Segment) -> SegmentHandle {
        Arc::new(SharedSegment {
            id: segment.id(),
            seg: Mutex::new(segment),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Segment>> {
        self.seg
            .lock()
            .map_err(|_| Error::Corrupt("segment lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn naming_and_parsing() {
        assert_eq!(segment_filename(1), "00000000000000000001");
        assert_eq!(segment_filename(42), "00000000000000000042");

        assert_eq!(parse_segment_filename("00000000000000000042"), Some(42));
        assert_eq!(parse_segment_filename("7"), Some(7));
        assert_eq!(parse_segment_filename("cursor"), None);
        assert_eq!(parse_segment_filename("cursor.tmp"), None);
        assert_eq!(parse_segment_filename(""), None);
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().expect("tempdir");
        let mut seg =
            Segment::open(1, segment_path(dir.path(), 1), 1024 * 1024).expect("segment open");

        let a = Block::new(b"k1".to_vec(), b"v1".to_vec());
        let b = Block::new(b"k2".to_vec(), b"v2".to_vec());
        seg.append(&a).expect("append a");
        seg.append(&b).expect("append b");
        assert_eq!(seg.disk_usage(), a.size() + b.size());

        assert_eq!(seg.read_one().expect("read a"), a);
        assert_eq!(seg.read_one().expect("read b"), b);
        assert!(matches!(seg.read_one().unwrap_err(), Error::EndOfFile));
    }

    #[test]
    fn seek_rereads() {
        let dir = tempdir().expect("tempdir");
        let mut seg =
            Segment::open(1, segment_path(dir.path(), 1), 1024 * 1024).expect("segment open");

        let a = Block::new(b"k1".to_vec(), b"v1".to_vec());
        let b = Block::new(b"k2".to_vec(), b"v2".to_vec());
        seg.append(&a).expect("append a");
        seg.append(&b).expect("append b");

        seg.read_one().expect("read a");
        seg.read_one().expect("read b");
        seg.seek(a.size()).expect("seek");
        assert_eq!(seg.read_one().expect("reread b"), b);
    }

    #[test]
    fn full_segment_rejects_before_writing() {
        let dir = tempdir().expect("tempdir");
        let block = Block::new(Vec::new(), vec![0u8; 64]);
        let mut seg =
            Segment::open(1, segment_path(dir.path(), 1), block.size()).expect("segment open");

        seg.append(&block).expect("first append fits exactly");
        assert!(matches!(seg.append(&block).unwrap_err(), Error::SegmentFull));
        assert_eq!(seg.disk_usage(), block.size());
    }

    #[test]
    fn reopen_restores_size_and_content() {
        let dir = tempdir().expect("tempdir");
        let path = segment_path(dir.path(), 3);
        let block = Block::new(b"k".to_vec(), b"v".to_vec());

        {
            let mut seg = Segment::open(3, &path, 1024).expect("segment open");
            seg.append(&block).expect("append");
            seg.close().expect("close");
        }

        let mut seg = Segment::open(3, &path, 1024).expect("segment reopen");
        assert_eq!(seg.disk_usage(), block.size());
        assert_eq!(seg.read_one().expect("read"), block);
    }

    #[test]
    fn partial_tail_is_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = segment_path(dir.path(), 1);
        let block = Block::new(b"k".to_vec(), b"value".to_vec());

        {
            let mut seg = Segment::open(1, &path, 1024).expect("segment open");
            seg.append(&block).expect("append");
        }
        let file = OpenOptions::new().write(true).open(&path).expect("reopen");
        file.set_len(block.size() as u64 - 2).expect("truncate");

        let mut seg = Segment::open(1, &path, 1024).expect("segment reopen");
        assert!(matches!(seg.read_one().unwrap_err(), Error::Corrupt(_)));
    }
}
