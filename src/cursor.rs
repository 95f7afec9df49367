//! Durable read position of a queue.
//!
//! The cursor is the delimiter between consumed and unconsumed blocks.
//! It is checkpointed as a small JSON document next to the segments,
//! written atomically (tmp file, fsync, rename) so a crash leaves
//! either the old or the new position, never a torn one.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::segment::SegmentHandle;
use crate::{Error, Result};

pub const CURSOR_FILE: &str = "cursor";
pub(crate) const CURSOR_TMP_FILE: &str = "cursor.tmp";

/// Checkpointed cursor position. `offset` always points at the start
/// of a block or at the end of the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub segment_id: u64,
    pub offset: i64,
}

pub(crate) struct Cursor {
    dir: PathBuf,
    pos: Position,
    seg: SegmentHandle,
}

impl Cursor {
    /// Loads the cursor file if present, else starts at the head.
    ///
    /// When the checkpointed segment no longer exists (purged while we
    /// were away), the cursor snaps forward to the smallest live
    /// segment at offset 0. The current segment is sought to the
    /// restored offset. `segments` must be sorted by id and non-empty.
    pub(crate) fn open(dir: &Path, segments: &[SegmentHandle]) -> Result<Cursor> {
        let head = segments.first().cloned().ok_or(Error::NotOpen)?;
        let start = Position {
            segment_id: head.id(),
            offset: 0,
        };

        let path = dir.join(CURSOR_FILE);
        let mut pos = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Position>(&data) {
                Ok(pos) => pos,
                Err(err) => {
                    warn!("cursor file damaged, restarting from head: {err}");
                    start
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => start,
            Err(err) => return Err(err.into()),
        };

        let seg = match segments.iter().find(|s| s.id() == pos.segment_id) {
            Some(seg) => seg.clone(),
            None => {
                warn!(
                    "cursor segment {} is gone, snapping forward to {}",
                    pos.segment_id,
                    head.id()
                );
                pos = start;
                head
            }
        };
        seg.lock()?.seek(pos.offset)?;

        Ok(Cursor {
            dir: dir.to_path_buf(),
            pos,
            seg,
        })
    }

    pub(crate) fn position(&self) -> Position {
        self.pos
    }

    pub(crate) fn segment(&self) -> &SegmentHandle {
        &self.seg
    }

    /// Moves the offset by `delta`. A negative delta is a rollback; it
    /// must not cross the segment start.
    pub(crate) fn advance_offset(&mut self, delta: i64) -> Result<()> {
        let next = self.pos.offset + delta;
        if next < 0 {
            return Err(Error::Corrupt("cursor rollback crossed a segment boundary"));
        }
        self.pos.offset = next;
        Ok(())
    }

    /// Steps to the next segment present in `segments`, at offset 0.
    /// Returns false when the cursor is already on the tail.
    pub(crate) fn advance_segment(&mut self, segments: &[SegmentHandle]) -> Result<bool> {
        let Some(seg) = segments
            .iter()
            .find(|s| s.id() > self.pos.segment_id)
            .cloned()
        else {
            return Ok(false);
        };
        seg.lock()?.seek(0)?;
        self.pos = Position {
            segment_id: seg.id(),
            offset: 0,
        };
        self.seg = seg;
        Ok(true)
    }

    /// Re-seeks the current segment to the cursor offset, after a
    /// rollback.
    pub(crate) fn seek_current(&self) -> Result<()> {
        self.seg.lock()?.seek(self.pos.offset)
    }

    /// Atomically checkpoints the position to disk.
    pub(crate) fn dump(&self) -> Result<()> {
        let tmp = self.dir.join(CURSOR_TMP_FILE);
        let data = serde_json::to_vec(&self.pos)
            .map_err(|_| Error::Corrupt("cursor position not serializable"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, self.dir.join(CURSOR_FILE))?;
        Ok(())
    }
}
