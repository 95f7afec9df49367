//! On-disk framing for one `(key, value)` record.
//!
//! Frame layout:
//!
//! ```text
//! offset  size  field
//! 0       1     magic = 0xA5
//! 1       4     key length   (big-endian u32)
//! 5       4     value length (big-endian u32)
//! 9       K     key bytes
//! 9+K     V     value bytes
//! 9+K+V   4     crc32 of key||value (IEEE), big-endian
//! ```

use std::io::{self, Read};

use crate::{Error, Result};

pub const BLOCK_MAGIC: u8 = 0xA5;

/// Fields larger than this are implausible and treated as corruption.
pub const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 9;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Block {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Total frame size on disk, header and trailer included.
    pub fn size(&self) -> i64 {
        (HEADER_LEN + self.key.len() + self.value.len() + TRAILER_LEN) as i64
    }

    pub fn crc32(key: &[u8], value: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(key);
        hasher.update(value);
        hasher.finalize()
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.size() as usize);
        buf.push(BLOCK_MAGIC);
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&Self::crc32(&self.key, &self.value).to_be_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        self.encode_to(&mut buf);
        buf
    }

    /// Reads one frame from `reader`.
    ///
    /// Returns `EndOfFile` when the reader is exactly at a frame
    /// boundary with nothing left. Anything short of a whole valid
    /// frame past that point is `Corrupt`.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Block> {
        let mut magic = [0u8; 1];
        let n = loop {
            match reader.read(&mut magic) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };
        if n == 0 {
            return Err(Error::EndOfFile);
        }
        if magic[0] != BLOCK_MAGIC {
            return Err(Error::Corrupt("bad frame magic"));
        }

        let mut lengths = [0u8; 8];
        read_frame(reader, &mut lengths)?;
        let key_len = u32::from_be_bytes(lengths[0..4].try_into().expect("slice length")) as usize;
        let value_len = u32::from_be_bytes(lengths[4..8].try_into().expect("slice length")) as usize;
        if key_len > MAX_FIELD_LEN || value_len > MAX_FIELD_LEN {
            return Err(Error::Corrupt("frame length exceeds max"));
        }

        let mut key = vec![0u8; key_len];
        read_frame(reader, &mut key)?;
        let mut value = vec![0u8; value_len];
        read_frame(reader, &mut value)?;

        let mut crc_buf = [0u8; 4];
        read_frame(reader, &mut crc_buf)?;
        if u32::from_be_bytes(crc_buf) != Self::crc32(&key, &value) {
            return Err(Error::Corrupt("crc mismatch"));
        }

        Ok(Block { key, value })
    }
}

fn read_frame<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::Corrupt("truncated frame"),
        _ => Error::Io(err),
    })
}
