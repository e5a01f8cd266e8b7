use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::ChecksumFlags;
use crate::error::{Error, Result};
use crate::format::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};

/// Construction-time settings for writers.
///
/// Everything a stream needs is passed in here; nothing is read from
/// process-wide configuration.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Raw bytes per block (the last block may be smaller).
    pub block_size: usize,
    /// Per-block checksums written by the container framer.
    pub checksums: ChecksumFlags,
    /// Capture a split index while writing (file-backed writers only).
    pub index: bool,
    /// Modification time recorded in the container header; `None` uses now.
    pub mtime: Option<u32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            checksums: ChecksumFlags {
                adler32_uncompressed: true,
                adler32_compressed: true,
                ..ChecksumFlags::NONE
            },
            index: false,
            mtime: None,
        }
    }
}

impl WriterOptions {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_checksums(mut self, checksums: ChecksumFlags) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn with_mtime(mut self, mtime: u32) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub(crate) fn resolved_mtime(&self) -> u32 {
        self.mtime.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        })
    }
}

pub(crate) fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(Error::InvalidArgument(format!(
            "block size {block_size} outside 1..={MAX_BLOCK_SIZE}"
        )));
    }
    Ok(())
}
