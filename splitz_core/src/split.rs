//! Opening a decode session at an indexed frame boundary.
//!
//! A split reader never scans from the start of the file: it looks up the
//! largest indexed offset at or before its assigned start, seeks there, and
//! decodes forward. Several split readers can do this concurrently on the
//! same file; each owns its own source handle and shares only the immutable
//! index and the codec.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::debug;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::format::LzopHeader;
use crate::index::SplitIndex;
use crate::reader::{BlockReader, LzopReader};

/// A reader positioned at a frame boundary.
pub struct Split<T> {
    /// Compressed-stream offset the reader starts at.
    pub offset: u64,
    pub reader: T,
}

/// Open a container stream at the frame that covers `split_start`.
///
/// The header is read once at offset 0 for its flags and method, then the
/// source seeks to the chosen frame. The reader follows concatenated members,
/// since the index covers them all. Returns `None` for an empty index.
pub fn open_split<R: Read + Seek>(
    mut source: R,
    codec: Arc<dyn Codec>,
    index: &SplitIndex,
    split_start: u64,
) -> Result<Option<Split<LzopReader<R>>>> {
    source.seek(SeekFrom::Start(0))?;
    let (header, header_len) = LzopHeader::read_from(&mut source)?;
    let Some(offset) = index.block_start_at_or_before(split_start) else {
        return Ok(None);
    };
    if offset < header_len {
        return Err(Error::InvalidArgument(format!(
            "index offset {offset} lies inside the {header_len}-byte header"
        )));
    }
    source.seek(SeekFrom::Start(offset))?;
    debug!("Opened split at offset {} for start {}", offset, split_start);
    let reader = LzopReader::resume(source, header, codec)?.follow_members(true);
    Ok(Some(Split { offset, reader }))
}

/// Open a raw block stream at the frame that covers `split_start`.
pub fn open_raw_split<R: Read + Seek>(
    mut source: R,
    codec: Arc<dyn Codec>,
    index: &SplitIndex,
    split_start: u64,
) -> Result<Option<Split<BlockReader<R>>>> {
    let Some(offset) = index.block_start_at_or_before(split_start) else {
        return Ok(None);
    };
    source.seek(SeekFrom::Start(offset))?;
    debug!("Opened raw split at offset {} for start {}", offset, split_start);
    Ok(Some(Split {
        offset,
        reader: BlockReader::new(source, codec),
    }))
}
