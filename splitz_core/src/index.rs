//! Split index: the start offset of every frame in a compressed stream.
//!
//! # Format
//! ```text
//! [offset 0: u64 BE] [offset 1: u64 BE] ... [offset N-1: u64 BE]
//! ```
//! No header and no footer, so `file length / 8` is the block count. Offsets
//! are relative to the start of the compressed stream (container header
//! included) and strictly increasing. The end-of-stream marker is never
//! indexed.
//!
//! The index lives next to the compressed file as `<file>.idx`. Files named
//! `<file>.index` by older writers are still found on load.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Suffix appended to a compressed file's name to locate its index.
pub const INDEX_SUFFIX: &str = ".idx";

/// Suffix used by older writers, recognised on load only.
pub const LEGACY_INDEX_SUFFIX: &str = ".index";

/// Suffix of an index file still being written.
pub const TMP_SUFFIX: &str = ".tmp";

/// Offsets buffered by [`IndexWriter`] before it flushes: 8 KB worth.
pub const INDEX_BUFFER_ENTRIES: usize = 1024;

/// Primary index path for `file`.
pub fn index_path(file: impl AsRef<Path>) -> PathBuf {
    with_suffix(file.as_ref(), INDEX_SUFFIX)
}

/// Legacy index path for `file`.
pub fn legacy_index_path(file: impl AsRef<Path>) -> PathBuf {
    with_suffix(file.as_ref(), LEGACY_INDEX_SUFFIX)
}

fn with_suffix(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// In-memory split index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndex {
    offsets: Vec<u64>,
}

impl SplitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from offsets, checking they are strictly increasing.
    pub fn from_offsets(offsets: Vec<u64>) -> Result<Self> {
        for pair in offsets.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::UnorderedIndex {
                    previous: pair[0],
                    offset: pair[1],
                });
            }
        }
        Ok(Self { offsets })
    }

    /// Append the start offset of the next frame.
    pub fn push(&mut self, offset: u64) -> Result<()> {
        if let Some(&previous) = self.offsets.last() {
            if offset <= previous {
                return Err(Error::UnorderedIndex { previous, offset });
            }
        }
        self.offsets.push(offset);
        Ok(())
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn block_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Offset of block `idx`.
    pub fn position(&self, idx: usize) -> Option<u64> {
        self.offsets.get(idx).copied()
    }

    /// Largest indexed offset at or before `pos`.
    ///
    /// A position before the first frame (inside the container header) maps
    /// to the first frame. `None` only for an empty index.
    pub fn block_start_at_or_before(&self, pos: u64) -> Option<u64> {
        match self.offsets.partition_point(|&o| o <= pos) {
            0 => self.offsets.first().copied(),
            n => Some(self.offsets[n - 1]),
        }
    }

    /// First indexed offset at or after `pos`.
    pub fn find_next_position(&self, pos: u64) -> Option<u64> {
        let idx = self.offsets.partition_point(|&o| o < pos);
        self.offsets.get(idx).copied()
    }

    /// Align a byte-range slice start to the next block boundary.
    ///
    /// Returns `None` when no block starts inside `[start, end)`, meaning the
    /// slice has nothing to decode of its own.
    pub fn align_slice_start(&self, start: u64, end: u64) -> Option<u64> {
        self.find_next_position(start).filter(|&pos| pos < end)
    }

    /// Align a byte-range slice end to the next block boundary, or to
    /// `file_len` when no block starts at or after `end`.
    pub fn align_slice_end(&self, end: u64, file_len: u64) -> u64 {
        self.find_next_position(end).unwrap_or(file_len)
    }

    /// Parse an index from its serialized form.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 8 != 0 {
            return Err(Error::CorruptIndex(bytes.len() as u64));
        }
        let offsets = bytes
            .chunks_exact(8)
            .map(|c| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(c);
                u64::from_be_bytes(raw)
            })
            .collect();
        Self::from_offsets(offsets)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.offsets.iter().flat_map(|o| o.to_be_bytes()).collect()
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Load the index that belongs to `file`, trying the primary name first
    /// and then the legacy one. `None` when neither exists.
    pub fn load_for(file: impl AsRef<Path>) -> Result<Option<Self>> {
        let file = file.as_ref();
        match File::open(index_path(file)) {
            Ok(f) => return Self::read_from(BufReader::new(f)).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let legacy = legacy_index_path(file);
        match File::open(&legacy) {
            Ok(f) => {
                warn!("Using legacy index name {:?}", legacy);
                Self::read_from(BufReader::new(f)).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the index next to `file` under the primary name.
    ///
    /// Written to a temporary name and renamed into place, so readers never
    /// observe a partial index.
    pub fn save_for(&self, file: impl AsRef<Path>) -> Result<PathBuf> {
        let mut out = IndexFile::create(index_path(file))?;
        self.write_to(&mut out)?;
        let target = out.publish()?;
        debug!("Wrote {} index entries to {:?}", self.block_count(), target);
        Ok(target)
    }
}

/// Index file under construction.
///
/// Bytes go to `<index>.tmp`; [`publish`](Self::publish) syncs it and renames
/// it to the final name. Dropping an unpublished file removes the temporary,
/// so an abandoned writer never leaves an index behind.
pub struct IndexFile {
    out: Option<BufWriter<File>>,
    tmp: PathBuf,
    target: PathBuf,
}

impl IndexFile {
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let tmp = with_suffix(&target, TMP_SUFFIX);
        let out = BufWriter::new(File::create(&tmp)?);
        Ok(Self {
            out: Some(out),
            tmp,
            target,
        })
    }

    /// Final path the index is published under.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flush, sync, and rename into place.
    pub fn publish(mut self) -> Result<PathBuf> {
        if let Some(out) = self.out.take() {
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        fs::rename(&self.tmp, &self.target)?;
        Ok(std::mem::take(&mut self.target))
    }

    fn out(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.out
            .as_mut()
            .ok_or_else(|| io::Error::other("index file already published"))
    }
}

impl Write for IndexFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out()?.flush()
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        if self.out.take().is_some() {
            debug!("Discarding unpublished index {:?}", self.tmp);
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Write-time index capture.
///
/// Offsets are buffered and flushed to the sink whenever the buffer fills
/// and on every [`IndexWriter::flush`].
pub struct IndexWriter<W: Write> {
    sink: W,
    buffer: Vec<u8>,
    last: Option<u64>,
    entries: u64,
}

impl<W: Write> IndexWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(INDEX_BUFFER_ENTRIES * 8),
            last: None,
            entries: 0,
        }
    }

    /// Record the start offset of a frame that is about to be written.
    pub fn record(&mut self, offset: u64) -> Result<()> {
        if let Some(previous) = self.last {
            if offset <= previous {
                return Err(Error::UnorderedIndex { previous, offset });
            }
        }
        if self.buffer.len() >= INDEX_BUFFER_ENTRIES * 8 {
            self.flush()?;
        }
        self.buffer.extend_from_slice(&offset.to_be_bytes());
        self.last = Some(offset);
        self.entries += 1;
        Ok(())
    }

    /// Number of offsets recorded so far.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.sink.write_all(&self.buffer)?;
            debug!("Flushed {} index entries", self.buffer.len() / 8);
            self.buffer.clear();
        }
        self.sink.flush()?;
        Ok(())
    }

    /// Flush and hand back the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }
}
