//! Splittable block compression.
//!
//! Two framings share one write path: a headerless raw block stream and an
//! lzop-compatible container with per-block checksums. A split index of frame
//! offsets, captured while writing or built later by scanning, lets
//! independent readers start decoding at any block boundary.

pub mod block;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod reader;
pub mod scan;
pub mod split;
pub mod writer;

pub use block::BlockCompressor;
pub use checksum::{ChecksumFlags, ChecksumKind, ChecksumScope};
pub use codec::{Codec, CodecStatus};
pub use config::WriterOptions;
pub use error::{Error, Result};
pub use format::{LzopHeader, DEFAULT_BLOCK_SIZE, MAGIC, MAX_BLOCK_SIZE};
pub use index::{index_path, legacy_index_path, IndexFile, IndexWriter, SplitIndex};
pub use reader::{BlockReader, LzopReader};
pub use scan::{create_index, detect_variant, scan, scan_container, scan_raw, Variant};
pub use split::{open_raw_split, open_split, Split};
pub use writer::{BlockWriter, LzopWriter};
