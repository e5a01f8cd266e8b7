//! Error types for framing, container parsing, and index handling.

use thiserror::Error;

use crate::checksum::{ChecksumKind, ChecksumScope};
use crate::codec::CodecStatus;

/// Result type for splitz operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by streams, scanners, and indexes.
///
/// Nothing in this crate retries or recovers from these; every variant is
/// fatal for the stream that produced it.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying source or sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller passed an unsatisfiable range or configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The codec reported a non-OK status
    #[error("Codec error {} ({status:?}): {reason}", status.code())]
    Codec { status: CodecStatus, reason: String },

    #[error("Invalid container magic: {0:02x?}")]
    InvalidMagic([u8; 9]),

    #[error("Unsupported container version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("Reserved flag bits set: {0:#010x}")]
    ReservedFlags(u32),

    #[error("Unsupported container feature: {0}")]
    Unsupported(&'static str),

    #[error("Method mismatch: stream uses method {found:#04x} but codec provides {expected:#04x}")]
    MethodMismatch { expected: u8, found: u8 },

    #[error("Unknown compression method: {0:#04x}")]
    UnknownMethod(u8),

    #[error("Header checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HeaderChecksum { expected: u32, actual: u32 },

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    /// Decompressed length differs from the frame's declared length
    #[error("Output {}: frame declares {expected} bytes, codec produced {actual}",
        run_direction(*expected, *actual))]
    LengthMismatch { expected: u32, actual: usize },

    #[error(
        "{kind} checksum mismatch on {scope} data: expected {expected:#010x}, got {actual:#010x}"
    )]
    ChecksumMismatch {
        kind: ChecksumKind,
        scope: ChecksumScope,
        expected: u32,
        actual: u32,
    },

    #[error("Corrupt index: length {0} is not a multiple of 8")]
    CorruptIndex(u64),

    #[error("Index offsets must be strictly increasing: {offset} follows {previous}")]
    UnorderedIndex { previous: u64, offset: u64 },

    /// Source ended inside a frame or before the end-of-stream marker
    #[error("Premature end of stream: {0}")]
    Truncated(&'static str),
}

impl Error {
    pub(crate) fn invalid_range(buf_len: usize, offset: usize, len: usize) -> Self {
        Self::InvalidArgument(format!(
            "illegal range in buffer: buffer length={buf_len}, offset={offset}, length={len}"
        ))
    }

    /// True for framing and integrity failures: anything wrong with the
    /// header, a frame, or an index, including methods and features this
    /// build cannot decode.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::ReservedFlags(_)
                | Self::Unsupported(_)
                | Self::MethodMismatch { .. }
                | Self::UnknownMethod(_)
                | Self::HeaderChecksum { .. }
                | Self::CorruptFrame(_)
                | Self::LengthMismatch { .. }
                | Self::ChecksumMismatch { .. }
                | Self::CorruptIndex(_)
                | Self::UnorderedIndex { .. }
        )
    }

    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated(_))
    }
}

fn run_direction(expected: u32, actual: usize) -> &'static str {
    if actual < expected as usize {
        "underrun"
    } else {
        "overrun"
    }
}

/// Check that `offset..offset + len` lies inside a buffer of `buf_len` bytes.
pub(crate) fn check_range(buf_len: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buf_len => Ok(()),
        _ => Err(Error::invalid_range(buf_len, offset, len)),
    }
}

/// Map `UnexpectedEof` from a mid-frame read to a truncation error.
pub(crate) fn truncated_on_eof(err: std::io::Error, what: &'static str) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Truncated(what)
    } else {
        Error::Io(err)
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::InvalidArgument(_) => std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
            Error::Truncated(_) => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
