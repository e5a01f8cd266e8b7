use std::fmt;

/// Non-OK outcome reported by a [`Codec`].
///
/// Codes follow the classic LZO status numbering so that codecs wrapping
/// native libraries can pass their status through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStatus {
    Error,
    OutOfMemory,
    NotCompressible,
    InputOverrun,
    OutputOverrun,
    LookbehindOverrun,
    EofNotFound,
    InputNotConsumed,
    Other(i32),
}

impl CodecStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Error => -1,
            Self::OutOfMemory => -2,
            Self::NotCompressible => -3,
            Self::InputOverrun => -4,
            Self::OutputOverrun => -5,
            Self::LookbehindOverrun => -6,
            Self::EofNotFound => -7,
            Self::InputNotConsumed => -8,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::Error,
            -2 => Self::OutOfMemory,
            -3 => Self::NotCompressible,
            -4 => Self::InputOverrun,
            -5 => Self::OutputOverrun,
            -6 => Self::LookbehindOverrun,
            -7 => Self::EofNotFound,
            -8 => Self::InputNotConsumed,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CodecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("Error"),
            Self::OutOfMemory => f.write_str("Out of memory"),
            Self::NotCompressible => f.write_str("Not compressible"),
            Self::InputOverrun => f.write_str("Input overrun"),
            Self::OutputOverrun => f.write_str("Output overrun"),
            Self::LookbehindOverrun => f.write_str("Lookbehind overrun"),
            Self::EofNotFound => f.write_str("EOF not found"),
            Self::InputNotConsumed => f.write_str("Input not consumed"),
            Self::Other(code) => write!(f, "Unknown-{code}"),
        }
    }
}

/// Block compression capability.
///
/// The framers treat a codec as a black box: it turns one block of plain
/// bytes into one block of compressed bytes and back. Each block must be
/// independently decodable, with no state carried between calls. That is the
/// property that lets a reader start at any indexed frame.
pub trait Codec: Send + Sync {
    /// Method byte recorded in the container header.
    fn method(&self) -> u8;

    /// Level byte recorded in the container header.
    fn level(&self) -> u8 {
        0
    }

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Worst-case number of bytes compression may add to `input_len` bytes.
    ///
    /// The write path sizes its output buffer as
    /// `block_size + compression_overhead(block_size)`.
    fn compression_overhead(&self, input_len: usize) -> usize;

    /// Compress `src` into `dst`, returning the number of bytes written.
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus>;

    /// Decompress `src` into `dst`, returning the number of bytes written.
    ///
    /// `dst` is sized to the frame's declared uncompressed length.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus>;

    /// Describe a status for error messages.
    fn status_message(&self, status: CodecStatus) -> String {
        status.to_string()
    }
}
