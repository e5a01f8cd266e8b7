mod lz4_codec;
mod stored;
mod zstd_codec;

pub use lz4_codec::Lz4Codec;
pub use stored::StoredCodec;
pub use zstd_codec::ZstdCodec;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use splitz_core::format::{
    METHOD_LZ4, METHOD_LZO1X_1, METHOD_LZO1X_1_15, METHOD_LZO1X_999, METHOD_STORED, METHOD_ZSTD,
};
use splitz_core::{Codec, Error, Result};

/// The closed set of bundled codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Stored,
    Lz4,
    Zstd,
}

impl CodecKind {
    pub const ALL: [CodecKind; 3] = [CodecKind::Stored, CodecKind::Lz4, CodecKind::Zstd];

    pub fn method(self) -> u8 {
        match self {
            Self::Stored => METHOD_STORED,
            Self::Lz4 => METHOD_LZ4,
            Self::Zstd => METHOD_ZSTD,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Resolve the codec recorded in a container header.
    pub fn from_method(method: u8) -> Result<Self> {
        match method {
            METHOD_STORED => Ok(Self::Stored),
            METHOD_LZ4 => Ok(Self::Lz4),
            METHOD_ZSTD => Ok(Self::Zstd),
            METHOD_LZO1X_1 | METHOD_LZO1X_1_15 | METHOD_LZO1X_999 => {
                Err(Error::Unsupported("LZO methods need an external codec"))
            }
            other => Err(Error::UnknownMethod(other)),
        }
    }

    /// Instantiate the codec. `level` only applies to zstd.
    pub fn build(self, level: Option<i32>) -> Box<dyn Codec> {
        match self {
            Self::Stored => Box::new(StoredCodec),
            Self::Lz4 => Box::new(Lz4Codec),
            Self::Zstd => Box::new(level.map(ZstdCodec::new).unwrap_or_default()),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stored" | "none" | "passthrough" => Ok(Self::Stored),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::InvalidArgument(format!(
                "unknown codec {other:?}; bundled codecs are stored, lz4, zstd"
            ))),
        }
    }
}

/// Resolve a codec from the method byte of an existing container.
///
/// Used by the CLI when opening a file, so the reader is initialized with
/// the right codec automatically.
pub fn codec_by_method(method: u8) -> Result<Arc<dyn Codec>> {
    Ok(Arc::from(CodecKind::from_method(method)?.build(None)))
}
