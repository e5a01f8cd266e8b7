use splitz_core::codec::{Codec, CodecStatus};
use splitz_core::format::METHOD_ZSTD;
use tracing::debug;

/// Zstandard block codec.
///
/// Each block is compressed independently with `zstd` at the configured level
/// (default: 3). No dictionary or window is shared between blocks, so any
/// block can be decompressed without touching its neighbours.
///
/// Best for: general text, JSON, logs, mixed structured data.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn method(&self) -> u8 {
        METHOD_ZSTD
    }

    fn level(&self) -> u8 {
        self.level.clamp(0, u8::MAX as i32) as u8
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compression_overhead(&self, input_len: usize) -> usize {
        zstd::zstd_safe::compress_bound(input_len) - input_len
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
        zstd::bulk::compress_to_buffer(src, dst, self.level).map_err(|e| {
            debug!("zstd compress failed: {}", e);
            CodecStatus::Error
        })
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
        zstd::bulk::decompress_to_buffer(src, dst).map_err(|e| {
            debug!("zstd decompress failed: {}", e);
            CodecStatus::Error
        })
    }

    fn status_message(&self, status: CodecStatus) -> String {
        format!("zstd: {status}")
    }
}
