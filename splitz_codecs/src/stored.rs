use splitz_core::codec::{Codec, CodecStatus};
use splitz_core::format::METHOD_STORED;

/// No-op codec: blocks are copied verbatim.
///
/// Useful for:
/// - Verifying framing, checksums and indexing independently of any
///   compression algorithm.
/// - Data that is already compressed, where a real codec would only expand
///   it.
///
/// In a container every block written with this codec ends up stored
/// (`clen == ulen`), so only plaintext-side checksums are emitted.
pub struct StoredCodec;

impl Codec for StoredCodec {
    fn method(&self) -> u8 {
        METHOD_STORED
    }

    fn name(&self) -> &'static str {
        "stored"
    }

    fn compression_overhead(&self, _input_len: usize) -> usize {
        0
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
        copy_block(src, dst)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
        copy_block(src, dst)
    }
}

fn copy_block(src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
    let out = dst
        .get_mut(..src.len())
        .ok_or(CodecStatus::OutputOverrun)?;
    out.copy_from_slice(src);
    Ok(src.len())
}
