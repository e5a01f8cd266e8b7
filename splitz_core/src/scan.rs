//! Retrofitting a split index onto an existing compressed file.
//!
//! The scanner walks frame headers only. Payloads are skipped by seeking and
//! never decompressed, so scanning costs one small read per frame. The
//! offsets it records are the same ones the inline index capture records, so
//! both produce byte-identical index files.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, trace};

use crate::checksum::{ChecksumFlags, ChecksumScope};
use crate::error::{Error, Result};
use crate::format::{LzopHeader, FRAME_HEADER_SIZE, MAGIC, MAX_BLOCK_SIZE};
use crate::index::SplitIndex;
use crate::reader::{read_frame_start, read_frame_word, read_up_to};

/// Which framing a compressed stream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Headerless `[ulen][clen][payload]` frames.
    Raw,
    /// lzop-compatible container with magic header and terminator.
    Container,
}

/// Sniff the variant from the first bytes of `source`, restoring its
/// position afterwards.
pub fn detect_variant<R: Read + Seek>(source: &mut R) -> Result<Variant> {
    let start = source.stream_position()?;
    let mut head = [0u8; MAGIC.len()];
    let got = read_up_to(source, &mut head)?;
    source.seek(SeekFrom::Start(start))?;
    if got == head.len() && head == MAGIC {
        Ok(Variant::Container)
    } else {
        Ok(Variant::Raw)
    }
}

/// Build the index of a stream of either variant.
pub fn scan<R: Read + Seek>(mut source: R) -> Result<SplitIndex> {
    match detect_variant(&mut source)? {
        Variant::Container => scan_container(source),
        Variant::Raw => scan_raw(source),
    }
}

/// Build the index of a container stream starting at the current position.
///
/// Members concatenated after a terminator are followed; their frames are
/// indexed like any other. Bytes after a terminator that do not start with
/// the container magic end the scan, as they end a reader.
pub fn scan_container<R: Read + Seek>(mut source: R) -> Result<SplitIndex> {
    let (start, end) = extent(&mut source)?;
    let mut index = SplitIndex::new();

    let (header, header_len) = LzopHeader::read_from(&mut source)?;
    let mut checksums = ChecksumFlags::from_flags(header.flags);
    let mut pos = start + header_len;

    loop {
        let Some(ulen) = read_frame_start(&mut source)? else {
            return Err(Error::Truncated("missing end-of-stream marker"));
        };
        if ulen == 0 {
            pos += 4;
            if !member_follows(&mut source, pos, end)? {
                if pos < end {
                    debug!(
                        "Ignoring {} trailing bytes after the end-of-stream marker",
                        end - pos
                    );
                }
                break;
            }
            let (header, header_len) = LzopHeader::read_from(&mut source)?;
            checksums = ChecksumFlags::from_flags(header.flags);
            trace!("Member header at {}", pos - start);
            pos += header_len;
            continue;
        }
        let clen = read_frame_word(&mut source, "EOF inside frame length")?;
        if ulen as usize > MAX_BLOCK_SIZE || clen > ulen {
            return Err(Error::CorruptFrame(format!(
                "frame at {} declares ulen={ulen} clen={clen}",
                pos - start
            )));
        }
        let mut sums = checksums.count(ChecksumScope::Uncompressed);
        if clen < ulen {
            sums += checksums.count(ChecksumScope::Compressed);
        }
        let next = pos + FRAME_HEADER_SIZE + 4 * sums as u64 + clen as u64;
        if next > end {
            return Err(Error::Truncated("frame extends past end of stream"));
        }
        index.push(pos - start)?;
        trace!("Frame at {}: {} -> {} bytes", pos - start, clen, ulen);
        source.seek(SeekFrom::Start(next))?;
        pos = next;
    }

    debug!("Scanned container: {} frames", index.block_count());
    Ok(index)
}

/// Build the index of a raw block stream starting at the current position.
pub fn scan_raw<R: Read + Seek>(mut source: R) -> Result<SplitIndex> {
    let (start, end) = extent(&mut source)?;
    let mut index = SplitIndex::new();
    let mut pos = start;

    while pos < end {
        if end - pos < FRAME_HEADER_SIZE {
            return Err(Error::Truncated("EOF inside frame length"));
        }
        let ulen = read_frame_word(&mut source, "EOF inside frame length")?;
        let clen = read_frame_word(&mut source, "EOF inside frame length")?;
        if ulen as usize > MAX_BLOCK_SIZE {
            return Err(Error::CorruptFrame(format!(
                "frame at {} declares ulen={ulen}",
                pos - start
            )));
        }
        let next = pos + FRAME_HEADER_SIZE + clen as u64;
        if next > end {
            return Err(Error::Truncated("EOF inside frame payload"));
        }
        index.push(pos - start)?;
        trace!("Frame at {}: {} -> {} bytes", pos - start, clen, ulen);
        source.seek(SeekFrom::Start(next))?;
        pos = next;
    }

    debug!("Scanned raw block stream: {} frames", index.block_count());
    Ok(index)
}

/// Scan `path` and save its index alongside it as `<path>.idx`.
pub fn create_index(path: impl AsRef<Path>) -> Result<SplitIndex> {
    let path = path.as_ref();
    let index = scan(BufReader::new(File::open(path)?))?;
    index.save_for(path)?;
    Ok(index)
}

/// Whether a container magic starts at `pos`. The source is left at `pos`.
fn member_follows<R: Read + Seek>(source: &mut R, pos: u64, end: u64) -> Result<bool> {
    if end - pos < MAGIC.len() as u64 {
        return Ok(false);
    }
    let mut head = [0u8; MAGIC.len()];
    source.read_exact(&mut head)?;
    source.seek(SeekFrom::Start(pos))?;
    Ok(head == MAGIC)
}

/// Current position and total length of `source`, leaving it at the
/// current position.
fn extent<R: Seek>(source: &mut R) -> Result<(u64, u64)> {
    let start = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(start))?;
    Ok((start, end))
}
