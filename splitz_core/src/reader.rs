use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, trace};

use crate::checksum::{ChecksumFlags, ChecksumKind, ChecksumScope};
use crate::codec::Codec;
use crate::error::{check_range, truncated_on_eof, Error, Result};
use crate::format::{LzopHeader, MAGIC, MAX_BLOCK_SIZE};

/// Decoded bytes of the current frame and how many have been delivered.
///
/// Bytes are staged while a frame is being decoded and only become
/// available once [`commit`](Self::commit) runs after every check passed.
#[derive(Debug, Default)]
pub(crate) struct DecodeCursor {
    buf: Vec<u8>,
    filled: usize,
    pos: usize,
}

impl DecodeCursor {
    pub(crate) fn available(&self) -> usize {
        self.filled - self.pos
    }

    pub(crate) fn needs_frame(&self) -> bool {
        self.pos == self.filled
    }

    pub(crate) fn clear(&mut self) {
        self.filled = 0;
        self.pos = 0;
    }

    /// Buffer to decode a frame of `len` bytes into. Nothing is available
    /// until the frame is committed.
    pub(crate) fn stage(&mut self, len: usize) -> &mut [u8] {
        self.clear();
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
        &mut self.buf[..len]
    }

    pub(crate) fn commit(&mut self, len: usize) {
        self.filled = len;
        self.pos = 0;
    }

    pub(crate) fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// First word of a frame, or `None` when the source is exhausted before any
/// of its bytes.
pub(crate) fn read_frame_start<R: Read>(source: &mut R) -> Result<Option<u32>> {
    let mut word = [0u8; 4];
    match read_up_to(source, &mut word)? {
        0 => Ok(None),
        4 => Ok(Some(u32::from_be_bytes(word))),
        _ => Err(Error::Truncated("EOF inside frame length")),
    }
}

/// Fill as much of `buf` as the source has, returning the count.
pub(crate) fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match source.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

pub(crate) fn read_frame_word<R: Read>(source: &mut R, what: &'static str) -> Result<u32> {
    source
        .read_u32::<BigEndian>()
        .map_err(|e| truncated_on_eof(e, what))
}

fn read_payload<R: Read>(source: &mut R, input: &mut Vec<u8>, len: usize) -> Result<()> {
    input.resize(len, 0);
    source
        .read_exact(input)
        .map_err(|e| truncated_on_eof(e, "EOF inside frame payload"))
}

fn decompress_into(codec: &dyn Codec, src: &[u8], dst: &mut [u8], declared: u32) -> Result<()> {
    let produced = codec.decompress(src, dst).map_err(|status| Error::Codec {
        status,
        reason: codec.status_message(status),
    })?;
    if produced != declared as usize {
        return Err(Error::LengthMismatch {
            expected: declared,
            actual: produced,
        });
    }
    Ok(())
}

/// Streaming reader for the raw block variant.
///
/// Decodes one frame at a time; [`read_frame`](Self::read_frame) returns
/// `false` when the source ends cleanly at a frame boundary. Also usable as a
/// plain [`Read`], where typed errors surface as `io::Error`.
pub struct BlockReader<R: Read> {
    source: R,
    codec: Arc<dyn Codec>,
    input: Vec<u8>,
    cursor: DecodeCursor,
    frames: u64,
}

impl<R: Read> BlockReader<R> {
    /// Start decoding at the current position of `source`, which must be a
    /// frame boundary.
    pub fn new(source: R, codec: Arc<dyn Codec>) -> Self {
        Self {
            source,
            codec,
            input: Vec::new(),
            cursor: DecodeCursor::default(),
            frames: 0,
        }
    }

    /// Decode the next frame, discarding any undelivered bytes of the
    /// current one. Returns `false` at a clean end of stream.
    pub fn read_frame(&mut self) -> Result<bool> {
        self.cursor.clear();
        let Some(ulen) = read_frame_start(&mut self.source)? else {
            debug!("Raw block stream ended after {} frames", self.frames);
            return Ok(false);
        };
        let clen = read_frame_word(&mut self.source, "EOF inside frame length")?;
        if ulen as usize > MAX_BLOCK_SIZE {
            return Err(Error::CorruptFrame(format!(
                "uncompressed length {ulen} exceeds {MAX_BLOCK_SIZE}"
            )));
        }
        let bound = MAX_BLOCK_SIZE + self.codec.compression_overhead(MAX_BLOCK_SIZE);
        if clen as usize > bound {
            return Err(Error::CorruptFrame(format!(
                "compressed length {clen} exceeds {bound}"
            )));
        }
        read_payload(&mut self.source, &mut self.input, clen as usize)?;
        let out = self.cursor.stage(ulen as usize);
        decompress_into(self.codec.as_ref(), &self.input, out, ulen)?;
        self.cursor.commit(ulen as usize);
        self.frames += 1;
        trace!("Frame {}: {} -> {} bytes", self.frames - 1, clen, ulen);
        Ok(true)
    }

    /// Decoded bytes of the current frame not yet delivered.
    pub fn available(&self) -> usize {
        self.cursor.available()
    }

    /// True once every decoded byte of the current frame has been delivered.
    pub fn needs_frame(&self) -> bool {
        self.cursor.needs_frame()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    /// Read into `buf[offset..offset + len]`, decoding frames as needed.
    /// Returns 0 only at end of stream (or for `len == 0`).
    pub fn read_range(&mut self, buf: &mut [u8], offset: usize, len: usize) -> Result<usize> {
        check_range(buf.len(), offset, len)?;
        if len == 0 || !self.fill()? {
            return Ok(0);
        }
        Ok(self.cursor.take(&mut buf[offset..offset + len]))
    }

    fn fill(&mut self) -> Result<bool> {
        while self.cursor.needs_frame() {
            if !self.read_frame()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop undelivered bytes; the next read starts at the source's current
    /// position.
    pub fn reset(&mut self) {
        self.cursor.clear();
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_range(buf, 0, len)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Frames,
    /// Terminator consumed.
    Ended,
    /// Reset after the terminator: the next member's header comes first.
    AwaitingHeader,
}

/// Streaming reader for the lzop-compatible container.
///
/// # Open sequence
/// 1. Parse and validate the header (magic, version, reserved flags, header
///    checksum).
/// 2. Check the header's method byte against the supplied codec.
///
/// # Per frame
/// Lengths, then the checksums the header's flags select, then the payload.
/// Compressed-side checksums are checked before decompression and
/// plaintext-side checksums after; a frame only becomes readable once both
/// pass. A zero uncompressed length is the terminator.
pub struct LzopReader<R: Read> {
    source: R,
    codec: Arc<dyn Codec>,
    header: LzopHeader,
    checksums: ChecksumFlags,
    input: Vec<u8>,
    cursor: DecodeCursor,
    position: Position,
    follow_members: bool,
    frames: u64,
}

impl LzopReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, codec: Arc<dyn Codec>) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?), codec)
    }
}

impl<R: Read> LzopReader<R> {
    /// Parse the header at the current position of `source`.
    pub fn new(mut source: R, codec: Arc<dyn Codec>) -> Result<Self> {
        let (header, _) = LzopHeader::read_from(&mut source)?;
        Self::resume(source, header, codec)
    }

    /// Decode frames starting at the current position of `source`, using a
    /// header parsed earlier from the same stream.
    ///
    /// This is how split readers start mid-file: parse the header at offset
    /// 0, seek to an indexed frame offset, then resume.
    pub fn resume(source: R, header: LzopHeader, codec: Arc<dyn Codec>) -> Result<Self> {
        check_method(&header, codec.as_ref())?;
        Ok(Self {
            source,
            codec,
            checksums: ChecksumFlags::from_flags(header.flags),
            header,
            input: Vec::new(),
            cursor: DecodeCursor::default(),
            position: Position::Frames,
            follow_members: false,
            frames: 0,
        })
    }

    /// Keep decoding when another member (header, frames, terminator)
    /// follows a terminator, as produced by a writer reset after finish.
    /// Off by default: the reader stops at the first terminator.
    pub fn follow_members(mut self, follow: bool) -> Self {
        self.follow_members = follow;
        self
    }

    pub fn header(&self) -> &LzopHeader {
        &self.header
    }

    pub fn checksums(&self) -> ChecksumFlags {
        self.checksums
    }

    /// Decode the next frame. Returns `false` once the terminator is read;
    /// running out of bytes before it is a truncation error.
    pub fn read_frame(&mut self) -> Result<bool> {
        self.cursor.clear();
        loop {
            match self.position {
                Position::Ended => return Ok(false),
                Position::AwaitingHeader => {
                    let (header, _) = LzopHeader::read_from(&mut self.source)?;
                    self.start_member(header)?;
                }
                Position::Frames => {}
            }
            let ulen = read_frame_start(&mut self.source)?
                .ok_or(Error::Truncated("missing end-of-stream marker"))?;
            if ulen != 0 {
                return self.decode_frame(ulen);
            }
            debug!("Container member ended after {} frames", self.frames);
            self.position = Position::Ended;
            if !self.follow_members || !self.next_member()? {
                return Ok(false);
            }
        }
    }

    /// Parse the header of a member that directly follows a terminator.
    /// `false` when the source is exhausted or what follows is not a
    /// container magic; such trailing bytes are left unread.
    fn next_member(&mut self) -> Result<bool> {
        let mut magic = [0u8; MAGIC.len()];
        let got = read_up_to(&mut self.source, &mut magic)?;
        if got < magic.len() || magic != MAGIC {
            if got > 0 {
                debug!("Ignoring trailing bytes after the end-of-stream marker");
            }
            return Ok(false);
        }
        let (header, _) = LzopHeader::read_from((&magic[..]).chain(&mut self.source))?;
        self.start_member(header)?;
        Ok(true)
    }

    fn start_member(&mut self, header: LzopHeader) -> Result<()> {
        check_method(&header, self.codec.as_ref())?;
        self.checksums = ChecksumFlags::from_flags(header.flags);
        self.header = header;
        self.position = Position::Frames;
        Ok(())
    }

    fn decode_frame(&mut self, ulen: u32) -> Result<bool> {
        if ulen as usize > MAX_BLOCK_SIZE {
            return Err(Error::CorruptFrame(format!(
                "uncompressed length {ulen} exceeds {MAX_BLOCK_SIZE}"
            )));
        }
        let clen = read_frame_word(&mut self.source, "EOF inside frame length")?;
        if clen > ulen {
            return Err(Error::CorruptFrame(format!(
                "compressed length {clen} exceeds uncompressed length {ulen}"
            )));
        }
        let stored = clen == ulen;

        let plain_sums =
            read_checksums(&mut self.source, self.checksums, ChecksumScope::Uncompressed)?;
        let packed_sums = if stored {
            Vec::new()
        } else {
            read_checksums(&mut self.source, self.checksums, ChecksumScope::Compressed)?
        };

        read_payload(&mut self.source, &mut self.input, clen as usize)?;
        verify(&packed_sums, ChecksumScope::Compressed, &self.input)?;

        let out = self.cursor.stage(ulen as usize);
        if stored {
            out.copy_from_slice(&self.input);
        } else {
            decompress_into(self.codec.as_ref(), &self.input, out, ulen)?;
        }
        verify(&plain_sums, ChecksumScope::Uncompressed, out)?;

        self.cursor.commit(ulen as usize);
        self.frames += 1;
        trace!(
            "Frame {}: {} -> {} bytes{}",
            self.frames - 1,
            clen,
            ulen,
            if stored { " (stored)" } else { "" }
        );
        Ok(true)
    }

    /// Decoded bytes of the current frame not yet delivered.
    pub fn available(&self) -> usize {
        self.cursor.available()
    }

    /// True once every decoded byte of the current frame has been delivered.
    pub fn needs_frame(&self) -> bool {
        self.cursor.needs_frame()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    /// True once a terminator has been read and no further member is being
    /// decoded.
    pub fn is_finished(&self) -> bool {
        self.position == Position::Ended
    }

    /// Read into `buf[offset..offset + len]`, decoding frames as needed.
    /// Returns 0 only at the terminator (or for `len == 0`).
    pub fn read_range(&mut self, buf: &mut [u8], offset: usize, len: usize) -> Result<usize> {
        check_range(buf.len(), offset, len)?;
        if len == 0 || !self.fill()? {
            return Ok(0);
        }
        Ok(self.cursor.take(&mut buf[offset..offset + len]))
    }

    fn fill(&mut self) -> Result<bool> {
        while self.cursor.needs_frame() {
            if !self.read_frame()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop undelivered bytes. After the terminator, the reader expects the
    /// header of a following member.
    pub fn reset(&mut self) {
        self.cursor.clear();
        if self.position == Position::Ended {
            self.position = Position::AwaitingHeader;
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Read for LzopReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_range(buf, 0, len)?)
    }
}

fn check_method(header: &LzopHeader, codec: &dyn Codec) -> Result<()> {
    if header.method != codec.method() {
        return Err(Error::MethodMismatch {
            expected: codec.method(),
            found: header.method,
        });
    }
    Ok(())
}

fn read_checksums<R: Read>(
    source: &mut R,
    flags: ChecksumFlags,
    scope: ChecksumScope,
) -> Result<Vec<(ChecksumKind, u32)>> {
    flags
        .kinds(scope)
        .map(|kind| Ok((kind, read_frame_word(source, "EOF inside frame checksum")?)))
        .collect()
}

fn verify(expected: &[(ChecksumKind, u32)], scope: ChecksumScope, data: &[u8]) -> Result<()> {
    for &(kind, expected) in expected {
        let actual = kind.compute(data);
        if actual != expected {
            return Err(Error::ChecksumMismatch {
                kind,
                scope,
                expected,
                actual,
            });
        }
    }
    Ok(())
}
