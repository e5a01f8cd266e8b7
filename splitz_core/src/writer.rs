use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use tracing::{debug, trace};

use crate::block::{BlockCompressor, CountingWriter};
use crate::checksum::{ChecksumFlags, ChecksumScope};
use crate::codec::Codec;
use crate::config::WriterOptions;
use crate::error::{check_range, Error, Result};
use crate::format::{LzopHeader, F_OS_UNIX};
use crate::index::{index_path, IndexFile, IndexWriter};

/// Streaming writer for the raw block variant.
///
/// # Write contract
/// Call [`write`](Self::write) any number of times with arbitrary-sized byte
/// slices. Every `block_size` raw bytes become one frame. Call
/// [`finish`](Self::finish) (or [`flush`](Self::flush)) to emit the partial
/// trailing block; dropping the writer loses it.
///
/// # Format layout written
/// ```text
/// [ulen u32 BE][clen u32 BE][payload: clen bytes]   ← repeated, no header
/// ```
/// The stream ends where the bytes end. There is no terminator.
pub struct BlockWriter<W: Write, I: Write = io::Sink> {
    sink: CountingWriter<W>,
    compressor: BlockCompressor,
    index: Option<IndexWriter<I>>,
    frames: u64,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(sink: W, codec: Box<dyn Codec>, block_size: usize) -> Result<Self> {
        debug!(
            "Opening raw block stream: codec={} block_size={}",
            codec.name(),
            block_size
        );
        Ok(Self {
            sink: CountingWriter::new(sink),
            compressor: BlockCompressor::new(codec, block_size)?,
            index: None,
            frames: 0,
        })
    }
}

impl<W: Write, I: Write> BlockWriter<W, I> {
    /// Capture frame offsets into `index_sink` while writing.
    ///
    /// Must be attached before the first frame is emitted.
    pub fn with_index<J: Write>(self, index_sink: J) -> Result<BlockWriter<W, J>> {
        if self.frames > 0 {
            return Err(Error::InvalidArgument(format!(
                "index attached after {} frames were written",
                self.frames
            )));
        }
        Ok(BlockWriter {
            sink: self.sink,
            compressor: self.compressor,
            index: Some(IndexWriter::new(index_sink)),
            frames: self.frames,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let Self {
            sink,
            compressor,
            index,
            frames,
        } = self;
        compressor.write(data, |raw, compressed| {
            emit_raw_frame(sink, index.as_mut(), raw, compressed)?;
            *frames += 1;
            Ok(())
        })
    }

    /// Write `len` bytes of `buf` starting at `offset`.
    ///
    /// The range is validated before anything is buffered.
    pub fn write_range(&mut self, buf: &[u8], offset: usize, len: usize) -> Result<()> {
        check_range(buf.len(), offset, len)?;
        self.write(&buf[offset..offset + len])
    }

    /// Emit held-over bytes as a (possibly short) frame and flush the sink
    /// and index.
    pub fn flush(&mut self) -> Result<()> {
        let Self {
            sink,
            compressor,
            index,
            frames,
        } = self;
        compressor.flush(|raw, compressed| {
            emit_raw_frame(sink, index.as_mut(), raw, compressed)?;
            *frames += 1;
            Ok(())
        })?;
        if let Some(index) = self.index.as_mut() {
            index.flush()?;
        }
        self.sink.flush()?;
        Ok(())
    }

    /// Flush everything and return the number of frames written so far.
    pub fn finish(&mut self) -> Result<u64> {
        self.flush()?;
        debug!(
            "Finished raw block stream: {} frames, {} bytes",
            self.frames,
            self.sink.position()
        );
        Ok(self.frames)
    }

    /// Discard held-over bytes without touching the sink.
    pub fn reset(&mut self) {
        self.compressor.reset();
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Bytes emitted to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.sink.position()
    }

    pub fn pending(&self) -> usize {
        self.compressor.pending()
    }

    /// Finish and hand back the sink and, if attached, the index sink.
    pub fn into_inner(mut self) -> Result<(W, Option<I>)> {
        self.finish()?;
        let index = self.index.map(IndexWriter::into_inner).transpose()?;
        Ok((self.sink.into_inner(), index))
    }
}

impl<W: Write, I: Write> Write for BlockWriter<W, I> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BlockWriter::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        BlockWriter::flush(self).map_err(io::Error::from)
    }
}

fn emit_raw_frame<W: Write, I: Write>(
    sink: &mut CountingWriter<W>,
    index: Option<&mut IndexWriter<I>>,
    raw: &[u8],
    compressed: &[u8],
) -> Result<()> {
    if let Some(index) = index {
        index.record(sink.position())?;
    }
    sink.write_u32::<BigEndian>(raw.len() as u32)?;
    sink.write_u32::<BigEndian>(compressed.len() as u32)?;
    sink.write_all(compressed)?;
    trace!("Frame: {} -> {} bytes", raw.len(), compressed.len());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Member {
    /// Header written, frames may follow.
    Open,
    /// Terminator written.
    Finished,
    /// Reset after finish: the next frame (or finish) starts a new member
    /// and writes its header first.
    HeaderPending,
}

/// Streaming writer for the lzop-compatible container.
///
/// # Format layout written
/// ```text
/// [HEADER: magic, versions, method, level, flags, mode, mtime, name, checksum]
/// [ulen][clen][d-checksums][c-checksums if clen < ulen][payload]   ← per block
/// [0u32]                                                            ← terminator
/// ```
/// A block whose compressed form is not smaller than its plaintext is stored
/// as-is with `clen == ulen`; stored blocks carry no compressed-side checksums.
///
/// The header goes out when the writer is constructed. [`finish`](Self::finish)
/// writes the terminator. After a finish, [`reset`](Self::reset) lets the same
/// writer append another member to the sink.
pub struct LzopWriter<W: Write, I: Write = io::Sink> {
    sink: CountingWriter<W>,
    compressor: BlockCompressor,
    index: Option<IndexWriter<I>>,
    header: LzopHeader,
    checksums: ChecksumFlags,
    member: Member,
    frames: u64,
}

impl<W: Write> LzopWriter<W> {
    pub fn new(sink: W, codec: Box<dyn Codec>, options: &WriterOptions) -> Result<Self> {
        let header = LzopHeader::new(
            codec.method(),
            codec.level(),
            options.checksums.to_flags() | F_OS_UNIX,
            options.resolved_mtime(),
        );
        let compressor = BlockCompressor::new(codec, options.block_size)?;
        let mut sink = CountingWriter::new(sink);
        let header_len = header.write_to(&mut sink)?;
        debug!(
            "Opening container stream: codec={} block_size={} flags={:#010x} header_len={}",
            compressor.codec().name(),
            options.block_size,
            header.flags,
            header_len
        );
        Ok(Self {
            sink,
            compressor,
            index: None,
            header,
            checksums: options.checksums,
            member: Member::Open,
            frames: 0,
        })
    }
}

impl LzopWriter<BufWriter<File>, IndexFile> {
    /// Create a container file at `path`, overwriting any existing file.
    ///
    /// An index left over from an earlier file at `path` is removed. With
    /// `options.index` set, the split index is captured into `<path>.idx.tmp`
    /// as frames are written and renamed to `<path>.idx` by
    /// [`close`](Self::close).
    pub fn create(
        path: impl AsRef<Path>,
        codec: Box<dyn Codec>,
        options: &WriterOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let index_file = index_path(path);
        match fs::remove_file(&index_file) {
            Ok(()) => debug!("Removed stale index {:?}", index_file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let file = BufWriter::new(File::create(path)?);
        let writer = LzopWriter::new(file, codec, options)?;
        let index = if options.index {
            debug!("Capturing split index for {:?}", index_file);
            Some(IndexWriter::new(IndexFile::create(index_file)?))
        } else {
            None
        };
        Ok(LzopWriter {
            sink: writer.sink,
            compressor: writer.compressor,
            index,
            header: writer.header,
            checksums: writer.checksums,
            member: writer.member,
            frames: writer.frames,
        })
    }

    /// Finish, flush the file, and publish the index if one is captured.
    ///
    /// Until this returns, no index is visible under the final name.
    pub fn close(self) -> Result<()> {
        let (file, index) = self.into_inner()?;
        file.get_ref().sync_all()?;
        if let Some(index) = index {
            let target = index.publish()?;
            debug!("Published split index {:?}", target);
        }
        Ok(())
    }
}

impl<W: Write, I: Write> LzopWriter<W, I> {
    /// Capture frame offsets into `index_sink` while writing.
    ///
    /// Must be attached before the first frame is emitted.
    pub fn with_index<J: Write>(self, index_sink: J) -> Result<LzopWriter<W, J>> {
        if self.frames > 0 {
            return Err(Error::InvalidArgument(format!(
                "index attached after {} frames were written",
                self.frames
            )));
        }
        Ok(LzopWriter {
            sink: self.sink,
            compressor: self.compressor,
            index: Some(IndexWriter::new(index_sink)),
            header: self.header,
            checksums: self.checksums,
            member: self.member,
            frames: self.frames,
        })
    }

    pub fn header(&self) -> &LzopHeader {
        &self.header
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.member == Member::Finished {
            return Err(Error::InvalidArgument(
                "write after finish; reset the writer to start a new member".into(),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.open_member()?;
        let Self {
            sink,
            compressor,
            index,
            checksums,
            frames,
            ..
        } = self;
        compressor.write(data, |raw, compressed| {
            emit_lzop_frame(sink, index.as_mut(), *checksums, raw, compressed)?;
            *frames += 1;
            Ok(())
        })
    }

    /// Write `len` bytes of `buf` starting at `offset`.
    ///
    /// The range is validated before anything is buffered.
    pub fn write_range(&mut self, buf: &[u8], offset: usize, len: usize) -> Result<()> {
        check_range(buf.len(), offset, len)?;
        self.write(&buf[offset..offset + len])
    }

    /// Emit held-over bytes as a short frame and flush the sink and index.
    ///
    /// Does not write the terminator; the stream stays open.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_frames()?;
        if let Some(index) = self.index.as_mut() {
            index.flush()?;
        }
        self.sink.flush()?;
        Ok(())
    }

    fn flush_frames(&mut self) -> Result<()> {
        if self.compressor.pending() == 0 {
            return Ok(());
        }
        self.open_member()?;
        let Self {
            sink,
            compressor,
            index,
            checksums,
            frames,
            ..
        } = self;
        compressor.flush(|raw, compressed| {
            emit_lzop_frame(sink, index.as_mut(), *checksums, raw, compressed)?;
            *frames += 1;
            Ok(())
        })
    }

    fn open_member(&mut self) -> Result<()> {
        if self.member == Member::HeaderPending {
            let header_len = self.header.write_to(&mut self.sink)?;
            debug!(
                "Starting new container member at offset {} ({} header bytes)",
                self.sink.position() - header_len,
                header_len
            );
            self.member = Member::Open;
        }
        Ok(())
    }

    /// Flush held-over bytes, write the terminator, and flush the sink and
    /// index. Returns the number of frames written across all members.
    ///
    /// Finishing twice is a no-op.
    pub fn finish(&mut self) -> Result<u64> {
        if self.member == Member::Finished {
            return Ok(self.frames);
        }
        self.open_member()?;
        self.flush_frames()?;
        self.sink.write_u32::<BigEndian>(0)?;
        if let Some(index) = self.index.as_mut() {
            index.flush()?;
        }
        self.sink.flush()?;
        self.member = Member::Finished;
        debug!(
            "Finished container stream: {} frames, {} bytes",
            self.frames,
            self.sink.position()
        );
        Ok(self.frames)
    }

    /// Return to the pre-first-frame state without touching the sink.
    ///
    /// Held-over bytes are dropped. The header is not re-emitted for an open
    /// member; after a finish, the next member's header is written before
    /// its first frame.
    pub fn reset(&mut self) {
        self.compressor.reset();
        if self.member == Member::Finished {
            self.member = Member::HeaderPending;
        }
        debug!("Reset container writer at offset {}", self.sink.position());
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Bytes emitted to the sink so far, headers and terminators included.
    pub fn bytes_written(&self) -> u64 {
        self.sink.position()
    }

    pub fn pending(&self) -> usize {
        self.compressor.pending()
    }

    /// Finish an open member and hand back the sink and, if attached, the
    /// index sink. A writer reset after finish with nothing written since
    /// adds no further member.
    pub fn into_inner(mut self) -> Result<(W, Option<I>)> {
        if self.member == Member::Open {
            self.finish()?;
        }
        let index = self.index.map(IndexWriter::into_inner).transpose()?;
        let mut sink = self.sink.into_inner();
        sink.flush()?;
        Ok((sink, index))
    }
}

impl<W: Write, I: Write> Write for LzopWriter<W, I> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        LzopWriter::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        LzopWriter::flush(self).map_err(io::Error::from)
    }
}

fn emit_lzop_frame<W: Write, I: Write>(
    sink: &mut CountingWriter<W>,
    index: Option<&mut IndexWriter<I>>,
    checksums: ChecksumFlags,
    raw: &[u8],
    compressed: &[u8],
) -> Result<()> {
    if let Some(index) = index {
        index.record(sink.position())?;
    }
    let stored = compressed.len() >= raw.len();
    let payload = if stored { raw } else { compressed };

    sink.write_u32::<BigEndian>(raw.len() as u32)?;
    sink.write_u32::<BigEndian>(payload.len() as u32)?;
    for kind in checksums.kinds(ChecksumScope::Uncompressed) {
        sink.write_u32::<BigEndian>(kind.compute(raw))?;
    }
    if !stored {
        for kind in checksums.kinds(ChecksumScope::Compressed) {
            sink.write_u32::<BigEndian>(kind.compute(compressed))?;
        }
    }
    sink.write_all(payload)?;
    trace!(
        "Frame: {} -> {} bytes{}",
        raw.len(),
        payload.len(),
        if stored { " (stored)" } else { "" }
    );
    Ok(())
}
