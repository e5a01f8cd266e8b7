//! On-disk constants and the lzop-compatible container header.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::checksum::ChecksumKind;
use crate::error::{truncated_on_eof, Error, Result};

/// 9 bytes at the top of every container stream.
pub const MAGIC: [u8; 9] = [0x89, b'L', b'Z', b'O', 0x00, b'\r', b'\n', 0x1a, b'\n'];

/// Format version written by this crate.
pub const LZOP_VERSION: u16 = 0x1010;

/// Oldest format version a reader must understand to decode our output.
pub const LZOP_COMPAT_VERSION: u16 = 0x0940;

/// Library version recorded in written headers.
pub const LIBRARY_VERSION: u16 = 0x2060;

/// Streams older than this predate the stable header layout.
pub const MIN_READABLE_VERSION: u16 = 0x0900;

/// Default raw bytes per block: 256 KB.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Largest block a container frame may declare: 64 MB.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Raw frame header: uncompressed length + compressed length.
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Unix permission bits recorded for written streams (0100644).
pub const DEFAULT_MODE: u32 = 0o100_644;

// ── Methods ────────────────────────────────────────────────────────────────

pub const METHOD_LZO1X_1: u8 = 1;
pub const METHOD_LZO1X_1_15: u8 = 2;
pub const METHOD_LZO1X_999: u8 = 3;
pub const METHOD_STORED: u8 = 0x40;
pub const METHOD_LZ4: u8 = 0x41;
pub const METHOD_ZSTD: u8 = 0x42;

// ── Flags ──────────────────────────────────────────────────────────────────

pub const F_ADLER32_D: u32 = 0x0000_0001;
pub const F_ADLER32_C: u32 = 0x0000_0002;
pub const F_STDIN: u32 = 0x0000_0004;
pub const F_STDOUT: u32 = 0x0000_0008;
pub const F_NAME_DEFAULT: u32 = 0x0000_0010;
pub const F_DOSISH: u32 = 0x0000_0020;
pub const F_H_EXTRA_FIELD: u32 = 0x0000_0040;
pub const F_H_GMTDIFF: u32 = 0x0000_0080;
pub const F_CRC32_D: u32 = 0x0000_0100;
pub const F_CRC32_C: u32 = 0x0000_0200;
pub const F_MULTIPART: u32 = 0x0000_0400;
pub const F_H_FILTER: u32 = 0x0000_0800;
pub const F_H_CRC32: u32 = 0x0000_1000;
pub const F_H_PATH: u32 = 0x0000_2000;
pub const F_MASK: u32 = 0x0000_3FFF;

/// Operating system that created the stream (mostly informational).
pub const F_OS_FAT: u32 = 0x0000_0000;
pub const F_OS_UNIX: u32 = 0x0300_0000;
pub const F_OS_NTFS: u32 = 0x0b00_0000;
pub const F_OS_SHIFT: u32 = 24;
pub const F_OS_MASK: u32 = 0xff00_0000;

/// Character set of the stored file name (mostly informational).
pub const F_CS_NATIVE: u32 = 0x0000_0000;
pub const F_CS_UTF8: u32 = 0x0050_0000;
pub const F_CS_SHIFT: u32 = 20;
pub const F_CS_MASK: u32 = 0x00f0_0000;

/// These bits must be zero.
pub const F_RESERVED: u32 = !(F_MASK | F_OS_MASK | F_CS_MASK);

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LzopHeader {
    pub version: u16,
    pub library_version: u16,
    pub version_needed: u16,
    pub method: u8,
    pub level: u8,
    pub flags: u32,
    pub filter: Option<u32>,
    pub mode: u32,
    pub mtime: u32,
    pub gmtdiff: u32,
    pub name: Vec<u8>,
    pub extra: Option<Vec<u8>>,
}

impl LzopHeader {
    /// Header for a freshly written stream.
    pub fn new(method: u8, level: u8, flags: u32, mtime: u32) -> Self {
        Self {
            version: LZOP_VERSION,
            library_version: LIBRARY_VERSION,
            version_needed: LZOP_COMPAT_VERSION,
            method,
            level,
            flags,
            filter: None,
            mode: DEFAULT_MODE,
            mtime,
            gmtdiff: 0,
            name: Vec::new(),
            extra: None,
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn header_checksum_kind(&self) -> ChecksumKind {
        if self.has_flag(F_H_CRC32) {
            ChecksumKind::Crc32
        } else {
            ChecksumKind::Adler32
        }
    }

    /// Bytes between the magic and the header checksum.
    fn body_bytes(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::with_capacity(32 + self.name.len());
        body.write_u16::<BigEndian>(self.version)?;
        body.write_u16::<BigEndian>(self.library_version)?;
        if self.version >= 0x0940 {
            body.write_u16::<BigEndian>(self.version_needed)?;
        }
        body.write_u8(self.method)?;
        if self.version >= 0x0940 {
            body.write_u8(self.level)?;
        }
        body.write_u32::<BigEndian>(self.flags)?;
        if let Some(filter) = self.filter {
            body.write_u32::<BigEndian>(filter)?;
        }
        body.write_u32::<BigEndian>(self.mode)?;
        body.write_u32::<BigEndian>(self.mtime)?;
        if self.version >= 0x0940 {
            body.write_u32::<BigEndian>(self.gmtdiff)?;
        }
        body.write_u8(self.name.len() as u8)?;
        body.write_all(&self.name)?;
        Ok(body)
    }

    /// Serialize the header, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<u64> {
        if self.name.len() > u8::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "stored name is {} bytes, limit is 255",
                self.name.len()
            )));
        }
        let kind = self.header_checksum_kind();
        let body = self.body_bytes()?;
        writer.write_all(&MAGIC)?;
        writer.write_all(&body)?;
        writer.write_u32::<BigEndian>(kind.compute(&body))?;
        let mut written = (MAGIC.len() + body.len() + 4) as u64;
        if let Some(extra) = &self.extra {
            let mut field = Vec::with_capacity(4 + extra.len());
            field.write_u32::<BigEndian>(extra.len() as u32)?;
            field.write_all(extra)?;
            writer.write_all(&field)?;
            writer.write_u32::<BigEndian>(kind.compute(&field))?;
            written += field.len() as u64 + 4;
        }
        Ok(written)
    }

    /// Length of the serialized header.
    pub fn encoded_len(&self) -> u64 {
        let versioned = if self.version >= 0x0940 { 2 + 1 + 4 } else { 0 };
        let filter = if self.filter.is_some() { 4 } else { 0 };
        let extra = self.extra.as_ref().map_or(0, |e| 4 + e.len() as u64 + 4);
        MAGIC.len() as u64 + 2 + 2 + 1 + 4 + 4 + 4 + 1 + 4
            + versioned
            + filter
            + self.name.len() as u64
            + extra
    }

    /// Parse and validate a header, returning it with its encoded length.
    pub fn read_from<R: Read>(reader: R) -> Result<(Self, u64)> {
        let mut src = Recording::new(reader);

        let mut magic = [0u8; 9];
        src.inner
            .read_exact(&mut magic)
            .map_err(|e| truncated_on_eof(e, "EOF inside container magic"))?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let version = src.u16()?;
        if version < MIN_READABLE_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let library_version = src.u16()?;
        let version_needed = if version >= 0x0940 {
            let needed = src.u16()?;
            if needed > LZOP_VERSION {
                return Err(Error::UnsupportedVersion(needed));
            }
            needed
        } else {
            0
        };
        let method = src.u8()?;
        let level = if version >= 0x0940 { src.u8()? } else { 0 };
        let flags = src.u32()?;
        if flags & F_RESERVED != 0 {
            return Err(Error::ReservedFlags(flags & F_RESERVED));
        }
        if flags & F_MULTIPART != 0 {
            return Err(Error::Unsupported("multipart streams"));
        }
        let filter = if flags & F_H_FILTER != 0 {
            Some(src.u32()?)
        } else {
            None
        };
        let mode = src.u32()?;
        let mtime = src.u32()?;
        let gmtdiff = if version >= 0x0940 { src.u32()? } else { 0 };
        let name_len = src.u8()? as usize;
        let mut name = vec![0u8; name_len];
        src.bytes(&mut name)?;

        let mut header = Self {
            version,
            library_version,
            version_needed,
            method,
            level,
            flags,
            filter,
            mode,
            mtime,
            gmtdiff,
            name,
            extra: None,
        };

        let kind = header.header_checksum_kind();
        let actual = kind.compute(&src.recorded);
        let expected = src.plain_u32()?;
        if expected != actual {
            return Err(Error::HeaderChecksum { expected, actual });
        }

        if header.has_flag(F_H_EXTRA_FIELD) {
            src.recorded.clear();
            let len = src.u32()? as usize;
            if len > MAX_BLOCK_SIZE {
                return Err(Error::CorruptFrame(format!("extra field of {len} bytes")));
            }
            let mut extra = vec![0u8; len];
            src.bytes(&mut extra)?;
            let actual = kind.compute(&src.recorded);
            let expected = src.plain_u32()?;
            if expected != actual {
                return Err(Error::HeaderChecksum { expected, actual });
            }
            header.extra = Some(extra);
        }

        if header.filter.is_some() {
            return Err(Error::Unsupported("header filters"));
        }

        let len = header.encoded_len();
        debug!(
            "Parsed container header: version {:#06x}, method {:#04x}, flags {:#010x}, {} bytes",
            header.version, header.method, header.flags, len
        );
        Ok((header, len))
    }
}

/// Reader that keeps a copy of every header byte for the header checksum.
struct Recording<R> {
    inner: R,
    recorded: Vec<u8>,
}

impl<R: Read> Recording<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            recorded: Vec::with_capacity(64),
        }
    }

    fn bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| truncated_on_eof(e, "EOF inside container header"))?;
        self.recorded.extend_from_slice(buf);
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.bytes(&mut buf)?;
        Ok(buf[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.bytes(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.bytes(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a checksum field, which is not itself covered by the checksum.
    fn plain_u32(&mut self) -> Result<u32> {
        self.inner
            .read_u32::<BigEndian>()
            .map_err(|e| truncated_on_eof(e, "EOF inside container header"))
    }
}
