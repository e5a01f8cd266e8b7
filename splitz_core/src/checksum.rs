//! Adler-32 and CRC-32 providers selected by container flags.

use std::fmt;

use crate::format::{F_ADLER32_C, F_ADLER32_D, F_CRC32_C, F_CRC32_D};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Adler32,
    Crc32,
}

impl ChecksumKind {
    pub fn accumulator(self) -> Accumulator {
        match self {
            Self::Adler32 => Accumulator::Adler32(adler2::Adler32::new()),
            Self::Crc32 => Accumulator::Crc32(crc32fast::Hasher::new()),
        }
    }

    /// One-shot checksum of `data`.
    pub fn compute(self, data: &[u8]) -> u32 {
        let mut acc = self.accumulator();
        acc.update(data);
        acc.value()
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adler32 => f.write_str("Adler-32"),
            Self::Crc32 => f.write_str("CRC-32"),
        }
    }
}

/// Which side of the codec a checksum covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScope {
    Uncompressed,
    Compressed,
}

impl fmt::Display for ChecksumScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncompressed => f.write_str("uncompressed"),
            Self::Compressed => f.write_str("compressed"),
        }
    }
}

/// Running checksum. Adler-32 starts at 1 and CRC-32 at 0, as lzop expects.
#[derive(Clone)]
pub enum Accumulator {
    Adler32(adler2::Adler32),
    Crc32(crc32fast::Hasher),
}

impl Accumulator {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Adler32(a) => a.write_slice(data),
            Self::Crc32(h) => h.update(data),
        }
    }

    pub fn value(&self) -> u32 {
        match self {
            Self::Adler32(a) => a.checksum(),
            Self::Crc32(h) => h.clone().finalize(),
        }
    }
}

/// Independently selectable per-block checksums.
///
/// Each scope may carry Adler-32, CRC-32, both, or nothing. On the wire the
/// Adler-32 value always precedes the CRC-32 value within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumFlags {
    pub adler32_uncompressed: bool,
    pub crc32_uncompressed: bool,
    pub adler32_compressed: bool,
    pub crc32_compressed: bool,
}

impl ChecksumFlags {
    pub const NONE: Self = Self {
        adler32_uncompressed: false,
        crc32_uncompressed: false,
        adler32_compressed: false,
        crc32_compressed: false,
    };

    pub const ALL: Self = Self {
        adler32_uncompressed: true,
        crc32_uncompressed: true,
        adler32_compressed: true,
        crc32_compressed: true,
    };

    pub fn from_flags(flags: u32) -> Self {
        Self {
            adler32_uncompressed: flags & F_ADLER32_D != 0,
            crc32_uncompressed: flags & F_CRC32_D != 0,
            adler32_compressed: flags & F_ADLER32_C != 0,
            crc32_compressed: flags & F_CRC32_C != 0,
        }
    }

    pub fn to_flags(self) -> u32 {
        let mut flags = 0;
        if self.adler32_uncompressed {
            flags |= F_ADLER32_D;
        }
        if self.crc32_uncompressed {
            flags |= F_CRC32_D;
        }
        if self.adler32_compressed {
            flags |= F_ADLER32_C;
        }
        if self.crc32_compressed {
            flags |= F_CRC32_C;
        }
        flags
    }

    /// Kinds present for `scope`, in wire order.
    pub fn kinds(self, scope: ChecksumScope) -> impl Iterator<Item = ChecksumKind> {
        let (adler, crc) = match scope {
            ChecksumScope::Uncompressed => (self.adler32_uncompressed, self.crc32_uncompressed),
            ChecksumScope::Compressed => (self.adler32_compressed, self.crc32_compressed),
        };
        [
            adler.then_some(ChecksumKind::Adler32),
            crc.then_some(ChecksumKind::Crc32),
        ]
        .into_iter()
        .flatten()
    }

    pub fn count(self, scope: ChecksumScope) -> usize {
        self.kinds(scope).count()
    }

    /// Parse a comma-separated list such as `adler32-d,crc32-c`.
    ///
    /// `none` yields no checksums, `all` enables every kind.
    pub fn parse_list(list: &str) -> Option<Self> {
        let mut out = Self::NONE;
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_ascii_lowercase().as_str() {
                "none" => {}
                "all" => out = Self::ALL,
                "adler32-d" => out.adler32_uncompressed = true,
                "adler32-c" => out.adler32_compressed = true,
                "crc32-d" => out.crc32_uncompressed = true,
                "crc32-c" => out.crc32_compressed = true,
                _ => return None,
            }
        }
        Some(out)
    }
}
