/// Integration tests for the two framings: round-trips through every bundled
/// codec, reset and stream reuse, and the failure classes a reader or writer
/// must surface (integrity, truncation, codec, argument).
mod common;

use std::io::{self, Read, Write};
use std::sync::Arc;

use proptest::prelude::*;
use splitz_codecs::{CodecKind, Lz4Codec, StoredCodec, ZstdCodec};
use splitz_core::format::{FRAME_HEADER_SIZE, F_ADLER32_C, F_ADLER32_D, F_OS_UNIX, MAGIC};
use splitz_core::{
    BlockReader, BlockWriter, ChecksumFlags, ChecksumKind, ChecksumScope, Codec, CodecStatus,
    Error, LzopReader, LzopWriter, MAX_BLOCK_SIZE,
};

use common::*;

// ── round-trips ────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_every_codec() {
    let data = compressible_bytes(4 * 4096 + 1234);
    for kind in CodecKind::ALL {
        let bytes = encode_container(&data, kind, &options(4096), 1000);
        let mut r = container_reader(&bytes, kind).unwrap();
        assert_eq!(decode_container(&mut r).unwrap(), data, "{kind}");
        assert_eq!(r.frames_read(), 5, "{kind}");
        assert!(r.is_finished());
    }
}

#[test]
fn test_roundtrip_raw_blocks() {
    let data = pseudo_random_bytes(10_000, 7);
    for kind in CodecKind::ALL {
        let bytes = encode_raw(&data, kind, 3000, 777);
        let mut r = BlockReader::new(&bytes[..], Arc::from(kind.build(None)));
        assert_eq!(decode_raw(&mut r).unwrap(), data, "{kind}");
        assert_eq!(r.frames_read(), 4);
    }
}

#[test]
fn test_zstd_compresses_compressible_data() {
    let data = compressible_bytes(64 * 1024);
    let bytes = encode_container(&data, CodecKind::Zstd, &options(16 * 1024), 4096);
    assert!(
        bytes.len() < data.len() / 4,
        "zstd should compress compressible data: compressed={} raw={}",
        bytes.len(),
        data.len()
    );
    let mut r = LzopReader::new(&bytes[..], Arc::new(ZstdCodec::default())).unwrap();
    let mut out = Vec::new();
    r.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_empty_streams() {
    let bytes = encode_container(b"", CodecKind::Lz4, &options(256), 1);
    assert_eq!(bytes.len(), 38 + 4);
    let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
    assert!(decode_container(&mut r).unwrap().is_empty());

    let raw = encode_raw(b"", CodecKind::Lz4, 256, 1);
    assert!(raw.is_empty());
    let mut r = BlockReader::new(&raw[..], Arc::new(Lz4Codec));
    assert!(!r.read_frame().unwrap());
}

#[test]
fn test_io_traits_interoperate() {
    let data = compressible_bytes(50_000);
    let mut w = LzopWriter::new(Vec::new(), Box::new(Lz4Codec), &options(8192)).unwrap();
    io::copy(&mut &data[..], &mut w).unwrap();
    w.write_all(b"tail").unwrap();
    let (bytes, _) = w.into_inner().unwrap();

    let mut r = LzopReader::new(&bytes[..], Arc::new(Lz4Codec)).unwrap();
    let mut out = Vec::new();
    r.read_to_end(&mut out).unwrap();
    assert_eq!(&out[..data.len()], &data[..]);
    assert_eq!(&out[data.len()..], b"tail");
}

#[test]
fn test_header_layout() {
    let bytes = encode_container(RHYME.as_bytes(), CodecKind::Lz4, &options(256), 64);
    assert_eq!(&bytes[..9], &MAGIC);
    let r = container_reader(&bytes, CodecKind::Lz4).unwrap();
    let header = r.header();
    assert_eq!(header.method, Lz4Codec.method());
    assert_eq!(header.mtime, 1_700_000_000);
    assert_eq!(header.flags, F_ADLER32_D | F_ADLER32_C | F_OS_UNIX);
    assert_eq!(header.encoded_len(), 38);
}

/// Incompressible blocks are stored with clen == ulen and carry no
/// compressed-side checksums.
#[test]
fn test_incompressible_blocks_are_stored() {
    let data = pseudo_random_bytes(3000, 99);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(1000), 3000);
    let per_frame = FRAME_HEADER_SIZE as usize + 4 + 1000;
    assert_eq!(bytes.len(), 38 + 3 * per_frame + 4);
    for i in 0..3 {
        let at = 38 + i * per_frame;
        assert_eq!(&bytes[at..at + 4], &1000u32.to_be_bytes());
        assert_eq!(&bytes[at + 4..at + 8], &1000u32.to_be_bytes());
    }
    let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
    assert_eq!(decode_container(&mut r).unwrap(), data);
}

#[test]
fn test_every_checksum_combination() {
    let data = compressible_bytes(9000);
    for bits in 0u8..16 {
        let checksums = ChecksumFlags {
            adler32_uncompressed: bits & 1 != 0,
            crc32_uncompressed: bits & 2 != 0,
            adler32_compressed: bits & 4 != 0,
            crc32_compressed: bits & 8 != 0,
        };
        let opts = options(2048).with_checksums(checksums);
        let bytes = encode_container(&data, CodecKind::Lz4, &opts, 500);
        let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
        assert_eq!(r.checksums(), checksums);
        assert_eq!(decode_container(&mut r).unwrap(), data, "{checksums:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_container_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..6000),
        block_size in 1usize..700,
        chunk in 1usize..900,
    ) {
        let bytes = encode_container(&data, CodecKind::Lz4, &options(block_size), chunk);
        let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
        prop_assert_eq!(decode_container(&mut r).unwrap(), data.clone());
        prop_assert_eq!(r.frames_read() as usize, data.len().div_ceil(block_size));
    }

    #[test]
    fn prop_raw_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..6000),
        block_size in 1usize..700,
        chunk in 1usize..900,
    ) {
        let bytes = encode_raw(&data, CodecKind::Zstd, block_size, chunk);
        let mut r = BlockReader::new(&bytes[..], Arc::new(ZstdCodec::default()));
        prop_assert_eq!(decode_raw(&mut r).unwrap(), data);
    }
}

// ── reset and reuse ────────────────────────────────────────────────────────

#[test]
fn test_reset_after_finish_doubles_container() {
    let once = encode_container(RHYME.as_bytes(), CodecKind::Lz4, &options(256), RHYME.len());
    assert!(once.len() > 38 + 4);

    let mut w = LzopWriter::new(Vec::new(), Box::new(Lz4Codec), &options(256)).unwrap();
    w.write(RHYME.as_bytes()).unwrap();
    let frames = w.finish().unwrap();
    assert!(frames >= 1);
    assert_eq!(w.bytes_written(), once.len() as u64);
    w.reset();
    w.write(RHYME.as_bytes()).unwrap();
    w.finish().unwrap();
    let (twice, _) = w.into_inner().unwrap();
    assert_eq!(twice.len(), 2 * once.len());

    let mut r = container_reader(&twice, CodecKind::Lz4).unwrap().follow_members(true);
    let expected = format!("{RHYME}{RHYME}");
    assert_eq!(decode_container(&mut r).unwrap(), expected.as_bytes());
}

#[test]
fn test_reader_reset_reads_next_member() {
    let mut w = LzopWriter::new(Vec::new(), Box::new(Lz4Codec), &options(256)).unwrap();
    w.write(RHYME.as_bytes()).unwrap();
    w.finish().unwrap();
    w.reset();
    w.write(b"second member").unwrap();
    let (bytes, _) = w.into_inner().unwrap();

    let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
    assert_eq!(decode_container(&mut r).unwrap(), RHYME.as_bytes());
    assert!(r.is_finished());
    r.reset();
    assert_eq!(decode_container(&mut r).unwrap(), b"second member");
}

#[test]
fn test_reset_mid_stream_drops_holdover_only() {
    let mut w = LzopWriter::new(Vec::new(), Box::new(StoredCodec), &options(256)).unwrap();
    w.write(&[b'x'; 100]).unwrap();
    assert_eq!(w.pending(), 100);
    w.reset();
    assert_eq!(w.pending(), 0);
    w.write(b"abc").unwrap();
    let (bytes, _) = w.into_inner().unwrap();
    // one header, one stored 3-byte frame with an Adler-32 of the plaintext
    assert_eq!(bytes.len(), 38 + 8 + 4 + 3 + 4);
    let mut r = container_reader(&bytes, CodecKind::Stored).unwrap();
    assert_eq!(decode_container(&mut r).unwrap(), b"abc");
}

#[test]
fn test_reset_after_finish_doubles_raw() {
    let once = encode_raw(RHYME.as_bytes(), CodecKind::Lz4, 256, RHYME.len());
    let mut w = BlockWriter::new(Vec::new(), Box::new(Lz4Codec), 256).unwrap();
    w.write(RHYME.as_bytes()).unwrap();
    w.finish().unwrap();
    w.reset();
    w.write(RHYME.as_bytes()).unwrap();
    let (twice, _) = w.into_inner().unwrap();
    assert_eq!(twice.len(), 2 * once.len());

    let mut r = BlockReader::new(&twice[..], Arc::new(Lz4Codec));
    let expected = format!("{RHYME}{RHYME}");
    assert_eq!(decode_raw(&mut r).unwrap(), expected.as_bytes());
}

#[test]
fn test_cursor_tracks_delivery() {
    let data = compressible_bytes(1000);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(400), 1000);
    let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
    assert!(r.needs_frame());
    assert!(r.read_frame().unwrap());
    assert_eq!(r.available(), 400);
    assert!(!r.needs_frame());

    let mut buf = [0u8; 10];
    assert_eq!(r.read_range(&mut buf, 0, 10).unwrap(), 10);
    assert_eq!(&buf, &data[..10]);
    assert_eq!(r.available(), 390);

    let mut rest = vec![0u8; 390];
    assert_eq!(r.read_range(&mut rest, 0, 390).unwrap(), 390);
    assert!(r.needs_frame());
    assert_eq!(r.available(), 0);
}

// ── integrity ──────────────────────────────────────────────────────────────

fn first_payload(bytes: &[u8], checksums: ChecksumFlags) -> std::ops::Range<usize> {
    let ulen = u32::from_be_bytes(bytes[38..42].try_into().unwrap());
    let clen = u32::from_be_bytes(bytes[42..46].try_into().unwrap());
    let mut sums = checksums.count(ChecksumScope::Uncompressed);
    if clen < ulen {
        sums += checksums.count(ChecksumScope::Compressed);
    }
    let start = 46 + 4 * sums;
    start..start + clen as usize
}

#[test]
fn test_payload_corruption_is_detected() {
    let crc_only = ChecksumFlags {
        crc32_uncompressed: true,
        crc32_compressed: true,
        ..ChecksumFlags::NONE
    };
    let cases = [
        (compressible_bytes(8192), options(1).checksums),
        (compressible_bytes(8192), crc_only),
        (pseudo_random_bytes(8192, 3), options(1).checksums),
        (pseudo_random_bytes(8192, 3), crc_only),
    ];
    for (data, checksums) in cases {
        let opts = options(4096).with_checksums(checksums);
        let bytes = encode_container(&data, CodecKind::Lz4, &opts, 4096);
        let payload = first_payload(&bytes, checksums);
        for at in payload.clone().step_by(97).chain([payload.end - 1]) {
            let mut corrupt = bytes.clone();
            corrupt[at] ^= 0x20;
            let mut r = container_reader(&corrupt, CodecKind::Lz4).unwrap();
            let err = decode_container(&mut r).unwrap_err();
            assert!(
                matches!(err, Error::ChecksumMismatch { .. }),
                "flip at {at} with {checksums:?}: {err}"
            );
            assert!(err.is_integrity());
            assert_eq!(r.available(), 0);
        }
    }
}

#[test]
fn test_checksum_field_corruption_names_scope() {
    let data = compressible_bytes(4096);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(4096), 4096);
    // Adler-32 of the plaintext sits right after the two lengths
    let mut corrupt = bytes.clone();
    corrupt[46] ^= 1;
    let mut r = container_reader(&corrupt, CodecKind::Lz4).unwrap();
    match decode_container(&mut r).unwrap_err() {
        Error::ChecksumMismatch { kind, scope, .. } => {
            assert_eq!(kind, ChecksumKind::Adler32);
            assert_eq!(scope, ChecksumScope::Uncompressed);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_integrity_error_through_read_trait() {
    let data = compressible_bytes(4096);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(4096), 4096);
    let mut corrupt = bytes.clone();
    let payload = first_payload(&bytes, options(1).checksums);
    corrupt[payload.start] ^= 0xff;
    let mut r = container_reader(&corrupt, CodecKind::Lz4).unwrap();
    let err = r.read_to_end(&mut Vec::new()).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    let inner = err.get_ref().and_then(|e| e.downcast_ref::<Error>());
    assert!(matches!(inner, Some(Error::ChecksumMismatch { .. })));
}

#[test]
fn test_oversized_lengths_are_rejected() {
    let mut bytes = encode_container(b"abc", CodecKind::Stored, &options(256), 3);
    bytes[38..42].copy_from_slice(&(MAX_BLOCK_SIZE as u32 + 1).to_be_bytes());
    let mut r = container_reader(&bytes, CodecKind::Stored).unwrap();
    assert!(matches!(decode_container(&mut r), Err(Error::CorruptFrame(_))));

    let mut bytes = encode_container(b"abc", CodecKind::Stored, &options(256), 3);
    bytes[42..46].copy_from_slice(&4u32.to_be_bytes());
    let mut r = container_reader(&bytes, CodecKind::Stored).unwrap();
    assert!(matches!(decode_container(&mut r), Err(Error::CorruptFrame(_))));
}

#[test]
fn test_method_mismatch() {
    let bytes = encode_container(RHYME.as_bytes(), CodecKind::Lz4, &options(256), 256);
    let err = container_reader(&bytes, CodecKind::Zstd).err().unwrap();
    assert!(matches!(
        err,
        Error::MethodMismatch {
            expected: 0x42,
            found: 0x41
        }
    ));
    assert!(err.is_integrity());
    assert!(!err.is_truncation());
}

#[test]
fn test_unreadable_headers_are_integrity_failures() {
    let bytes = encode_container(RHYME.as_bytes(), CodecKind::Lz4, &options(256), 256);

    // version_needed newer than any known writer
    let mut newer = bytes.clone();
    newer[13..15].copy_from_slice(&0x2000u16.to_be_bytes());
    let err = container_reader(&newer, CodecKind::Lz4).err().unwrap();
    assert!(matches!(err, Error::UnsupportedVersion(0x2000)), "{err}");
    assert!(err.is_integrity());

    let err = splitz_codecs::codec_by_method(0x7f).err().unwrap();
    assert!(matches!(err, Error::UnknownMethod(0x7f)));
    assert!(err.is_integrity());
    let err = CodecKind::from_method(1).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(err.is_integrity());
}

#[test]
fn test_bad_magic() {
    let mut bytes = encode_container(RHYME.as_bytes(), CodecKind::Lz4, &options(256), 256);
    bytes[1] = b'X';
    let err = container_reader(&bytes, CodecKind::Lz4).err().unwrap();
    assert!(matches!(err, Error::InvalidMagic(_)));
}

// ── truncation ─────────────────────────────────────────────────────────────

#[test]
fn test_container_truncation() {
    let data = compressible_bytes(3000);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(1000), 3000);

    // missing terminator
    let cut = &bytes[..bytes.len() - 4];
    let mut r = container_reader(cut, CodecKind::Lz4).unwrap();
    let err = decode_container(&mut r).unwrap_err();
    assert!(err.is_truncation(), "{err}");

    // inside the first frame's length, checksum, and payload
    for end in [40, 44, 48, 60] {
        let mut r = container_reader(&bytes[..end], CodecKind::Lz4).unwrap();
        let err = decode_container(&mut r).unwrap_err();
        assert!(err.is_truncation(), "cut at {end}: {err}");
        assert_eq!(r.available(), 0);
    }

    // inside the header
    let err = container_reader(&bytes[..20], CodecKind::Lz4).err().unwrap();
    assert!(err.is_truncation(), "{err}");
}

#[test]
fn test_raw_end_only_at_frame_boundary() {
    let data = pseudo_random_bytes(2500, 11);
    let bytes = encode_raw(&data, CodecKind::Stored, 1000, 2500);
    assert_eq!(bytes.len(), 2500 + 3 * 8);

    // clean end after the second frame
    let boundary = 2 * (8 + 1000);
    let mut r = BlockReader::new(&bytes[..boundary], Arc::new(StoredCodec));
    assert_eq!(decode_raw(&mut r).unwrap(), &data[..2000]);

    for end in [boundary + 2, boundary + 6, boundary + 9, bytes.len() - 1] {
        let mut r = BlockReader::new(&bytes[..end], Arc::new(StoredCodec));
        let err = decode_raw(&mut r).unwrap_err();
        assert!(err.is_truncation(), "cut at {end}: {err}");
    }
}

// ── codec failures ─────────────────────────────────────────────────────────

/// Claims the lz4 method byte but fails every call.
struct FailingCodec;

impl Codec for FailingCodec {
    fn method(&self) -> u8 {
        Lz4Codec.method()
    }
    fn name(&self) -> &'static str {
        "failing"
    }
    fn compression_overhead(&self, _input_len: usize) -> usize {
        0
    }
    fn compress(&self, _src: &[u8], _dst: &mut [u8]) -> Result<usize, CodecStatus> {
        Err(CodecStatus::OutputOverrun)
    }
    fn decompress(&self, _src: &[u8], _dst: &mut [u8]) -> Result<usize, CodecStatus> {
        Err(CodecStatus::Other(-99))
    }
}

/// Decodes correctly but reports one byte short.
struct ShortCodec;

impl Codec for ShortCodec {
    fn method(&self) -> u8 {
        Lz4Codec.method()
    }
    fn name(&self) -> &'static str {
        "short"
    }
    fn compression_overhead(&self, input_len: usize) -> usize {
        Lz4Codec.compression_overhead(input_len)
    }
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
        Lz4Codec.compress(src, dst)
    }
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecStatus> {
        Lz4Codec.decompress(src, dst).map(|n| n - 1)
    }
}

#[test]
fn test_compress_failure_carries_status() {
    let mut w = LzopWriter::new(Vec::new(), Box::new(FailingCodec), &options(256)).unwrap();
    w.write(&[1u8; 100]).unwrap();
    match w.write(&[1u8; 200]).unwrap_err() {
        Error::Codec { status, reason } => {
            assert_eq!(status, CodecStatus::OutputOverrun);
            assert_eq!(status.code(), -5);
            assert_eq!(reason, "Output overrun");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_decompress_failure_carries_status() {
    let data = compressible_bytes(2000);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(1000), 2000);
    let mut r = LzopReader::new(&bytes[..], Arc::new(FailingCodec)).unwrap();
    match decode_container(&mut r).unwrap_err() {
        Error::Codec { status, .. } => assert_eq!(status, CodecStatus::Other(-99)),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(r.available(), 0);
}

#[test]
fn test_length_mismatch() {
    let data = compressible_bytes(2000);
    let bytes = encode_container(&data, CodecKind::Lz4, &options(1000), 2000);
    let mut r = LzopReader::new(&bytes[..], Arc::new(ShortCodec)).unwrap();
    let err = decode_container(&mut r).unwrap_err();
    assert!(
        matches!(
            err,
            Error::LengthMismatch {
                expected: 1000,
                actual: 999
            }
        ),
        "{err}"
    );
    assert!(err.to_string().contains("underrun"));
    assert_eq!(r.available(), 0);

    let raw = encode_raw(&data, CodecKind::Lz4, 1000, 2000);
    let mut r = BlockReader::new(&raw[..], Arc::new(ShortCodec));
    assert!(matches!(
        decode_raw(&mut r),
        Err(Error::LengthMismatch { .. })
    ));
}

// ── argument errors ────────────────────────────────────────────────────────

#[test]
fn test_bad_ranges_leave_state_untouched() {
    let mut w = LzopWriter::new(Vec::new(), Box::new(Lz4Codec), &options(256)).unwrap();
    w.write(b"abc").unwrap();
    let buf = [7u8; 10];
    for (offset, len) in [(5, 100), (11, 0), (usize::MAX, 2)] {
        let err = w.write_range(&buf, offset, len).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        assert_eq!(w.pending(), 3);
    }
    w.write_range(&buf, 2, 5).unwrap();
    assert_eq!(w.pending(), 8);

    let mut raw = BlockWriter::new(Vec::new(), Box::new(Lz4Codec), 256).unwrap();
    assert!(matches!(
        raw.write_range(&buf, 9, 2),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(raw.pending(), 0);

    let bytes = encode_container(b"hello", CodecKind::Lz4, &options(256), 5);
    let mut r = container_reader(&bytes, CodecKind::Lz4).unwrap();
    let mut out = [0u8; 4];
    assert!(matches!(
        r.read_range(&mut out, 2, 3),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(r.read_range(&mut out, 0, 4).unwrap(), 4);
}

#[test]
fn test_invalid_block_sizes() {
    for size in [0, MAX_BLOCK_SIZE + 1] {
        assert!(matches!(
            BlockWriter::new(Vec::new(), Box::new(Lz4Codec), size),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            LzopWriter::new(Vec::new(), Box::new(Lz4Codec), &options(size)),
            Err(Error::InvalidArgument(_))
        ));
    }
}

#[test]
fn test_write_after_finish_needs_reset() {
    let mut w = LzopWriter::new(Vec::new(), Box::new(Lz4Codec), &options(256)).unwrap();
    w.write(b"abc").unwrap();
    w.finish().unwrap();
    assert!(matches!(w.write(b"more"), Err(Error::InvalidArgument(_))));
    // a second finish changes nothing
    let len = w.bytes_written();
    w.finish().unwrap();
    assert_eq!(w.bytes_written(), len);
}

#[test]
fn test_index_must_attach_before_first_frame() {
    let mut w = BlockWriter::new(Vec::new(), Box::new(Lz4Codec), 16).unwrap();
    w.write(&[0u8; 40]).unwrap();
    assert_eq!(w.frames_written(), 2);
    assert!(matches!(
        w.with_index(Vec::new()),
        Err(Error::InvalidArgument(_))
    ));
}
