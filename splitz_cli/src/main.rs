use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use splitz_codecs::{codec_by_method, CodecKind};
use splitz_core::format::{
    LzopHeader, DEFAULT_BLOCK_SIZE, F_H_CRC32, F_OS_MASK, F_OS_SHIFT, FRAME_HEADER_SIZE,
};
use splitz_core::{
    create_index, detect_variant, index_path, open_raw_split, open_split, scan, BlockReader,
    BlockWriter, ChecksumFlags, ChecksumScope, Codec, IndexFile, LzopReader, LzopWriter,
    SplitIndex, Variant, WriterOptions,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "splitz",
    about = "Splittable block compression for lzop-style streams",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a container (or raw block) stream
    Compress {
        /// Source file to compress ("-" reads stdin)
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        /// Codec to use: stored | lz4 | zstd
        #[arg(short, long, env = "SPLITZ_CODEC", default_value = "lz4")]
        codec: CodecKind,
        /// Compression level (zstd only, 1–22)
        #[arg(long)]
        level: Option<i32>,
        /// Raw bytes per block
        #[arg(short, long, env = "SPLITZ_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        /// Write headerless raw block frames instead of a container
        #[arg(long)]
        raw: bool,
        /// Capture the split index alongside the output as <output>.idx
        #[arg(long)]
        index: bool,
        /// Per-block checksums: none, all, or a list of adler32-d, adler32-c, crc32-d, crc32-c
        #[arg(long, value_parser = parse_checksums)]
        checksums: Option<ChecksumFlags>,
    },
    /// Decompress a stream back to raw bytes
    Decompress {
        /// Source file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        /// Codec of a raw block stream (containers record their own)
        #[arg(short, long, env = "SPLITZ_CODEC", default_value = "lz4")]
        codec: CodecKind,
    },
    /// Build the split index of an existing file by scanning its frame headers
    Index {
        /// Compressed file
        file: PathBuf,
    },
    /// Print header metadata and split index statistics
    Inspect {
        /// Compressed file
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Decompress a single block, seeking straight to it through the index
    ReadBlock {
        /// Compressed file
        file: PathBuf,
        /// Zero-based block index to read
        #[arg(short, long)]
        index: usize,
        /// Codec of a raw block stream (containers record their own)
        #[arg(short, long, env = "SPLITZ_CODEC", default_value = "lz4")]
        codec: CodecKind,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn parse_checksums(s: &str) -> Result<ChecksumFlags, String> {
    ChecksumFlags::parse_list(s).ok_or_else(|| {
        format!(
            "invalid checksum list '{s}'; use none, all, or adler32-d,adler32-c,crc32-d,crc32-c"
        )
    })
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if path.to_str() == Some("-") {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file =
            File::open(path).with_context(|| format!("opening input file {:?}", path))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn open_output(path: &Path) -> anyhow::Result<Box<dyn Write>> {
    if path.to_str() == Some("-") {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("creating output file {:?}", path))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// What a compressed file turned out to be after sniffing its first bytes.
struct Opened {
    variant: Variant,
    header: Option<(LzopHeader, u64)>,
    codec: Arc<dyn Codec>,
}

fn open_stream(path: &Path, raw_codec: CodecKind) -> anyhow::Result<Opened> {
    let mut file = BufReader::new(
        File::open(path).with_context(|| format!("opening compressed file {:?}", path))?,
    );
    let variant = detect_variant(&mut file)?;
    match variant {
        Variant::Container => {
            let (header, len) = LzopHeader::read_from(&mut file)
                .with_context(|| format!("reading container header of {:?}", path))?;
            let codec = codec_by_method(header.method)?;
            Ok(Opened {
                variant,
                header: Some((header, len)),
                codec,
            })
        }
        Variant::Raw => Ok(Opened {
            variant,
            header: None,
            codec: Arc::from(raw_codec.build(None)),
        }),
    }
}

/// An index describing an earlier file at `path` no longer applies.
fn remove_stale_index(path: &Path) -> anyhow::Result<()> {
    let idx = index_path(path);
    match std::fs::remove_file(&idx) {
        Ok(()) => {
            debug!("Removed stale index {:?}", idx);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing stale index {:?}", idx)),
    }
}

/// Index from `<file>.idx` (or its legacy name), else by scanning.
fn load_or_scan_index(path: &Path) -> anyhow::Result<(SplitIndex, &'static str)> {
    if let Some(index) = SplitIndex::load_for(path)? {
        return Ok((index, "index file"));
    }
    debug!("No index file for {:?}; scanning", path);
    let index = scan(BufReader::new(File::open(path)?))?;
    Ok((index, "scan"))
}

fn os_name(flags: u32) -> &'static str {
    match (flags & F_OS_MASK) >> F_OS_SHIFT {
        0 => "fat",
        3 => "unix",
        11 => "ntfs",
        _ => "other",
    }
}

fn checksum_list(flags: ChecksumFlags, scope: ChecksumScope) -> String {
    let kinds: Vec<String> = flags.kinds(scope).map(|k| k.to_string()).collect();
    if kinds.is_empty() {
        "none".to_string()
    } else {
        kinds.join(", ")
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_compress(
    input: PathBuf,
    output: PathBuf,
    kind: CodecKind,
    level: Option<i32>,
    block_size: usize,
    raw: bool,
    index: bool,
    checksums: Option<ChecksumFlags>,
) -> anyhow::Result<()> {
    let codec = kind.build(level);
    let codec_display = codec.name().to_string();
    let mut src = open_input(&input)?;
    let t0 = Instant::now();

    let (bytes_read, block_count) = if raw {
        let out = BufWriter::new(
            File::create(&output).with_context(|| format!("creating output file {:?}", output))?,
        );
        let writer = BlockWriter::new(out, codec, block_size)?;
        remove_stale_index(&output)?;
        if index {
            let idx = IndexFile::create(index_path(&output))?;
            let mut writer = writer.with_index(idx)?;
            let n = io::copy(&mut src, &mut writer)?;
            let frames = writer.finish()?;
            let (file, idx) = writer.into_inner()?;
            file.get_ref().sync_all()?;
            if let Some(idx) = idx {
                idx.publish()?;
            }
            (n, frames)
        } else {
            let mut writer = writer;
            let n = io::copy(&mut src, &mut writer)?;
            let frames = writer.finish()?;
            writer.into_inner()?;
            (n, frames)
        }
    } else {
        let mut options = WriterOptions::default()
            .with_block_size(block_size)
            .with_index(index);
        if let Some(checksums) = checksums {
            options = options.with_checksums(checksums);
        }
        let mut writer = LzopWriter::create(&output, codec, &options)
            .with_context(|| format!("creating output file {:?}", output))?;
        let n = io::copy(&mut src, &mut writer)?;
        let frames = writer.finish()?;
        writer.close()?;
        (n, frames)
    };

    let elapsed = t0.elapsed();
    let compressed_size = std::fs::metadata(&output)?.len();
    let ratio = bytes_read as f64 / compressed_size.max(1) as f64;
    info!("Compressed {:?} into {:?}", input, output);

    eprintln!("  codec       : {}", codec_display);
    eprintln!("  framing     : {}", if raw { "raw blocks" } else { "container" });
    eprintln!("  block size  : {}", human_bytes(block_size as u64));
    eprintln!("  blocks      : {}", block_count);
    eprintln!("  raw size    : {}", human_bytes(bytes_read));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    eprintln!("  ratio       : {:.2}x", ratio);
    if index {
        eprintln!("  index       : {:?}", index_path(&output));
    }
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((bytes_read as f64 / elapsed.as_secs_f64().max(1e-9)) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf, raw_codec: CodecKind) -> anyhow::Result<()> {
    let opened = open_stream(&input, raw_codec)?;
    let src = BufReader::new(File::open(&input)?);
    let mut dst = open_output(&output)?;
    let t0 = Instant::now();

    let (total_raw, frames) = match opened.variant {
        Variant::Container => {
            let mut reader = LzopReader::new(src, opened.codec)?.follow_members(true);
            let n = io::copy(&mut reader, &mut dst)
                .with_context(|| format!("decoding {:?}", input))?;
            (n, reader.frames_read())
        }
        Variant::Raw => {
            let mut reader = BlockReader::new(src, opened.codec);
            let n = io::copy(&mut reader, &mut dst)
                .with_context(|| format!("decoding {:?}", input))?;
            (n, reader.frames_read())
        }
    };
    dst.flush()?;

    let elapsed = t0.elapsed();
    eprintln!("  blocks      : {}", frames);
    eprintln!("  raw size    : {}", human_bytes(total_raw));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((total_raw as f64 / elapsed.as_secs_f64().max(1e-9)) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_index(file: PathBuf) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let index = create_index(&file).with_context(|| format!("indexing {:?}", file))?;
    eprintln!("  blocks      : {}", index.block_count());
    eprintln!("  index file  : {:?}", index_path(&file));
    eprintln!("  elapsed     : {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let opened = open_stream(&file, CodecKind::Stored)?;
    let (index, index_source) = load_or_scan_index(&file)?;
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== splitz file: {:?} ===", file);
    println!();
    match &opened.header {
        Some((h, len)) => {
            let checksums = ChecksumFlags::from_flags(h.flags);
            println!("  framing        : container");
            println!("  version        : {:#06x} (needs {:#06x})", h.version, h.version_needed);
            println!("  library        : {:#06x}", h.library_version);
            println!(
                "  codec          : {} (method={:#04x}, level={})",
                opened.codec.name(),
                h.method,
                h.level
            );
            println!("  flags          : {:#010x} (os={})", h.flags, os_name(h.flags));
            println!(
                "  header check   : {}",
                if h.has_flag(F_H_CRC32) { "CRC-32" } else { "Adler-32" }
            );
            println!(
                "  d-checksums    : {}",
                checksum_list(checksums, ChecksumScope::Uncompressed)
            );
            println!(
                "  c-checksums    : {}",
                checksum_list(checksums, ChecksumScope::Compressed)
            );
            println!("  mode           : {:o}", h.mode);
            println!("  mtime          : {}", h.mtime);
            if !h.name.is_empty() {
                println!("  name           : {}", String::from_utf8_lossy(&h.name));
            }
            println!("  header length  : {} B", len);
        }
        None => println!("  framing        : raw blocks"),
    }
    println!("  block count    : {} (from {})", index.block_count(), index_source);
    println!("  file on disk   : {}", human_bytes(file_size));

    if show_blocks {
        let checksums = opened
            .header
            .as_ref()
            .map(|(h, _)| ChecksumFlags::from_flags(h.flags));
        let mut f = BufReader::new(File::open(&file)?);
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>12}  {:>8}",
            "block", "file offset", "compressed", "raw", "stored"
        );
        println!("  {}", "-".repeat(62));
        for (i, &offset) in index.offsets().iter().enumerate() {
            f.seek(SeekFrom::Start(offset))?;
            let mut lens = [0u8; FRAME_HEADER_SIZE as usize];
            f.read_exact(&mut lens)
                .with_context(|| format!("reading frame header at offset {}", offset))?;
            let ulen = u32::from_be_bytes([lens[0], lens[1], lens[2], lens[3]]);
            let clen = u32::from_be_bytes([lens[4], lens[5], lens[6], lens[7]]);
            let stored = checksums.is_some() && clen == ulen;
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}  {:>8}",
                i,
                offset,
                human_bytes(clen as u64),
                human_bytes(ulen as u64),
                if stored { "yes" } else { "" }
            );
        }
    }

    Ok(())
}

fn run_read_block(
    file: PathBuf,
    block: usize,
    raw_codec: CodecKind,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let opened = open_stream(&file, raw_codec)?;
    let (index, _) = load_or_scan_index(&file)?;
    let offset = index.position(block).with_context(|| {
        format!(
            "block index {} out of range (total {})",
            block,
            index.block_count()
        )
    })?;

    eprintln!(
        "seeking to block {} (offset {} bytes from file start)...",
        block, offset
    );

    let source = BufReader::new(File::open(&file)?);
    let t0 = Instant::now();
    let raw = match opened.variant {
        Variant::Container => {
            let split = open_split(source, opened.codec, &index, offset)?
                .context("index is empty")?;
            let mut reader = split.reader;
            reader.read_frame()?;
            let mut raw = vec![0u8; reader.available()];
            reader.read_exact(&mut raw)?;
            raw
        }
        Variant::Raw => {
            let split = open_raw_split(source, opened.codec, &index, offset)?
                .context("index is empty")?;
            let mut reader = split.reader;
            reader.read_frame()?;
            let mut raw = vec![0u8; reader.available()];
            reader.read_exact(&mut raw)?;
            raw
        }
    };
    let elapsed = t0.elapsed();

    eprintln!(
        "  decoded {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            // Print a hex dump of the first 256 bytes
            let preview = &raw[..raw.len().min(256)];
            println!(
                "--- block {} ({} bytes, first {} shown) ---",
                block,
                raw.len(),
                preview.len()
            );
            for (i, chunk) in preview.chunks(16).enumerate() {
                print!("  {:04x}  ", i * 16);
                for b in chunk {
                    print!("{:02x} ", b);
                }
                for _ in chunk.len()..16 {
                    print!("   ");
                }
                print!("  |");
                for b in chunk {
                    if b.is_ascii_graphic() || *b == b' ' {
                        print!("{}", *b as char);
                    } else {
                        print!(".");
                    }
                }
                println!("|");
            }
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            level,
            block_size,
            raw,
            index,
            checksums,
        } => run_compress(input, output, codec, level, block_size, raw, index, checksums),
        Commands::Decompress {
            input,
            output,
            codec,
        } => run_decompress(input, output, codec),
        Commands::Index { file } => run_index(file),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::ReadBlock {
            file,
            index,
            codec,
            output,
        } => run_read_block(file, index, codec, output),
    }
}
