#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;

use splitz_codecs::{CodecKind, Lz4Codec};
use splitz_core::{BlockReader, BlockWriter, LzopReader, LzopWriter, Result, WriterOptions};

pub const RHYME: &str = "\
Mary had a little lamb,
Its fleece was white as snow;
And everywhere that Mary went,
The lamb was sure to go.
It followed her to school one day,
Which was against the rule;
It made the children laugh and play
To see a lamb at school.
And so the schoolmaster turned it out,
But still it lingered near,
And waited patiently about
Till Mary did appear.
Why does the lamb love Mary so?
The eager children cry;
Why, Mary loves the lamb, you know,
The schoolmaster did reply.
And you each gentle animal
In confidence may bind,
And make them follow at your will,
If you are only kind.
Then Mary took her little lamb
And led it gently home,
And there it stayed the whole night long
Nor ever more did roam.
";

/// Generate `len` deterministic bytes using a simple LCG.
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
pub fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

pub fn options(block_size: usize) -> WriterOptions {
    WriterOptions::default()
        .with_block_size(block_size)
        .with_mtime(1_700_000_000)
}

/// Container-encode `data`, writing it in `chunk`-sized pieces.
pub fn encode_container(
    data: &[u8],
    kind: CodecKind,
    opts: &WriterOptions,
    chunk: usize,
) -> Vec<u8> {
    let mut w = LzopWriter::new(Vec::new(), kind.build(None), opts).unwrap();
    for piece in data.chunks(chunk.max(1)) {
        w.write(piece).unwrap();
    }
    w.into_inner().unwrap().0
}

/// Container-encode `data` with lz4 and capture the inline index bytes.
pub fn encode_container_indexed(data: &[u8], opts: &WriterOptions) -> (Vec<u8>, Vec<u8>) {
    let w = LzopWriter::new(Vec::new(), Box::new(Lz4Codec), opts).unwrap();
    let mut w = w.with_index(Vec::new()).unwrap();
    w.write(data).unwrap();
    let (bytes, index) = w.into_inner().unwrap();
    (bytes, index.unwrap())
}

pub fn encode_raw(data: &[u8], kind: CodecKind, block_size: usize, chunk: usize) -> Vec<u8> {
    let mut w = BlockWriter::new(Vec::new(), kind.build(None), block_size).unwrap();
    for piece in data.chunks(chunk.max(1)) {
        w.write(piece).unwrap();
    }
    w.into_inner().unwrap().0
}

/// Decode every frame through the typed API.
pub fn decode_container<R: Read>(reader: &mut LzopReader<R>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while reader.read_frame()? {
        let start = out.len();
        out.resize(start + reader.available(), 0);
        let len = out.len() - start;
        reader.read_range(&mut out, start, len)?;
    }
    Ok(out)
}

pub fn decode_raw<R: Read>(reader: &mut BlockReader<R>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while reader.read_frame()? {
        let start = out.len();
        out.resize(start + reader.available(), 0);
        let len = out.len() - start;
        reader.read_range(&mut out, start, len)?;
    }
    Ok(out)
}

pub fn container_reader(bytes: &[u8], kind: CodecKind) -> Result<LzopReader<&[u8]>> {
    LzopReader::new(bytes, Arc::from(kind.build(None)))
}
