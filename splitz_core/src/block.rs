//! Write-path block regrouping shared by the raw and container framers.
//!
//! Callers write arbitrary-sized slices; [`BlockCompressor`] turns them into
//! blocks of exactly `block_size` bytes (the final block on flush may be
//! shorter) and hands each compressed block to an emit callback. The
//! callback owns the wire layout, which is the only thing that differs
//! between the two framers.

use std::io::{self, Write};

use tracing::trace;

use crate::codec::Codec;
use crate::config::validate_block_size;
use crate::error::{Error, Result};

/// What to do with the next slice of caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Holdover is empty and the caller has at least a full block: compress
    /// this many bytes straight from the caller's slice.
    Direct(usize),
    /// Copy this many bytes into the holdover; it stays short of a block.
    Accumulate(usize),
    /// Copy this many bytes, completing the holdover block; compress it and
    /// empty the holdover.
    Fill(usize),
}

/// Bytes accepted but not yet folded into a full block.
#[derive(Debug)]
pub(crate) struct Holdover {
    buf: Vec<u8>,
    block_size: usize,
}

impl Holdover {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(block_size),
            block_size,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }

    pub(crate) fn next_step(&self, incoming: usize) -> Step {
        let room = self.block_size - self.buf.len();
        if incoming < room {
            Step::Accumulate(incoming)
        } else if self.buf.is_empty() {
            Step::Direct(room)
        } else {
            Step::Fill(room)
        }
    }
}

/// Regroups writes into fixed-size blocks and compresses each one.
pub struct BlockCompressor {
    codec: Box<dyn Codec>,
    holdover: Holdover,
    /// Sized `block_size + compression_overhead(block_size)`.
    output: Vec<u8>,
}

impl BlockCompressor {
    pub fn new(codec: Box<dyn Codec>, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let output = vec![0u8; block_size + codec.compression_overhead(block_size)];
        Ok(Self {
            codec,
            holdover: Holdover::new(block_size),
            output,
        })
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn block_size(&self) -> usize {
        self.holdover.block_size
    }

    /// Bytes held over, waiting for more input or a flush.
    pub fn pending(&self) -> usize {
        self.holdover.len()
    }

    /// Accept `data`, calling `emit(raw, compressed)` for every full block.
    pub fn write<F>(&mut self, mut data: &[u8], mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        while !data.is_empty() {
            match self.holdover.next_step(data.len()) {
                Step::Direct(n) => {
                    let (block, rest) = data.split_at(n);
                    compress_block(self.codec.as_ref(), &mut self.output, block, &mut emit)?;
                    data = rest;
                }
                Step::Accumulate(n) => {
                    self.holdover.buf.extend_from_slice(&data[..n]);
                    data = &data[n..];
                }
                Step::Fill(n) => {
                    self.holdover.buf.extend_from_slice(&data[..n]);
                    data = &data[n..];
                    compress_block(
                        self.codec.as_ref(),
                        &mut self.output,
                        &self.holdover.buf,
                        &mut emit,
                    )?;
                    self.holdover.clear();
                }
            }
        }
        Ok(())
    }

    /// Compress any held-over bytes as a final, shorter block.
    pub fn flush<F>(&mut self, mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        if !self.holdover.is_empty() {
            compress_block(
                self.codec.as_ref(),
                &mut self.output,
                &self.holdover.buf,
                &mut emit,
            )?;
            self.holdover.clear();
        }
        Ok(())
    }

    /// Drop held-over bytes and return to the pre-first-block state.
    pub fn reset(&mut self) {
        self.holdover.clear();
    }
}

fn compress_block<F>(codec: &dyn Codec, output: &mut [u8], raw: &[u8], emit: &mut F) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    let written = codec.compress(raw, output).map_err(|status| Error::Codec {
        status,
        reason: codec.status_message(status),
    })?;
    if written > output.len() {
        return Err(Error::InvalidArgument(format!(
            "codec {} reported {written} bytes for a {}-byte output buffer",
            codec.name(),
            output.len()
        )));
    }
    trace!("Compressed block: {} -> {} bytes", raw.len(), written);
    emit(raw, &output[..written])
}

/// Sink wrapper that tracks how many bytes have gone through it.
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn position(&self) -> u64 {
        self.count
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
