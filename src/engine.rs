//! Chunked read → convert → write loop

use std::io::{ErrorKind, Read, Write};

use log::{debug, trace};

use crate::codec::{Converter, MAX_CARRY};
use crate::{Error, Result};

/// Default chunk capacity; each read pulls at most `CHUNK_CAPACITY - 1` bytes
pub const CHUNK_CAPACITY: usize = 4096;

/// Smallest accepted chunk capacity
pub const MIN_CHUNK_CAPACITY: usize = 16;

/// Byte counts accumulated over one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Totals {
    /// Bytes read from the input
    pub bytes_read: u64,
    /// Bytes written to the output
    pub bytes_written: u64,
    /// Non-empty reads performed
    pub chunks: u64,
    /// Replacement characters emitted for invalid input
    pub replaced: u64,
}

/// Streaming converter pulling fixed-size chunks through a [`Converter`]
pub struct StreamingTranscoder {
    /// Conversion context, reused for every chunk
    converter: Converter,
    /// Carried-over bytes followed by the bytes of the current read
    chunk: Vec<u8>,
    /// Converted bytes of the current chunk
    output: Vec<u8>,
    /// Chunk capacity in bytes
    capacity: usize,
}

impl StreamingTranscoder {
    /// Create a transcoder with the given chunk capacity
    ///
    /// Capacities below [`MIN_CHUNK_CAPACITY`] are raised to it.
    pub fn new(converter: Converter, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CHUNK_CAPACITY);
        Self {
            chunk: vec![0; capacity - 1 + MAX_CARRY],
            output: Vec::with_capacity(converter.max_output_len(capacity - 1 + MAX_CARRY)),
            converter,
            capacity,
        }
    }

    /// Create with the default 4 KiB chunk
    pub fn with_default_capacity(converter: Converter) -> Self {
        Self::new(converter, CHUNK_CAPACITY)
    }

    /// Chunk capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Convert everything `reader` yields and write it to `writer`
    ///
    /// Stops when a read returns zero bytes. The writer is flushed before
    /// returning.
    pub fn run<R: Read, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<Totals> {
        let mut totals = Totals::default();
        let read_len = self.capacity - 1;
        let mut carried = 0;

        loop {
            let read = read_chunk(&mut reader, &mut self.chunk[carried..carried + read_len])?;
            if read == 0 {
                break;
            }
            totals.bytes_read += read as u64;
            totals.chunks += 1;

            let len = carried + read;
            self.output.clear();
            self.output.reserve(self.converter.max_output_len(len));
            let conversion = self.converter.convert(&self.chunk[..len], &mut self.output)?;
            trace!(
                "chunk {}: {} bytes in, {} consumed, {} carried, {} bytes out",
                totals.chunks,
                len,
                conversion.consumed,
                conversion.unconsumed,
                conversion.produced
            );

            self.chunk.copy_within(conversion.consumed..len, 0);
            carried = conversion.unconsumed;
            totals.replaced += conversion.replaced as u64;
            totals.bytes_written += write_chunk(&mut writer, &self.output)?;
        }

        if carried > 0 {
            debug!("input ended with {} unconverted bytes", carried);
            self.output.clear();
            let conversion = self.converter.finish(&self.chunk[..carried], &mut self.output)?;
            totals.replaced += conversion.replaced as u64;
            totals.bytes_written += write_chunk(&mut writer, &self.output)?;
        }

        writer.flush().map_err(Error::Write)?;
        debug!(
            "converted {} bytes into {} bytes over {} chunks",
            totals.bytes_read, totals.bytes_written, totals.chunks
        );
        Ok(totals)
    }
}

fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Read(e)),
        }
    }
}

/// Writes all of `bytes`; anything less is a failed write.
fn write_chunk<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<u64> {
    writer.write_all(bytes).map_err(Error::Write)?;
    Ok(bytes.len() as u64)
}
