//! Sample input and byte output devices

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, BytesMut};

use crate::Result;

/// Source of mono 16-bit analysis windows
pub trait AudioInput: Send {
    /// Fill `window`; returns the number of samples written, 0 at end of input
    fn read_window(&mut self, window: &mut [i16]) -> Result<usize>;
}

/// Byte-oriented PCM sink (16-bit little-endian mono)
pub trait AudioOutput: Send {
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Encode samples as little-endian bytes
pub fn encode_samples(samples: &[i16]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for s in samples {
        buf.put_i16_le(*s);
    }
    buf
}

/// Reads raw little-endian PCM from any byte stream (file, pipe, stdin)
pub struct PcmReaderInput<R: Read + Send> {
    reader: R,
    scratch: Vec<u8>,
}

impl<R: Read + Send> PcmReaderInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scratch: Vec::new(),
        }
    }
}

impl<R: Read + Send> AudioInput for PcmReaderInput<R> {
    fn read_window(&mut self, window: &mut [i16]) -> Result<usize> {
        self.scratch.resize(window.len() * 2, 0);

        let mut filled = 0;
        while filled < self.scratch.len() {
            match self.reader.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let samples = filled / 2;
        for (slot, pair) in window.iter_mut().zip(self.scratch[..samples * 2].chunks_exact(2)) {
            *slot = i16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(samples)
    }
}

/// Endless silence; used when no microphone is attached
#[derive(Debug, Default)]
pub struct SilenceInput;

impl AudioInput for SilenceInput {
    fn read_window(&mut self, window: &mut [i16]) -> Result<usize> {
        window.fill(0);
        Ok(window.len())
    }
}

/// Writes PCM bytes to any sink (file, pipe, stdout)
pub struct PcmWriterOutput<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> PcmWriterOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> AudioOutput for PcmWriterOutput<W> {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.writer.write_all(pcm)?;
        Ok(())
    }
}

/// Keeps everything written; clones share the buffer
#[derive(Debug, Clone, Default)]
pub struct CaptureOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<i16> {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn clear(&self) {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl AudioOutput for CaptureOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(pcm);
        Ok(())
    }
}

/// Discards output
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn write(&mut self, _pcm: &[u8]) -> Result<()> {
        Ok(())
    }
}
