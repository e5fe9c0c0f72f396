//! Decoded media sources
//!
//! Files are probed and decoded lazily on the caller's thread, one packet at
//! a time. URL streams are fetched and decoded on a helper thread that feeds a
//! bounded channel; the real-time side only polls that channel.
//!
//! ```text
//! Storage / HttpFetcher -> MediaSourceStream -> FormatReader -> Decoder -> mono i16
//! ```

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

use crate::interfaces::http::HttpFetcher;
use crate::interfaces::storage::Storage;
use crate::protocols::tones::{SampleSource, SourceStatus};
use crate::utils::paths::extension_of;
use crate::{Error, Result};

/// Opens playable sources for file and URL keys
pub trait SourceOpener: Send + Sync {
    fn open_file(&self, path: &str, sample_rate: u32) -> Result<Box<dyn SampleSource>>;

    fn open_url(&self, url: &str, sample_rate: u32) -> Result<Box<dyn SampleSource>>;
}

/// Packet-at-a-time decoder producing mono samples
pub struct DecodedSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    pending: VecDeque<i16>,
    finished: bool,
}

impl DecodedSource {
    pub fn new(media: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self> {
        let stream = MediaSourceStream::new(media, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::decode("No decodable audio track"))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// Decode the next packet of the selected track into `pending`.
    /// Returns false once the stream has ended.
    fn decode_next(&mut self) -> bool {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return false,
                Err(e) => {
                    warn!("Stopping decode: {}", e);
                    return false;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let channels = spec.channels.count().max(1);
                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);

                    for frame in buffer.samples().chunks(channels) {
                        let sum: i32 = frame.iter().map(|s| *s as i32).sum();
                        self.pending.push_back((sum / frame.len() as i32) as i16);
                    }
                    return true;
                }
                // Corrupt packets are skipped
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!("Decoder failed: {}", e);
                    return false;
                }
            }
        }
    }
}

impl SampleSource for DecodedSource {
    fn read(&mut self, out: &mut [i16]) -> SourceStatus {
        while self.pending.len() < out.len() && !self.finished {
            if !self.decode_next() {
                self.finished = true;
            }
        }

        if self.pending.is_empty() {
            return SourceStatus::Exhausted;
        }

        let n = self.pending.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        SourceStatus::Data(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Samples arriving from a decode thread
pub struct StreamSource {
    rx: mpsc::Receiver<Vec<i16>>,
    current: Vec<i16>,
    offset: usize,
    sample_rate: u32,
}

impl SampleSource for StreamSource {
    fn read(&mut self, out: &mut [i16]) -> SourceStatus {
        let mut written = 0;

        while written < out.len() {
            if self.offset >= self.current.len() {
                match self.rx.try_recv() {
                    Ok(chunk) => {
                        self.current = chunk;
                        self.offset = 0;
                        continue;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if written == 0 {
                            return SourceStatus::Exhausted;
                        }
                        break;
                    }
                }
            }

            let n = (self.current.len() - self.offset).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.current[self.offset..self.offset + n]);
            self.offset += n;
            written += n;
        }

        if written == 0 {
            SourceStatus::Pending
        } else {
            SourceStatus::Data(written)
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Default opener backed by storage for files and the HTTP fetcher for URLs
pub struct MediaOpener {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn HttpFetcher>,
    runtime: Option<tokio::runtime::Handle>,
    buffer_chunks: usize,
    fetch_timeout: Duration,
}

const STREAM_CHUNK_SAMPLES: usize = 2048;

impl MediaOpener {
    /// Captures the current tokio runtime, if any, for URL fetches
    pub fn new(
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn HttpFetcher>,
        buffer_chunks: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            fetcher,
            runtime: tokio::runtime::Handle::try_current().ok(),
            buffer_chunks: buffer_chunks.max(1),
            fetch_timeout,
        }
    }

    pub fn with_runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

fn note_rate_mismatch(location: &str, source_rate: u32, device_rate: u32) {
    if source_rate != 0 && source_rate != device_rate {
        warn!(
            "{} is {} Hz but the device runs at {} Hz; playing without resampling",
            location, source_rate, device_rate
        );
    }
}

impl SourceOpener for MediaOpener {
    fn open_file(&self, path: &str, sample_rate: u32) -> Result<Box<dyn SampleSource>> {
        let media = self.storage.open_media(path)?;
        let ext = extension_of(path);
        let source = DecodedSource::new(media, ext.as_deref())?;
        note_rate_mismatch(path, source.sample_rate(), sample_rate);
        Ok(Box::new(source))
    }

    fn open_url(&self, url: &str, sample_rate: u32) -> Result<Box<dyn SampleSource>> {
        let runtime = self
            .runtime
            .clone()
            .ok_or_else(|| Error::not_supported("URL playback requires an async runtime"))?;

        let (tx, rx) = mpsc::channel::<Vec<i16>>(self.buffer_chunks);
        let fetcher = self.fetcher.clone();
        let url_owned = url.to_string();
        let timeout = self.fetch_timeout;

        std::thread::Builder::new()
            .name("stream-decode".to_string())
            .spawn(move || {
                let body = match runtime.block_on(fetcher.fetch(&url_owned, timeout, None)) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Stream fetch failed for {}: {}", url_owned, e);
                        return;
                    }
                };

                let ext = extension_of(&url_owned);
                let mut source = match DecodedSource::new(Box::new(Cursor::new(body)), ext.as_deref()) {
                    Ok(source) => source,
                    Err(e) => {
                        warn!("Stream decode failed for {}: {}", url_owned, e);
                        return;
                    }
                };
                note_rate_mismatch(&url_owned, source.sample_rate(), sample_rate);

                let mut chunk = vec![0i16; STREAM_CHUNK_SAMPLES];
                while let SourceStatus::Data(n) = source.read(&mut chunk) {
                    // Receiver gone means playback moved on
                    if tx.blocking_send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                debug!("Stream {} finished decoding", url_owned);
            })
            .map_err(|e| Error::playback(format!("Failed to start stream thread: {}", e)))?;

        Ok(Box::new(StreamSource {
            rx,
            current: Vec::new(),
            offset: 0,
            sample_rate,
        }))
    }
}

/// Encode mono 16-bit PCM as a RIFF/WAVE byte buffer
pub fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
