//! Audio routing engine
//!
//! Plays one item at a time from a FIFO queue. Items are registry keys that
//! resolve to a tone generator, a cached file (with optional URL fallback) or
//! a URL stream. `tick` is called from the real-time context and copies one
//! chunk of samples to the output device.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::registry::{KeySource, ResourceRegistry, StreamKind};
use crate::interfaces::audio_io::{encode_samples, AudioOutput};
use crate::interfaces::storage::Storage;
use crate::protocols::media::SourceOpener;
use crate::protocols::tones::{SampleSource, SourceStatus};
use crate::services::playlist::PlaylistRegistry;
use crate::utils::clock::SharedClock;
use crate::utils::paths::is_url;
use crate::{Error, Result};

pub const VOLUME_SETTING: &str = "settings/volume";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedAudioItem {
    pub kind: StreamKind,
    pub key: String,
    /// Play cap in milliseconds, 0 to play to completion
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Finished,
    DurationElapsed,
    Replaced,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlaybackEvent {
    Started { key: String, kind: StreamKind },
    Stopped { key: String, reason: StopReason },
}

#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub kind: StreamKind,
    pub key: String,
    pub started_at: Instant,
    pub active: bool,
}

struct ActiveItem {
    state: PlaybackState,
    source: Box<dyn SampleSource>,
    max_duration: Option<Duration>,
}

pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub chunk_samples: usize,
    pub default_volume: f32,
    pub streaming_enabled: bool,
}

pub struct PlaybackEngine {
    registry: Arc<ResourceRegistry>,
    playlists: Arc<PlaylistRegistry>,
    opener: Arc<dyn SourceOpener>,
    storage: Arc<dyn Storage>,
    output: Box<dyn AudioOutput>,
    clock: SharedClock,
    sample_rate: u32,
    streaming_enabled: bool,
    chunk: Vec<i16>,
    volume: f32,
    current: Option<ActiveItem>,
    queue: VecDeque<QueuedAudioItem>,
    subscribers: Vec<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl PlaybackEngine {
    pub fn new(
        settings: PlaybackSettings,
        registry: Arc<ResourceRegistry>,
        playlists: Arc<PlaylistRegistry>,
        opener: Arc<dyn SourceOpener>,
        storage: Arc<dyn Storage>,
        output: Box<dyn AudioOutput>,
        clock: SharedClock,
    ) -> Self {
        let volume = storage
            .read_to_string(VOLUME_SETTING)
            .ok()
            .and_then(|s| s.trim().parse::<f32>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(settings.default_volume)
            .clamp(0.0, 1.0);

        Self {
            registry,
            playlists,
            opener,
            storage,
            output,
            clock,
            sample_rate: settings.sample_rate,
            streaming_enabled: settings.streaming_enabled,
            chunk: vec![0; settings.chunk_samples.max(1)],
            volume,
            current: None,
            queue: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: PlaybackEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Kind a key would play as: its registered kind, else inferred from
    /// the text
    fn infer_kind(&self, key: &str) -> StreamKind {
        self.registry.kind_of(key).unwrap_or(if is_url(key) {
            StreamKind::Url
        } else {
            StreamKind::File
        })
    }

    fn open(&self, kind: StreamKind, key: &str) -> Result<Box<dyn SampleSource>> {
        let Some(entry) = self.registry.get(key) else {
            // Unregistered keys are direct locations
            return match kind {
                StreamKind::File => self.opener.open_file(key, self.sample_rate),
                StreamKind::Url if self.streaming_enabled => self.opener.open_url(key, self.sample_rate),
                StreamKind::Url => Err(Error::playback("Streaming disabled")),
                StreamKind::Generator => Err(Error::playback(format!("No generator registered for '{}'", key))),
            };
        };

        if entry.source.kind() != kind {
            debug!("Key '{}' requested as {} but registered as {}", key, kind, entry.source.kind());
        }

        match &entry.source {
            KeySource::Generator(weak) => weak
                .upgrade()
                .map(|generator| generator.start(self.sample_rate))
                .ok_or_else(|| Error::playback(format!("Generator for '{}' was released", key))),
            KeySource::File { path, fallback_url } => match self.opener.open_file(path, self.sample_rate) {
                Ok(source) => Ok(source),
                Err(e) => match fallback_url {
                    Some(url) if self.streaming_enabled => {
                        info!("Local file for '{}' unavailable ({}), streaming {}", key, e, url);
                        self.opener.open_url(url, self.sample_rate)
                    }
                    _ => Err(e),
                },
            },
            KeySource::Url { url } if self.streaming_enabled => self.opener.open_url(url, self.sample_rate),
            KeySource::Url { .. } => Err(Error::playback("Streaming disabled")),
        }
    }

    fn activate(&mut self, kind: StreamKind, key: &str, max_ms: u64, source: Box<dyn SampleSource>) {
        info!("Playing '{}' ({}{})", key, kind, if max_ms > 0 { format!(", {} ms", max_ms) } else { String::new() });
        self.current = Some(ActiveItem {
            state: PlaybackState {
                kind,
                key: key.to_string(),
                started_at: self.clock.now(),
                active: true,
            },
            source,
            max_duration: (max_ms > 0).then(|| Duration::from_millis(max_ms)),
        });
        self.emit(PlaybackEvent::Started {
            key: key.to_string(),
            kind,
        });
    }

    fn finish_current(&mut self, reason: StopReason) {
        if let Some(item) = self.current.take() {
            debug!("Stopped '{}' ({:?})", item.state.key, reason);
            self.emit(PlaybackEvent::Stopped {
                key: item.state.key,
                reason,
            });
        }
    }

    /// Start `key` now, replacing whatever is playing and clearing the queue.
    /// On failure nothing changes.
    pub fn play_audio(&mut self, kind: StreamKind, key: &str, max_ms: u64) -> Result<()> {
        if key.is_empty() {
            return Err(Error::playback("Empty key"));
        }
        let source = self.open(kind, key)?;

        self.queue.clear();
        self.finish_current(StopReason::Replaced);
        self.activate(kind, key, max_ms, source);
        Ok(())
    }

    pub fn play_audio_key(&mut self, key: &str, max_ms: u64) -> Result<()> {
        if !self.registry.contains(key) && self.playlists.contains(key) {
            return self.play_playlist(key);
        }
        self.play_audio(self.infer_kind(key), key, max_ms)
    }

    /// Append to the queue, or start immediately when idle
    pub fn queue_audio(&mut self, kind: StreamKind, key: &str, max_ms: u64) -> Result<()> {
        if key.is_empty() {
            return Err(Error::playback("Empty key"));
        }
        if self.current.is_none() {
            let source = self.open(kind, key)?;
            self.activate(kind, key, max_ms, source);
            return Ok(());
        }

        debug!("Queued '{}' behind {} item(s)", key, self.queue.len());
        self.queue.push_back(QueuedAudioItem {
            kind,
            key: key.to_string(),
            max_duration_ms: max_ms,
        });
        Ok(())
    }

    pub fn queue_audio_key(&mut self, key: &str, max_ms: u64) -> Result<()> {
        if !self.registry.contains(key) && self.playlists.contains(key) {
            return self.queue_playlist(key);
        }
        self.queue_audio(self.infer_kind(key), key, max_ms)
    }

    fn playlist_items(&self, name: &str) -> Result<Vec<QueuedAudioItem>> {
        let nodes = self
            .playlists
            .get(name)
            .ok_or_else(|| Error::playback(format!("No playlist named '{}'", name)))?;

        let items: Vec<QueuedAudioItem> = nodes
            .into_iter()
            .filter_map(|node| match self.registry.kind_of(&node.key) {
                Some(kind) => Some(QueuedAudioItem {
                    kind,
                    key: node.key,
                    max_duration_ms: node.duration_ms,
                }),
                None => {
                    warn!("Playlist '{}' skips unregistered key '{}'", name, node.key);
                    None
                }
            })
            .collect();

        if items.is_empty() {
            return Err(Error::playback(format!("Playlist '{}' has nothing playable", name)));
        }
        Ok(items)
    }

    pub fn play_playlist(&mut self, name: &str) -> Result<()> {
        let mut items = self.playlist_items(name)?.into_iter();
        let first = items.next().ok_or_else(|| Error::playback("Empty playlist"))?;

        self.play_audio(first.kind, &first.key, first.max_duration_ms)?;
        self.queue.extend(items);
        Ok(())
    }

    pub fn queue_playlist(&mut self, name: &str) -> Result<()> {
        for item in self.playlist_items(name)? {
            if let Err(e) = self.queue_audio(item.kind, &item.key, item.max_duration_ms) {
                warn!("Playlist '{}' item '{}' failed: {}", name, item.key, e);
            }
        }
        Ok(())
    }

    /// Move to the next queued item that opens. Emits `Stopped` for the
    /// current item and `Started` for the next one, if any.
    fn advance(&mut self, reason: StopReason) {
        self.finish_current(reason);

        while let Some(item) = self.queue.pop_front() {
            match self.open(item.kind, &item.key) {
                Ok(source) => {
                    self.activate(item.kind, &item.key, item.max_duration_ms, source);
                    return;
                }
                Err(e) => warn!("Skipping queued '{}': {}", item.key, e),
            }
        }
    }

    /// Copy one chunk to the output. Returns the number of samples written.
    pub fn tick(&mut self) -> Result<usize> {
        // Each pass either writes, waits, or consumes an item, so this ends
        for _ in 0..=self.queue.len() + 1 {
            let Some(item) = self.current.as_mut() else {
                return Ok(0);
            };

            if let Some(max) = item.max_duration {
                if self.clock.now().duration_since(item.state.started_at) >= max {
                    self.advance(StopReason::DurationElapsed);
                    continue;
                }
            }

            match item.source.read(&mut self.chunk) {
                SourceStatus::Data(n) => {
                    let volume = self.volume;
                    for sample in &mut self.chunk[..n] {
                        *sample = (*sample as f32 * volume) as i16;
                    }
                    self.output.write(&encode_samples(&self.chunk[..n]))?;
                    return Ok(n);
                }
                SourceStatus::Pending => return Ok(0),
                SourceStatus::Exhausted => self.advance(StopReason::Finished),
            }
        }
        Ok(0)
    }

    /// Stop playback and clear the queue
    pub fn stop(&mut self) {
        self.queue.clear();
        self.finish_current(StopReason::Stopped);
    }

    /// Stop `key` if it is the current item, continuing with the queue
    pub fn stop_audio_key(&mut self, key: &str) -> bool {
        if self.is_key_playing(key) {
            self.advance(StopReason::Stopped);
            true
        } else {
            false
        }
    }

    pub fn is_key_playing(&self, key: &str) -> bool {
        self.current.as_ref().map(|c| c.state.key == key).unwrap_or(false)
    }

    pub fn current_key(&self) -> Option<String> {
        self.current.as_ref().map(|c| c.state.key.clone())
    }

    pub fn state(&self) -> Option<PlaybackState> {
        self.current.as_ref().map(|c| c.state.clone())
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> Vec<QueuedAudioItem> {
        self.queue.iter().cloned().collect()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Clamp to 0..=1 and persist
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { self.volume };
        self.volume = volume;
        info!("Volume set to {:.2}", volume);
        self.storage.write(VOLUME_SETTING, format!("{:.3}", volume).as_bytes())
    }
}
