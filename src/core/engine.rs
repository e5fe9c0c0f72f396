//! Application context for the handset
//!
//! `PhoneEngine` owns one of each real-time component and wires them
//! together: hook monitor, tone decoder, sequence dispatcher and playback.
//! The catalog directory and resource registry are shared with the
//! background worker through `Arc` handles.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::registry::ResourceRegistry;
use crate::interfaces::audio_io::AudioOutput;
use crate::interfaces::http::HttpFetcher;
use crate::interfaces::line::{HookMonitor, LineSignal};
use crate::interfaces::storage::Storage;
use crate::protocols::dtmf::ToneDecoder;
use crate::protocols::media::MediaOpener;
use crate::protocols::tones::{generator_from_definition, ToneGenerator};
use crate::services::catalog::CatalogDirectory;
use crate::services::dispatcher::{DispatcherState, PlaybackDirective, SequenceDispatcher};
use crate::services::playback::{PlaybackEngine, PlaybackEvent, PlaybackSettings};
use crate::services::playlist::PlaylistRegistry;
use crate::utils::clock::SharedClock;
use crate::Result;

/// Everything the engine consumes from the outside world
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub fetcher: Arc<dyn HttpFetcher>,
    pub line: Arc<dyn LineSignal>,
    pub output: Box<dyn AudioOutput>,
    pub clock: SharedClock,
}

const NO_OVERRIDE: u8 = 0;
const FORCED_IDLE: u8 = 1;
const FORCED_ACTIVE: u8 = 2;

/// Line signal that a debug console can force either way
pub struct OverridableLine {
    inner: Arc<dyn LineSignal>,
    forced: AtomicU8,
}

impl OverridableLine {
    pub fn new(inner: Arc<dyn LineSignal>) -> Self {
        Self {
            inner,
            forced: AtomicU8::new(NO_OVERRIDE),
        }
    }

    pub fn set_override(&self, value: Option<bool>) {
        let forced = match value {
            None => NO_OVERRIDE,
            Some(false) => FORCED_IDLE,
            Some(true) => FORCED_ACTIVE,
        };
        self.forced.store(forced, Ordering::SeqCst);
    }

    pub fn override_state(&self) -> Option<bool> {
        match self.forced.load(Ordering::SeqCst) {
            FORCED_IDLE => Some(false),
            FORCED_ACTIVE => Some(true),
            _ => None,
        }
    }
}

impl LineSignal for OverridableLine {
    fn is_active(&self) -> bool {
        self.override_state().unwrap_or_else(|| self.inner.is_active())
    }
}

/// Snapshot for the console and diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub line_active: bool,
    pub line_override: Option<bool>,
    pub dispatcher: DispatcherState,
    pub buffer: String,
    pub playing: Option<String>,
    pub queued: usize,
    pub volume: f32,
    pub registered_keys: usize,
    pub catalog_entries: usize,
    pub pending_downloads: usize,
}

pub struct PhoneEngine {
    config: EngineConfig,
    /// Owners of the generators the registry refers to weakly
    tones: Vec<Arc<dyn ToneGenerator>>,
    registry: Arc<ResourceRegistry>,
    playlists: Arc<PlaylistRegistry>,
    catalog: Arc<CatalogDirectory>,
    line: Arc<OverridableLine>,
    hook: HookMonitor,
    decoder: ToneDecoder,
    dispatcher: SequenceDispatcher,
    playback: PlaybackEngine,
}

impl PhoneEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            storage,
            fetcher,
            line,
            output,
            clock,
        } = collaborators;

        let registry = Arc::new(ResourceRegistry::new());
        let playlists = Arc::new(PlaylistRegistry::new());
        let catalog = Arc::new(CatalogDirectory::new(
            config.catalog.clone(),
            registry.clone(),
            storage.clone(),
            fetcher.clone(),
            clock.clone(),
        ));

        let line = Arc::new(OverridableLine::new(line));
        if config.line.assume_active {
            line.set_override(Some(true));
        }
        let hook = HookMonitor::new(line.clone(), clock.clone(), config.line.debounce_ms);

        let decoder = ToneDecoder::new(config.tone.clone(), config.audio.sample_rate, clock.clone());
        let dispatcher = SequenceDispatcher::new(
            config.sequence.clone(),
            config.playback.clone(),
            catalog.entries(),
            registry.clone(),
            clock.clone(),
        )?;

        let opener = Arc::new(MediaOpener::new(
            storage.clone(),
            fetcher,
            config.playback.stream_buffer_chunks,
            Duration::from_secs(config.catalog.fetch_timeout_secs),
        ));
        let playback = PlaybackEngine::new(
            PlaybackSettings {
                sample_rate: config.audio.sample_rate,
                chunk_samples: config.audio.output_chunk_samples,
                default_volume: config.audio.default_volume,
                streaming_enabled: config.playback.streaming_enabled,
            },
            registry.clone(),
            playlists.clone(),
            opener,
            storage,
            output,
            clock,
        );

        Ok(Self {
            config,
            tones: Vec::new(),
            registry,
            playlists,
            catalog,
            line,
            hook,
            decoder,
            dispatcher,
            playback,
        })
    }

    /// Register the configured tones and load the cached catalog.
    /// Returns the number of catalog entries loaded.
    pub fn initialize(&mut self) -> Result<usize> {
        self.tones.clear();
        for def in &self.config.playback.tones {
            let generator = generator_from_definition(def);
            self.registry.register_generator(&def.key, &generator)?;
            let description = if def.description.is_empty() {
                generator.describe()
            } else {
                format!("{} ({})", def.description, generator.describe())
            };
            self.registry.set_description(&def.key, &description);
            self.tones.push(generator);
        }
        info!("Registered {} tone generators", self.tones.len());

        let loaded = self.catalog.load_cache();
        info!(
            "Engine ready: {} catalog entries, {} keys",
            loaded,
            self.registry.len()
        );
        Ok(loaded)
    }

    /// Run one real-time step for a captured sample window
    pub fn process_window(&mut self, window: &[i16]) -> Option<PlaybackDirective> {
        if let Some(active) = self.hook.poll() {
            self.line_changed(active);
        }

        let mut directive = None;
        if self.hook.is_active() {
            if let Some(digit) = self.decoder.process(window) {
                directive = self.handle_digit(digit);
            }
        }
        if directive.is_none() {
            directive = self.dispatcher.poll();
            if let Some(d) = &directive {
                self.handle_directive(d);
            }
        }

        if let Err(e) = self.playback.tick() {
            warn!("Audio output failed: {}", e);
        }
        directive
    }

    fn line_changed(&mut self, active: bool) {
        self.dispatcher.line_changed(active);
        self.decoder.reset();

        if active {
            info!("Off hook");
            let key = self.config.playback.dial_tone_key.clone();
            if let Err(e) = self.playback.play_audio_key(&key, 0) {
                warn!("Dial tone unavailable: {}", e);
            }
        } else {
            info!("On hook");
            self.playback.stop();
        }
    }

    /// Feed a digit as if the decoder had confirmed it
    pub fn inject_digit(&mut self, digit: char) -> Option<PlaybackDirective> {
        debug!("Injected digit {:?}", digit);
        self.handle_digit(digit)
    }

    fn handle_digit(&mut self, digit: char) -> Option<PlaybackDirective> {
        let dial_tone = self.config.playback.dial_tone_key.as_str();
        if self.playback.is_key_playing(dial_tone) {
            self.playback.stop_audio_key(dial_tone);
        }

        let directive = self.dispatcher.process_digit(digit)?;
        self.handle_directive(&directive);
        Some(directive)
    }

    fn handle_directive(&mut self, directive: &PlaybackDirective) {
        if let Err(e) = self.playback.play_audio_key(&directive.key, directive.duration_ms) {
            warn!("Cannot play '{}' for '{}': {}", directive.key, directive.sequence, e);
            self.play_error_cue();
            return;
        }

        let Some(next) = &directive.then else {
            return;
        };
        let queued = if self.registry.contains(&next.key) || self.playlists.contains(&next.key) {
            self.playback.queue_audio_key(&next.key, next.duration_ms)
        } else {
            let error_key = self.config.playback.error_key.clone();
            warn!("'{}' is not available yet, queueing the error cue", next.key);
            self.playback.queue_audio_key(&error_key, self.config.playback.error_ms)
        };
        if let Err(e) = queued {
            warn!("Cannot queue '{}': {}", next.key, e);
        }
    }

    fn play_error_cue(&mut self) {
        let key = self.config.playback.error_key.clone();
        if let Err(e) = self.playback.play_audio_key(&key, self.config.playback.error_ms) {
            warn!("Error cue unavailable: {}", e);
        }
    }

    /// Force the line state, or `None` to follow the signal again
    pub fn set_line_override(&self, value: Option<bool>) {
        info!("Line override: {:?}", value);
        self.line.set_override(value);
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            line_active: self.hook.is_active(),
            line_override: self.line.override_state(),
            dispatcher: self.dispatcher.state(),
            buffer: self.dispatcher.buffer().to_string(),
            playing: self.playback.current_key(),
            queued: self.playback.queue_len(),
            volume: self.playback.volume(),
            registered_keys: self.registry.len(),
            catalog_entries: self.catalog.entries().len(),
            pending_downloads: self.catalog.download_queue_pending(),
        }
    }

    pub fn subscribe(&mut self) -> tokio::sync::mpsc::UnboundedReceiver<PlaybackEvent> {
        self.playback.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ResourceRegistry> {
        self.registry.clone()
    }

    pub fn playlists(&self) -> Arc<PlaylistRegistry> {
        self.playlists.clone()
    }

    pub fn catalog(&self) -> Arc<CatalogDirectory> {
        self.catalog.clone()
    }

    pub fn playback(&mut self) -> &mut PlaybackEngine {
        &mut self.playback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::audio_io::CaptureOutput;
    use crate::interfaces::http::tests::StaticFetcher;
    use crate::interfaces::line::SimulatedLine;
    use crate::interfaces::storage::MemoryStorage;
    use crate::protocols::dtmf::generate_digit;
    use crate::protocols::media::wav_bytes;
    use crate::services::dispatcher::Classification;
    use crate::services::catalog::EntryType;
    use crate::utils::clock::ManualClock;

    const CATALOG: &str = r#"{
        "123": {"description": "Greeting", "type": "audio", "path": "audio/hello.wav"},
        "456": {"description": "Rings first", "type": "audio", "path": "audio/ring.wav", "ring_duration": 3000},
        "789": {"description": "Not cached", "type": "audio", "path": "http://media.example/missing.wav", "ring_duration": 1000}
    }"#;

    struct Fixture {
        engine: PhoneEngine,
        line: Arc<SimulatedLine>,
        clock: ManualClock,
        capture: CaptureOutput,
    }

    fn fixture() -> Fixture {
        let mut config = EngineConfig::default_config();
        config.line.debounce_ms = 20;

        let storage = Arc::new(MemoryStorage::new());
        let pcm = wav_bytes(&vec![2000i16; 4000], 44100);
        storage.write("audio/hello.wav", &pcm).unwrap();
        storage.write("audio/ring.wav", &pcm).unwrap();
        storage.write(&config.catalog.catalog_file, CATALOG.as_bytes()).unwrap();
        storage
            .write(&config.catalog.timestamp_file, b"2026-01-01T00:00:00Z")
            .unwrap();

        let line = Arc::new(SimulatedLine::new(false));
        let clock = ManualClock::new();
        let capture = CaptureOutput::new();

        let mut engine = PhoneEngine::new(
            config,
            Collaborators {
                storage,
                fetcher: Arc::new(StaticFetcher::default()),
                line: line.clone(),
                output: Box::new(capture.clone()),
                clock: Arc::new(clock.clone()),
            },
        )
        .unwrap();
        engine.initialize().unwrap();

        Fixture {
            engine,
            line,
            clock,
            capture,
        }
    }

    fn silence() -> Vec<i16> {
        vec![0; 512]
    }

    fn go_off_hook(f: &mut Fixture) {
        f.line.set_active(true);
        f.engine.process_window(&silence());
        f.clock.advance_ms(25);
        f.engine.process_window(&silence());
    }

    #[test]
    fn test_initialize_registers_tones_and_catalog() {
        let f = fixture();
        let registry = f.engine.registry();
        for key in ["dialtone", "ringback", "busy", "error", "click", "123", "456"] {
            assert!(registry.contains(key), "missing {}", key);
        }
        assert_eq!(f.engine.status().catalog_entries, 3);
    }

    #[test]
    fn test_off_hook_plays_dial_tone() {
        let mut f = fixture();
        go_off_hook(&mut f);
        assert_eq!(f.engine.status().playing.as_deref(), Some("dialtone"));
        assert!(!f.capture.samples().is_empty());

        f.line.set_active(false);
        f.engine.process_window(&silence());
        f.clock.advance_ms(25);
        f.engine.process_window(&silence());
        assert!(f.engine.status().playing.is_none());
    }

    #[test]
    fn test_digits_drive_playback() {
        let mut f = fixture();
        go_off_hook(&mut f);

        assert!(f.engine.inject_digit('1').is_none());
        // first digit silences the dial tone
        assert!(f.engine.status().playing.is_none());
        f.engine.inject_digit('2');
        let directive = f.engine.inject_digit('3').unwrap();

        assert_eq!(directive.classification, Classification::Catalog(EntryType::Audio));
        assert_eq!(f.engine.status().playing.as_deref(), Some("123"));
    }

    #[test]
    fn test_ring_duration_chains_audio() {
        let mut f = fixture();
        go_off_hook(&mut f);
        for digit in "456".chars() {
            f.engine.inject_digit(digit);
        }
        let status = f.engine.status();
        assert_eq!(status.playing.as_deref(), Some("ringback"));
        assert_eq!(status.queued, 1);

        f.clock.advance_ms(3000);
        f.engine.process_window(&silence());
        assert_eq!(f.engine.status().playing.as_deref(), Some("456"));
    }

    #[test]
    fn test_unavailable_audio_falls_back_to_error_cue() {
        let mut f = fixture();
        go_off_hook(&mut f);
        for digit in "789".chars() {
            f.engine.inject_digit(digit);
        }
        assert_eq!(f.engine.playback().queued()[0].key, "error");

        // unknown sequence completes on the terminator
        for digit in "55*".chars() {
            f.engine.inject_digit(digit);
        }
        assert_eq!(f.engine.status().playing.as_deref(), Some("error"));
    }

    #[test]
    fn test_decoded_tones_reach_dispatcher() {
        let mut f = fixture();
        go_off_hook(&mut f);

        let mut confirmed = None;
        for digit in ['1', '2', '3'] {
            let tone = generate_digit(digit, 50, 44100, 0.3);
            for window in tone.chunks_exact(512) {
                f.clock.advance_ms(12);
                if let Some(d) = f.engine.process_window(window) {
                    confirmed = Some(d);
                }
            }
            // release and let the cooldown pass
            for _ in 0..20 {
                f.clock.advance_ms(12);
                f.engine.process_window(&silence());
            }
        }

        assert_eq!(confirmed.map(|d| d.sequence).as_deref(), Some("123"));
    }

    #[test]
    fn test_line_override() {
        let mut f = fixture();
        f.engine.set_line_override(Some(true));
        f.engine.process_window(&silence());
        f.clock.advance_ms(25);
        f.engine.process_window(&silence());
        assert!(f.engine.status().line_active);
        assert_eq!(f.engine.status().line_override, Some(true));

        f.engine.set_line_override(None);
        f.engine.process_window(&silence());
        f.clock.advance_ms(25);
        f.engine.process_window(&silence());
        assert!(!f.engine.status().line_active);
    }

    #[test]
    fn test_inter_digit_timeout_completes_sequence() {
        let mut f = fixture();
        go_off_hook(&mut f);
        f.engine.inject_digit('4');
        f.engine.inject_digit('2');

        f.clock.advance_ms(4000);
        let directive = f.engine.process_window(&silence()).unwrap();
        assert_eq!(directive.sequence, "42");
        assert_eq!(directive.classification, Classification::Unknown);
    }
}
