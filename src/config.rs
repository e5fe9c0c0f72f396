//! Configuration management for the handset engine

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Standard DTMF low-band (row) frequencies in Hz
pub const DTMF_ROW_FREQS: [f32; 4] = [697.0, 770.0, 852.0, 941.0];

/// Standard DTMF high-band (column) frequencies in Hz
pub const DTMF_COL_FREQS: [f32; 4] = [1209.0, 1336.0, 1477.0, 1633.0];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub tone: ToneConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub device_name: String,
    /// Root directory for the catalog cache, downloaded audio and settings
    pub storage_root: String,
    pub user_agent: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: "handset-1".to_string(),
            storage_root: "./handset-data".to_string(),
            user_agent: concat!("handset-engine/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per analysis window fed to the tone decoder
    pub window_size: usize,
    /// Samples copied to the output device per playback tick
    pub output_chunk_samples: usize,
    pub default_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            window_size: 512,
            output_chunk_samples: 512,
            default_volume: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Filter frequencies for the low band. Phones with shifted tones
    /// can override these; detection maps them back to the standard grid.
    pub row_freqs: Vec<f32>,
    pub col_freqs: Vec<f32>,
    pub energy_gate_dbfs: f32,
    /// Bin magnitude the filter reports for noise at this window size
    pub noise_floor: f32,
    pub snr_factor: f32,
    /// Share of the window energy the detected pair must carry
    pub min_tone_energy_ratio: f32,
    pub max_twist: f32,
    pub freq_tolerance_hz: f32,
    pub consensus_count: u32,
    pub cooldown_ms: u64,
    pub require_release: bool,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            row_freqs: DTMF_ROW_FREQS.to_vec(),
            col_freqs: DTMF_COL_FREQS.to_vec(),
            energy_gate_dbfs: -20.0,
            noise_floor: 0.01,
            snr_factor: 4.0,
            min_tone_energy_ratio: 0.5,
            max_twist: 4.0,
            freq_tolerance_hz: 25.0,
            consensus_count: 3,
            cooldown_ms: 200,
            require_release: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationOrder {
    #[serde(rename = "catalog_first")]
    CatalogFirst,
    #[serde(rename = "number_first")]
    NumberFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Classify the full buffer and start the next sequence with the newest digit
    #[serde(rename = "carry_newest")]
    CarryNewest,
    /// Classify the full buffer and discard the newest digit
    #[serde(rename = "drop_newest")]
    DropNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub max_length: usize,
    pub terminator: Option<char>,
    pub inter_digit_timeout_ms: u64,
    /// Numeric-dial patterns (regular expressions over 0-9, * and #)
    pub known_numbers: Vec<String>,
    pub classification_order: ClassificationOrder,
    pub overflow_policy: OverflowPolicy,
    pub auto_complete: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_length: 20,
            terminator: Some('*'),
            inter_digit_timeout_ms: 4000,
            known_numbers: vec!["^911$".to_string(), "^411$".to_string(), "^611$".to_string()],
            classification_order: ClassificationOrder::CatalogFirst,
            overflow_policy: OverflowPolicy::CarryNewest,
            auto_complete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,
    pub validity_hours: u64,
    pub max_entries: usize,
    pub max_response_bytes: usize,
    pub catalog_file: String,
    pub timestamp_file: String,
    pub audio_dir: String,
    pub max_download_queue: usize,
    pub fetch_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub refresh_check_interval_secs: u64,
    pub download_interval_ms: u64,
    /// Register remote audio that is not cached yet as a URL key
    pub stream_uncached: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "https://example.com/handset/sequences.json".to_string(),
            validity_hours: 24,
            max_entries: 50,
            max_response_bytes: 8192,
            catalog_file: "known_sequences.json".to_string(),
            timestamp_file: "known_cache_time.txt".to_string(),
            audio_dir: "audio".to_string(),
            max_download_queue: 20,
            fetch_timeout_secs: 10,
            download_timeout_secs: 60,
            refresh_check_interval_secs: 60,
            download_interval_ms: 1000,
            stream_uncached: false,
        }
    }
}

/// A synthesized tone registered as an audio key at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneDefinition {
    pub key: String,
    pub description: String,
    pub low_hz: f32,
    pub high_hz: Option<f32>,
    pub amplitude: f32,
    /// Cadence on/off periods; `off_ms == 0` means continuous
    pub on_ms: u64,
    pub off_ms: u64,
    /// Total length, 0 for endless
    pub length_ms: u64,
}

impl ToneDefinition {
    fn new(key: &str, description: &str, low_hz: f32, high_hz: Option<f32>, on_ms: u64, off_ms: u64, length_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            low_hz,
            high_hz,
            amplitude: 0.5,
            on_ms,
            off_ms,
            length_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Open the remote URL when a cached file is unavailable
    pub streaming_enabled: bool,
    /// Decoded chunks buffered between the stream thread and the tick
    pub stream_buffer_chunks: usize,
    pub dial_tone_key: String,
    pub ringback_key: String,
    pub error_key: String,
    pub acknowledge_key: String,
    pub ringback_ms: u64,
    pub error_ms: u64,
    pub tones: Vec<ToneDefinition>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            streaming_enabled: true,
            stream_buffer_chunks: 32,
            dial_tone_key: "dialtone".to_string(),
            ringback_key: "ringback".to_string(),
            error_key: "error".to_string(),
            acknowledge_key: "click".to_string(),
            ringback_ms: 6000,
            error_ms: 3000,
            tones: vec![
                ToneDefinition::new("dialtone", "Dial tone", 350.0, Some(440.0), 0, 0, 0),
                ToneDefinition::new("ringback", "Ringback", 440.0, Some(480.0), 2000, 4000, 0),
                ToneDefinition::new("busy", "Busy signal", 480.0, Some(620.0), 500, 500, 0),
                ToneDefinition::new("error", "Reorder tone", 480.0, Some(620.0), 250, 250, 0),
                ToneDefinition::new("click", "Acknowledge click", 1000.0, None, 0, 0, 40),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub debounce_ms: u64,
    /// Treat the line as permanently active (bench setups without a hook switch)
    pub assume_active: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            assume_active: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Full,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)
            .map_err(|e| Error::parse(format!("Invalid TOML: {}", e)))?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self> {
        let mut settings = config::Config::builder();

        // HANDSET_CATALOG__URL=... overrides catalog.url
        settings = settings.add_source(
            config::Environment::with_prefix("HANDSET")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = settings.build()?;
        let engine_config = config.try_deserialize()?;
        Ok(engine_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate < 8000 {
            return Err(Error::parse("Sample rate must be at least 8000 Hz"));
        }

        if self.audio.window_size < 64 {
            return Err(Error::parse("Analysis window must hold at least 64 samples"));
        }

        if self.audio.output_chunk_samples == 0 {
            return Err(Error::parse("Output chunk size must be non-zero"));
        }

        if self.tone.row_freqs.len() != 4 || self.tone.col_freqs.len() != 4 {
            return Err(Error::parse("Tone decoder needs exactly 4 row and 4 column frequencies"));
        }

        let nyquist = self.audio.sample_rate as f32 / 2.0;
        if self
            .tone
            .row_freqs
            .iter()
            .chain(self.tone.col_freqs.iter())
            .any(|f| *f <= 0.0 || *f >= nyquist)
        {
            return Err(Error::parse("Tone frequency outside the representable band"));
        }

        if self.tone.consensus_count == 0 {
            return Err(Error::parse("Consensus count must be at least 1"));
        }

        if self.tone.max_twist <= 0.0 {
            return Err(Error::parse("Maximum twist must be positive"));
        }

        if self.sequence.max_length == 0 {
            return Err(Error::parse("Sequence length bound must be non-zero"));
        }

        if let Some(term) = self.sequence.terminator {
            if !is_dial_char(term) {
                return Err(Error::parse("Terminator must be a dialable character"));
            }
        }

        for pattern in &self.sequence.known_numbers {
            regex::Regex::new(pattern)
                .map_err(|e| Error::parse(format!("Invalid known-number pattern '{}': {}", pattern, e)))?;
        }

        if self.catalog.max_entries == 0 || self.catalog.max_download_queue == 0 {
            return Err(Error::parse("Catalog limits must be non-zero"));
        }

        if !(0.0..=1.0).contains(&self.audio.default_volume) {
            return Err(Error::parse("Default volume must be within 0.0..=1.0"));
        }

        for tone in &self.playback.tones {
            if tone.key.is_empty() {
                return Err(Error::parse("Tone definition without a key"));
            }
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            general: GeneralConfig::default(),
            audio: AudioConfig::default(),
            tone: ToneConfig::default(),
            sequence: SequenceConfig::default(),
            catalog: CatalogConfig::default(),
            playback: PlaybackConfig::default(),
            line: LineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Characters a keypad can produce
pub fn is_dial_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'A' | 'B' | 'C' | 'D')
}
