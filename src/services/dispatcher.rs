//! Digit sequence dispatcher
//!
//! Collects confirmed digits into a bounded sequence, decides when the
//! sequence is complete, and classifies it into a playback directive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{is_dial_char, ClassificationOrder, OverflowPolicy, PlaybackConfig, SequenceConfig};
use crate::core::registry::ResourceRegistry;
use crate::services::catalog::{CatalogEntries, CatalogEntry, EntryType};
use crate::services::playlist::PlaylistNode;
use crate::utils::clock::SharedClock;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatcherState {
    Idle,
    Accumulating,
    Ready,
}

/// How a completed sequence was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    Catalog(EntryType),
    KnownNumber,
    Unknown,
}

/// What the playback engine should do with a completed sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackDirective {
    pub sequence: String,
    pub classification: Classification,
    pub key: String,
    /// Play cap in milliseconds, 0 to play to completion
    pub duration_ms: u64,
    /// Queued after the first item finishes
    pub then: Option<PlaylistNode>,
}

pub struct SequenceDispatcher {
    config: SequenceConfig,
    playback: PlaybackConfig,
    catalog: CatalogEntries,
    registry: Arc<ResourceRegistry>,
    clock: SharedClock,
    patterns: Vec<Regex>,
    fixed_numbers: Vec<String>,
    buffer: String,
    state: DispatcherState,
    last_digit_at: Option<Instant>,
}

/// The literal number behind an anchored all-digit pattern such as `^911$`
fn literal_number(pattern: &str) -> Option<String> {
    let body = pattern.strip_prefix('^')?.strip_suffix('$')?;
    (!body.is_empty() && body.chars().all(|c| c.is_ascii_digit() || c == '#')).then(|| body.to_string())
}

impl SequenceDispatcher {
    pub fn new(
        config: SequenceConfig,
        playback: PlaybackConfig,
        catalog: CatalogEntries,
        registry: Arc<ResourceRegistry>,
        clock: SharedClock,
    ) -> Result<Self> {
        let patterns = config
            .known_numbers
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::parse(format!("Known-number pattern '{}': {}", p, e))))
            .collect::<Result<Vec<_>>>()?;
        let fixed_numbers = config.known_numbers.iter().filter_map(|p| literal_number(p)).collect();

        Ok(Self {
            buffer: String::with_capacity(config.max_length),
            config,
            playback,
            catalog,
            registry,
            clock,
            patterns,
            fixed_numbers,
            state: DispatcherState::Idle,
            last_digit_at: None,
        })
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = DispatcherState::Idle;
        self.last_digit_at = None;
    }

    /// Any hook transition starts from a clean slate
    pub fn line_changed(&mut self, active: bool) {
        if !self.buffer.is_empty() {
            debug!("Line {} discards sequence '{}'", if active { "active" } else { "idle" }, self.buffer);
        }
        self.reset();
    }

    /// Whether the current buffer is the start of some registered key
    pub fn prefix_is_playable(&self) -> bool {
        !self.buffer.is_empty() && self.registry.has_prefix(&self.buffer)
    }

    pub fn process_digit(&mut self, digit: char) -> Option<PlaybackDirective> {
        if !is_dial_char(digit) {
            debug!("Ignoring non-dial character {:?}", digit);
            return None;
        }
        self.last_digit_at = Some(self.clock.now());

        if self.config.terminator == Some(digit) {
            if self.buffer.is_empty() {
                return None;
            }
            return Some(self.complete());
        }

        if self.buffer.len() >= self.config.max_length {
            info!("Sequence reached {} digits, classifying", self.config.max_length);
            let directive = self.complete();
            if self.config.overflow_policy == OverflowPolicy::CarryNewest {
                self.push(digit);
            }
            return Some(directive);
        }

        self.push(digit);

        if self.config.auto_complete && self.is_exact_match() && !self.is_extendable() {
            return Some(self.complete());
        }
        None
    }

    /// Complete the sequence once the inter-digit timeout expires
    pub fn poll(&mut self) -> Option<PlaybackDirective> {
        if self.state != DispatcherState::Accumulating || self.config.inter_digit_timeout_ms == 0 {
            return None;
        }
        let last = self.last_digit_at?;
        if self.clock.now().duration_since(last) < Duration::from_millis(self.config.inter_digit_timeout_ms) {
            return None;
        }
        debug!("Inter-digit timeout for '{}'", self.buffer);
        Some(self.complete())
    }

    fn push(&mut self, digit: char) {
        self.buffer.push(digit);
        self.state = DispatcherState::Accumulating;
        self.last_digit_at = Some(self.clock.now());
    }

    fn is_exact_match(&self) -> bool {
        self.catalog.contains(&self.buffer) || self.patterns.iter().any(|p| p.is_match(&self.buffer))
    }

    fn is_extendable(&self) -> bool {
        let seq = self.buffer.as_str();
        self.catalog.has_longer_prefix(seq)
            || self.registry.has_longer_key(seq)
            || self.fixed_numbers.iter().any(|n| n.len() > seq.len() && n.starts_with(seq))
    }

    fn complete(&mut self) -> PlaybackDirective {
        self.state = DispatcherState::Ready;
        let directive = self.classify(&self.buffer);
        info!(
            "Sequence '{}' -> {:?}, key '{}'",
            directive.sequence, directive.classification, directive.key
        );
        self.reset();
        directive
    }

    /// Resolve a sequence to a directive without touching dispatcher state
    pub fn classify(&self, sequence: &str) -> PlaybackDirective {
        let catalog = || self.catalog.lookup(sequence).map(|entry| self.for_catalog_entry(&entry));
        let number = || {
            self.patterns
                .iter()
                .any(|p| p.is_match(sequence))
                .then(|| self.for_known_number(sequence))
        };

        let resolved = match self.config.classification_order {
            ClassificationOrder::CatalogFirst => catalog().or_else(number),
            ClassificationOrder::NumberFirst => number().or_else(catalog),
        };

        resolved.unwrap_or_else(|| self.directive(sequence, Classification::Unknown, &self.playback.error_key, self.playback.error_ms))
    }

    fn directive(&self, sequence: &str, classification: Classification, key: &str, duration_ms: u64) -> PlaybackDirective {
        PlaybackDirective {
            sequence: sequence.to_string(),
            classification,
            key: key.to_string(),
            duration_ms,
            then: None,
        }
    }

    fn for_catalog_entry(&self, entry: &CatalogEntry) -> PlaybackDirective {
        let seq = entry.sequence.as_str();
        let class = Classification::Catalog(entry.entry_type);

        match entry.entry_type {
            EntryType::Audio if entry.ring_duration_ms > 0 => PlaybackDirective {
                then: Some(PlaylistNode::new(seq, 0)),
                ..self.directive(seq, class, &self.playback.ringback_key, entry.ring_duration_ms)
            },
            EntryType::Audio => self.directive(seq, class, seq, 0),
            EntryType::Phone if self.registry.contains(&entry.target) => self.directive(seq, class, &entry.target, 0),
            EntryType::Phone => self.directive(seq, class, &self.playback.ringback_key, self.playback.ringback_ms),
            EntryType::Service | EntryType::Shortcut | EntryType::Url => {
                if self.registry.contains(&entry.target) {
                    self.directive(seq, class, &entry.target, 0)
                } else {
                    self.directive(seq, class, &self.playback.acknowledge_key, 0)
                }
            }
            EntryType::Unknown => self.directive(seq, class, &self.playback.error_key, self.playback.error_ms),
        }
    }

    fn for_known_number(&self, sequence: &str) -> PlaybackDirective {
        if self.registry.contains(sequence) {
            self.directive(sequence, Classification::KnownNumber, sequence, 0)
        } else {
            self.directive(
                sequence,
                Classification::KnownNumber,
                &self.playback.ringback_key,
                self.playback.ringback_ms,
            )
        }
    }
}
