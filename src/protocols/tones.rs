//! Synthesized audio: sample sources and tone generators

use std::f32::consts::TAU;
use std::fmt;
use std::sync::Arc;

use crate::config::ToneDefinition;

/// Outcome of a single pull from a sample source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// `n` samples were written to the front of the buffer
    Data(usize),
    /// Nothing available right now, try again next tick
    Pending,
    /// The source will never produce more samples
    Exhausted,
}

/// Pull-based mono PCM source driven from the real-time context.
///
/// `read` must not block on network I/O.
pub trait SampleSource: Send {
    fn read(&mut self, out: &mut [i16]) -> SourceStatus;

    fn sample_rate(&self) -> u32;
}

/// A factory for fresh tone sources; registered by key in the registry
pub trait ToneGenerator: Send + Sync + fmt::Debug {
    fn start(&self, sample_rate: u32) -> Box<dyn SampleSource>;

    fn describe(&self) -> String;
}

/// One or two simultaneous sine components
#[derive(Debug, Clone, PartialEq)]
pub struct DualTone {
    pub low_hz: f32,
    pub high_hz: Option<f32>,
    /// Per-component amplitude, 0.0..=1.0 of full scale
    pub amplitude: f32,
}

impl DualTone {
    pub fn new(low_hz: f32, high_hz: f32, amplitude: f32) -> Self {
        Self {
            low_hz,
            high_hz: Some(high_hz),
            amplitude,
        }
    }

    pub fn single(freq_hz: f32, amplitude: f32) -> Self {
        Self {
            low_hz: freq_hz,
            high_hz: None,
            amplitude,
        }
    }
}

impl ToneGenerator for DualTone {
    fn start(&self, sample_rate: u32) -> Box<dyn SampleSource> {
        Box::new(ToneSource::new(self.clone(), sample_rate, 0, 0, 0))
    }

    fn describe(&self) -> String {
        match self.high_hz {
            Some(high) => format!("{:.0}+{:.0} Hz", self.low_hz, high),
            None => format!("{:.0} Hz", self.low_hz),
        }
    }
}

/// A tone switched on and off in a fixed rhythm, optionally length-limited
#[derive(Debug, Clone, PartialEq)]
pub struct Cadence {
    pub tone: DualTone,
    pub on_ms: u64,
    pub off_ms: u64,
    /// Total length, 0 for endless
    pub length_ms: u64,
}

impl ToneGenerator for Cadence {
    fn start(&self, sample_rate: u32) -> Box<dyn SampleSource> {
        Box::new(ToneSource::new(
            self.tone.clone(),
            sample_rate,
            self.on_ms,
            self.off_ms,
            self.length_ms,
        ))
    }

    fn describe(&self) -> String {
        let mut text = self.tone.describe();
        if self.off_ms > 0 {
            text.push_str(&format!(", {}/{} ms", self.on_ms, self.off_ms));
        }
        if self.length_ms > 0 {
            text.push_str(&format!(", {} ms total", self.length_ms));
        }
        text
    }
}

/// Build the generator described by a configured tone
pub fn generator_from_definition(def: &ToneDefinition) -> Arc<dyn ToneGenerator> {
    let tone = DualTone {
        low_hz: def.low_hz,
        high_hz: def.high_hz,
        amplitude: def.amplitude.clamp(0.0, 1.0),
    };

    if def.off_ms == 0 && def.length_ms == 0 {
        Arc::new(tone)
    } else {
        Arc::new(Cadence {
            tone,
            on_ms: def.on_ms,
            off_ms: def.off_ms,
            length_ms: def.length_ms,
        })
    }
}

struct ToneSource {
    sample_rate: u32,
    low_step: f32,
    high_step: Option<f32>,
    low_phase: f32,
    high_phase: f32,
    amplitude: f32,
    on_samples: u64,
    period_samples: u64,
    total_samples: Option<u64>,
    position: u64,
}

impl ToneSource {
    fn new(tone: DualTone, sample_rate: u32, on_ms: u64, off_ms: u64, length_ms: u64) -> Self {
        let rate = sample_rate.max(1) as f32;
        let to_samples = |ms: u64| ms * sample_rate as u64 / 1000;

        let (on_samples, period_samples) = if off_ms == 0 {
            (u64::MAX, u64::MAX)
        } else {
            (to_samples(on_ms), to_samples(on_ms + off_ms).max(1))
        };

        Self {
            sample_rate,
            low_step: TAU * tone.low_hz / rate,
            high_step: tone.high_hz.map(|h| TAU * h / rate),
            low_phase: 0.0,
            high_phase: 0.0,
            amplitude: tone.amplitude,
            on_samples,
            period_samples,
            total_samples: (length_ms > 0).then(|| to_samples(length_ms)),
            position: 0,
        }
    }

    fn next_sample(&mut self) -> i16 {
        let audible = self.position % self.period_samples < self.on_samples;

        let mut value = self.low_phase.sin();
        self.low_phase = (self.low_phase + self.low_step) % TAU;
        if let Some(step) = self.high_step {
            value += self.high_phase.sin();
            self.high_phase = (self.high_phase + step) % TAU;
        }
        self.position += 1;

        if audible {
            (value * self.amplitude * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
        } else {
            0
        }
    }
}

impl SampleSource for ToneSource {
    fn read(&mut self, out: &mut [i16]) -> SourceStatus {
        let available = match self.total_samples {
            Some(total) => total.saturating_sub(self.position).min(out.len() as u64) as usize,
            None => out.len(),
        };
        if available == 0 {
            return SourceStatus::Exhausted;
        }

        for sample in out.iter_mut().take(available) {
            *sample = self.next_sample();
        }
        SourceStatus::Data(available)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// A finite in-memory buffer of samples
pub struct PcmSource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
}

impl PcmSource {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            position: 0,
            sample_rate,
        }
    }
}

impl SampleSource for PcmSource {
    fn read(&mut self, out: &mut [i16]) -> SourceStatus {
        let remaining = &self.samples[self.position..];
        if remaining.is_empty() {
            return SourceStatus::Exhausted;
        }
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        SourceStatus::Data(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
