//! Signal-level processing: tone detection, tone synthesis and media decoding

pub mod dtmf;
pub mod media;
pub mod tones;

pub use dtmf::{DigitCandidate, ToneDecoder, ToneEnergyVector, WindowAnalysis, WindowVerdict};
pub use media::{MediaOpener, SourceOpener};
pub use tones::{Cadence, DualTone, SampleSource, SourceStatus, ToneGenerator};
