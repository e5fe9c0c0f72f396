//! DTMF (Dual-Tone Multi-Frequency) detection
//!
//! Each analysis window passes an energy gate, runs eight single-bin Goertzel
//! filters, rejects noise and excessive twist, then maps the strongest row and
//! column onto the standard keypad grid. A digit is confirmed only after the
//! same result is seen on several consecutive windows.

use std::f32::consts::{PI, TAU};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::{ToneConfig, DTMF_COL_FREQS, DTMF_ROW_FREQS};
use crate::utils::clock::SharedClock;

/// Keypad layout indexed by `[row][col]`
pub const KEYPAD: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

/// Normalized filter magnitudes: four rows then four columns
pub type ToneEnergyVector = [f32; 8];

/// Single-bin Goertzel filter tuned to an arbitrary frequency
#[derive(Debug, Clone, Copy)]
pub struct Goertzel {
    frequency: f32,
    coeff: f32,
}

impl Goertzel {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        let omega = TAU * frequency / sample_rate as f32;
        Self {
            frequency,
            coeff: 2.0 * omega.cos(),
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Magnitude of the tuned component, scaled so a full-scale sine at the
    /// filter frequency reads close to 1.0
    pub fn magnitude(&self, window: &[i16]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }

        let (mut s1, mut s2) = (0.0f32, 0.0f32);
        for &sample in window {
            let x = sample as f32 / 32768.0;
            let s0 = x + self.coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }

        let power = (s1 * s1 + s2 * s2 - self.coeff * s1 * s2).max(0.0);
        2.0 * power.sqrt() / window.len() as f32
    }
}

/// A row/column pair that passed every per-window check
#[derive(Debug, Clone, PartialEq)]
pub struct DigitCandidate {
    pub digit: char,
    pub row_freq: f32,
    pub col_freq: f32,
    pub row_magnitude: f32,
    pub col_magnitude: f32,
    pub at: Instant,
}

/// Per-window classification
#[derive(Debug, Clone, PartialEq)]
pub enum WindowVerdict {
    BelowGate,
    Weak,
    TwistViolation { twist: f32 },
    NoMatch,
    Candidate(DigitCandidate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowAnalysis {
    pub level_dbfs: f32,
    pub energies: ToneEnergyVector,
    pub verdict: WindowVerdict,
}

/// Stateful decoder; one instance per input stream
pub struct ToneDecoder {
    config: ToneConfig,
    clock: SharedClock,
    rows: [Goertzel; 4],
    cols: [Goertzel; 4],
    pending: Option<char>,
    streak: u32,
    last_confirmed: Option<(char, Instant)>,
    released: bool,
}

impl ToneDecoder {
    pub fn new(config: ToneConfig, sample_rate: u32, clock: SharedClock) -> Self {
        let bank = |freqs: &[f32], standard: [f32; 4]| -> [Goertzel; 4] {
            let mut filters = standard.map(|f| Goertzel::new(f, sample_rate));
            for (slot, f) in filters.iter_mut().zip(freqs.iter()) {
                *slot = Goertzel::new(*f, sample_rate);
            }
            filters
        };

        Self {
            rows: bank(&config.row_freqs, DTMF_ROW_FREQS),
            cols: bank(&config.col_freqs, DTMF_COL_FREQS),
            config,
            clock,
            pending: None,
            streak: 0,
            last_confirmed: None,
            released: true,
        }
    }

    pub fn config(&self) -> &ToneConfig {
        &self.config
    }

    /// Classify a window without touching decoder state
    pub fn analyze(&self, window: &[i16]) -> WindowAnalysis {
        let level_dbfs = level_dbfs(window);
        let mut energies = [0.0f32; 8];

        if level_dbfs < self.config.energy_gate_dbfs {
            return WindowAnalysis {
                level_dbfs,
                energies,
                verdict: WindowVerdict::BelowGate,
            };
        }

        for (i, filter) in self.rows.iter().chain(self.cols.iter()).enumerate() {
            energies[i] = filter.magnitude(window);
        }

        let verdict = self.classify(window, &energies);
        WindowAnalysis {
            level_dbfs,
            energies,
            verdict,
        }
    }

    fn classify(&self, window: &[i16], energies: &ToneEnergyVector) -> WindowVerdict {
        let (row, row_mag) = strongest(&energies[..4]);
        let (col, col_mag) = strongest(&energies[4..]);

        let threshold = self.config.noise_floor * self.config.snr_factor;
        if row_mag < threshold || col_mag < threshold {
            return WindowVerdict::Weak;
        }

        // Mean power of the two components against the window's mean square
        let pair_power = (row_mag * row_mag + col_mag * col_mag) / 2.0;
        let window_power = mean_square(window);
        if window_power > 0.0 && pair_power / window_power < self.config.min_tone_energy_ratio {
            return WindowVerdict::Weak;
        }

        let twist = col_mag / row_mag;
        if twist > self.config.max_twist {
            return WindowVerdict::TwistViolation { twist };
        }

        let row_freq = self.rows[row].frequency();
        let col_freq = self.cols[col].frequency();
        let tolerance = self.config.freq_tolerance_hz;

        match (nearest(row_freq, &DTMF_ROW_FREQS, tolerance), nearest(col_freq, &DTMF_COL_FREQS, tolerance)) {
            (Some(r), Some(c)) => WindowVerdict::Candidate(DigitCandidate {
                digit: KEYPAD[r][c],
                row_freq,
                col_freq,
                row_magnitude: row_mag,
                col_magnitude: col_mag,
                at: self.clock.now(),
            }),
            _ => WindowVerdict::NoMatch,
        }
    }

    /// Feed one window; returns a digit on the window that confirms it
    pub fn process(&mut self, window: &[i16]) -> Option<char> {
        let analysis = self.analyze(window);

        let candidate = match analysis.verdict {
            WindowVerdict::Candidate(candidate) => candidate,
            WindowVerdict::TwistViolation { twist } => {
                debug!("Twist violation: ratio {:.2} exceeds {:.2}", twist, self.config.max_twist);
                self.clear_streak();
                return None;
            }
            WindowVerdict::BelowGate => {
                self.clear_streak();
                self.released = true;
                return None;
            }
            other => {
                trace!("Window {:.1} dBFS: {:?}", analysis.level_dbfs, other);
                self.clear_streak();
                return None;
            }
        };

        let digit = candidate.digit;
        if self.pending == Some(digit) {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.pending = Some(digit);
            self.streak = 1;
        }

        // A blocked streak stays confirmable on later windows
        if self.streak < self.config.consensus_count {
            return None;
        }

        let now = candidate.at;
        if let Some((last_digit, at)) = self.last_confirmed {
            if now.duration_since(at) < Duration::from_millis(self.config.cooldown_ms) {
                trace!("Digit {} suppressed by cooldown", digit);
                return None;
            }
            if self.config.require_release && last_digit == digit && !self.released {
                trace!("Digit {} held without release", digit);
                return None;
            }
        }

        debug!(
            "DTMF digit {} confirmed (row {:.0} Hz mag {:.3}, col {:.0} Hz mag {:.3})",
            digit, candidate.row_freq, candidate.row_magnitude, candidate.col_freq, candidate.col_magnitude
        );
        self.last_confirmed = Some((digit, now));
        self.released = false;
        Some(digit)
    }

    fn clear_streak(&mut self) {
        self.pending = None;
        self.streak = 0;
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.streak = 0;
        self.last_confirmed = None;
        self.released = true;
    }

    /// Measure the mean strongest-bin magnitude over noise-only windows and
    /// adopt it as the noise floor. Returns the measured value.
    pub fn calibrate(&mut self, noise_windows: &[&[i16]]) -> Option<f32> {
        if noise_windows.is_empty() {
            return None;
        }

        let total: f32 = noise_windows
            .iter()
            .map(|w| {
                self.rows
                    .iter()
                    .chain(self.cols.iter())
                    .map(|f| f.magnitude(w))
                    .fold(0.0f32, f32::max)
            })
            .sum();
        let floor = total / noise_windows.len() as f32;

        debug!("Calibrated noise floor {:.4} from {} windows", floor, noise_windows.len());
        self.config.noise_floor = floor;
        Some(floor)
    }
}

/// Root-mean-square level of a window in dBFS
pub fn level_dbfs(window: &[i16]) -> f32 {
    let ms = mean_square(window);
    if ms <= 0.0 {
        return f32::NEG_INFINITY;
    }
    10.0 * ms.log10()
}

fn mean_square(window: &[i16]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f32 = window
        .iter()
        .map(|s| {
            let x = *s as f32 / 32768.0;
            x * x
        })
        .sum();
    sum / window.len() as f32
}

fn strongest(bins: &[f32]) -> (usize, f32) {
    bins.iter()
        .copied()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, m)| if m > best.1 { (i, m) } else { best })
}

fn nearest(freq: f32, standard: &[f32; 4], tolerance: f32) -> Option<usize> {
    standard
        .iter()
        .enumerate()
        .map(|(i, f)| (i, (f - freq).abs()))
        .filter(|(_, d)| *d <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Keypad position of a digit, `None` for characters not on the pad
pub fn digit_position(digit: char) -> Option<(usize, usize)> {
    let digit = digit.to_ascii_uppercase();
    KEYPAD.iter().enumerate().find_map(|(r, row)| {
        row.iter().position(|c| *c == digit).map(|c| (r, c))
    })
}

/// Synthesize a standard DTMF digit, `amplitude` per component
pub fn generate_digit(digit: char, duration_ms: u32, sample_rate: u32, amplitude: f32) -> Vec<i16> {
    let Some((row, col)) = digit_position(digit) else {
        return Vec::new();
    };

    let (low, high) = (DTMF_ROW_FREQS[row], DTMF_COL_FREQS[col]);
    let count = duration_ms as usize * sample_rate as usize / 1000;
    let rate = sample_rate as f32;

    (0..count)
        .map(|n| {
            let t = n as f32 / rate;
            let v = amplitude * ((2.0 * PI * low * t).sin() + (2.0 * PI * high * t).sin());
            (v * 32767.0).clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    const RATE: u32 = 44100;
    const N: usize = 512;

    fn decoder() -> (ToneDecoder, ManualClock) {
        let clock = ManualClock::new();
        let decoder = ToneDecoder::new(ToneConfig::default(), RATE, Arc::new(clock.clone()));
        (decoder, clock)
    }

    fn tone_window(digit: char) -> Vec<i16> {
        generate_digit(digit, 50, RATE, 0.3)[..N].to_vec()
    }

    fn two_tone(low: f32, high: f32, low_amp: f32, high_amp: f32) -> Vec<i16> {
        (0..N)
            .map(|n| {
                let t = n as f32 / RATE as f32;
                let v = low_amp * (TAU * low * t).sin() + high_amp * (TAU * high * t).sin();
                (v * 32767.0) as i16
            })
            .collect()
    }

    /// Feed windows 12 ms apart, returning confirmed digits
    fn feed(decoder: &mut ToneDecoder, clock: &ManualClock, windows: &[Vec<i16>]) -> Vec<char> {
        windows
            .iter()
            .filter_map(|w| {
                clock.advance_ms(12);
                decoder.process(w)
            })
            .collect()
    }

    #[test]
    fn test_goertzel_normalized_magnitude() {
        let window = two_tone(770.0, 1336.0, 0.3, 0.3);
        let on = Goertzel::new(770.0, RATE).magnitude(&window);
        let off = Goertzel::new(1633.0, RATE).magnitude(&window);
        assert!((on - 0.3).abs() < 0.05, "on-bin magnitude {}", on);
        assert!(off < 0.05, "off-bin magnitude {}", off);
    }

    #[test]
    fn test_every_keypad_digit_is_recognized() {
        let (decoder, _) = decoder();
        for row in KEYPAD {
            for digit in row {
                match decoder.analyze(&tone_window(digit)).verdict {
                    WindowVerdict::Candidate(c) => assert_eq!(c.digit, digit),
                    other => panic!("digit {} classified as {:?}", digit, other),
                }
            }
        }
    }

    #[test]
    fn test_consensus_confirms_on_third_window() {
        let (mut decoder, clock) = decoder();
        let window = tone_window('5');

        clock.advance_ms(12);
        assert_eq!(decoder.process(&window), None);
        clock.advance_ms(12);
        assert_eq!(decoder.process(&window), None);
        clock.advance_ms(12);
        assert_eq!(decoder.process(&window), Some('5'));
        // held tone does not repeat
        clock.advance_ms(12);
        assert_eq!(decoder.process(&window), None);
    }

    #[test]
    fn test_interrupted_streak_does_not_confirm() {
        let (mut decoder, clock) = decoder();
        let silence = vec![0i16; N];
        let windows = vec![tone_window('1'), tone_window('1'), silence, tone_window('1'), tone_window('1')];
        assert!(feed(&mut decoder, &clock, &windows).is_empty());
    }

    #[test]
    fn test_below_gate_is_ignored() {
        let (decoder, _) = decoder();
        let quiet = two_tone(697.0, 1209.0, 0.05, 0.05);
        assert_eq!(decoder.analyze(&quiet).verdict, WindowVerdict::BelowGate);
    }

    #[test]
    fn test_twist_violation_rejected() {
        let (mut decoder, clock) = decoder();
        let twisted = two_tone(697.0, 1209.0, 0.1, 0.45);
        assert!(matches!(
            decoder.analyze(&twisted).verdict,
            WindowVerdict::TwistViolation { .. }
        ));
        let windows = vec![twisted.clone(), twisted.clone(), twisted];
        assert!(feed(&mut decoder, &clock, &windows).is_empty());
    }

    #[test]
    fn test_noise_is_not_a_digit() {
        let (mut decoder, clock) = decoder();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let windows: Vec<Vec<i16>> = (0..20)
            .map(|_| (0..N).map(|_| rng.gen_range(-16000i16..16000)).collect())
            .collect();
        assert!(feed(&mut decoder, &clock, &windows).is_empty());
    }

    #[test]
    fn test_cooldown_blocks_quick_repeat() {
        let (mut decoder, clock) = decoder();
        let one = tone_window('1');
        let two = tone_window('2');

        let first = feed(&mut decoder, &clock, &[one.clone(), one.clone(), one]);
        assert_eq!(first, vec!['1']);

        // 36 ms later a different digit is still inside the 200 ms cooldown
        let second = feed(&mut decoder, &clock, &[two.clone(), two.clone(), two.clone()]);
        assert!(second.is_empty());

        clock.advance_ms(300);
        let silence = vec![0i16; N];
        let third = feed(&mut decoder, &clock, &[silence, two.clone(), two.clone(), two]);
        assert_eq!(third, vec!['2']);
    }

    #[test]
    fn test_digit_held_through_cooldown_confirms() {
        let (mut decoder, clock) = decoder();
        let one = tone_window('1');
        let two = tone_window('2');

        let mut windows = vec![one; 3];
        // 600 ms of '2' starting right after '1' is confirmed
        windows.extend(vec![two; 50]);
        assert_eq!(feed(&mut decoder, &clock, &windows), vec!['1', '2']);
    }

    #[test]
    fn test_long_hold_does_not_overflow_streak() {
        let (mut decoder, clock) = decoder();
        let window = tone_window('4');
        assert_eq!(feed(&mut decoder, &clock, &vec![window.clone(); 3]), vec!['4']);

        decoder.streak = u32::MAX - 1;
        assert!(feed(&mut decoder, &clock, &vec![window; 3]).is_empty());
        assert_eq!(decoder.streak, u32::MAX);
    }

    #[test]
    fn test_same_digit_needs_release() {
        let (mut decoder, clock) = decoder();
        let seven = tone_window('7');

        assert_eq!(feed(&mut decoder, &clock, &vec![seven.clone(); 3]), vec!['7']);

        // held past the cooldown, still one digit
        clock.advance_ms(500);
        assert!(feed(&mut decoder, &clock, &vec![seven.clone(); 6]).is_empty());

        // a glitch window is not a release
        let glitch = two_tone(697.0, 1209.0, 0.1, 0.45);
        let mut held = vec![glitch];
        held.extend(vec![seven.clone(); 3]);
        assert!(feed(&mut decoder, &clock, &held).is_empty());

        let mut again = vec![vec![0i16; N]];
        again.extend(vec![seven; 3]);
        assert_eq!(feed(&mut decoder, &clock, &again), vec!['7']);
    }

    #[test]
    fn test_shifted_filters_map_to_standard_grid() {
        let clock = ManualClock::new();
        let mut config = ToneConfig::default();
        config.row_freqs = vec![707.0, 780.0, 862.0, 951.0];
        let decoder = ToneDecoder::new(config, RATE, Arc::new(clock));

        let window = two_tone(707.0, 1336.0, 0.3, 0.3);
        match decoder.analyze(&window).verdict {
            WindowVerdict::Candidate(c) => assert_eq!(c.digit, '2'),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_calibrate_sets_noise_floor() {
        let (mut decoder, _) = decoder();
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let windows: Vec<Vec<i16>> = (0..8)
            .map(|_| (0..N).map(|_| rng.gen_range(-3000i16..3000)).collect())
            .collect();
        let refs: Vec<&[i16]> = windows.iter().map(|w| w.as_slice()).collect();

        let floor = decoder.calibrate(&refs).unwrap();
        assert!(floor > 0.0 && floor < 0.05);
        assert_eq!(decoder.config().noise_floor, floor);
        assert!(decoder.calibrate(&[]).is_none());
    }

    #[test]
    fn test_generate_digit_length_and_unknown() {
        assert_eq!(generate_digit('9', 100, 8000, 0.3).len(), 800);
        assert!(generate_digit('x', 100, 8000, 0.3).is_empty());
    }
}
