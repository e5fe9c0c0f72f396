//! Hook-switch and network reachability signals

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::utils::clock::SharedClock;

/// Raw hook state: true while the handset is off-hook
pub trait LineSignal: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Whether the device can currently reach the network
pub trait NetworkMonitor: Send + Sync {
    fn is_up(&self) -> bool;
}

/// Hook state set programmatically (console, tests, bench rigs)
#[derive(Debug, Default)]
pub struct SimulatedLine {
    active: AtomicBool,
}

impl SimulatedLine {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl LineSignal for SimulatedLine {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct StaticNetwork {
    up: AtomicBool,
}

impl StaticNetwork {
    pub fn new(up: bool) -> Self {
        Self { up: AtomicBool::new(up) }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl NetworkMonitor for StaticNetwork {
    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Debounces a raw line signal into stable hook transitions
pub struct HookMonitor {
    signal: Arc<dyn LineSignal>,
    clock: SharedClock,
    debounce: Duration,
    stable: bool,
    candidate: Option<(bool, Instant)>,
}

impl HookMonitor {
    /// Starts on-hook; an off-hook signal is reported after the debounce period
    pub fn new(signal: Arc<dyn LineSignal>, clock: SharedClock, debounce_ms: u64) -> Self {
        Self {
            signal,
            clock,
            debounce: Duration::from_millis(debounce_ms),
            stable: false,
            candidate: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stable
    }

    /// Sample the signal; returns the new state when a change becomes stable
    pub fn poll(&mut self) -> Option<bool> {
        let raw = self.signal.is_active();
        if raw == self.stable {
            self.candidate = None;
            return None;
        }

        let now = self.clock.now();
        let since = match self.candidate {
            Some((value, since)) if value == raw => since,
            _ => {
                self.candidate = Some((raw, now));
                now
            }
        };

        if now.duration_since(since) >= self.debounce {
            debug!("Line {}", if raw { "active" } else { "idle" });
            self.stable = raw;
            self.candidate = None;
            Some(raw)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;

    #[test]
    fn test_debounce_filters_bounce() {
        let clock = ManualClock::new();
        let line = Arc::new(SimulatedLine::new(false));
        let mut monitor = HookMonitor::new(line.clone(), Arc::new(clock.clone()), 50);

        line.set_active(true);
        assert_eq!(monitor.poll(), None);
        clock.advance_ms(20);
        line.set_active(false);
        assert_eq!(monitor.poll(), None);
        line.set_active(true);
        clock.advance_ms(20);
        assert_eq!(monitor.poll(), None);
        clock.advance_ms(49);
        assert_eq!(monitor.poll(), None);
        clock.advance_ms(1);
        assert_eq!(monitor.poll(), Some(true));
        assert!(monitor.is_active());
        assert_eq!(monitor.poll(), None);
    }

    #[test]
    fn test_zero_debounce_is_immediate() {
        let clock = ManualClock::new();
        let line = Arc::new(SimulatedLine::new(true));
        let mut monitor = HookMonitor::new(line.clone(), Arc::new(clock), 0);
        assert_eq!(monitor.poll(), Some(true));
        line.set_active(false);
        assert_eq!(monitor.poll(), Some(false));
    }

    #[test]
    fn test_static_network() {
        let net = StaticNetwork::new(false);
        assert!(!net.is_up());
        net.set_up(true);
        assert!(net.is_up());
    }
}
