//! Shared helpers

pub mod clock;
pub mod logger;
pub mod paths;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use logger::setup_logging;
