//! Handset Engine - real-time core of a networked analog telephone
//!
//! Detects dialed DTMF digits in captured audio, assembles them into
//! sequences, resolves sequences against a cached remote catalog and plays
//! the result from a tone generator, a cached file or a network stream.

pub mod config;
pub mod core;
pub mod error;
pub mod interfaces;
pub mod protocols;
pub mod services;
pub mod utils;

pub use error::{Error, Result};

/// Engine version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
