//! Core components for the handset engine

pub mod background;
pub mod engine;
pub mod registry;

pub use background::{BackgroundEvent, BackgroundWorker};
pub use engine::{Collaborators, EngineStatus, PhoneEngine};
pub use registry::{KeyEntry, KeySource, ResourceRegistry, StreamKind};
