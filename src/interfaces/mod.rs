//! Device and platform collaborators consumed by the engine

pub mod audio_io;
pub mod http;
pub mod line;
pub mod storage;

pub use audio_io::{AudioInput, AudioOutput, CaptureOutput, NullOutput, PcmReaderInput, PcmWriterOutput, SilenceInput};
pub use http::{HttpFetcher, ReqwestFetcher};
pub use line::{HookMonitor, LineSignal, NetworkMonitor, SimulatedLine, StaticNetwork};
pub use storage::{FsStorage, MemoryStorage, Storage};
