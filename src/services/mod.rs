//! Services module for the handset engine

pub mod catalog;
pub mod dispatcher;
pub mod downloads;
pub mod playback;
pub mod playlist;

pub use catalog::{CatalogDirectory, CatalogEntries, CatalogEntry, EntryType};
pub use dispatcher::{Classification, DispatcherState, PlaybackDirective, SequenceDispatcher};
pub use downloads::{DownloadQueue, DownloadQueueItem, DownloadState};
pub use playback::{PlaybackEngine, PlaybackEvent, PlaybackSettings, QueuedAudioItem, StopReason};
pub use playlist::{PlaylistNode, PlaylistRegistry};
