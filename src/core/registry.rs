//! Audio key registry
//!
//! Maps short keys (digit sequences or names such as `dialtone`) to the
//! source that plays them. Shared between the real-time context, which only
//! reads, and the background context, which registers downloaded files.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocols::tones::ToneGenerator;
use crate::utils::paths::{extension_of, is_url, local_audio_path};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Generator,
    File,
    Url,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Generator => write!(f, "generator"),
            StreamKind::File => write!(f, "file"),
            StreamKind::Url => write!(f, "url"),
        }
    }
}

/// Where the audio for a key comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Owned elsewhere; the registry never keeps a generator alive
    Generator(Weak<dyn ToneGenerator>),
    File {
        path: String,
        fallback_url: Option<String>,
    },
    Url {
        url: String,
    },
}

impl KeySource {
    pub fn kind(&self) -> StreamKind {
        match self {
            KeySource::Generator(_) => StreamKind::Generator,
            KeySource::File { .. } => StreamKind::File,
            KeySource::Url { .. } => StreamKind::Url,
        }
    }

    /// Human-readable location for listings
    pub fn location(&self) -> String {
        match self {
            KeySource::Generator(weak) => match weak.upgrade() {
                Some(generator) => generator.describe(),
                None => "<released generator>".to_string(),
            },
            KeySource::File { path, fallback_url: Some(url) } => format!("{} (fallback {})", path, url),
            KeySource::File { path, fallback_url: None } => path.clone(),
            KeySource::Url { url } => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key: String,
    pub source: KeySource,
    pub description: Option<String>,
    pub extension: Option<String>,
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: DashMap<String, KeyEntry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, entry: KeyEntry) -> Result<()> {
        if entry.key.is_empty() {
            return Err(Error::registry("Empty key"));
        }
        debug!("Registered key '{}' -> {} {}", entry.key, entry.source.kind(), entry.source.location());
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Register a file path or URL; the last registration for a key wins
    pub fn register_path(
        &self,
        key: &str,
        location: &str,
        kind: StreamKind,
        fallback_url: Option<&str>,
    ) -> Result<()> {
        let source = match kind {
            StreamKind::File => KeySource::File {
                path: location.to_string(),
                fallback_url: fallback_url.map(str::to_string),
            },
            StreamKind::Url => KeySource::Url {
                url: location.to_string(),
            },
            StreamKind::Generator => {
                return Err(Error::registry(format!(
                    "Key '{}': generators are registered with register_generator",
                    key
                )))
            }
        };

        self.insert(KeyEntry {
            key: key.to_string(),
            source,
            description: None,
            extension: extension_of(location),
        })
    }

    /// Register `primary` as a file. A URL is mapped to its local cache path
    /// under `audio_dir` and kept as the fallback.
    pub fn register_auto(&self, key: &str, primary: &str, ext: Option<&str>, audio_dir: &str) -> Result<()> {
        let source = if is_url(primary) {
            KeySource::File {
                path: local_audio_path(primary, ext, audio_dir),
                fallback_url: Some(primary.to_string()),
            }
        } else {
            KeySource::File {
                path: primary.to_string(),
                fallback_url: None,
            }
        };

        self.insert(KeyEntry {
            key: key.to_string(),
            source,
            description: None,
            extension: ext.map(str::to_string).or_else(|| extension_of(primary)),
        })
    }

    pub fn register_generator(&self, key: &str, generator: &Arc<dyn ToneGenerator>) -> Result<()> {
        self.insert(KeyEntry {
            key: key.to_string(),
            source: KeySource::Generator(Arc::downgrade(generator)),
            description: None,
            extension: None,
        })
    }

    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            debug!("Unregistered key '{}'", key);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn get(&self, key: &str) -> Option<KeyEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether any registered key starts with `prefix`
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.entries.iter().any(|e| e.key().starts_with(prefix))
    }

    /// Whether some registered key strictly extends `prefix`
    pub fn has_longer_key(&self, prefix: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.key().len() > prefix.len() && e.key().starts_with(prefix))
    }

    pub fn kind_of(&self, key: &str) -> Option<StreamKind> {
        self.entries.get(key).map(|e| e.source.kind())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_description(&self, key: &str, description: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.description = Some(description.to_string());
                true
            }
            None => false,
        }
    }
}
