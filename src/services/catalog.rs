//! Catalog of known digit sequences
//!
//! The catalog is fetched from a remote JSON document, cached in storage with
//! a timestamp marker, and refreshed once it is older than the validity
//! window. Audio entries are mirrored into the resource registry; remote audio
//! that is not cached yet goes through the download queue.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::core::registry::{ResourceRegistry, StreamKind};
use crate::interfaces::http::HttpFetcher;
use crate::interfaces::storage::Storage;
use crate::services::downloads::{self, DownloadQueue, DownloadQueueItem, EnqueueOutcome};
use crate::utils::clock::SharedClock;
use crate::utils::paths::{is_url, local_audio_path};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Phone,
    Service,
    Shortcut,
    Url,
    Audio,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub sequence: String,
    pub description: String,
    pub entry_type: EntryType,
    /// Audio location, phone number or service name depending on the type
    pub target: String,
    pub extension: Option<String>,
    pub ring_duration_ms: u64,
}

fn unknown_description() -> String {
    "Unknown".to_string()
}

/// One record of the catalog document, keyed by sequence
#[derive(Debug, Serialize, Deserialize)]
struct WireEntry {
    #[serde(default = "unknown_description")]
    description: String,
    #[serde(rename = "type", default)]
    entry_type: EntryType,
    #[serde(default)]
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ring_duration: Option<u64>,
}

/// Parse a catalog document, keeping at most `max_entries` records.
///
/// A document that is not a JSON object is an error; individual malformed
/// records are skipped.
pub fn parse_catalog(body: &[u8], max_entries: usize) -> Result<BTreeMap<String, CatalogEntry>> {
    let document: BTreeMap<String, serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| Error::catalog(format!("Malformed catalog: {}", e)))?;

    let mut entries = BTreeMap::new();
    for (sequence, value) in document {
        if entries.len() >= max_entries {
            warn!("Catalog holds more than {} entries, ignoring the rest", max_entries);
            break;
        }
        if sequence.is_empty() {
            continue;
        }

        match serde_json::from_value::<WireEntry>(value) {
            Ok(wire) => {
                entries.insert(
                    sequence.clone(),
                    CatalogEntry {
                        sequence,
                        description: wire.description,
                        entry_type: wire.entry_type,
                        target: wire.path,
                        extension: wire.ext.filter(|e| !e.is_empty()),
                        ring_duration_ms: wire.ring_duration.unwrap_or(0),
                    },
                );
            }
            Err(e) => warn!("Skipping catalog entry '{}': {}", sequence, e),
        }
    }
    Ok(entries)
}

fn encode_catalog(entries: &BTreeMap<String, CatalogEntry>) -> Result<Vec<u8>> {
    let wire: BTreeMap<&str, WireEntry> = entries
        .values()
        .map(|e| {
            (
                e.sequence.as_str(),
                WireEntry {
                    description: e.description.clone(),
                    entry_type: e.entry_type,
                    path: e.target.clone(),
                    ext: e.extension.clone(),
                    ring_duration: (e.ring_duration_ms > 0).then_some(e.ring_duration_ms),
                },
            )
        })
        .collect();
    Ok(serde_json::to_vec_pretty(&wire)?)
}

/// Shared, atomically swapped view of the current entry set
#[derive(Debug, Clone, Default)]
pub struct CatalogEntries {
    inner: Arc<RwLock<Arc<BTreeMap<String, CatalogEntry>>>>,
}

impl CatalogEntries {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<BTreeMap<String, CatalogEntry>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, entries: BTreeMap<String, CatalogEntry>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(entries);
    }

    pub fn lookup(&self, sequence: &str) -> Option<CatalogEntry> {
        self.snapshot().get(sequence).cloned()
    }

    pub fn contains(&self, sequence: &str) -> bool {
        self.snapshot().contains_key(sequence)
    }

    /// Whether some entry strictly extends `prefix`
    pub fn has_longer_prefix(&self, prefix: &str) -> bool {
        self.snapshot()
            .range::<str, _>((std::ops::Bound::Excluded(prefix), std::ops::Bound::Unbounded))
            .next()
            .map(|(k, _)| k.starts_with(prefix))
            .unwrap_or(false)
    }

    pub fn list(&self) -> Vec<CatalogEntry> {
        self.snapshot().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

pub struct CatalogDirectory {
    config: CatalogConfig,
    entries: CatalogEntries,
    registry: Arc<ResourceRegistry>,
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn HttpFetcher>,
    clock: SharedClock,
    downloads: DownloadQueue,
    last_refresh: Mutex<Option<Instant>>,
    registered: Mutex<BTreeSet<String>>,
}

impl CatalogDirectory {
    pub fn new(
        config: CatalogConfig,
        registry: Arc<ResourceRegistry>,
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn HttpFetcher>,
        clock: SharedClock,
    ) -> Self {
        let downloads = DownloadQueue::new(config.max_download_queue);
        Self {
            config,
            entries: CatalogEntries::new(),
            registry,
            storage,
            fetcher,
            clock,
            downloads,
            last_refresh: Mutex::new(None),
            registered: Mutex::new(BTreeSet::new()),
        }
    }

    /// Handle for readers such as the sequence dispatcher
    pub fn entries(&self) -> CatalogEntries {
        self.entries.clone()
    }

    /// Load the persisted catalog. Returns the number of entries loaded; a
    /// missing or unreadable cache yields an empty catalog.
    pub fn load_cache(&self) -> usize {
        let (catalog_file, marker_file) = (&self.config.catalog_file, &self.config.timestamp_file);

        if !self.storage.exists(catalog_file) || !self.storage.exists(marker_file) {
            info!("No cached catalog found, will fetch when the network is up");
            return 0;
        }

        let loaded = self
            .storage
            .read(catalog_file)
            .and_then(|body| parse_catalog(&body, self.config.max_entries));

        let entries = match loaded {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ignoring cached catalog: {}", e);
                return 0;
            }
        };

        match self
            .storage
            .read_to_string(marker_file)
            .map(|s| chrono::DateTime::parse_from_rfc3339(s.trim()))
        {
            Ok(Ok(saved)) => info!("Loaded {} cached catalog entries saved at {}", entries.len(), saved),
            _ => info!("Loaded {} cached catalog entries (unreadable timestamp)", entries.len()),
        }

        let count = entries.len();
        self.install(entries);
        count
    }

    /// True when empty, never refreshed in this process, or older than the
    /// validity window
    pub fn is_stale(&self) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        match *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) {
            None => true,
            Some(at) => {
                let validity = Duration::from_secs(self.config.validity_hours * 3600);
                self.clock.now().duration_since(at) > validity
            }
        }
    }

    /// Refresh when stale and the network is reachable. Returns whether a
    /// refresh took place.
    pub async fn refresh_if_stale(&self, network_up: bool) -> Result<bool> {
        if !network_up || !self.is_stale() {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Fetch, validate and install the remote catalog. On any failure the
    /// previous entry set stays in place.
    pub async fn refresh(&self) -> Result<usize> {
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let body = self
            .fetcher
            .fetch(&self.config.url, timeout, Some(self.config.max_response_bytes))
            .await?;

        let entries = parse_catalog(&body, self.config.max_entries)?;
        let count = entries.len();

        if let Err(e) = self.persist(&entries) {
            warn!("Failed to cache catalog: {}", e);
        }
        self.install(entries);
        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());

        info!("Catalog refreshed: {} entries", count);
        Ok(count)
    }

    fn persist(&self, entries: &BTreeMap<String, CatalogEntry>) -> Result<()> {
        self.storage.write(&self.config.catalog_file, &encode_catalog(entries)?)?;
        self.storage
            .write(&self.config.timestamp_file, chrono::Utc::now().to_rfc3339().as_bytes())?;
        Ok(())
    }

    fn install(&self, entries: BTreeMap<String, CatalogEntry>) {
        let audio: Vec<CatalogEntry> = entries
            .values()
            .filter(|e| e.entry_type == EntryType::Audio && !e.target.is_empty())
            .cloned()
            .collect();

        self.entries.replace(entries);

        let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        let current: BTreeSet<String> = audio.iter().map(|e| e.sequence.clone()).collect();
        for stale in registered.difference(&current) {
            self.registry.unregister(stale);
        }
        registered.clear();

        for entry in &audio {
            match self.apply_audio_entry(entry) {
                Ok(true) => {
                    registered.insert(entry.sequence.clone());
                }
                Ok(false) => {}
                Err(e) => warn!("Catalog entry '{}' not registered: {}", entry.sequence, e),
            }
        }
    }

    /// Mirror one audio entry into the registry. Returns whether a key was
    /// registered now.
    fn apply_audio_entry(&self, entry: &CatalogEntry) -> Result<bool> {
        let key = entry.sequence.as_str();

        if !is_url(&entry.target) {
            self.registry.register_path(key, &entry.target, StreamKind::File, None)?;
            self.registry.set_description(key, &entry.description);
            return Ok(true);
        }

        let local = local_audio_path(&entry.target, entry.extension.as_deref(), &self.config.audio_dir);
        if self.storage.exists(&local) {
            self.registry.register_path(key, &local, StreamKind::File, Some(&entry.target))?;
            self.registry.set_description(key, &entry.description);
            return Ok(true);
        }

        let outcome = self.downloads.enqueue(DownloadQueueItem::new(
            &entry.target,
            key,
            &local,
            Some(&entry.description),
        ));
        debug!("Download for '{}': {:?}", key, outcome);

        if self.config.stream_uncached {
            self.registry.register_path(key, &entry.target, StreamKind::Url, None)?;
            self.registry.set_description(key, &entry.description);
            return Ok(true);
        }

        // Keep a key registered by an earlier pass (e.g. a completed download)
        Ok(outcome != EnqueueOutcome::QueueFull && self.registry.contains(key))
    }

    /// Download at most one queued item. Returns the keys that became
    /// playable.
    pub async fn process_audio_download_queue(&self, network_up: bool) -> Result<Vec<String>> {
        if !network_up {
            return Ok(Vec::new());
        }
        let keys = downloads::process_next(
            &self.downloads,
            self.fetcher.as_ref(),
            self.storage.as_ref(),
            &self.registry,
            Duration::from_secs(self.config.download_timeout_secs),
        )
        .await?;

        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(keys.iter().cloned());
        Ok(keys)
    }

    pub fn download_queue_pending(&self) -> usize {
        self.downloads.pending()
    }

    pub fn download_queue_len(&self) -> usize {
        self.downloads.len()
    }

    pub fn list_download_queue(&self) -> Vec<DownloadQueueItem> {
        self.downloads.list()
    }

    pub fn clear_download_queue(&self) {
        self.downloads.clear();
    }

    pub fn is_download_queue_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    /// Drop every entry and the keys they registered; the persisted cache
    /// is left in place
    pub fn clear(&self) {
        self.install(BTreeMap::new());
        self.invalidate();
    }

    /// Force a refresh at the next opportunity
    pub fn invalidate(&self) {
        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::KeySource;
    use crate::interfaces::http::tests::StaticFetcher;
    use crate::interfaces::storage::MemoryStorage;
    use crate::services::downloads::DownloadState;
    use crate::utils::clock::ManualClock;

    const URL: &str = "http://catalog.test/sequences.json";

    struct Fixture {
        catalog: CatalogDirectory,
        fetcher: Arc<StaticFetcher>,
        storage: Arc<MemoryStorage>,
        registry: Arc<ResourceRegistry>,
        clock: ManualClock,
    }

    fn fixture_with(config: CatalogConfig) -> Fixture {
        let fetcher = Arc::new(StaticFetcher::default());
        let storage = Arc::new(MemoryStorage::new());
        let registry = Arc::new(ResourceRegistry::new());
        let clock = ManualClock::new();
        let catalog = CatalogDirectory::new(
            config,
            registry.clone(),
            storage.clone(),
            fetcher.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            catalog,
            fetcher,
            storage,
            registry,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CatalogConfig {
            url: URL.to_string(),
            ..CatalogConfig::default()
        })
    }

    const DOCUMENT: &str = r#"{
        "123": {"description": "Greeting", "type": "audio", "path": "http://cdn.test/hello.mp3"},
        "456": {"description": "Local", "type": "audio", "path": "audio/local.wav", "ring_duration": 3000},
        "5551234": {"description": "Friend", "type": "phone", "path": "friend"},
        "777": {"type": "teleport"}
    }"#;

    #[test]
    fn test_parse_catalog_defaults() {
        let entries = parse_catalog(DOCUMENT.as_bytes(), 50).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries["456"].ring_duration_ms, 3000);
        assert_eq!(entries["5551234"].entry_type, EntryType::Phone);
        assert_eq!(entries["777"].entry_type, EntryType::Unknown);
        assert_eq!(entries["777"].description, "Unknown");
        assert!(parse_catalog(b"[1, 2]", 50).is_err());
    }

    #[test]
    fn test_parse_catalog_caps_entry_count() {
        let body: BTreeMap<String, serde_json::Value> = (0..60)
            .map(|i| (format!("{:03}", i), serde_json::json!({"type": "service", "path": "x"})))
            .collect();
        let bytes = serde_json::to_vec(&body).unwrap();
        assert_eq!(parse_catalog(&bytes, 50).unwrap().len(), 50);
    }

    #[test]
    fn test_entries_prefix_queries() {
        let entries = CatalogEntries::new();
        entries.replace(parse_catalog(DOCUMENT.as_bytes(), 50).unwrap());
        assert!(entries.has_longer_prefix("555"));
        assert!(entries.has_longer_prefix("4"));
        assert!(!entries.has_longer_prefix("456"));
        assert!(!entries.has_longer_prefix("9"));
        assert!(entries.contains("777"));
        assert_eq!(entries.lookup("123").unwrap().description, "Greeting");
    }

    #[tokio::test]
    async fn test_refresh_installs_persists_and_queues() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);

        assert!(f.catalog.is_stale());
        assert!(f.catalog.refresh_if_stale(true).await.unwrap());
        assert!(!f.catalog.is_stale());
        assert_eq!(f.catalog.entries().len(), 4);

        assert!(f.storage.exists("known_sequences.json"));
        let marker = f.storage.read_to_string("known_cache_time.txt").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&marker).is_ok());

        // local audio registered directly, remote audio queued
        assert_eq!(f.registry.kind_of("456"), Some(StreamKind::File));
        assert!(!f.registry.contains("123"));
        assert_eq!(f.catalog.download_queue_pending(), 1);
        assert_eq!(f.catalog.list_download_queue()[0].local_path, "audio/hello.mp3");
    }

    #[tokio::test]
    async fn test_network_down_skips_refresh() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);
        assert!(!f.catalog.refresh_if_stale(false).await.unwrap());
        assert_eq!(f.fetcher.requests(), 0);
    }

    #[tokio::test]
    async fn test_staleness_follows_validity_window() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);
        f.catalog.refresh().await.unwrap();

        f.clock.advance(Duration::from_secs(23 * 3600));
        assert!(!f.catalog.refresh_if_stale(true).await.unwrap());
        f.clock.advance(Duration::from_secs(2 * 3600));
        assert!(f.catalog.is_stale());

        f.catalog.refresh().await.unwrap();
        assert!(!f.catalog.is_stale());
        f.catalog.invalidate();
        assert!(f.catalog.is_stale());
    }

    #[tokio::test]
    async fn test_malformed_refresh_keeps_previous_set() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);
        f.catalog.refresh().await.unwrap();

        f.fetcher.insert(URL, "{not json");
        assert!(f.catalog.refresh().await.is_err());
        assert_eq!(f.catalog.entries().len(), 4);

        let huge = format!("{{\"1\": {{\"type\": \"audio\", \"path\": \"{}\"}}}}", "x".repeat(9000));
        f.fetcher.insert(URL, huge);
        assert!(f.catalog.refresh().await.is_err());
        assert_eq!(f.catalog.entries().len(), 4);
    }

    #[tokio::test]
    async fn test_cache_round_trip_is_stale_but_usable() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);
        f.catalog.refresh().await.unwrap();

        let reloaded = CatalogDirectory::new(
            f.catalog.config().clone(),
            Arc::new(ResourceRegistry::new()),
            f.storage.clone(),
            f.fetcher.clone(),
            Arc::new(f.clock.clone()),
        );
        assert_eq!(reloaded.load_cache(), 4);
        assert_eq!(reloaded.entries().lookup("456").unwrap().ring_duration_ms, 3000);
        assert!(reloaded.is_stale());
    }

    #[test]
    fn test_missing_marker_means_no_cache() {
        let f = fixture();
        f.storage.write("known_sequences.json", DOCUMENT.as_bytes()).unwrap();
        assert_eq!(f.catalog.load_cache(), 0);
        assert!(f.catalog.entries().is_empty());

        f.storage.write("known_cache_time.txt", b"2026-01-01T00:00:00Z").unwrap();
        assert_eq!(f.catalog.load_cache(), 4);
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let f = fixture();
        f.storage.write("known_sequences.json", b"garbage").unwrap();
        f.storage.write("known_cache_time.txt", b"x").unwrap();
        assert_eq!(f.catalog.load_cache(), 0);
    }

    #[test]
    fn test_cached_remote_audio_registers_with_fallback() {
        let f = fixture();
        f.storage.write("audio/hello.mp3", b"mp3").unwrap();
        f.storage.write("known_sequences.json", DOCUMENT.as_bytes()).unwrap();
        f.storage.write("known_cache_time.txt", b"2026-01-01T00:00:00Z").unwrap();
        f.catalog.load_cache();

        match f.registry.get("123").unwrap().source {
            KeySource::File { path, fallback_url } => {
                assert_eq!(path, "audio/hello.mp3");
                assert_eq!(fallback_url.as_deref(), Some("http://cdn.test/hello.mp3"));
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert!(f.catalog.is_download_queue_empty());
        assert_eq!(f.registry.get("123").unwrap().description.as_deref(), Some("Greeting"));
    }

    #[tokio::test]
    async fn test_stream_uncached_registers_url() {
        let f = fixture_with(CatalogConfig {
            url: URL.to_string(),
            stream_uncached: true,
            ..CatalogConfig::default()
        });
        f.fetcher.insert(URL, DOCUMENT);
        f.catalog.refresh().await.unwrap();
        assert_eq!(f.registry.kind_of("123"), Some(StreamKind::Url));
        assert_eq!(f.catalog.download_queue_len(), 1);
    }

    #[tokio::test]
    async fn test_download_queue_processing() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);
        f.fetcher.insert("http://cdn.test/hello.mp3", vec![0u8; 16]);
        f.catalog.refresh().await.unwrap();

        assert!(f.catalog.process_audio_download_queue(false).await.unwrap().is_empty());
        let keys = f.catalog.process_audio_download_queue(true).await.unwrap();
        assert_eq!(keys, vec!["123"]);
        assert!(f.storage.exists("audio/hello.mp3"));
        assert_eq!(f.registry.kind_of("123"), Some(StreamKind::File));
        assert_eq!(f.catalog.download_queue_pending(), 0);

        f.catalog.clear_download_queue();
        assert!(f.catalog.is_download_queue_empty());
    }

    #[tokio::test]
    async fn test_sequences_sharing_a_url_both_become_playable() {
        let f = fixture();
        f.fetcher.insert(
            URL,
            r#"{
                "11": {"description": "Eleven", "type": "audio", "path": "http://cdn.test/x.mp3"},
                "22": {"description": "Twenty-two", "type": "audio", "path": "http://cdn.test/x.mp3"}
            }"#,
        );
        f.fetcher.insert("http://cdn.test/x.mp3", vec![0u8; 16]);
        f.catalog.refresh().await.unwrap();
        assert_eq!(f.catalog.download_queue_len(), 1);

        let keys = f.catalog.process_audio_download_queue(true).await.unwrap();
        assert_eq!(keys, vec!["11", "22"]);
        assert!(f.storage.exists("audio/x.mp3"));
        assert!(f.registry.contains("11"));
        assert!(f.registry.contains("22"));
        assert_eq!(f.registry.get("22").unwrap().description.as_deref(), Some("Twenty-two"));
    }

    #[tokio::test]
    async fn test_download_queue_with_one_missing_url() {
        let f = fixture();
        f.fetcher.insert(
            URL,
            r#"{
                "100": {"description": "Good", "type": "audio", "path": "http://cdn.test/good.mp3"},
                "200": {"description": "Gone", "type": "audio", "path": "http://cdn.test/gone.mp3"}
            }"#,
        );
        f.fetcher.insert("http://cdn.test/good.mp3", vec![1u8; 32]);
        f.catalog.refresh().await.unwrap();
        assert_eq!(f.catalog.download_queue_pending(), 2);

        let mut registered = Vec::new();
        let mut failures = 0;
        while f.catalog.download_queue_pending() > 0 {
            match f.catalog.process_audio_download_queue(true).await {
                Ok(keys) => registered.extend(keys),
                Err(_) => failures += 1,
            }
        }

        assert_eq!(registered, vec!["100"]);
        assert_eq!(failures, 1);
        assert!(f.registry.contains("100"));
        assert!(!f.registry.contains("200"));
        assert!(!f.storage.exists("audio/gone.mp3"));

        let states: Vec<(String, DownloadState)> = f
            .catalog
            .list_download_queue()
            .into_iter()
            .map(|i| (i.url, i.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("http://cdn.test/good.mp3".to_string(), DownloadState::Done),
                ("http://cdn.test/gone.mp3".to_string(), DownloadState::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_drops_keys_no_longer_listed() {
        let f = fixture();
        f.fetcher.insert(URL, DOCUMENT);
        f.catalog.refresh().await.unwrap();
        assert!(f.registry.contains("456"));

        f.fetcher.insert(URL, r#"{"999": {"type": "audio", "path": "audio/new.wav"}}"#);
        f.catalog.refresh().await.unwrap();
        assert!(!f.registry.contains("456"));
        assert!(f.registry.contains("999"));

        f.catalog.clear();
        assert!(f.catalog.entries().is_empty());
        assert!(!f.registry.contains("999"));
        assert!(f.catalog.is_stale());
    }
}
