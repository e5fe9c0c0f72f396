//! Background audio download queue
//!
//! Catalog audio that is not cached locally is queued here and fetched one
//! item at a time by the background worker. Completed downloads are
//! registered as file keys with the remote URL kept as fallback.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::registry::{ResourceRegistry, StreamKind};
use crate::interfaces::http::HttpFetcher;
use crate::interfaces::storage::Storage;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadState {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// A key waiting on a queued URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadDestination {
    pub key: String,
    pub description: Option<String>,
}

/// One URL to fetch; every sequence pointing at it is registered once the
/// file is stored
#[derive(Debug, Clone, Serialize)]
pub struct DownloadQueueItem {
    pub url: String,
    pub local_path: String,
    pub destinations: Vec<DownloadDestination>,
    pub state: DownloadState,
}

impl DownloadQueueItem {
    pub fn new(url: &str, destination_key: &str, local_path: &str, description: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            local_path: local_path.to_string(),
            destinations: vec![DownloadDestination {
                key: destination_key.to_string(),
                description: description.map(str::to_string),
            }],
            state: DownloadState::Pending,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.key.clone()).collect()
    }

    /// Add or update destinations; returns whether a new key was added
    fn merge(&mut self, destinations: Vec<DownloadDestination>) -> bool {
        let mut added = false;
        for destination in destinations {
            match self.destinations.iter_mut().find(|d| d.key == destination.key) {
                Some(existing) => existing.description = destination.description,
                None => {
                    self.destinations.push(destination);
                    added = true;
                }
            }
        }
        added
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// A failed item for the same URL was reset to pending
    Retried,
    /// Another key was attached to an item already queued for the URL
    Joined,
    AlreadyQueued,
    QueueFull,
}

#[derive(Debug)]
pub struct DownloadQueue {
    items: Mutex<Vec<DownloadQueueItem>>,
    capacity: usize,
}

impl DownloadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DownloadQueueItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, item: DownloadQueueItem) -> EnqueueOutcome {
        let mut items = self.lock();

        if let Some(existing) = items.iter_mut().find(|i| i.url == item.url) {
            let joined = existing.merge(item.destinations);
            // Done is only enqueued again when the stored file went missing
            return match existing.state {
                DownloadState::Failed | DownloadState::Done => {
                    existing.state = DownloadState::Pending;
                    existing.local_path = item.local_path;
                    EnqueueOutcome::Retried
                }
                _ if joined => EnqueueOutcome::Joined,
                _ => EnqueueOutcome::AlreadyQueued,
            };
        }

        if items.len() >= self.capacity {
            items.retain(|i| i.state != DownloadState::Done);
        }
        if items.len() >= self.capacity {
            warn!("Download queue full, dropping {}", item.url);
            return EnqueueOutcome::QueueFull;
        }

        debug!("Queued download {} -> {}", item.url, item.local_path);
        items.push(item);
        EnqueueOutcome::Added
    }

    /// Claim the oldest pending item, marking it in progress
    pub fn claim_next(&self) -> Option<DownloadQueueItem> {
        let mut items = self.lock();
        let item = items.iter_mut().find(|i| i.state == DownloadState::Pending)?;
        item.state = DownloadState::InProgress;
        Some(item.clone())
    }

    fn set_state(&self, url: &str, state: DownloadState) {
        if let Some(item) = self.lock().iter_mut().find(|i| i.url == url) {
            item.state = state;
        }
    }

    pub fn mark_done(&self, url: &str) {
        self.set_state(url, DownloadState::Done);
    }

    pub fn mark_failed(&self, url: &str) {
        self.set_state(url, DownloadState::Failed);
    }

    pub fn find(&self, url: &str) -> Option<DownloadQueueItem> {
        self.lock().iter().find(|i| i.url == url).cloned()
    }

    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|i| i.state == DownloadState::Pending).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn list(&self) -> Vec<DownloadQueueItem> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Download one pending item and register every key waiting on it.
///
/// Returns the registered keys, empty when nothing was pending. A failed
/// item is marked `Failed` and stays queued until it is enqueued again.
pub async fn process_next(
    queue: &DownloadQueue,
    fetcher: &dyn HttpFetcher,
    storage: &dyn Storage,
    registry: &ResourceRegistry,
    timeout: Duration,
) -> Result<Vec<String>> {
    let Some(item) = queue.claim_next() else {
        return Ok(Vec::new());
    };

    info!("Downloading {} for keys {:?}", item.url, item.keys());

    let len = match fetch_and_store(&item, fetcher, storage, timeout).await {
        Ok(len) => len,
        Err(e) => {
            queue.mark_failed(&item.url);
            warn!("Download of {} failed: {}", item.url, e);
            return Err(e);
        }
    };
    queue.mark_done(&item.url);
    info!("Cached {} ({} bytes) as {}", item.url, len, item.local_path);

    // Keys attached while the fetch was running are picked up too
    let destinations = queue
        .find(&item.url)
        .map(|current| current.destinations)
        .unwrap_or(item.destinations);

    let mut registered = Vec::with_capacity(destinations.len());
    for destination in destinations {
        registry.register_path(&destination.key, &item.local_path, StreamKind::File, Some(&item.url))?;
        if let Some(description) = &destination.description {
            registry.set_description(&destination.key, description);
        }
        registered.push(destination.key);
    }
    Ok(registered)
}

async fn fetch_and_store(
    item: &DownloadQueueItem,
    fetcher: &dyn HttpFetcher,
    storage: &dyn Storage,
    timeout: Duration,
) -> Result<usize> {
    let body = fetcher.fetch(&item.url, timeout, None).await?;
    if body.is_empty() {
        return Err(Error::network(format!("Empty body from {}", item.url)));
    }
    storage.write(&item.local_path, &body)?;
    Ok(body.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::KeySource;
    use crate::interfaces::http::tests::StaticFetcher;
    use crate::interfaces::storage::MemoryStorage;

    fn item(n: usize) -> DownloadQueueItem {
        DownloadQueueItem::new(
            &format!("http://h/{}.mp3", n),
            &n.to_string(),
            &format!("audio/{}.mp3", n),
            None,
        )
    }

    #[test]
    fn test_dedupe_by_url() {
        let queue = DownloadQueue::new(4);
        assert_eq!(queue.enqueue(item(1)), EnqueueOutcome::Added);
        assert_eq!(queue.enqueue(item(1)), EnqueueOutcome::AlreadyQueued);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_second_key_joins_queued_url() {
        let queue = DownloadQueue::new(4);
        let shared = |key: &str| DownloadQueueItem::new("http://h/x.mp3", key, "audio/x.mp3", None);

        assert_eq!(queue.enqueue(shared("11")), EnqueueOutcome::Added);
        assert_eq!(queue.enqueue(shared("22")), EnqueueOutcome::Joined);
        assert_eq!(queue.enqueue(shared("22")), EnqueueOutcome::AlreadyQueued);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.list()[0].keys(), vec!["11", "22"]);
    }

    #[tokio::test]
    async fn test_shared_url_registers_every_key() {
        let queue = DownloadQueue::new(4);
        let fetcher = StaticFetcher::default();
        let storage = MemoryStorage::new();
        let registry = ResourceRegistry::new();

        fetcher.insert("http://h/x.mp3", vec![9u8; 8]);
        queue.enqueue(DownloadQueueItem::new("http://h/x.mp3", "11", "audio/x.mp3", Some("First")));
        queue.enqueue(DownloadQueueItem::new("http://h/x.mp3", "22", "audio/x.mp3", Some("Second")));

        let keys = process_next(&queue, &fetcher, &storage, &registry, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(keys, vec!["11", "22"]);
        assert_eq!(fetcher.requests(), 1);
        assert_eq!(registry.get("22").unwrap().description.as_deref(), Some("Second"));
        assert_eq!(registry.kind_of("11"), Some(StreamKind::File));
    }

    #[test]
    fn test_failed_item_resets_on_enqueue() {
        let queue = DownloadQueue::new(4);
        queue.enqueue(item(1));
        let claimed = queue.claim_next().unwrap();
        assert_eq!(queue.pending(), 0);
        queue.mark_failed(&claimed.url);

        assert_eq!(queue.enqueue(item(1)), EnqueueOutcome::Retried);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_done_items_pruned_when_full() {
        let queue = DownloadQueue::new(2);
        queue.enqueue(item(1));
        queue.enqueue(item(2));
        assert_eq!(queue.enqueue(item(3)), EnqueueOutcome::QueueFull);

        let first = queue.claim_next().unwrap();
        queue.mark_done(&first.url);
        assert_eq!(queue.enqueue(item(3)), EnqueueOutcome::Added);

        let urls: Vec<String> = queue.list().into_iter().map(|i| i.url).collect();
        assert_eq!(urls, vec!["http://h/2.mp3", "http://h/3.mp3"]);
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let queue = DownloadQueue::new(20);
        for n in 0..50 {
            queue.enqueue(item(n));
        }
        assert_eq!(queue.len(), 20);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_process_next_registers_file_with_fallback() {
        let queue = DownloadQueue::new(4);
        let fetcher = StaticFetcher::default();
        let storage = MemoryStorage::new();
        let registry = ResourceRegistry::new();

        fetcher.insert("http://h/1.mp3", vec![1u8, 2, 3]);
        queue.enqueue(DownloadQueueItem::new("http://h/1.mp3", "1", "audio/1.mp3", Some("One")));

        let keys = process_next(&queue, &fetcher, &storage, &registry, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(keys, vec!["1"]);
        assert_eq!(storage.read("audio/1.mp3").unwrap(), vec![1, 2, 3]);

        let entry = registry.get("1").unwrap();
        assert_eq!(entry.description.as_deref(), Some("One"));
        match entry.source {
            KeySource::File { path, fallback_url } => {
                assert_eq!(path, "audio/1.mp3");
                assert_eq!(fallback_url.as_deref(), Some("http://h/1.mp3"));
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert_eq!(queue.list()[0].state, DownloadState::Done);

        // nothing left
        let none = process_next(&queue, &fetcher, &storage, &registry, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_failed_download_is_marked_and_not_retried() {
        let queue = DownloadQueue::new(4);
        let fetcher = StaticFetcher::default();
        let storage = MemoryStorage::new();
        let registry = ResourceRegistry::new();

        queue.enqueue(item(1));
        let result = process_next(&queue, &fetcher, &storage, &registry, Duration::from_secs(1)).await;
        assert!(result.is_err());
        assert_eq!(queue.list()[0].state, DownloadState::Failed);
        assert!(!registry.contains("1"));

        let again = process_next(&queue, &fetcher, &storage, &registry, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(fetcher.requests(), 1);
    }
}
