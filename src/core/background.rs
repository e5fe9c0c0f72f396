//! Background context: catalog refresh checks and audio downloads
//!
//! Runs as a tokio task next to the real-time thread. Each tick performs at
//! most one network operation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::interfaces::line::NetworkMonitor;
use crate::services::catalog::CatalogDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundEvent {
    CatalogRefreshed { entries: usize },
    AudioReady { key: String },
    Failed { message: String },
}

pub struct BackgroundWorker {
    catalog: Arc<CatalogDirectory>,
    network: Arc<dyn NetworkMonitor>,
    download_interval: Duration,
    refresh_interval: Duration,
    event_tx: mpsc::UnboundedSender<BackgroundEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<BackgroundEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn new(catalog: Arc<CatalogDirectory>, network: Arc<dyn NetworkMonitor>) -> Self {
        let config = catalog.config();
        let download_interval = Duration::from_millis(config.download_interval_ms.max(1));
        let refresh_interval = Duration::from_secs(config.refresh_check_interval_secs.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            catalog,
            network,
            download_interval,
            refresh_interval,
            event_tx,
            event_rx: Some(event_rx),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn with_intervals(mut self, download: Duration, refresh: Duration) -> Self {
        self.download_interval = download;
        self.refresh_interval = refresh;
        self
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<BackgroundEvent>> {
        self.event_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Spawn the worker on the current runtime
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        info!(
            "Starting background worker (downloads every {:?}, refresh checks every {:?})",
            self.download_interval, self.refresh_interval
        );

        let catalog = self.catalog.clone();
        let network = self.network.clone();
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.child_token();
        let (download_every, refresh_every) = (self.download_interval, self.refresh_interval);

        self.task = Some(tokio::spawn(async move {
            let mut downloads = interval(download_every);
            let mut refresh = interval(refresh_every);
            downloads.set_missed_tick_behavior(MissedTickBehavior::Delay);
            refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = refresh.tick() => {
                        refresh_check(&catalog, network.as_ref(), &event_tx).await;
                    }
                    _ = downloads.tick() => {
                        download_step(&catalog, network.as_ref(), &event_tx).await;
                    }
                }
            }
            debug!("Background worker exited");
        }));
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Background worker ended abnormally: {}", e);
            }
        }
        self.cancel = CancellationToken::new();
        info!("Background worker stopped");
    }
}

/// Refresh the catalog when it is stale and the network is reachable
pub async fn refresh_check(
    catalog: &CatalogDirectory,
    network: &dyn NetworkMonitor,
    event_tx: &mpsc::UnboundedSender<BackgroundEvent>,
) {
    match catalog.refresh_if_stale(network.is_up()).await {
        Ok(true) => {
            let _ = event_tx.send(BackgroundEvent::CatalogRefreshed {
                entries: catalog.entries().len(),
            });
        }
        Ok(false) => {}
        Err(e) => {
            warn!("Catalog refresh failed: {}", e);
            let _ = event_tx.send(BackgroundEvent::Failed {
                message: format!("catalog refresh: {}", e),
            });
        }
    }
}

/// Download at most one queued audio file
pub async fn download_step(
    catalog: &CatalogDirectory,
    network: &dyn NetworkMonitor,
    event_tx: &mpsc::UnboundedSender<BackgroundEvent>,
) {
    match catalog.process_audio_download_queue(network.is_up()).await {
        Ok(keys) => {
            for key in keys {
                let _ = event_tx.send(BackgroundEvent::AudioReady { key });
            }
        }
        Err(e) => {
            let _ = event_tx.send(BackgroundEvent::Failed {
                message: format!("download: {}", e),
            });
        }
    }
}
