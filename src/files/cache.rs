use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub vanished: usize,
}

/// Download time of every file fetched into the upload directory.
pub struct DownloadCache {
    entries: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
    retention: chrono::Duration,
}

impl DownloadCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, path: impl Into<PathBuf>) {
        self.record_at(path, Utc::now());
    }

    pub fn record_at(&self, path: impl Into<PathBuf>, downloaded_at: DateTime<Utc>) {
        self.entries().insert(path.into(), downloaded_at);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes files older than the retention window and forgets files that disappeared.
    /// The lock is only held for the snapshot and the final prune.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let snapshot: Vec<(PathBuf, DateTime<Utc>)> =
            self.entries().iter().map(|(p, t)| (p.clone(), *t)).collect();

        let mut prune = Vec::new();
        let mut report = SweepReport::default();
        for (path, downloaded_at) in snapshot {
            if now - downloaded_at > self.retention {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!("Evicted cached download {:?}", path);
                        report.deleted += 1;
                        prune.push((path, downloaded_at));
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        report.vanished += 1;
                        prune.push((path, downloaded_at));
                    }
                    // 保留条目，下次清理时重试
                    Err(e) => warn!("Failed to evict cached download {:?}: {}", path, e),
                }
            } else if !tokio::fs::try_exists(&path).await.unwrap_or(true) {
                report.vanished += 1;
                prune.push((path, downloaded_at));
            }
        }

        let mut entries = self.entries();
        for (path, downloaded_at) in prune {
            // a re-download during the sweep refreshes the entry, keep it
            if entries.get(&path) == Some(&downloaded_at) {
                entries.remove(&path);
            }
        }
        report
    }

    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Download cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.sweep(Utc::now()).await;
                        if report != SweepReport::default() {
                            info!(
                                deleted = report.deleted,
                                vanished = report.vanished,
                                remaining = self.len(),
                                "Swept download cache"
                            );
                        }
                    }
                }
            }
        })
    }
}

impl Default for DownloadCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
