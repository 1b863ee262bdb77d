use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::peer::PeerAddr;
use crate::storage::{SegmentStore, StorageError};
use crate::tracker::client::{
    AnnounceError, announce_init, announce_needy, announce_started, announce_stopped,
};

pub mod pool;
pub mod queue;
pub mod worker;

pub use pool::{WorkerId, WorkerPool};
pub use queue::WorkQueue;
pub use worker::DownloadWorker;

/// Pause before asking the tracker again after an empty seeder list or a
/// failed announce.
pub const SEEDER_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("tracker announce failed: {0}")]
    Announce(#[from] AnnounceError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Orchestrates one download: builds the work queue, asks the tracker for
/// seeders whenever the worker pool drains with work remaining, spawns one
/// worker per seeder, and finally assembles the file and announces this
/// node as a seeder.
///
/// The manager suspends only in the pool's drain wait; it learns nothing
/// about individual peer failures beyond "the pool emptied", which is
/// enough to trigger a fresh seeder request.
pub struct DownloadManager {
    store: Arc<SegmentStore>,
    self_addr: PeerAddr,
    queue: Arc<WorkQueue>,
    pool: Arc<WorkerPool>,
    retry_delay: Duration,
}

impl DownloadManager {
    pub fn new(store: Arc<SegmentStore>, self_addr: PeerAddr) -> Self {
        Self {
            store,
            self_addr,
            queue: Arc::new(WorkQueue::new()),
            pool: Arc::new(WorkerPool::new()),
            retry_delay: SEEDER_RETRY_DELAY,
        }
    }

    /// Overrides the tracker retry pause.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn run(&self) -> Result<(), DownloadError> {
        let descriptor = self.store.descriptor().clone();
        let tracker = &descriptor.tracker;
        let content_id = descriptor.content_id();

        if !self.store.is_assembled() {
            self.queue.build(self.store.missing_indices().await).await;
            let total = descriptor.segment_count;
            let mut announced = false;

            while !self.queue.is_empty().await {
                // STARTED on the first request so the tracker registers us as
                // a prospective seeder exactly once, NEEDY thereafter
                let seeders = if announced {
                    announce_needy(tracker, &self.self_addr, &content_id).await
                } else {
                    announce_started(tracker, &self.self_addr, &content_id).await
                };
                let seeders = match seeders {
                    Ok(seeders) => {
                        announced = true;
                        seeders
                    }
                    Err(e) => {
                        warn!(error = %e, "tracker unreachable, retrying");
                        sleep(self.retry_delay).await;
                        continue;
                    }
                };
                let seeders: Vec<PeerAddr> = seeders
                    .into_iter()
                    .filter(|s| *s != self.self_addr)
                    .collect();
                if seeders.is_empty() {
                    info!("no seeders available, backing off");
                    sleep(self.retry_delay).await;
                    continue;
                }

                info!(seeders = seeders.len(), "spawning workers");
                for peer in seeders {
                    let id = self.pool.register().await;
                    let worker = DownloadWorker::new(
                        id,
                        peer,
                        self.self_addr.clone(),
                        Arc::clone(&self.store),
                        Arc::clone(&self.queue),
                        Arc::clone(&self.pool),
                    );
                    tokio::spawn(worker.run());
                }

                self.pool.await_drain().await;
                info!(
                    completed = self.store.completed_count().await,
                    total, "download progress"
                );
            }

            if announced {
                // best-effort: assembly proceeds whether or not the tracker
                // heard us stop downloading
                if let Err(e) = announce_stopped(tracker, &self.self_addr).await {
                    warn!(error = %e, "stopped announce failed");
                }
            }
            self.store.assemble().await?;
        }

        announce_init(tracker, &self.self_addr, &content_id).await?;
        info!(file = %descriptor.file_name, "registered as seeder");
        Ok(())
    }
}
