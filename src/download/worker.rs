use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::download::pool::{WorkerId, WorkerPool};
use crate::download::queue::WorkQueue;
use crate::hashing;
use crate::peer::PeerAddr;
use crate::peer::protocol::{DecodeError, SegmentRequest, SegmentResponse};
use crate::storage::{SegmentStore, StorageError};

/// Bound on each peer I/O step so one unresponsive peer costs a worker at
/// most one timeout instead of stalling it indefinitely.
const PEER_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("connect failed: {0}")]
    Connect(std::io::Error),

    #[error("peer I/O timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("peer is busy")]
    Busy,

    #[error("peer does not hold segment {0}")]
    NotHeld(u32),

    #[error("segment {0} failed verification")]
    Verification(u32),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Fetches queued segments from one assigned peer until the queue runs dry
/// or an attempt fails.
///
/// Any failure — connect, decode, BUSY, HAZNOT, verification — requeues the
/// index and ends the worker; a later worker, possibly against a different
/// peer, retries it. That bounds a flaky peer's impact to one failed
/// attempt per worker lifetime.
pub struct DownloadWorker {
    id: WorkerId,
    peer: PeerAddr,
    self_addr: PeerAddr,
    store: Arc<SegmentStore>,
    queue: Arc<WorkQueue>,
    pool: Arc<WorkerPool>,
}

impl DownloadWorker {
    pub fn new(
        id: WorkerId,
        peer: PeerAddr,
        self_addr: PeerAddr,
        store: Arc<SegmentStore>,
        queue: Arc<WorkQueue>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            id,
            peer,
            self_addr,
            store,
            queue,
            pool,
        }
    }

    pub async fn run(self) {
        loop {
            let Some(index) = self.queue.pop().await else {
                break;
            };
            match self.fetch_segment(index).await {
                Ok(()) => {
                    debug!(worker = self.id, peer = %self.peer, segment = index, "segment stored");
                }
                Err(e) => {
                    warn!(
                        worker = self.id,
                        peer = %self.peer,
                        segment = index,
                        error = %e,
                        "attempt failed, requeueing"
                    );
                    self.queue.push(index).await;
                    break;
                }
            }
        }
        self.pool.unregister(self.id).await;
    }

    async fn fetch_segment(&self, index: u32) -> Result<(), FetchError> {
        let descriptor = self.store.descriptor();
        let expected_hash = &descriptor.segment_hashes[index as usize];
        let request = SegmentRequest {
            requester: self.self_addr.clone(),
            file_name: descriptor.file_name.clone(),
            segment_index: index,
            expected_hash: expected_hash.clone(),
        };

        let mut stream = timeout(
            PEER_IO_TIMEOUT,
            TcpStream::connect((self.peer.host.as_str(), self.peer.port)),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Connect)?;

        timeout(PEER_IO_TIMEOUT, stream.write_all(&request.encode()))
            .await
            .map_err(|_| FetchError::Timeout)??;
        timeout(PEER_IO_TIMEOUT, stream.shutdown())
            .await
            .map_err(|_| FetchError::Timeout)??;

        let mut buf = Vec::new();
        timeout(PEER_IO_TIMEOUT, stream.read_to_end(&mut buf))
            .await
            .map_err(|_| FetchError::Timeout)??;

        match SegmentResponse::decode(&buf, expected_hash)? {
            SegmentResponse::Busy => Err(FetchError::Busy),
            SegmentResponse::NotFound { .. } => Err(FetchError::NotHeld(index)),
            SegmentResponse::Data { payload, .. } => {
                if payload.len() != descriptor.segment_len(index as usize)
                    || hashing::digest(&payload) != *expected_hash
                {
                    return Err(FetchError::Verification(index));
                }
                self.store.write_segment(index as usize, &payload).await?;
                Ok(())
            }
        }
    }
}
