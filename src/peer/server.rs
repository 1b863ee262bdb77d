use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::hashing;
use crate::peer::protocol::{DecodeError, SegmentRequest, SegmentResponse};
use crate::storage::{SegmentStore, StorageError};

/// Requests beyond this many concurrent serves get a BUSY reply instead of
/// queueing behind the others.
pub const MAX_CONCURRENT_SERVES: usize = 8;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Serves segment requests against one store. Safe to run while the same
/// store is still being filled by download workers: only segments already
/// verified locally are served, everything else is HAZNOT.
pub struct SegmentServer {
    store: Arc<SegmentStore>,
    serve_slots: Semaphore,
}

impl SegmentServer {
    pub fn new(store: Arc<SegmentStore>) -> Self {
        Self {
            store,
            serve_slots: Semaphore::new(MAX_CONCURRENT_SERVES),
        }
    }

    /// Accept loop: one spawned task per inbound request. Runs until the
    /// listener fails.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "serving segments");
        loop {
            let (stream, remote) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(stream).await {
                    warn!(%remote, error = %e, "segment request failed");
                }
            });
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<(), ServeError> {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        let request = SegmentRequest::decode(&buf)?;
        debug!(
            requester = %request.requester,
            segment = request.segment_index,
            "segment requested"
        );

        let response = self.respond(&request).await?;
        stream.write_all(&response.encode()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn respond(&self, request: &SegmentRequest) -> Result<SegmentResponse, ServeError> {
        let _permit = match self.serve_slots.try_acquire() {
            Ok(permit) => permit,
            Err(_) => return Ok(SegmentResponse::Busy),
        };

        if request.file_name != self.store.descriptor().file_name {
            return Ok(Self::not_found(request));
        }
        match self
            .store
            .read_segment(request.segment_index as usize)
            .await?
        {
            Some(payload) => Ok(SegmentResponse::Data {
                hash: hashing::digest(&payload),
                payload,
            }),
            None => Ok(Self::not_found(request)),
        }
    }

    fn not_found(request: &SegmentRequest) -> SegmentResponse {
        SegmentResponse::NotFound {
            file_name: request.file_name.clone(),
            segment_index: request.segment_index,
            expected_hash: request.expected_hash.clone(),
        }
    }
}
