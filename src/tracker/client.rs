use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::peer::PeerAddr;
use crate::tracker::protocol::{DecodeError, TrackerRequest, TrackerResponse};

const TRACKER_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker I/O timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("unexpected tracker response")]
    UnexpectedResponse,
}

/// One request/response exchange over a fresh connection. The write half is
/// shut down after sending so the tracker's read sees EOF.
async fn exchange(
    tracker: &PeerAddr,
    request: &TrackerRequest,
    await_reply: bool,
) -> Result<Option<TrackerResponse>, AnnounceError> {
    let mut stream = timeout(
        TRACKER_IO_TIMEOUT,
        TcpStream::connect((tracker.host.as_str(), tracker.port)),
    )
    .await
    .map_err(|_| AnnounceError::Timeout)??;

    timeout(TRACKER_IO_TIMEOUT, stream.write_all(&request.encode()))
        .await
        .map_err(|_| AnnounceError::Timeout)??;
    timeout(TRACKER_IO_TIMEOUT, stream.shutdown())
        .await
        .map_err(|_| AnnounceError::Timeout)??;

    if !await_reply {
        return Ok(None);
    }
    let mut buf = Vec::new();
    timeout(TRACKER_IO_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| AnnounceError::Timeout)??;
    Ok(Some(TrackerResponse::decode(&buf)?))
}

fn expect_seeders(response: Option<TrackerResponse>) -> Result<Vec<PeerAddr>, AnnounceError> {
    match response {
        Some(TrackerResponse::Seeders { seeders, .. }) => Ok(seeders),
        _ => Err(AnnounceError::UnexpectedResponse),
    }
}

/// First seeder request of a download; also registers `self_addr` as a
/// prospective seeder at the tracker.
pub async fn announce_started(
    tracker: &PeerAddr,
    self_addr: &PeerAddr,
    content_id: &str,
) -> Result<Vec<PeerAddr>, AnnounceError> {
    let request = TrackerRequest::Started {
        peer: self_addr.clone(),
        content_id: content_id.to_string(),
    };
    expect_seeders(exchange(tracker, &request, true).await?)
}

/// Subsequent seeder requests; queries without registering.
pub async fn announce_needy(
    tracker: &PeerAddr,
    self_addr: &PeerAddr,
    content_id: &str,
) -> Result<Vec<PeerAddr>, AnnounceError> {
    let request = TrackerRequest::Needy {
        peer: self_addr.clone(),
        content_id: content_id.to_string(),
    };
    expect_seeders(exchange(tracker, &request, true).await?)
}

/// Tells the tracker this node is no longer downloading. No reply is
/// expected.
pub async fn announce_stopped(tracker: &PeerAddr, self_addr: &PeerAddr) -> Result<(), AnnounceError> {
    let request = TrackerRequest::Stopped {
        peer: self_addr.clone(),
    };
    exchange(tracker, &request, false).await?;
    Ok(())
}

/// Announces a fully held file; the tracker must acknowledge with SUCCESS.
pub async fn announce_init(
    tracker: &PeerAddr,
    self_addr: &PeerAddr,
    content_id: &str,
) -> Result<(), AnnounceError> {
    let request = TrackerRequest::Init {
        peer: self_addr.clone(),
        content_id: content_id.to_string(),
    };
    match exchange(tracker, &request, true).await? {
        Some(TrackerResponse::Success) => Ok(()),
        _ => Err(AnnounceError::UnexpectedResponse),
    }
}
