use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::tracker::protocol::{DecodeError, TrackerRequest, TrackerResponse};
use crate::tracker::registry::SeederRegistry;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),
}

/// Accept loop: one spawned handler per inbound connection, all sharing the
/// registry. Runs until the listener fails.
pub async fn run(listener: TcpListener, registry: Arc<SeederRegistry>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "tracker listening");
    loop {
        let (stream, remote) = listener.accept().await?;
        let handler = RequestHandler::new(Arc::clone(&registry));
        tokio::spawn(async move {
            if let Err(e) = handler.handle(stream).await {
                warn!(%remote, error = %e, "tracker request failed");
            }
        });
    }
}

/// Decodes one request, applies it to the registry, writes the response.
/// One instance serves exactly one connection and holds no state beyond the
/// registry handle.
pub struct RequestHandler {
    registry: Arc<SeederRegistry>,
}

impl RequestHandler {
    pub fn new(registry: Arc<SeederRegistry>) -> Self {
        Self { registry }
    }

    pub async fn handle(self, mut stream: TcpStream) -> Result<(), HandlerError> {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        let request = TrackerRequest::decode(&buf)?;
        debug!(?request, "tracker request");

        let response = match request {
            TrackerRequest::Init { peer, content_id } => {
                self.registry.add_seeder(peer, &content_id).await;
                Some(TrackerResponse::Success)
            }
            TrackerRequest::Started { peer, content_id } => {
                // a downloader is a prospective seeder; register it once
                self.registry.add_seeder(peer, &content_id).await;
                Some(self.seeders_for(&content_id).await)
            }
            TrackerRequest::Needy { content_id, .. } => Some(self.seeders_for(&content_id).await),
            TrackerRequest::Stopped { peer } => {
                self.registry.remove_seeder(&peer).await;
                None
            }
        };

        if let Some(response) = response {
            stream.write_all(&response.encode()).await?;
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn seeders_for(&self, content_id: &str) -> TrackerResponse {
        let seeders = self.registry.sample_seeders(content_id).await;
        TrackerResponse::Seeders {
            content_id: content_id.to_string(),
            seeders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerAddr;
    use crate::tracker::client::{
        announce_init, announce_needy, announce_started, announce_stopped,
    };
    use crate::tracker::registry::SEEDER_SAMPLE_CAP;

    const ID: &str = "5c372cf82755e0b6ae0f2b4b0d3255bfef956018";

    async fn spawn_tracker() -> (PeerAddr, Arc<SeederRegistry>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(SeederRegistry::new());
        tokio::spawn(run(listener, Arc::clone(&registry)));
        (PeerAddr::new("127.0.0.1", addr.port()), registry)
    }

    #[tokio::test]
    async fn test_init_registers_and_acknowledges() {
        let (tracker, registry) = spawn_tracker().await;
        let seeder = PeerAddr::new("127.0.0.1", 7001);

        announce_init(&tracker, &seeder, ID).await.unwrap();
        assert_eq!(registry.seeder_count(ID).await, 1);
    }

    #[tokio::test]
    async fn test_started_registers_and_returns_seeders() {
        let (tracker, registry) = spawn_tracker().await;
        let seeder = PeerAddr::new("127.0.0.1", 7001);
        announce_init(&tracker, &seeder, ID).await.unwrap();

        let downloader = PeerAddr::new("127.0.0.1", 7002);
        let seeders = announce_started(&tracker, &downloader, ID).await.unwrap();

        assert!(seeders.contains(&seeder));
        // the downloader is now registered as a prospective seeder
        assert_eq!(registry.seeder_count(ID).await, 2);
    }

    #[tokio::test]
    async fn test_needy_queries_without_registering() {
        let (tracker, registry) = spawn_tracker().await;
        let seeder = PeerAddr::new("127.0.0.1", 7001);
        announce_init(&tracker, &seeder, ID).await.unwrap();

        let downloader = PeerAddr::new("127.0.0.1", 7002);
        let seeders = announce_needy(&tracker, &downloader, ID).await.unwrap();

        assert_eq!(seeders, vec![seeder]);
        assert_eq!(registry.seeder_count(ID).await, 1);
    }

    #[tokio::test]
    async fn test_needy_for_unknown_content_is_empty() {
        let (tracker, _registry) = spawn_tracker().await;
        let downloader = PeerAddr::new("127.0.0.1", 7002);
        let seeders = announce_needy(&tracker, &downloader, "unknown").await.unwrap();
        assert!(seeders.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_removes_everywhere() {
        let (tracker, registry) = spawn_tracker().await;
        let seeder = PeerAddr::new("127.0.0.1", 7001);
        announce_init(&tracker, &seeder, ID).await.unwrap();
        announce_init(&tracker, &seeder, "other-content").await.unwrap();

        announce_stopped(&tracker, &seeder).await.unwrap();
        // STOPPED sends no reply; give the handler a moment to apply it
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(registry.seeder_count(ID).await, 0);
        assert_eq!(registry.seeder_count("other-content").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifty_concurrent_started_requests() {
        let (tracker, registry) = spawn_tracker().await;

        let mut handles = Vec::new();
        for n in 0..50u16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let downloader = PeerAddr::new("127.0.0.1", 7000 + n);
                announce_started(&tracker, &downloader, ID).await.unwrap()
            }));
        }
        for handle in handles {
            let seeders = handle.await.unwrap();
            assert!(seeders.len() <= SEEDER_SAMPLE_CAP);
        }

        assert_eq!(registry.seeder_count(ID).await, 50, "lost registrations");
    }
}
