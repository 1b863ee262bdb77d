use std::collections::HashMap;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use crate::peer::PeerAddr;

/// Most seeders a single query returns.
pub const SEEDER_SAMPLE_CAP: usize = 5;

/// Process-wide map from content id to the endpoints currently able to
/// serve that content, shared by every connection handler.
///
/// One exclusive lock guards all mutation and query; registry operations
/// are small and memory-only, so serializing them is acceptable. The
/// registry is constructed once at tracker startup and passed by reference
/// to each handler; it is never persisted.
#[derive(Default)]
pub struct SeederRegistry {
    entries: Mutex<HashMap<String, Vec<PeerAddr>>>,
}

impl SeederRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer` as a seeder for `content_id`. Idempotent: an
    /// endpoint appears at most once per entry, though it may appear under
    /// many entries.
    pub async fn add_seeder(&self, peer: PeerAddr, content_id: &str) {
        let mut entries = self.entries.lock().await;
        let seeders = entries.entry(content_id.to_string()).or_default();
        if !seeders.contains(&peer) {
            seeders.push(peer);
        }
    }

    /// Drops `peer` from every entry it appears under.
    pub async fn remove_seeder(&self, peer: &PeerAddr) {
        let mut entries = self.entries.lock().await;
        for seeders in entries.values_mut() {
            seeders.retain(|s| s != peer);
        }
    }

    /// Returns up to [`SEEDER_SAMPLE_CAP`] seeders for `content_id`: all of
    /// them when that many or fewer are registered, otherwise a uniformly
    /// chosen subset with no duplicates. An unknown id yields an empty
    /// list, not an error.
    pub async fn sample_seeders(&self, content_id: &str) -> Vec<PeerAddr> {
        let entries = self.entries.lock().await;
        match entries.get(content_id) {
            Some(seeders) => seeders
                .choose_multiple(&mut rand::thread_rng(), SEEDER_SAMPLE_CAP)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of seeders currently registered under `content_id`.
    pub async fn seeder_count(&self, content_id: &str) -> usize {
        self.entries
            .lock()
            .await
            .get(content_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ID: &str = "5c372cf82755e0b6ae0f2b4b0d3255bfef956018";
    const OTHER_ID: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    fn peer(n: u16) -> PeerAddr {
        PeerAddr::new("10.0.0.1", 6000 + n)
    }

    #[tokio::test]
    async fn test_add_seeder_is_idempotent() {
        let registry = SeederRegistry::new();
        registry.add_seeder(peer(1), ID).await;
        registry.add_seeder(peer(1), ID).await;
        assert_eq!(registry.seeder_count(ID).await, 1);
    }

    #[tokio::test]
    async fn test_endpoint_may_seed_many_contents() {
        let registry = SeederRegistry::new();
        registry.add_seeder(peer(1), ID).await;
        registry.add_seeder(peer(1), OTHER_ID).await;
        assert_eq!(registry.seeder_count(ID).await, 1);
        assert_eq!(registry.seeder_count(OTHER_ID).await, 1);
    }

    #[tokio::test]
    async fn test_remove_seeder_scans_every_entry() {
        let registry = SeederRegistry::new();
        registry.add_seeder(peer(1), ID).await;
        registry.add_seeder(peer(1), OTHER_ID).await;
        registry.add_seeder(peer(2), ID).await;

        registry.remove_seeder(&peer(1)).await;
        assert_eq!(registry.seeder_count(ID).await, 1);
        assert_eq!(registry.seeder_count(OTHER_ID).await, 0);
        assert_eq!(registry.sample_seeders(ID).await, vec![peer(2)]);
    }

    #[tokio::test]
    async fn test_sample_unknown_id_is_empty() {
        let registry = SeederRegistry::new();
        assert!(registry.sample_seeders("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_sample_returns_all_below_cap() {
        let registry = SeederRegistry::new();
        for n in 0..3 {
            registry.add_seeder(peer(n), ID).await;
        }
        let mut sample = registry.sample_seeders(ID).await;
        sample.sort_by_key(|s| s.port);
        assert_eq!(sample, vec![peer(0), peer(1), peer(2)]);
    }

    #[tokio::test]
    async fn test_sample_is_bounded_and_duplicate_free() {
        let registry = SeederRegistry::new();
        for n in 0..12 {
            registry.add_seeder(peer(n), ID).await;
        }
        for _ in 0..20 {
            let sample = registry.sample_seeders(ID).await;
            assert_eq!(sample.len(), SEEDER_SAMPLE_CAP);
            let mut ports: Vec<u16> = sample.iter().map(|s| s.port).collect();
            ports.sort_unstable();
            ports.dedup();
            assert_eq!(ports.len(), SEEDER_SAMPLE_CAP, "sample contained a duplicate");
            for seeder in &sample {
                assert!(registry.sample_is_registered(seeder, ID).await);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_loses_no_updates() {
        let registry = Arc::new(SeederRegistry::new());
        let mut handles = Vec::new();
        for n in 0..50 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.add_seeder(peer(n), ID).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.seeder_count(ID).await, 50);
    }

    impl SeederRegistry {
        async fn sample_is_registered(&self, seeder: &PeerAddr, content_id: &str) -> bool {
            self.entries
                .lock()
                .await
                .get(content_id)
                .is_some_and(|seeders| seeders.contains(seeder))
        }
    }
}
