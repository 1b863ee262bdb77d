//! Distributed segmented file transfer.
//!
//! A tracker maps content ids to the peers currently able to serve them;
//! clients fetch missing segments concurrently from sampled seeders, verify
//! each against its expected digest, reassemble the original file, and
//! serve segments to other peers in turn.

pub mod download;
pub mod hashing;
pub mod metafile;
pub mod peer;
pub mod storage;
pub mod tracker;

// Re-export commonly used types and functions for easier access
pub use download::{DownloadError, DownloadManager};
pub use metafile::{TorrentDescriptor, load_metafile, parse_metafile, write_metafile};
pub use peer::PeerAddr;
pub use peer::server::SegmentServer;
pub use storage::SegmentStore;
pub use tracker::SeederRegistry;
