use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use dsft::metafile::{self, DEFAULT_SEGMENT_SIZE, TorrentDescriptor};
use dsft::tracker::{announce_init, announce_stopped};
use dsft::{DownloadManager, PeerAddr, SegmentServer, SegmentStore};

/// Peer client: create metadata files, share completed files, download new
/// ones.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a metadata file describing an existing local file
    Create {
        /// The file to describe
        file: PathBuf,
        /// Tracker coordinating this file, as host:port
        #[arg(short, long)]
        tracker: PeerAddr,
        /// Bytes per segment
        #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE)]
        segment_size: usize,
    },
    /// Announce a completed file to the tracker and serve its segments
    Share {
        /// Metadata file describing the shared file
        metafile: PathBuf,
        /// Port to serve segments on
        #[arg(short, long, default_value_t = 6881)]
        port: u16,
        /// Host name other peers should reach this node under
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Directory holding the completed file
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Download the file described by a metadata file, then seed it
    Download {
        /// Metadata file describing the wanted file
        metafile: PathBuf,
        /// Port to serve segments on while downloading and after
        #[arg(short, long, default_value_t = 6881)]
        port: u16,
        /// Host name other peers should reach this node under
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Directory to download into
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Create {
            file,
            tracker,
            segment_size,
        } => create(file, tracker, segment_size),
        Command::Share {
            metafile,
            port,
            host,
            dir,
        } => share(metafile, port, host, dir).await,
        Command::Download {
            metafile,
            port,
            host,
            dir,
        } => download(metafile, port, host, dir).await,
    }
}

fn create(
    file: PathBuf,
    tracker: PeerAddr,
    segment_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = TorrentDescriptor::from_source_file(&file, tracker, segment_size)?;
    let out = file.with_extension("torrent");
    metafile::write_metafile(&descriptor, &out)?;
    println!(
        "Wrote {} ({} segments of {} bytes)",
        out.display(),
        descriptor.segment_count,
        descriptor.segment_size
    );
    Ok(())
}

async fn share(
    metafile: PathBuf,
    port: u16,
    host: String,
    dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = metafile::load_metafile(&metafile)?;
    let store = Arc::new(SegmentStore::open(descriptor, &dir)?);
    if !store.is_assembled() {
        return Err(format!(
            "{} is not complete under {}; download it first",
            store.descriptor().file_name,
            dir.display()
        )
        .into());
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let self_addr = PeerAddr::new(host, port);
    let tracker = store.descriptor().tracker.clone();
    announce_init(&tracker, &self_addr, &store.descriptor().content_id()).await?;
    println!(
        "Sharing {} as {}; press Ctrl-C to stop.",
        store.descriptor().file_name,
        self_addr
    );

    let server = Arc::new(SegmentServer::new(store));
    tokio::select! {
        result = server.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            announce_stopped(&tracker, &self_addr).await?;
        }
    }
    Ok(())
}

async fn download(
    metafile: PathBuf,
    port: u16,
    host: String,
    dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = metafile::load_metafile(&metafile)?;
    let store = Arc::new(SegmentStore::open(descriptor, &dir)?);
    let self_addr = PeerAddr::new(host, port);
    let tracker = store.descriptor().tracker.clone();

    // serve segments to other peers for the whole session, partial or not
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let server = Arc::new(SegmentServer::new(Arc::clone(&store)));
    tokio::spawn(server.run(listener));

    let manager = DownloadManager::new(Arc::clone(&store), self_addr.clone());
    manager.run().await?;

    println!(
        "Download complete: {} ({} bytes)",
        store.descriptor().file_name,
        store.descriptor().file_size
    );
    println!("Seeding; press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    announce_stopped(&tracker, &self_addr).await?;
    Ok(())
}
