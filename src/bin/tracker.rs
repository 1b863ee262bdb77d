use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use dsft::SeederRegistry;
use dsft::tracker::server;

/// Rendezvous tracker: maps content ids to the peers currently seeding them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 4000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    let registry = Arc::new(SeederRegistry::new());
    server::run(listener, registry).await?;
    Ok(())
}
