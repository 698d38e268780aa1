//! Arcade Server binary
//!
//! Serves the lobby hub and its games over a WebSocket endpoint at `/ws`.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use arcade_server::{ArcadeServer, ServerConfig, DEFAULT_ADDR, VERSION};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on (host:port)
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let args = Args::parse();

    info!("Arcade Server v{}", VERSION);

    let config = ServerConfig {
        addr: args.addr.clone(),
        ..Default::default()
    };

    let server = match ArcadeServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };

    info!("Listening on {} (WebSocket endpoint /ws)", args.addr);

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
