use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::game::GameServer;
use shared::{DEFAULT_PORT, MAX_CLIENTS};
use std::net::IpAddr;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,
    /// Maximum number of simultaneous players
    #[arg(short, long, default_value_t = MAX_CLIENTS)]
    max_clients: usize,
}

/// Parses command-line arguments, starts the server socket and runs the
/// game loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = ServerConfig::default()
        .with_bind_ip(args.host)
        .with_capacity(args.max_clients);
    let mut game = GameServer::new(config);

    if let Err(e) = game.start(args.port) {
        error!("Failed to start server on {}:{}: {}", args.host, args.port, e);
        return Err(e.into());
    }

    tokio::select! {
        _ = game.run(args.tick_rate) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    game.shutdown();
    Ok(())
}
