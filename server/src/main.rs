use clap::Parser;
use log::{info, warn};
use server::audit::AuditLog;
use server::clock::{Clock, SystemClock};
use server::config::GameConfig;
use server::game::World;
use server::network::Server;
use shared::{GAME_DURATION_SECS, TICK_INTERVAL_MS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Milliseconds between scheduler ticks
    #[arg(long, default_value_t = TICK_INTERVAL_MS)]
    tick_ms: u64,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Length of a match in seconds
    #[arg(long, default_value_t = GAME_DURATION_SECS)]
    game_duration_secs: u64,

    /// Pause between matches in seconds
    #[arg(long, default_value = "30")]
    restart_delay_secs: u64,

    /// Drop clients that have sent nothing for this many seconds
    #[arg(long, default_value = "30")]
    client_timeout_secs: u64,

    /// Terrain seed for the first match
    #[arg(long)]
    seed: Option<String>,

    /// Append match events as JSON lines to this file
    #[arg(long)]
    audit_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = GameConfig {
        game_duration: Duration::from_secs(args.game_duration_secs),
        restart_delay: Duration::from_secs(args.restart_delay_secs),
        first_seed: args.seed,
        ..GameConfig::default()
    };

    let audit = match &args.audit_log {
        Some(path) => match AuditLog::open(path).await {
            Ok(log) => {
                info!("Writing audit log to {}", path.display());
                log
            }
            Err(e) => {
                warn!("Could not open audit log {}: {}", path.display(), e);
                AuditLog::disabled()
            }
        },
        None => AuditLog::disabled(),
    };

    let clock = Arc::new(SystemClock);
    let rng_seed = clock.now_ms();
    let world = World::new(config, clock, rng_seed, audit);

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        Duration::from_millis(args.tick_ms),
        args.max_clients,
        Duration::from_secs(args.client_timeout_secs),
        world,
    )
    .await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
