//! Weft address allocation daemon (weftd).
//!
//! Runs a single allocation coordinator over an in-process mesh.
//! Useful for soaking the allocator on its own; real deployments
//! embed [`allocator::Allocator`] behind a network transport.
//!
//! Usage:
//!   weftd [OPTIONS] <UNIVERSE>

mod allocator;
mod config;
mod gossip;
mod mesh;
mod ops;
mod status;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use weft_proto::address::CidrV4;
use weft_proto::defaults::{DEFAULT_TOMBSTONE_TIMEOUT_SECS, SHUTDOWN_LINGER_MS};
use weft_proto::peer::PeerName;

use crate::allocator::Allocator;
use crate::config::Config;
use crate::mesh::MeshRouter;

/// Weft address allocation daemon
#[derive(Parser, Debug)]
#[command(name = "weftd", version, about = "Weft address allocation daemon")]
struct Args {
    /// Address universe to allocate from, e.g. 10.32.0.0/12
    #[arg(value_name = "UNIVERSE")]
    universe: String,

    /// Peer name (aa:bb:cc:dd:ee:ff); derived from the process id
    /// when omitted
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Seconds a dead peer's tombstones linger on the ring
    #[arg(long, default_value_t = DEFAULT_TOMBSTONE_TIMEOUT_SECS)]
    tombstone_timeout: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Seed for deterministic donor selection
    #[arg(long)]
    seed: Option<u64>,

    /// Seconds between status reports
    #[arg(long, default_value_t = 60)]
    status_interval: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("weftd v{} starting", env!("CARGO_PKG_VERSION"));

    let universe: CidrV4 = match args.universe.parse() {
        Ok(u) => u,
        Err(e) => {
            error!("invalid universe '{}': {}", args.universe, e);
            std::process::exit(1);
        }
    };

    let peer = match &args.name {
        Some(name) => match name.parse::<PeerName>() {
            Ok(p) => p,
            Err(e) => {
                error!("invalid peer name '{}': {}", name, e);
                std::process::exit(1);
            }
        },
        // The pid is nonzero, so this never collides with UNKNOWN.
        None => PeerName(u64::from(std::process::id())),
    };

    let mut cfg = Config::new(peer, universe);
    cfg.tombstone_timeout = args.tombstone_timeout;
    cfg.rng_seed = args.seed;

    info!("peer {} allocating from {}", peer, cfg.allocation_range());

    let router = MeshRouter::new(0.0, args.seed.unwrap_or(0));
    let link = Arc::new(router.connect(peer).await);
    let handle = Allocator::new(cfg, link).spawn();
    let _ = router.serve(peer, Arc::new(handle.clone())).await;
    let _gossip_timer = router.start_gossip_timer();

    // Periodic status report
    let status_handle = handle.clone();
    let status_interval = args.status_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(status_interval));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match status_handle.status().await {
                Ok(s) => info!("status:\n{}", s),
                Err(_) => break,
            }
        }
    });

    info!("weftd ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for SIGINT: {}", e);
    }
    info!("SIGINT received, shutting down");

    if let Err(e) = handle.shutdown().await {
        error!("shutdown failed: {}", e);
    }
    // Give the farewell broadcast a moment to drain.
    tokio::time::sleep(Duration::from_millis(SHUTDOWN_LINGER_MS)).await;

    info!("weftd stopped");
}
