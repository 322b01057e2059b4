//! Binary running a single-node lock coordinator over HTTP.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;

use error::Result;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use latch_http::HttpServer;
use latch_locks::{DEFAULT_EXPIRY_GRACE, DEFAULT_TTL};
use latch_locks_memory::{MemoryLockTable, MemoryLockTableOptions};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// TTL in milliseconds for acquisitions that do not request one
    #[arg(
        long,
        env = "DEFAULT_TTL_MS",
        default_value_t = millis(DEFAULT_TTL),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    default_ttl_ms: u64,

    /// Delay in milliseconds between a lock lapsing and its reclamation
    #[arg(long, env = "EXPIRY_GRACE_MS", default_value_t = millis(DEFAULT_EXPIRY_GRACE))]
    expiry_grace_ms: u64,

    /// Maximum log level
    #[arg(long, env = "LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,
}

impl Args {
    const fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    const fn table_options(&self) -> MemoryLockTableOptions {
        MemoryLockTableOptions {
            default_ttl: Duration::from_millis(self.default_ttl_ms),
            expiry_grace: Duration::from_millis(self.expiry_grace_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(args.log_level)
            .finish(),
    )?;

    let table = MemoryLockTable::with_options(args.table_options());
    let http_server = HttpServer::new(args.listen_addr());
    let http_handle = http_server.start(latch_http::router(table.clone())).await?;

    info!(
        "Coordinator listening on {} (default ttl {}ms, expiry grace {}ms)",
        http_server.local_addr().unwrap_or_else(|| args.listen_addr()),
        millis(table.default_ttl()),
        args.expiry_grace_ms
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            http_server.shutdown().await;
        }
        _ = http_handle => {
            error!("HTTP server exited");
        }
    }

    Ok(())
}
