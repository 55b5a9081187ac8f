//! rce-daemon - remote code execution daemon.
//!
//! Listens for framed TCP connections and serves spawn sessions and kill
//! requests. See the library crate for the protocol and session model.

use anyhow::Result;
use clap::Parser;
use rce_daemon::server::Server;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Remote code execution daemon.
#[derive(Parser, Debug)]
#[command(name = "rce-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Listen address; a bare `:port` binds all interfaces
    #[arg(long, default_value = ":8999")]
    address: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let server = Server::bind(&args.address).await?;
    info!(address = %server.local_addr()?, "rce daemon listening");

    tokio::select! {
        result = server.run() => result,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}
