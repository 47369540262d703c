//! Unblocking web proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────────┐
//!                     │                   UNBLOCK PROXY                        │
//!                     │                                                        │
//!   Browser request   │  ┌──────────┐   ┌─────────────┐   ┌────────────────┐  │
//!   ──────────────────┼─▶│  http    │──▶│  request    │──▶│   upstream     │──┼──▶ Remote
//!                     │  │ server   │   │ target/orig │   │   fetcher      │  │    site
//!                     │  └──────────┘   └─────────────┘   └───────┬────────┘  │
//!                     │                                           │           │
//!                     │                                           ▼           │
//!   Browser response  │  ┌──────────┐   ┌─────────────┐   ┌────────────────┐  │
//!   ◀─────────────────┼──│ response │◀──│  rewrite    │◀──│ content router │◀─┼─── body
//!                     │  │          │   │ html + shim │   │ html/stream/buf│  │
//!                     │  └──────────┘   └─────────────┘   └────────────────┘  │
//!                     │                                                        │
//!                     │  config · security/headers · observability · lifecycle │
//!                     └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use unblock_proxy::config::loader::{load_config, ConfigError};
use unblock_proxy::config::validation::validate_config;
use unblock_proxy::config::ProxyConfig;
use unblock_proxy::http::HttpServer;
use unblock_proxy::lifecycle::{signals, Shutdown};
use unblock_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "unblock-proxy")]
#[command(about = "Forward proxy that rewrites pages so browsing stays behind it", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "unblock-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        prefix = %config.proxy.prefix,
        page_prefix = %config.proxy.page_prefix,
        timeout_secs = config.upstream.timeout_secs,
        raw_redirects = ?config.upstream.raw_redirects,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
