//! tallyd — the Tally daemon.
//!
//! Single binary that assembles the gateway:
//! - Registry + aggregator (in-memory, no persistence)
//! - Series expirer (only when a TTL is configured)
//! - HTTP front: ingest, scrape, ping
//!
//! # Usage
//!
//! ```text
//! tallyd serve --config /etc/tally/tally.toml --listen 0.0.0.0:9091
//! tallyd check-config --config /etc/tally/tally.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use tally_api::ApiState;
use tally_core::TallyConfig;
use tally_metrics::{Aggregator, Collector, Expirer, Registry, RegistryOptions};

#[derive(Parser)]
#[command(name = "tallyd", about = "Tally metrics push gateway")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept observations and serve them for scraping.
    Serve {
        /// Path to tally.toml. Built-in defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides `server.listen`).
        #[arg(long)]
        listen: Option<String>,

        /// Prefix for every exposed family name (overrides `metrics.prefix`).
        #[arg(long)]
        prefix: Option<String>,

        /// Drop series idle for this long, e.g. `5m` (overrides `metrics.ttl`).
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Validate a config file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            listen,
            prefix,
            ttl,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(prefix) = prefix {
                config.metrics.prefix = prefix;
            }
            if let Some(ttl) = ttl {
                config.metrics.ttl = Some(ttl);
            }
            run_server(config).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            config.validate()?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tallyd=debug,tally=debug"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TallyConfig> {
    match path {
        Some(path) => TallyConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(TallyConfig::default()),
    }
}

async fn run_server(config: TallyConfig) -> anyhow::Result<()> {
    // Everything that can fail on bad config fails here, before binding.
    config.validate().context("invalid configuration")?;
    let addr = config.listen_addr()?;
    let credentials = config.credentials()?;
    let ttl = config.ttl()?;
    let sweep_interval = config.sweep_interval()?;

    info!(
        %addr,
        prefix = %config.metrics.prefix,
        conflict_policy = ?config.metrics.conflict_policy,
        "Tally gateway starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    let registry = Arc::new(Registry::new(RegistryOptions::from_config(&config.metrics)));
    let collector: Arc<dyn Collector> = Arc::new(Aggregator::new(registry.clone()));

    let mut state = ApiState::new(collector);
    match credentials {
        Some(credentials) => {
            info!(username = %credentials.username, "basic auth enabled");
            state = state.with_auth(credentials);
        }
        None => warn!("basic auth disabled, /metrics and /ingest are open"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let expirer_handle = match (ttl, sweep_interval) {
        (Some(ttl), Some(interval)) => {
            let expirer = Expirer::new(registry.clone(), ttl, interval);
            Some(tokio::spawn(async move {
                expirer.run(shutdown_rx).await;
            }))
        }
        _ => {
            info!("series expiry disabled");
            None
        }
    };

    // ── Start API server ───────────────────────────────────────

    let router = tally_api::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "HTTP server listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = expirer_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "expirer task failed");
        }
    }

    info!(series = registry.series_count(), "Tally gateway stopped");
    Ok(())
}
