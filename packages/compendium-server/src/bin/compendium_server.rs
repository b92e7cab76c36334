//! Compendium server: serves the graph over a Unix socket.
//!
//! Usage:
//!   compendium-server [--socket /tmp/compendium.sock] [--data-dir ./compendium-data]
//!
//! Every option also reads a `COMPENDIUM_*` environment variable. Logging is
//! controlled with `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use compendium::server::serve;
use compendium::{Compendium, CompendiumConfig};

#[derive(Parser, Debug)]
#[command(name = "compendium-server", version, about = "Versioned dependency graph server")]
struct Args {
    /// Unix socket to listen on
    #[arg(long, env = "COMPENDIUM_SOCKET", default_value = "/tmp/compendium.sock")]
    socket: PathBuf,

    /// YAML file with base configuration; flags override its values
    #[arg(long, env = "COMPENDIUM_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot directory (in-memory when omitted)
    #[arg(long, env = "COMPENDIUM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "COMPENDIUM_TABLE_NAME")]
    table_name: Option<String>,

    /// Threads for ingestion fan-out (default: rayon global pool)
    #[arg(long, env = "COMPENDIUM_FANOUT_THREADS")]
    fanout_threads: Option<usize>,

    #[arg(long, env = "COMPENDIUM_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    #[arg(long, env = "COMPENDIUM_RETAINED_RUNS")]
    retained_runs: Option<usize>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(PathBuf, CompendiumConfig)> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => CompendiumConfig::default(),
        };
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        if let Some(name) = self.table_name {
            config.table_name = name;
        }
        if self.fanout_threads.is_some() {
            config.fanout_threads = self.fanout_threads;
        }
        if let Some(n) = self.queue_capacity {
            config.queue_capacity = n;
        }
        if let Some(n) = self.retained_runs {
            config.retained_runs = n;
        }
        config.validate()?;
        Ok((self.socket, config))
    }
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove socket");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (socket_path, config) = Args::parse().into_config()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = ?config.data_dir,
        table = %config.table_name,
        "starting compendium-server"
    );

    let service = Arc::new(Compendium::open(config).context("opening store")?);
    tracing::info!(items = service.store().item_count(), "store opened");

    // Stale socket from a previous run
    remove_socket(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    tracing::info!(socket = %socket_path.display(), "listening");

    let service_for_signal = Arc::clone(&service);
    let socket_for_signal = socket_path.clone();
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("registering signal handlers")?;
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!(signal = sig, "received signal, draining runs and flushing");
            match service_for_signal.shutdown() {
                Ok(()) => tracing::info!("flushed"),
                Err(e) => tracing::error!(error = %e, "flush failed"),
            }
            remove_socket(&socket_for_signal);
            std::process::exit(0);
        }
    });

    let shutdown = Arc::new(Notify::new());
    serve(listener, Arc::clone(&service), shutdown).await?;

    service.shutdown().context("flushing on shutdown")?;
    remove_socket(&socket_path);
    tracing::info!("exiting");
    Ok(())
}
