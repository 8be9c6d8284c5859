//! meander - show sequencer and audience voting server
//!
//! Usage:
//!   meander serve [--show show.json] [--osc 192.168.1.50:53000]
//!   meander follow [--server http://stage.local:8080]
//!   meander validate show.json
//!   meander init-config

mod config;
mod error;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use meander_client::{ClientSyncAgent, HttpSnapshotSource, SyncStatus, ViewState, WsConnector};
use meander_core::{FileStore, MemoryStore, OscPublisher, ShowGraph, ShowRuntime, StateStore};
use meander_http::{start_server, AppState, RateLimiter};

#[derive(Parser, Debug)]
#[command(name = "meander")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Show sequencer with live audience voting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.config/meander/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the show server
    Serve {
        /// Address to bind the HTTP API to
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Port for the HTTP API
        #[arg(short, long)]
        port: Option<u16>,

        /// Load this show package on startup (replaces any persisted show)
        #[arg(short, long, value_name = "FILE")]
        show: Option<PathBuf>,

        /// Directory for persisted state
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,

        /// Send OSC cues to host:port
        #[arg(long, value_name = "TARGET")]
        osc: Option<String>,

        /// Keep state in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Follow a running server the way a viewer does and print changes
    Follow {
        /// Server base URL
        #[arg(long)]
        server: Option<String>,
    },

    /// Check a show package and print any validation issues
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Create a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the configuration file path
    ConfigPath,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            port,
            show,
            state_dir,
            osc,
            ephemeral,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = state_dir {
                config.storage.state_dir = Some(dir);
            }
            if let Some(target) = osc {
                config.osc.enabled = true;
                config.osc.target = target;
            }
            if ephemeral {
                config.storage.ephemeral = true;
            }
            serve(config, show).await
        }
        Commands::Follow { server } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(server) = server {
                config.client.server_url = server;
            }
            follow(config).await
        }
        Commands::Validate { file } => validate(&file),
        Commands::InitConfig { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::config_path()?,
            };
            Config::create_default_config_file(&path, force)?;
            println!("Created default config at: {}", path.display());
            Ok(())
        }
        Commands::ConfigPath => {
            println!("{}", Config::config_path()?.display());
            Ok(())
        }
        Commands::Version => {
            println!("meander {}", env!("CARGO_PKG_VERSION"));
            println!("Show sequencer with live audience voting");
            Ok(())
        }
    }
}

/// An explicit `--config` must exist; the default location may be absent.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load_or_default()),
    }
}

async fn serve(config: Config, show: Option<PathBuf>) -> Result<()> {
    let store: Arc<dyn StateStore> = if config.storage.ephemeral {
        log::info!("[RUNTIME] Ephemeral mode, state is kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        let dir = config.state_dir()?;
        let store = FileStore::open(&dir)
            .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
        log::info!("[RUNTIME] Persisting state in {}", dir.display());
        Arc::new(store)
    };

    let osc = if config.osc.enabled {
        OscPublisher::new(&config.osc_target())?
    } else {
        OscPublisher::noop()
    };

    let runtime = Arc::new(ShowRuntime::new(store, osc, config.runtime_options()));

    match runtime.restore() {
        Some(active) => log::info!("[RUNTIME] Resuming at '{}'", active.id),
        None => log::info!("[RUNTIME] No persisted show, waiting for an upload"),
    }

    if let Some(path) = show {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read show package {}", path.display()))?;
        let active = runtime
            .load_package(&json)
            .with_context(|| format!("Failed to load show package {}", path.display()))?;
        log::info!(
            "[RUNTIME] Loaded {}, starting at '{}'",
            path.display(),
            active.id
        );
    }

    let limiter = RateLimiter::new(config.vote.rate_limit_votes, config.vote_rate_window());
    let state = Arc::new(AppState::new(runtime, limiter));
    start_server(state, config.bind_addr())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn follow(config: Config) -> Result<()> {
    let server_url = config.client.server_url.as_str();
    let push = WsConnector::new(server_url)?;
    let snapshots = HttpSnapshotSource::new(
        server_url,
        Duration::from_millis(config.client.request_timeout_ms),
    )?;

    println!("Following {}", server_url);
    let mut agent = ClientSyncAgent::spawn(push, snapshots, config.agent_config());
    let mut status = agent.status();
    let mut view = agent.view();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                print_status(&status.borrow_and_update());
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                print_view(&view.borrow_and_update());
            }
            _ = &mut shutdown => break,
        }
    }

    agent.shutdown();
    Ok(())
}

fn print_status(status: &SyncStatus) {
    let mut line = format!("[status] {:?}", status.connection);
    if status.polling {
        line.push_str(" (polling)");
    }
    if status.push_exhausted {
        line.push_str(" (push retrying slowly)");
    }
    println!("{}", line);
}

fn print_view(view: &ViewState) {
    if let Some(countdown) = &view.countdown {
        println!(
            "[vote] {}: {}s left",
            countdown.fork_id, countdown.remaining_seconds
        );
        return;
    }
    let active = view
        .active
        .as_ref()
        .map(|a| format!("{} ({})", a.id, a.kind.as_str()))
        .unwrap_or_else(|| "-".to_string());
    let stale = if view.stale { " [stale]" } else { "" };
    println!(
        "[show] {} at {}{}",
        view.show_id.as_deref().unwrap_or("-"),
        active,
        stale
    );
    if let Some(result) = &view.last_result {
        println!(
            "[vote] {} counts {:?}, winner #{}",
            result.fork_id, result.counts, result.winner_index
        );
    }
    if let Some(error) = &view.validation_error {
        println!("[upload rejected] {}", error);
    }
}

fn validate(path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match ShowGraph::from_json(&json) {
        Ok(graph) => {
            println!(
                "{}: show '{}' with {} states, starts at '{}'",
                path.display(),
                graph.show_id(),
                graph.len(),
                graph.initial_node_id()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            for issue in e.issues() {
                eprintln!("  - {}", issue);
            }
            anyhow::bail!("invalid show package")
        }
    }
}
