//! devtap command line

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use devtap_chaos::{ChaosConfig, PresetCatalog};
use devtap_proxy::{ProxyServer, ProxyServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::DevtapConfig;

#[derive(Parser)]
#[command(name = "devtap")]
#[command(about = "Intercepting chaos proxy for frontend development")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in front of an upstream origin
    Serve(ServeArgs),
    /// List the built-in chaos presets
    Presets,
}

/// CLI arguments for the serve command
#[derive(Args)]
struct ServeArgs {
    /// Configuration file path (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream origin to relay to (e.g. http://localhost:3000)
    #[arg(short, long)]
    upstream: Option<String>,

    /// Apply a chaos preset at startup
    #[arg(short, long)]
    preset: Option<String>,

    /// Seed for reproducible chaos decisions
    #[arg(long)]
    chaos_seed: Option<u64>,

    /// Traffic log ring capacity
    #[arg(long)]
    max_log_entries: Option<usize>,

    /// Page sessions retained before LRU eviction
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Overlay sidecar base URL
    #[arg(long)]
    overlay: Option<String>,

    /// Do not splice the instrumentation script into HTML documents
    #[arg(long)]
    no_inject: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Presets => {
            print_presets();
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let file = match &args.config {
        Some(path) => DevtapConfig::load(path)?,
        None => DevtapConfig::default(),
    };

    let Some(upstream) = args.upstream.or(file.upstream) else {
        bail!("no upstream origin configured; pass --upstream or set it in the config file");
    };
    let listen = args
        .listen
        .or(file.listen)
        .unwrap_or_else(|| "127.0.0.1:8899".to_string());

    let mut chaos = resolve_chaos(args.preset.or(file.preset), file.chaos)?;
    if let Some(seed) = args.chaos_seed {
        chaos.seed = seed;
    }

    let defaults = ProxyServerConfig::default();
    let server_config = ProxyServerConfig {
        upstream: upstream.clone(),
        overlay_url: args.overlay.or(file.overlay),
        max_log_entries: args
            .max_log_entries
            .or(file.max_log_entries)
            .unwrap_or(defaults.max_log_entries),
        max_sessions: args.max_sessions.or(file.max_sessions).unwrap_or(defaults.max_sessions),
        session_timeout: file
            .session_timeout_secs
            .map_or(defaults.session_timeout, Duration::from_secs),
        inject_script: !args.no_inject && file.inject_script.unwrap_or(true),
    };

    let rules = chaos.rules.len();
    let server = ProxyServer::new(server_config, chaos)
        .context("building proxy server")?;
    let router = server.router();

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(listen = %listener.local_addr()?, %upstream, rules, "devtap proxy up");

    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}

/// Pick the startup chaos config: inline block wins, then preset, then none
fn resolve_chaos(preset: Option<String>, inline: Option<ChaosConfig>) -> anyhow::Result<ChaosConfig> {
    if let Some(chaos) = inline {
        return Ok(chaos);
    }
    match preset {
        Some(name) => {
            let catalog = PresetCatalog::new();
            match catalog.get(&name) {
                Some(preset) => Ok(preset.config),
                None => bail!(
                    "unknown preset '{name}'; available: {}",
                    catalog.list().join(", ")
                ),
            }
        }
        None => Ok(ChaosConfig::default()),
    }
}

fn print_presets() {
    let catalog = PresetCatalog::new();
    for (name, description) in catalog.list_with_description() {
        println!("{name:18} {description}");
    }
}
