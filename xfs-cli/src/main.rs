//! xfsctl entry point.
//!
//! ```text
//! xfsctl status                          Live device status
//! xfsctl capabilities                    Device capabilities
//! xfsctl info <category> [json]          Any info query
//! xfsctl execute <command> [json] --wait Issue a command
//! xfsctl cancel [request-id] --sync      Cancel a request
//! xfsctl watch                           Print events until Ctrl-C
//! xfsctl --config <path>                 Load a custom config TOML
//! xfsctl --gen-config                    Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xfs_cli::commands::{self, Command};
use xfs_cli::config::CliConfig;
use xfs_core::{DeviceProxy, XfsContext};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "xfsctl", about = "Drive an XFS device server", version)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "xfsctl.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", CliConfig::default_toml()?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        eprintln!("no sub-command given; see --help");
        std::process::exit(2);
    };

    // Load config; a bad file is reported once tracing is up.
    let loaded = CliConfig::load(&cli.config);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = &loaded {
        warn!("{}: {e}; using defaults", cli.config.display());
    }

    info!("xfsctl v{}", env!("CARGO_PKG_VERSION"));
    info!("device: {} ({})", config.device.device_id, config.device.device_class);
    info!("address: {}", config.device.address);

    let proxy = DeviceProxy::from_config(&config.device, XfsContext::new())?;
    commands::run(command, &proxy).await
}
