//! DMR Gateway daemon
//!
//! Joins one MMDVM repeater to several DMR network cores and an optional
//! reflector network, as described by a TOML configuration file.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration file
//! dmrgateway
//!
//! # Run with a specific file and more logging
//! dmrgateway --config /etc/dmrgateway.toml --log-level debug
//!
//! # Only validate the configuration
//! dmrgateway --config /etc/dmrgateway.toml check
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dmr_gateway::{setup, GatewayConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DMR gateway between a repeater, network cores and reflectors
#[derive(Parser, Debug)]
#[command(name = "dmrgateway")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "dmrgateway.toml")]
    config: PathBuf,

    /// Log filter (trace, debug, info, or a full directive); overrides the
    /// configuration file, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and exit
    Check,
}

fn init_logging(args: &Args, config: Option<&GatewayConfig>) {
    let configured = args
        .log_level
        .clone()
        .or_else(|| config.map(|c| c.log.filter.clone()))
        .unwrap_or_else(|| "dmrgateway=info,dmr_gateway=info,dmr_protocol=info".to_string());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&configured))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check(config: &GatewayConfig) {
    println!("Repeater: {}:{}", config.repeater.address, config.repeater.port);
    for network in &config.networks {
        println!(
            "Network {}: {}:{} ({} rules){}",
            network.name,
            network.address,
            network.port,
            network.rewrite.len(),
            if network.enabled { "" } else { ", disabled" }
        );
    }
    if let Some(reflector) = &config.reflector {
        println!(
            "Reflector: hosts {}, {} TG {}{}",
            reflector.hosts_file,
            reflector.slot,
            reflector.tg,
            if reflector.enabled { "" } else { ", disabled" }
        );
    }
    println!("Configuration OK");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = GatewayConfig::from_file(&args.config);
    init_logging(&args, loaded.as_ref().ok());
    let config = loaded.with_context(|| format!("cannot load {}", args.config.display()))?;

    if let Some(Commands::Check) = args.command {
        check(&config);
        return Ok(());
    }

    info!("DMR Gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let mut gateway = setup::build(&config, &cancel).context("cannot start the gateway")?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    gateway.run(cancel).await;
    info!("DMR Gateway stopped");
    Ok(())
}
