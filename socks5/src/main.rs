use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use socks5::{Config, Server};

#[derive(Parser)]
#[command(name = "socks5")]
#[command(about = "Minimal SOCKS5 proxy server (no-auth, CONNECT only)")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen_addr: Option<String>,

    /// Warn when a single stage takes longer than this (milliseconds)
    #[arg(long)]
    slow_stage_ms: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(addr) = &args.listen_addr {
        config.listen_addr = addr.clone();
    }
    if let Some(ms) = args.slow_stage_ms {
        config.slow_stage_threshold_ms = ms;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    info!("配置: {:?}", config);

    let server = Server::new(config);
    server.listen_and_serve().await?;

    Ok(())
}
