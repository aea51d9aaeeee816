use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::sync::atomic::Ordering;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use channel_output::config::Config;
use channel_output::OutputRegistry;

mod opc_server;

use opc_server::OpcServer;

#[derive(Parser)]
#[command(name = "channel_output")]
#[command(about = "Channel output dispatcher\n\nReceives OPC frames over TCP and fans them out to I2C, SPI and DMX outputs.", long_about = None)]
struct Cli {
    /// Path to configuration file (JSON)
    config: String,

    /// More logging: -v for debug (config dumps, statistics), -vv for per-frame hex dumps
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // RUST_LOG takes precedence over the verbosity flag
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Load configuration
    let config_data = fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config file {}", cli.config))?;
    let config: Config = serde_json::from_str(&config_data)
        .with_context(|| format!("Failed to parse config file {}", cli.config))?;

    let registry = OutputRegistry::from_config(&config.channel_outputs);
    tracing::debug!("Active outputs:\n{}", registry.dump_config());

    let mut server = OpcServer::new(config.source, config.frame_size, registry)?;

    // Set up Ctrl-C handler with graceful shutdown
    let running = server.get_running_flag();
    let result = ctrlc::set_handler(move || {
        tracing::info!("Shutting down...");
        running.store(false, Ordering::Relaxed);
    });

    if let Err(e) = result {
        tracing::warn!("Could not set Ctrl-C handler: {}", e);
    }

    // Run server (blocks until shutdown)
    server.run()?;

    // Graceful shutdown - send a blank frame to turn off the lights
    server.shutdown();

    Ok(())
}
