// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the laser-geometry inspection core.
mod calibration;
mod config;
mod daemon;
mod error;
mod measurement;
mod modbus;
mod persistence;
mod quality;
mod registers;
mod sensor;
mod state_machine;

use anyhow::Result;
use clap::Parser;
use config::Config;
use log::info;

use std::path::PathBuf;
use tokio::signal;

/// Control core for a RIFTEK RS-485 laser-geometry inspection stand,
/// exposed over Modbus TCP.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// RS-485 serial device, overrides the configuration file
    #[arg(long)]
    serial_device: Option<String>,

    /// Enable or disable the Modbus TCP slave
    #[arg(long)]
    modbus_enabled: Option<bool>,

    /// Modbus server bind address
    #[arg(long)]
    modbus_address: Option<String>,

    /// Modbus server bind port
    #[arg(long)]
    modbus_port: Option<u16>,

    /// Register snapshot database path
    #[arg(long)]
    database_path: Option<String>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    config.apply_args(
        args.serial_device.clone(),
        args.modbus_enabled,
        args.modbus_address.clone(),
        args.modbus_port,
        args.database_path.clone(),
    );

    info!("Starting inspection core daemon");
    let mut daemon = daemon::launch_daemon::Daemon::new();
    daemon.launch(&config).await?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
            daemon.shutdown();
            daemon.join().await?;
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }

    Ok(())
}
