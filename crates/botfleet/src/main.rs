// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! botfleet - multi-tenant Telegram bot orchestration platform.
//!
//! Binary entry point: `serve` runs the full platform (ingress, worker
//! pools, sweeps), `doctor` runs the typed health check.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod doctor;
mod serve;
mod shutdown;

use clap::{Parser, Subcommand};

/// botfleet - multi-tenant Telegram bot orchestration platform.
#[derive(Parser, Debug)]
#[command(name = "botfleet", version, about, long_about = None)]
struct Cli {
    /// Path to an explicit configuration file.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the platform: ingress, worker pools and sweeps.
    Serve,
    /// Typed health check: store, KV, queue depths, worker heartbeats.
    Doctor,
}

fn load_config(cli: &Cli) -> botfleet_config::FleetConfig {
    let result = match &cli.config {
        Some(path) => botfleet_config::load_config_from_path(path),
        None => botfleet_config::load_config(),
    };
    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli);

    match cli.command {
        Commands::Serve => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Doctor => {
            let healthy = match doctor::run_doctor(&config).await {
                Ok(healthy) => healthy,
                Err(e) => {
                    eprintln!("error: {e}");
                    false
                }
            };
            std::process::exit(if healthy { 0 } else { 1 });
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // The allocator attribute is compile-time; a trivial allocation
        // proves the binary links with it.
        let v = vec![0u8; 64];
        assert_eq!(v.len(), 64);
    }
}
