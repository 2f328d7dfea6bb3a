use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swerve_runtime::config::{RuntimeConfig, SERVO_PORT};
use swerve_runtime::runtime::{Backend, run};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; built-in four-module defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against simulated modules instead of the servo bus
    #[arg(long)]
    sim: bool,

    /// Serial port of the Feetech servo bus
    #[arg(short, long, default_value = SERVO_PORT)]
    port: String,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };

    let backend = if args.sim {
        Backend::Sim
    } else {
        Backend::Feetech { port: args.port }
    };

    if let Err(e) = run(config, backend).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
