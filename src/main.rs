//! natstest - integration tests for NATS request/reply services
//!
//! Sends the requests of declarative JSON test definitions over NATS and
//! checks the replies against templated expectations.

use std::path::PathBuf;

use clap::Parser;
use natstest::cli::{self, spawn::SpawnOptions};
use natstest::commands::Commands;
use natstest::common::{config::Config, logging, Result};
use natstest::daemon;

#[derive(Parser)]
#[command(name = "natstest", about = "Integration tests for NATS request/reply services")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched first for test_<name>.json files
    #[arg(long, global = true)]
    test_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        cli::print_failure(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?.with_test_dir(cli.test_dir.clone());

    match cli.command {
        Commands::Serve { detached } => {
            if detached {
                logging::init_daemon(&config.log.level);
            } else {
                logging::init_cli(&config.log.level);
            }
            daemon::run(&config).await
        }
        command => {
            logging::init_cli(&config.log.level);
            let options = SpawnOptions {
                config: cli.config.as_deref(),
                test_dir: cli.test_dir.as_deref(),
            };
            cli::dispatch(command, &config, options).await
        }
    }
}
