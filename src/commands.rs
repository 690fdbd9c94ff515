//! CLI command definitions
//!
//! Defines the clap commands for the natstest CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the test service in the foreground
    Serve {
        /// Log to the service log file (used when spawned by other commands)
        #[arg(long, hide = true)]
        detached: bool,
    },

    /// Run a test by name, or every public test with `all`
    Run {
        /// Test name
        #[arg(default_value = "all")]
        name: String,
    },

    /// Reload test definitions from the configured paths
    Reload,

    /// Store a test definition under a name and run it
    Put {
        /// Test name
        name: String,

        /// JSON file holding the test entries
        file: PathBuf,
    },

    /// Remove a test from the service catalog
    #[command(alias = "rm")]
    Delete {
        /// Test name
        name: String,
    },

    /// Show service state
    Status {
        /// Also check the message bus connection
        #[arg(long)]
        check: bool,
    },

    /// List test names
    #[command(alias = "ls")]
    List {
        /// Include internal tests
        #[arg(long, short)]
        all: bool,
    },

    /// Stop the service
    Stop,

    /// Run a test definition file directly, without a service
    Exec {
        /// JSON file holding the test entries
        file: PathBuf,

        /// Print the resolved requests and actual responses
        #[arg(long, short)]
        verbose: bool,
    },
}
