//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// A single-worker queue that turns uploaded videos into HLS streams.
#[derive(Parser, Debug)]
#[command(name = "hls-encode-queue", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/config/encode-queue.yaml", env = "CONFIG_PATH", global = true)]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the queue and watch the upload directory.
    Run(RunArgs),

    /// Encode and upload the given files, then exit.
    Encode(EncodeArgs),

    /// Show the recorded status of a job.
    Status {
        /// Job name (the source file name without extension).
        name: String,

        /// Show every record for the name, oldest first.
        #[arg(long, default_value = "false")]
        history: bool,
    },

    /// Validate the configuration file without starting.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Display the parsed configuration.
    #[command(name = "config-show")]
    ConfigShow,
}

/// Arguments for the run subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Submit files already in the upload directory on startup.
    #[arg(long, default_value = "false")]
    pub process_existing: bool,
}

/// Arguments for the encode subcommand.
#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Source videos, processed in the order given.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}
