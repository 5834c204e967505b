use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive the fetch bridge from the command line
#[derive(Parser)]
#[command(name = "jsfetch")]
#[command(about = "Run requests through the guest fetch bridge", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a URL the way a guest would
    Fetch {
        url: String,
        /// Request method (defaults to GET, or POST when data is given)
        #[arg(short = 'X', long)]
        method: Option<String>,
        /// Request header, as 'Name: value'. May be repeated
        #[arg(short = 'H', long)]
        header: Vec<String>,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Config file (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Deadline for the whole exchange, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print a JSON summary instead of the raw response
        #[arg(long)]
        json: bool,
    },
    /// Show the effective transport configuration
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
