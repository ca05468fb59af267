//! Clap CLI definitions for Locus.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Locus: a directory for named, movable channel endpoints.
#[derive(Parser)]
#[command(name = "locus", version, about = "Locus channel directory")]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a directory server over TCP until interrupted.
    Serve {
        /// Address to listen on (overrides `listen_addr`).
        #[arg(long)]
        listen: Option<String>,
    },
    /// Log on to a directory and resolve a name.
    Resolve {
        /// Name to look up.
        name: String,
        /// Directory address (overrides `directory_addr`).
        #[arg(long, short = 'd')]
        directory: Option<String>,
        /// Give up after this many milliseconds (overrides `resolve_timeout_ms`).
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Access scope tag; global when omitted.
        #[arg(long)]
        scope: Option<String>,
        /// Local address the directory dials back to (defaults to the
        /// `listen_addr` host on any free port).
        #[arg(long)]
        listen: Option<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
}
