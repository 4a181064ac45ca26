use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediarelay")]
#[command(author, version, about = "HTTP front-end for running ffmpeg jobs")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "MEDIARELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server (the default when no command is given)
    Start {
        /// Host to bind to [default: server.host from config]
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on [default: $PORT, then server.port from config]
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that the transcoder is installed and runs
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
