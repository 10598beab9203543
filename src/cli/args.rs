use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fimctx")]
#[command(version)]
#[command(
    about = "Keeps syntax trees, visit history and debounced completion triggers for an editor session",
    long_about = None
)]
pub struct Cli {
    /// Path to configuration file (replaces the global and local files)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a workspace and turn file changes into editor events
    Watch {
        /// Workspace directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Replay editor events from a JSON-lines file
    Replay {
        /// One JSON event per line; `-` reads standard input
        file: PathBuf,

        /// Workspace root the event paths are relative to
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Initialize configuration
    Init,
}
