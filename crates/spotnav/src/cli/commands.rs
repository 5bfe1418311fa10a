//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Default interval between replayed fixes.
pub const DEFAULT_REPLAY_INTERVAL_MS: u64 = 1000;

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// Route file (JSON: `steps` and `destination`)
    #[arg(short, long, value_name = "FILE")]
    pub route: PathBuf,

    /// Fix trace (JSON array of fixes)
    #[arg(short, long, value_name = "FILE")]
    pub fixes: PathBuf,

    /// Milliseconds between replayed fixes
    #[arg(short, long, default_value_t = DEFAULT_REPLAY_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Disable spoken announcements
    #[arg(short, long)]
    pub mute: bool,

    /// Provider used when the driver leaves the route
    #[arg(long, value_enum, default_value = "direct")]
    pub reroute_with: RerouteProviderArg,

    /// Output events and the final state as JSON lines
    #[arg(short, long)]
    pub json: bool,
}

/// Providers available for reroutes during a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RerouteProviderArg {
    /// Straight line to the destination
    #[default]
    Direct,
    /// No reroutes; every request fails
    Off,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Journal commands.
#[derive(Debug, Subcommand)]
pub enum JournalCommand {
    /// List recent sessions
    List {
        /// Maximum number of sessions
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show a session and its events
    Show {
        /// Session id
        id: i64,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show journal statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}
