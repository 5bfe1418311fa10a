//! Command-line interface for spotnav.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, JournalCommand, ReplayCommand, RerouteProviderArg, DEFAULT_REPLAY_INTERVAL_MS,
};

use crate::logging::Verbosity;

/// spotnav - Turn-by-turn guidance to your parking spot
///
/// Replays recorded drives through the guidance engine and inspects the
/// session journal.
#[derive(Debug, Parser)]
#[command(name = "spotnav")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a recorded fix trace against a route
    Replay(ReplayCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Inspect recorded sessions
    #[command(subcommand)]
    Journal(JournalCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "spotnav");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_replay() {
        let cli = Cli::try_parse_from([
            "spotnav", "replay", "--route", "r.json", "--fixes", "f.json", "--mute",
        ])
        .unwrap();
        let Command::Replay(cmd) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(cmd.route, PathBuf::from("r.json"));
        assert_eq!(cmd.fixes, PathBuf::from("f.json"));
        assert_eq!(cmd.interval_ms, DEFAULT_REPLAY_INTERVAL_MS);
        assert_eq!(cmd.reroute_with, RerouteProviderArg::Direct);
        assert!(cmd.mute);
        assert!(!cmd.json);
    }

    #[test]
    fn test_parse_replay_requires_files() {
        assert!(Cli::try_parse_from(["spotnav", "replay", "--route", "r.json"]).is_err());
    }

    #[test]
    fn test_parse_replay_without_reroutes() {
        let cli = Cli::try_parse_from([
            "spotnav",
            "replay",
            "-r",
            "r.json",
            "-f",
            "f.json",
            "--reroute-with",
            "off",
            "-i",
            "50",
        ])
        .unwrap();
        let Command::Replay(cmd) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(cmd.reroute_with, RerouteProviderArg::Off);
        assert_eq!(cmd.interval_ms, 50);
    }

    #[test]
    fn test_parse_journal_list() {
        let cli = Cli::try_parse_from(["spotnav", "journal", "list", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Journal(JournalCommand::List { limit: 5, json: false })
        ));
    }

    #[test]
    fn test_parse_journal_show() {
        let cli = Cli::try_parse_from(["spotnav", "journal", "show", "12", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Journal(JournalCommand::Show { id: 12, json: true })
        ));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli =
            Cli::try_parse_from(["spotnav", "config", "validate", "--file", "x.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli =
            Cli::try_parse_from(["spotnav", "-c", "/custom/config.toml", "config", "path"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_verbosity_flags() {
        let cli = Cli::try_parse_from(["spotnav", "-vv", "config", "path"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Trace);

        let cli = Cli::try_parse_from(["spotnav", "-q", "config", "path"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Quiet);
    }
}
