//! CLI argument parsing

use crate::bus;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the bus argument
fn bus_help() -> String {
    format!("Bus the card is on [available: {}]", bus::bus_names_short())
}

#[derive(Parser)]
#[command(name = "gcmemcard")]
#[command(author, version, about = "GameCube memory card reader/writer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short, long, global = true, help = bus_help())]
    pub bus: Option<String>,

    /// Attempts per block read and per block write before giving up
    #[arg(long, global = true, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: u32,

    /// How long to wait for the card to finish an erase or program (ms)
    #[arg(long, global = true, default_value_t = 1000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dump the whole card to a file
    Read {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rewrite the blocks where TARGET differs from BASELINE
    ///
    /// BASELINE must describe what is on the card now, normally the file a
    /// previous `read` produced.
    Write {
        /// Image of the current card contents
        baseline: PathBuf,

        /// Image to put on the card
        target: PathBuf,

        /// Skip reading the written blocks back
        #[arg(long)]
        no_verify: bool,
    },

    /// Show card identification and header
    Info,

    /// List supported buses
    ListBuses,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_write() {
        let cli = Cli::try_parse_from([
            "gcmemcard",
            "-b",
            "dummy",
            "--retries",
            "5",
            "write",
            "old.raw",
            "new.raw",
            "--no-verify",
        ])
        .unwrap();
        assert_eq!(cli.retries, 5);
        assert_eq!(cli.bus.as_deref(), Some("dummy"));
        match cli.command {
            Commands::Write {
                baseline,
                target,
                no_verify,
            } => {
                assert_eq!(baseline, PathBuf::from("old.raw"));
                assert_eq!(target, PathBuf::from("new.raw"));
                assert!(no_verify);
            }
            _ => panic!("expected write"),
        }
    }

    #[test]
    fn test_bus_after_subcommand() {
        let cli = Cli::try_parse_from(["gcmemcard", "info", "-b", "dummy:size=16"]).unwrap();
        assert_eq!(cli.bus.as_deref(), Some("dummy:size=16"));
        assert!(matches!(cli.command, Commands::Info));
    }

    #[test]
    fn test_zero_retries_rejected() {
        assert!(Cli::try_parse_from(["gcmemcard", "--retries", "0", "list-buses"]).is_err());
    }
}
