//! Command-line interface parsing for finbot-cache
//!
//! The binary is the operator's view of the cache: read a dataset through
//! the cache, force refreshes, inspect or clear entries, change refresh
//! times, or run the background refresh driver in the foreground.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

/// Error types for CLI argument parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// The dataset key is empty or contains unexpected characters
    #[error("Invalid dataset key: '{0}'. Keys use lowercase letters, digits and '_' (e.g. currency_rates)")]
    InvalidKey(String),
}

/// finbot-cache - Scheduled cache for finance bot datasets
#[derive(Parser, Debug)]
#[command(name = "finbot-cache")]
#[command(about = "Scheduled TTL cache for currency, key rate, RUONIA, crypto and weather data")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to config.toml in the XDG config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the cache snapshot (defaults to the XDG cache directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Operator commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read a dataset through the cache, fetching it if stale
    Get {
        #[arg(value_parser = parse_key_arg)]
        key: String,
        /// Refetch even if the cached value is fresh
        #[arg(long)]
        force: bool,
    },
    /// Force a refetch of one dataset, or of every dataset with a source
    Refresh {
        #[arg(value_parser = parse_key_arg)]
        key: Option<String>,
    },
    /// Show age, TTL and next scheduled refresh of every cached entry
    Inspect,
    /// Remove one cached entry, or all of them
    Clear {
        #[arg(value_parser = parse_key_arg)]
        key: Option<String>,
    },
    /// Show or replace the daily refresh times (HH:MM, schedule timezone) of a dataset
    ///
    /// Examples:
    ///   finbot-cache schedule key_rate                 # Show current times
    ///   finbot-cache schedule key_rate 09:30 16:00     # Replace times
    ///   finbot-cache schedule key_rate --clear         # TTL-only refresh
    Schedule {
        #[arg(value_parser = parse_key_arg)]
        key: String,
        /// New refresh times
        #[arg(value_name = "HH:MM", conflicts_with = "clear")]
        times: Vec<String>,
        /// Remove the schedule so only the TTL applies
        #[arg(long)]
        clear: bool,
    },
    /// Run the background refresh driver until interrupted
    Watch {
        /// Seconds between runs (overrides the configured interval)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
        /// Refetch every dataset on each run, not just stale ones
        #[arg(long)]
        force: bool,
    },
}

/// Validates a dataset key argument.
///
/// # Returns
/// * `Ok(String)` for keys made of lowercase ASCII letters, digits and `_`
/// * `Err(CliError::InvalidKey)` otherwise
pub fn parse_key_arg(s: &str) -> Result<String, CliError> {
    let valid = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(s.to_string())
    } else {
        Err(CliError::InvalidKey(s.to_string()))
    }
}
