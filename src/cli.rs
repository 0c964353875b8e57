//! Command-line interface for voicecall
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time voice calls with AI characters
#[derive(Parser, Debug)]
#[command(
    name = "voicecall",
    version,
    about = "Real-time voice calls with AI characters"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a call duration.
///
/// Bare numbers are seconds; anything `humantime` accepts works too
/// (`30s`, `5m`, `1h30m`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a voice call with a character
    Call {
        /// Character id (see `voicecall characters`)
        character: String,

        /// Hang up automatically after this long. Examples: 90, 30s, 5m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        max_duration: Option<Duration>,

        /// Use a WAV file as the microphone
        #[arg(long, value_name = "FILE")]
        input_wav: Option<PathBuf>,

        /// Audio input device (overrides config)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Speech language code (overrides config). Examples: id-ID, en-US
        #[arg(long, value_name = "LANG")]
        language: Option<String>,
    },

    /// List the available voices
    Voices,

    /// List characters and the voice each one speaks with
    Characters,

    /// List audio devices
    Devices,

    /// Check microphone, speaker and API connectivity
    Check,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (API key masked)
    Show,
    /// Dump a commented configuration template
    Dump,
    /// Print the default configuration file path
    Path,
}
