//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Warden -- in-process application security monitoring.
///
/// Use `warden <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
pub struct Cli {
    /// Path to the warden.toml configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage detection rules.
    Rules(RulesArgs),

    /// Replay recorded requests through the detection pipeline.
    Replay(ReplayArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- rules ----

/// Manage detection rules.
#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub action: RulesAction,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// Load rules and report which ones the pipeline would install.
    Validate {
        /// Rule file or directory (default: `appsec.rules_path` from config).
        path: Option<PathBuf>,
    },
    /// List rules with their type, category and input addresses.
    List {
        /// Rule file or directory (default: `appsec.rules_path` from config).
        path: Option<PathBuf>,
    },
}

// ---- replay ----

/// Replay recorded requests (one JSON object per line).
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON Lines file with recorded requests.
    #[arg(long)]
    pub requests: PathBuf,

    /// Override the collector base URL.
    #[arg(long)]
    pub collector: Option<String>,

    /// Override the rules path.
    #[arg(long)]
    pub rules: Option<PathBuf>,
}

// ---- config ----

/// Manage warden configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, appsec).
        #[arg(long)]
        section: Option<String>,
    },
}
