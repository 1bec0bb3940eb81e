//! CLI argument parsing for the recorder binary
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Flags override values from the configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Common arguments shared by all subcommands
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// DLOG recorder
#[derive(Parser, Debug, Clone)]
#[command(name = "dlog_recorder", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Record the simulated channels into a DLOG file
    Record(RecordArgs),
    /// Print header, rows and bookmarks of a DLOG file
    Info(InfoArgs),
}

/// Measurement selectable per channel
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemArg {
    /// Voltage
    U,
    /// Current
    I,
    /// Power
    P,
}

/// Arguments for `record`
#[derive(Parser, Debug, Clone)]
pub struct RecordArgs {
    /// Output file name (relative to the output directory)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Output directory (overrides defaults.output_dir)
    #[arg(short = 'd', long = "dir")]
    pub output_dir: Option<PathBuf>,

    /// Sample period in seconds
    #[arg(short = 'p', long)]
    pub period: Option<f64>,

    /// Total duration in seconds
    #[arg(short = 't', long)]
    pub duration: Option<f64>,

    /// 1-based channels to record (can specify multiple times)
    #[arg(short = 'c', long = "channel", action = clap::ArgAction::Append)]
    pub channels: Vec<u8>,

    /// Measurements per channel
    #[arg(short = 'i', long = "item", value_enum, action = clap::ArgAction::Append)]
    pub items: Vec<ItemArg>,

    /// Digital input pins to record on every selected channel
    #[arg(long = "din", action = clap::ArgAction::Append)]
    pub digital_inputs: Vec<u8>,

    /// Free-text comment stored in the header
    #[arg(long)]
    pub comment: Option<String>,

    /// Wait for Enter before sampling starts
    #[arg(long)]
    pub manual_trigger: bool,

    /// Add a bookmark every N seconds
    #[arg(long = "bookmark-every")]
    pub bookmark_every: Option<f64>,
}

/// Arguments for `info`
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    /// DLOG file to inspect
    pub file: PathBuf,

    /// Maximum number of rows to print
    #[arg(short = 'n', long = "rows", default_value = "10")]
    pub rows: usize,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}
