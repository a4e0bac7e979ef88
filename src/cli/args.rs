//! CLI argument definitions
//!
//! All Clap derive structs for `dragtree` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::schema::SessionKind;
use crate::observability::{LogFormat, LogOptions, LogTarget};

// ============================================================================
// Root CLI
// ============================================================================

/// Drag-race staging, auto-start and light-tree controller.
#[derive(Parser, Debug)]
#[command(name = "dragtree", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "DRAGTREE_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "DRAGTREE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true, env = "DRAGTREE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging options selected by the global flags.
    #[must_use]
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            format: self.log_format,
            verbosity: self.verbose,
            color: self.color,
            target: LogTarget::from_path(self.log_file.as_deref()),
        }
    }
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted race through both controllers.
    Simulate(SimulateArgs),

    /// Print the class preset table.
    Presets(PresetsArgs),

    /// Validate race configuration files.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Simulate
// ============================================================================

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Racing class (machine or display name).
    #[arg(long, conflicts_with = "config")]
    pub class: Option<String>,

    /// Path to a race configuration file.
    #[arg(short, long, env = "DRAGTREE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Scripted scenario to run.
    #[arg(long, default_value = "normal")]
    pub scenario: Scenario,

    /// Session kind (defaults to the configuration's session).
    #[arg(long)]
    pub session: Option<SessionArg>,

    /// Run timers at real speed instead of test acceleration.
    #[arg(long)]
    pub realtime: bool,

    /// Write JSONL race events to this file instead of stderr.
    #[arg(long)]
    pub events_file: Option<PathBuf>,

    /// Do not emit JSONL race events at all.
    #[arg(long, conflicts_with = "events_file")]
    pub no_events: bool,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "DRAGTREE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Summary format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Scripted beam sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Scenario {
    /// Both lanes stage cleanly; the tree releases.
    #[default]
    Normal,
    /// Lane 2 pre-stages but never stages.
    Timeout,
    /// Lane 1 rolls through the guard beam.
    Rollout,
    /// Lane 1 deep stages.
    DeepStage,
    /// Lane 2 backs out of stage and rolls back in.
    BackOut,
}

/// Session kind as a CLI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SessionArg {
    /// Eliminations
    #[default]
    Elimination,
    /// Time trials
    TimeTrial,
}

impl From<SessionArg> for SessionKind {
    fn from(arg: SessionArg) -> Self {
        match arg {
            SessionArg::Elimination => Self::Elimination,
            SessionArg::TimeTrial => Self::TimeTrial,
        }
    }
}

// ============================================================================
// Presets / Validate / Version
// ============================================================================

/// Arguments for `presets`.
#[derive(Args, Debug)]
pub struct PresetsArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================
