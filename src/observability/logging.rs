//! Logging initialization for `dragtree`.
//!
//! Diagnostics go through `tracing`. The verbosity flags scope to this crate
//! only, so a `-vv` race log is not drowned by the metrics exporter's HTTP
//! stack. Race events own stderr by default, which is why logs can be sent
//! to a file instead.

use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::cli::args::ColorChoice;

/// Environment variable that overrides the verbosity flags.
pub const LOG_LEVEL_ENV: &str = "DRAGTREE_LOG_LEVEL";

/// Target name of every span and event this crate emits.
const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogTarget {
    /// Standard error, shared with the race event stream.
    #[default]
    Stderr,
    /// Appended to a file.
    File(PathBuf),
}

impl LogTarget {
    /// File target when `path` is given, stderr otherwise.
    #[must_use]
    pub fn from_path(path: Option<&Path>) -> Self {
        path.map_or(Self::Stderr, |p| Self::File(p.to_path_buf()))
    }
}

/// Everything `init_logging` needs.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Line format
    pub format: LogFormat,
    /// `-v` count
    pub verbosity: u8,
    /// Color preference
    pub color: ColorChoice,
    /// Destination
    pub target: LogTarget,
}

/// Level for this crate's targets at a given `-v` count.
#[must_use]
pub const fn verbosity_to_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Filter directive for a `-v` count.
///
/// Dependencies always stay at `warn`; only `dragtree` targets get louder.
#[must_use]
pub fn default_directive(verbosity: u8) -> String {
    match verbosity_to_level(verbosity) {
        "warn" => "warn".to_owned(),
        level => format!("warn,{CRATE_TARGET}={level}"),
    }
}

/// Whether ANSI colors apply for `color` on `target`. Files never get them.
#[must_use]
pub fn use_ansi(color: ColorChoice, target: &LogTarget) -> bool {
    if matches!(target, LogTarget::File(_)) {
        return false;
    }
    match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Opens the writer for `target`.
///
/// # Errors
///
/// Returns the I/O error if a log file cannot be opened for appending.
pub fn make_writer(target: &LogTarget) -> std::io::Result<BoxMakeWriter> {
    match target {
        LogTarget::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
        LogTarget::File(path) => {
            let file: File = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// If `DRAGTREE_LOG_LEVEL` is set it replaces the verbosity directive.
/// Uses `try_init()` so calling this more than once (e.g. in tests) is safe.
///
/// # Errors
///
/// Returns the I/O error if the log file cannot be opened; nothing is
/// installed in that case.
pub fn init_logging(options: &LogOptions) -> std::io::Result<()> {
    let writer = make_writer(&options.target)?;
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(options.verbosity)));
    let show_target = options.verbosity >= 2;

    match options.format {
        LogFormat::Human => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(use_ansi(options.color, &options.target))
                .with_target(show_target)
                .with_writer(writer)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_target(show_target)
                .with_writer(writer)
                .try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_default_keeps_everything_at_warn() {
        assert_eq!(default_directive(0), "warn");
    }

    #[test]
    fn verbosity_only_raises_this_crate() {
        assert_eq!(default_directive(1), "warn,dragtree=info");
        assert_eq!(default_directive(2), "warn,dragtree=debug");
        assert_eq!(default_directive(9), "warn,dragtree=trace");
        assert!(EnvFilter::try_new(default_directive(3)).is_ok());
    }

    #[test]
    fn file_target_never_colors() {
        let file = LogTarget::File(PathBuf::from("race.log"));
        assert!(!use_ansi(ColorChoice::Always, &file));
        assert!(use_ansi(ColorChoice::Always, &LogTarget::Stderr));
        assert!(!use_ansi(ColorChoice::Never, &LogTarget::Stderr));
    }

    #[test]
    fn target_from_optional_path() {
        assert_eq!(LogTarget::from_path(None), LogTarget::Stderr);
        assert_eq!(
            LogTarget::from_path(Some(Path::new("race.log"))),
            LogTarget::File(PathBuf::from("race.log"))
        );
    }

    #[test]
    fn file_writer_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.log");
        make_writer(&LogTarget::File(path.clone())).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unopenable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = LogTarget::File(dir.path().join("missing").join("race.log"));
        assert!(make_writer(&target).is_err());
        let options = LogOptions {
            target,
            ..LogOptions::default()
        };
        assert!(init_logging(&options).is_err());
    }

    #[test]
    fn init_logging_does_not_panic() {
        init_logging(&LogOptions::default()).unwrap();
        init_logging(&LogOptions {
            format: LogFormat::Json,
            verbosity: 3,
            color: ColorChoice::Never,
            target: LogTarget::Stderr,
        })
        .unwrap();
    }
}
