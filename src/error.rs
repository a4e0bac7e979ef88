//! Error types for `dragtree`
//!
//! Protocol violations on the light tree are typed errors returned to the
//! caller. Safety faults are not errors: they are state transitions of the
//! auto-start controller and never surface through this module.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `dragtree` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Light-tree protocol violation
    pub const TREE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `dragtree` operations.
#[derive(Debug, Error)]
pub enum DragTreeError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Light-tree protocol violation
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Metrics recorder could not be installed
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DragTreeError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Tree(_) => ExitCode::TREE_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Metrics(_) => ExitCode::ERROR,
        }
    }
}

// ============================================================================
// Light-Tree Errors
// ============================================================================

/// Protocol violations raised by the light tree.
///
/// Each variant means a caller asked for an operation in the wrong tree
/// state. They are surfaced synchronously and never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The starter has already ceded control
    #[error("tree is already armed")]
    AlreadyArmed,

    /// The operation requires an armed tree
    #[error("tree is not armed")]
    NotArmed,

    /// Auto-start already holds sequencing authority
    #[error("auto-start is already activated")]
    AlreadyActivated,

    /// The staging process requires auto-start activation
    #[error("auto-start is not activated")]
    NotActivated,

    /// A light sequence is still in flight
    #[error("a light sequence is already running")]
    SequenceAlreadyRunning,
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {} issue(s)", issues.len())]
    ValidationError {
        /// Path (or label) of the configuration
        path: String,
        /// Validation issues with error severity
        issues: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Racing class name not recognised
    #[error("unknown racing class '{name}'{}", suggestion.as_ref().map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default())]
    UnknownClass {
        /// The name as written
        name: String,
        /// Closest known class name, if any is close enough
        suggestion: Option<String>,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "auto_start.random_delay_max")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Reported but does not block loading
    Warning,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `dragtree` operations.
pub type Result<T> = std::result::Result<T, DragTreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::TREE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_tree_error_exit_code() {
        let err: DragTreeError = TreeError::NotArmed.into();
        assert_eq!(err.exit_code(), ExitCode::TREE_ERROR);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: DragTreeError = ConfigError::MissingFile {
            path: PathBuf::from("/race.yaml"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: DragTreeError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_tree_error_display() {
        assert_eq!(TreeError::AlreadyArmed.to_string(), "tree is already armed");
        assert_eq!(
            TreeError::SequenceAlreadyRunning.to_string(),
            "a light sequence is already running"
        );
    }

    #[test]
    fn test_unknown_class_display_with_suggestion() {
        let err = ConfigError::UnknownClass {
            name: "super_gass".to_string(),
            suggestion: Some("super_gas".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unknown racing class 'super_gass' (did you mean 'super_gas'?)"
        );
    }

    #[test]
    fn test_unknown_class_display_without_suggestion() {
        let err = ConfigError::UnknownClass {
            name: "hovercraft".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown racing class 'hovercraft'");
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "auto_start.random_delay_max".to_string(),
            message: "must not be below random_delay_min".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: must not be below random_delay_min at auto_start.random_delay_max"
        );
    }
}
