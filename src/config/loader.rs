//! Configuration loader
//!
//! Pipeline:
//! 1. Read file (size-limited)
//! 2. YAML parsing into [`RaceConfig`]
//! 3. Environment overrides (`DRAGTREE_CLASS`, `DRAGTREE_TIME_COMPRESSION`)
//! 4. Resolve class preset + overrides into runtime snapshots
//! 5. Validation

use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ValidationIssue};

use super::schema::{AutoStartConfig, RaceConfig, RacingClass, SessionKind, TreeConfig};
use super::validation::Validator;

/// Environment variable overriding the racing class.
pub const ENV_CLASS: &str = "DRAGTREE_CLASS";

/// Environment variable overriding timer compression.
pub const ENV_TIME_COMPRESSION: &str = "DRAGTREE_TIME_COMPRESSION";

/// Largest accepted race file.
const MAX_CONFIG_SIZE: u64 = 64 * 1024;

/// Options for the configuration loader.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Apply `DRAGTREE_*` environment overrides after parsing.
    pub env_overrides: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            env_overrides: true,
        }
    }
}

/// A loaded, resolved and validated race configuration.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// The file as written (after environment overrides)
    pub race: RaceConfig,
    /// Resolved auto-start snapshot
    pub auto_start: AutoStartConfig,
    /// Resolved tree snapshot
    pub tree: TreeConfig,
    /// Session kind to run
    pub session: SessionKind,
    /// Non-fatal validation issues
    pub warnings: Vec<ValidationIssue>,
}

/// Loads race configuration files.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loads a race file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] if the file does not exist,
    /// [`ConfigError::ParseError`] for malformed YAML or oversized files,
    /// and [`ConfigError::ValidationError`] when validation finds errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let meta = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        if meta.len() > MAX_CONFIG_SIZE {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: None,
                message: format!("file is {} bytes (limit: {MAX_CONFIG_SIZE})", meta.len()),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            line: None,
            message: e.to_string(),
        })?;

        debug!(path = %path.display(), bytes = raw.len(), "read race configuration");
        self.load_str(&raw, path)
    }

    /// Loads a race configuration from YAML text. `path` is used for messages only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for malformed YAML and
    /// [`ConfigError::ValidationError`] when validation finds errors.
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let mut race: RaceConfig = if raw.trim().is_empty() {
            RaceConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?
        };

        if self.options.env_overrides {
            apply_env_overrides(&mut race)?;
        }

        finish(race, &path.display().to_string())
    }

    /// Builds a configuration from a class preset alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if environment overrides make
    /// the preset invalid.
    pub fn from_class(&self, class: RacingClass) -> Result<LoadResult, ConfigError> {
        let mut race = RaceConfig {
            racing_class: class,
            ..RaceConfig::default()
        };
        if self.options.env_overrides {
            apply_env_overrides(&mut race)?;
        }
        finish(race, class.as_str())
    }
}

fn finish(race: RaceConfig, label: &str) -> Result<LoadResult, ConfigError> {
    let (auto_start, tree) = race.resolve();
    let result = Validator::new().validate(&auto_start, &tree);
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: label.to_string(),
            issues: result.errors,
        });
    }

    Ok(LoadResult {
        session: race.session,
        race,
        auto_start,
        tree,
        warnings: result.warnings,
    })
}

fn apply_env_overrides(race: &mut RaceConfig) -> Result<(), ConfigError> {
    if let Ok(class) = std::env::var(ENV_CLASS) {
        race.racing_class = class.parse()?;
        debug!(class = %race.racing_class, "racing class overridden from environment");
    }
    if let Ok(raw) = std::env::var(ENV_TIME_COMPRESSION) {
        let value = raw.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
            field: ENV_TIME_COMPRESSION.to_string(),
            value: raw.clone(),
            expected: "a positive integer".to_string(),
        })?;
        race.time_compression = Some(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::config::schema::{CourtesyPolicy, SequenceKind};

    fn loader() -> ConfigLoader {
        ConfigLoader::new(LoaderOptions {
            env_overrides: false,
        })
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "racing_class: super_gas\nsession: time_trial\nauto_start:\n  courtesy_staging: fault\n"
        )
        .unwrap();

        let result = loader().load(file.path()).unwrap();
        assert_eq!(result.race.racing_class, RacingClass::SuperGas);
        assert_eq!(result.session, SessionKind::TimeTrial);
        assert_eq!(result.auto_start.courtesy_staging, CourtesyPolicy::Fault);
        assert_eq!(result.auto_start.tree_sequence_type, SequenceKind::Sportsman);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = loader()
            .load(Path::new("/nonexistent/race.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = loader()
            .load_str("racing_class: bracket\nauto_start: [", Path::new("bad.yaml"))
            .unwrap_err();
        match err {
            ConfigError::ParseError { line, .. } => assert!(line.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_class_in_file() {
        let err = loader()
            .load_str("racing_class: super_gaz\n", Path::new("c.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("super_gas"), "{err}");
    }

    #[test]
    fn test_validation_error_surfaces_issues() {
        let yaml = "auto_start:\n  random_delay_min: 2s\n  random_delay_max: 1s\n";
        let err = loader().load_str(yaml, Path::new("v.yaml")).unwrap_err();
        match err {
            ConfigError::ValidationError { issues, .. } => assert_eq!(issues.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_file_is_bracket_default() {
        let result = loader().load_str("", Path::new("empty.yaml")).unwrap();
        assert_eq!(result.auto_start.racing_class, RacingClass::Bracket);
        assert_eq!(result.auto_start.staging_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_from_class() {
        let result = loader().from_class(RacingClass::FunnyCar).unwrap();
        assert_eq!(result.auto_start.staging_timeout, Duration::from_secs(7));
        assert_eq!(result.tree.timing.green_delay, Duration::from_millis(400));
    }
}
