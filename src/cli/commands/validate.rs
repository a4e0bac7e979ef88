//! `validate` command
//!
//! Loads each race file through the normal pipeline and reports issues.

use tracing::{error, info, warn};

use crate::cli::args::ValidateArgs;
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::error::{ConfigError, DragTreeError};

/// Validates every file in turn, stopping at the first invalid one.
///
/// # Errors
///
/// Returns the loader's error for a missing, malformed or invalid file. With
/// `--strict`, warnings are reported as a validation error.
pub fn run(args: &ValidateArgs) -> Result<(), DragTreeError> {
    let loader = ConfigLoader::new(LoaderOptions::default());
    for path in &args.files {
        info!(file = %path.display(), "validating configuration");

        let loaded = match loader.load(path) {
            Ok(loaded) => loaded,
            Err(ConfigError::ValidationError { path, issues }) => {
                for issue in &issues {
                    error!(file = %path, "{issue}");
                }
                return Err(ConfigError::ValidationError { path, issues }.into());
            }
            Err(e) => return Err(e.into()),
        };

        for warning in &loaded.warnings {
            warn!(file = %path.display(), "{warning}");
        }
        if args.strict && !loaded.warnings.is_empty() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                issues: loaded.warnings,
            }
            .into());
        }

        info!(
            file = %path.display(),
            class = %loaded.auto_start.racing_class,
            "configuration valid"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    fn race_file(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    fn args(files: Vec<PathBuf>, strict: bool) -> ValidateArgs {
        ValidateArgs { files, strict }
    }

    #[test]
    fn test_valid_file_passes() {
        let file = race_file("racing_class: super_gas\n");
        assert!(run(&args(vec![file.path().to_path_buf()], false)).is_ok());
    }

    #[test]
    fn test_missing_file_fails() {
        let err = run(&args(vec![PathBuf::from("/no/such/race.yaml")], false)).unwrap_err();
        assert!(matches!(
            err,
            DragTreeError::Config(ConfigError::MissingFile { .. })
        ));
    }

    #[test]
    fn test_unknown_field_fails() {
        let file = race_file("racing_class: bracket\nlights: 3\n");
        let err = run(&args(vec![file.path().to_path_buf()], false)).unwrap_err();
        assert!(matches!(
            err,
            DragTreeError::Config(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_strict_rejects_warnings() {
        let file = race_file(
            "racing_class: bracket\nauto_start:\n  enabled_for_eliminations: false\n  enabled_for_time_trials: false\n",
        );
        let paths = vec![file.path().to_path_buf()];
        assert!(run(&args(paths.clone(), false)).is_ok());
        let err = run(&args(paths, true)).unwrap_err();
        assert!(matches!(
            err,
            DragTreeError::Config(ConfigError::ValidationError { .. })
        ));
    }
}
