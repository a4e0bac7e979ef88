//! Configuration validation
//!
//! Semantic checks on resolved snapshots. Validation collects every issue
//! rather than stopping at the first so a track official sees the whole
//! picture in one pass.

use std::time::Duration;

use crate::error::{Severity, ValidationIssue};

use super::schema::{AutoStartConfig, TreeConfig};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a resolved auto-start and tree configuration pair.
    #[must_use]
    pub fn validate(mut self, auto: &AutoStartConfig, tree: &TreeConfig) -> ValidationResult {
        self.check_auto_start(auto);
        self.check_tree(tree);
        ValidationResult {
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    fn check_auto_start(&mut self, auto: &AutoStartConfig) {
        self.require_positive("auto_start.staging_timeout", auto.staging_timeout);
        self.require_positive("auto_start.settle_delay", auto.settle_delay);

        if auto.random_delay_max < auto.random_delay_min {
            self.error(
                "auto_start.random_delay_max",
                format!(
                    "must not be below random_delay_min ({} < {})",
                    humantime::format_duration(auto.random_delay_max),
                    humantime::format_duration(auto.random_delay_min)
                ),
            );
        }
        if auto.random_delay_max == auto.random_delay_min && auto.random_variation.is_zero() {
            self.warning(
                "auto_start.random_variation",
                "release delay is fully predictable from the configured bounds".to_string(),
            );
        }

        if !auto.max_rollout_distance.is_finite() || auto.max_rollout_distance <= 0.0 {
            self.error(
                "auto_start.max_rollout_distance",
                format!("must be a positive distance, got {}", auto.max_rollout_distance),
            );
        }
        if !auto.guard_beam_distance.is_finite() || auto.guard_beam_distance <= 0.0 {
            self.error(
                "auto_start.guard_beam_distance",
                format!("must be a positive distance, got {}", auto.guard_beam_distance),
            );
        } else if auto.guard_beam_distance <= auto.max_rollout_distance {
            self.warning(
                "auto_start.guard_beam_distance",
                "guard beam sits inside the legal rollout; a tripped guard beam will not fault"
                    .to_string(),
            );
        }

        if !auto.enabled_for_eliminations && !auto.enabled_for_time_trials {
            self.warning(
                "auto_start",
                "auto-start is disabled for every session kind".to_string(),
            );
        }
        if auto.time_compression == 0 {
            self.error("time_compression", "must be at least 1".to_string());
        }
    }

    fn check_tree(&mut self, tree: &TreeConfig) {
        self.require_positive("tree.green_delay", tree.timing.green_delay);
        self.require_positive("tree.amber_interval", tree.timing.amber_interval);
    }

    fn require_positive(&mut self, path: &str, value: Duration) {
        if value.is_zero() {
            self.error(path, "must be greater than zero".to_string());
        }
    }

    fn error(&mut self, path: &str, message: String) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message,
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, path: &str, message: String) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message,
            severity: Severity::Warning,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RacingClass;

    fn valid_pair() -> (AutoStartConfig, TreeConfig) {
        (
            AutoStartConfig::for_class(RacingClass::Bracket),
            TreeConfig::for_class(RacingClass::Bracket),
        )
    }

    #[test]
    fn test_presets_are_valid() {
        for class in RacingClass::ALL {
            let result = Validator::new().validate(
                &AutoStartConfig::for_class(class),
                &TreeConfig::for_class(class),
            );
            assert!(result.is_valid(), "{class}: {:?}", result.errors);
            assert!(result.warnings.is_empty(), "{class}: {:?}", result.warnings);
        }
    }

    #[test]
    fn test_inverted_delay_range() {
        let (mut auto, tree) = valid_pair();
        auto.random_delay_min = Duration::from_secs(2);
        auto.random_delay_max = Duration::from_secs(1);
        let result = Validator::new().validate(&auto, &tree);
        assert!(result.has_errors());
        assert_eq!(result.errors[0].path, "auto_start.random_delay_max");
    }

    #[test]
    fn test_collects_all_errors() {
        let (mut auto, mut tree) = valid_pair();
        auto.staging_timeout = Duration::ZERO;
        auto.max_rollout_distance = -1.0;
        tree.timing.green_delay = Duration::ZERO;
        let result = Validator::new().validate(&auto, &tree);
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_guard_inside_rollout_is_warning() {
        let (mut auto, tree) = valid_pair();
        auto.guard_beam_distance = 10.0;
        let result = Validator::new().validate(&auto, &tree);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_predictable_release_is_warning() {
        let (mut auto, tree) = valid_pair();
        auto.random_delay_max = auto.random_delay_min;
        auto.random_variation = Duration::ZERO;
        let result = Validator::new().validate(&auto, &tree);
        assert!(result.is_valid());
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.path == "auto_start.random_variation")
        );
    }
}
