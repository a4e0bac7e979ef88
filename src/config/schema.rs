//! Configuration schema types
//!
//! Runtime snapshots ([`AutoStartConfig`], [`TreeConfig`]) and the YAML race
//! file schema ([`RaceConfig`]) they are resolved from. Durations are written
//! as human strings (`"7s"`, `"400ms"`).

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::presets::ClassPreset;

/// Compression factor applied to every timer in test/acceleration mode.
pub const TEST_MODE_COMPRESSION: u32 = 1000;

// ============================================================================
// Enumerations
// ============================================================================

/// Sanctioned racing classes with distinct staging rules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum RacingClass {
    /// Top Fuel dragster
    TopFuel,
    /// Funny Car
    FunnyCar,
    /// Pro Stock
    ProStock,
    /// Pro Modified
    ProModified,
    /// Pro Stock Motorcycle (PSM)
    ProStockMotorcycle,
    /// Bracket racing
    #[default]
    Bracket,
    /// Super Comp
    SuperComp,
    /// Super Gas
    SuperGas,
    /// Super Stock
    SuperStock,
    /// Super Street
    SuperStreet,
    /// Junior Dragster
    JuniorDragster,
}

impl RacingClass {
    /// Every class, in table order.
    pub const ALL: [Self; 11] = [
        Self::TopFuel,
        Self::FunnyCar,
        Self::ProStock,
        Self::ProModified,
        Self::ProStockMotorcycle,
        Self::Bracket,
        Self::SuperComp,
        Self::SuperGas,
        Self::SuperStock,
        Self::SuperStreet,
        Self::JuniorDragster,
    ];

    /// Classes in which deep staging is prohibited unless configured otherwise.
    pub const DEEP_STAGE_PROHIBITED: [Self; 3] = [Self::SuperGas, Self::SuperStock, Self::SuperStreet];

    /// Machine name used in configuration files and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopFuel => "top_fuel",
            Self::FunnyCar => "funny_car",
            Self::ProStock => "pro_stock",
            Self::ProModified => "pro_modified",
            Self::ProStockMotorcycle => "pro_stock_motorcycle",
            Self::Bracket => "bracket",
            Self::SuperComp => "super_comp",
            Self::SuperGas => "super_gas",
            Self::SuperStock => "super_stock",
            Self::SuperStreet => "super_street",
            Self::JuniorDragster => "junior_dragster",
        }
    }

    /// Display name as announced at the track.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::TopFuel => "Top Fuel",
            Self::FunnyCar => "Funny Car",
            Self::ProStock => "Pro Stock",
            Self::ProModified => "Pro Modified",
            Self::ProStockMotorcycle => "Pro Stock Motorcycle",
            Self::Bracket => "Bracket",
            Self::SuperComp => "Super Comp",
            Self::SuperGas => "Super Gas",
            Self::SuperStock => "Super Stock",
            Self::SuperStreet => "Super Street",
            Self::JuniorDragster => "Junior Dragster",
        }
    }
}

impl std::fmt::Display for RacingClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for RacingClass {
    type Err = ConfigError;

    /// Accepts the machine name, the display name, or the common `psm` alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        if normalized == "psm" {
            return Ok(Self::ProStockMotorcycle);
        }
        if let Some(class) = Self::ALL.iter().find(|c| c.as_str() == normalized) {
            return Ok(*class);
        }

        let suggestion = Self::ALL
            .iter()
            .map(|c| (c.as_str(), strsim::jaro_winkler(c.as_str(), &normalized)))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name.to_string());

        Err(ConfigError::UnknownClass {
            name: s.to_string(),
            suggestion,
        })
    }
}

impl TryFrom<String> for RacingClass {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Light-tree sequence style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    /// All three ambers simultaneously, then green
    Pro,
    /// Ambers one at a time, then green
    #[default]
    Sportsman,
}

impl SequenceKind {
    /// Lowercase name, also used as a metric label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Sportsman => "sportsman",
        }
    }
}

impl std::fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Kind of session being run; auto-start can be enabled per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Competition eliminations
    #[default]
    Elimination,
    /// Qualifying / time trials
    TimeTrial,
}

/// What to do when a lane stages before the other lane has pre-staged.
///
/// Courtesy staging is etiquette rather than a written rule, so the response
/// is left to the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtesyPolicy {
    /// Do nothing
    Ignore,
    /// Log and emit a notification
    #[default]
    Warn,
    /// Fault the auto-start controller
    Fault,
}

// ============================================================================
// Runtime Snapshots
// ============================================================================

/// Immutable auto-start configuration snapshot for one race.
///
/// Replaced wholesale through
/// [`AutoStartController::update_configuration`](crate::autostart::AutoStartController::update_configuration),
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutoStartConfig {
    /// How long the second lane may take to stage once the first has
    #[serde(with = "duration_str")]
    pub staging_timeout: Duration,

    /// How long both lanes must remain staged before release is scheduled
    #[serde(with = "duration_str")]
    pub min_staging_duration: Duration,

    /// Lower bound of the published release range
    #[serde(with = "duration_str")]
    pub random_delay_min: Duration,

    /// Upper bound of the published release range
    #[serde(with = "duration_str")]
    pub random_delay_max: Duration,

    /// Upper bound of the extra, unpublished jitter
    #[serde(with = "duration_str")]
    pub random_variation: Duration,

    /// Time between tree trigger and the return to `Idle`
    #[serde(with = "duration_str")]
    pub settle_delay: Duration,

    /// Distance of the guard beam past the stage beam, in inches
    pub guard_beam_distance: f64,

    /// Largest legal rollout past the stage beam, in inches
    pub max_rollout_distance: f64,

    /// Tree sequence to request on release
    pub tree_sequence_type: SequenceKind,

    /// Class being raced
    pub racing_class: RacingClass,

    /// Auto-start enabled during eliminations
    pub enabled_for_eliminations: bool,

    /// Auto-start enabled during time trials
    pub enabled_for_time_trials: bool,

    /// Response to courtesy staging violations
    pub courtesy_staging: CourtesyPolicy,

    /// Divides every duration (1 = real time)
    pub time_compression: u32,
}

impl AutoStartConfig {
    /// Builds the configuration for a class from its preset.
    #[must_use]
    pub fn for_class(class: RacingClass) -> Self {
        let preset = ClassPreset::for_class(class);
        Self {
            staging_timeout: preset.staging_timeout,
            min_staging_duration: preset.min_staging_duration,
            tree_sequence_type: preset.sequence,
            racing_class: class,
            ..Self::default()
        }
    }

    /// Returns a copy with test/acceleration mode enabled.
    #[must_use]
    pub const fn accelerated(mut self) -> Self {
        self.time_compression = TEST_MODE_COMPRESSION;
        self
    }

    /// Applies time compression to a configured duration.
    #[must_use]
    pub fn scaled(&self, duration: Duration) -> Duration {
        duration / self.time_compression.max(1)
    }

    /// Returns whether auto-start is enabled for the given session kind.
    #[must_use]
    pub const fn enabled_for(&self, session: SessionKind) -> bool {
        match session {
            SessionKind::Elimination => self.enabled_for_eliminations,
            SessionKind::TimeTrial => self.enabled_for_time_trials,
        }
    }
}

impl Default for AutoStartConfig {
    fn default() -> Self {
        Self {
            staging_timeout: Duration::from_secs(15),
            min_staging_duration: Duration::from_millis(600),
            random_delay_min: Duration::from_millis(600),
            random_delay_max: Duration::from_millis(1100),
            random_variation: Duration::from_millis(200),
            settle_delay: Duration::from_secs(3),
            guard_beam_distance: 16.0,
            max_rollout_distance: 12.0,
            tree_sequence_type: SequenceKind::Sportsman,
            racing_class: RacingClass::Bracket,
            enabled_for_eliminations: true,
            enabled_for_time_trials: true,
            courtesy_staging: CourtesyPolicy::Warn,
            time_compression: 1,
        }
    }
}

/// Light-sequence timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeTiming {
    /// Delay from the (last) amber to green
    #[serde(with = "duration_str")]
    pub green_delay: Duration,

    /// Delay between successive ambers on a Sportsman tree
    #[serde(with = "duration_str")]
    pub amber_interval: Duration,

    /// Divides every duration (1 = real time)
    pub time_compression: u32,
}

impl TreeTiming {
    /// Timing for a class from its preset.
    #[must_use]
    pub fn for_class(class: RacingClass) -> Self {
        Self {
            green_delay: ClassPreset::for_class(class).green_delay,
            ..Self::default()
        }
    }

    /// Applies time compression to a configured duration.
    #[must_use]
    pub fn scaled(&self, duration: Duration) -> Duration {
        duration / self.time_compression.max(1)
    }
}

impl Default for TreeTiming {
    fn default() -> Self {
        Self {
            green_delay: Duration::from_millis(500),
            amber_interval: Duration::from_millis(500),
            time_compression: 1,
        }
    }
}

/// Light-tree configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Sequence timing
    pub timing: TreeTiming,
    /// Class being raced (drives the deep-staging policy)
    pub racing_class: RacingClass,
    /// Classes in which deep staging is a violation
    pub deep_stage_prohibited: BTreeSet<RacingClass>,
}

impl TreeConfig {
    /// Tree configuration for a class with the default prohibited set.
    #[must_use]
    pub fn for_class(class: RacingClass) -> Self {
        Self {
            timing: TreeTiming::for_class(class),
            racing_class: class,
            ..Self::default()
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            timing: TreeTiming::default(),
            racing_class: RacingClass::default(),
            deep_stage_prohibited: RacingClass::DEEP_STAGE_PROHIBITED.into_iter().collect(),
        }
    }
}

// ============================================================================
// Race File Schema
// ============================================================================

/// Root of a race configuration file.
///
/// Everything except the class is optional; omitted values come from the
/// class preset.
///
/// ```yaml
/// racing_class: super_gas
/// session: elimination
/// auto_start:
///   staging_timeout: 12s
///   courtesy_staging: fault
/// tree:
///   green_delay: 400ms
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RaceConfig {
    /// Class being raced
    #[serde(default)]
    pub racing_class: RacingClass,

    /// Session kind
    #[serde(default)]
    pub session: SessionKind,

    /// Timer compression for both controllers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_compression: Option<u32>,

    /// Auto-start overrides
    #[serde(default)]
    pub auto_start: AutoStartOverrides,

    /// Tree overrides
    #[serde(default)]
    pub tree: TreeOverrides,

    /// Replaces the default deep-stage prohibited class list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_stage_prohibited: Option<Vec<RacingClass>>,
}

/// Optional per-field overrides of the auto-start preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct AutoStartOverrides {
    /// See [`AutoStartConfig::staging_timeout`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub staging_timeout: Option<Duration>,
    /// See [`AutoStartConfig::min_staging_duration`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub min_staging_duration: Option<Duration>,
    /// See [`AutoStartConfig::random_delay_min`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub random_delay_min: Option<Duration>,
    /// See [`AutoStartConfig::random_delay_max`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub random_delay_max: Option<Duration>,
    /// See [`AutoStartConfig::random_variation`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub random_variation: Option<Duration>,
    /// See [`AutoStartConfig::settle_delay`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub settle_delay: Option<Duration>,
    /// See [`AutoStartConfig::guard_beam_distance`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_beam_distance: Option<f64>,
    /// See [`AutoStartConfig::max_rollout_distance`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rollout_distance: Option<f64>,
    /// See [`AutoStartConfig::enabled_for_eliminations`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_for_eliminations: Option<bool>,
    /// See [`AutoStartConfig::enabled_for_time_trials`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_for_time_trials: Option<bool>,
    /// See [`AutoStartConfig::courtesy_staging`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courtesy_staging: Option<CourtesyPolicy>,
}

/// Optional overrides of the tree preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TreeOverrides {
    /// Force a sequence style regardless of class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_type: Option<SequenceKind>,
    /// See [`TreeTiming::green_delay`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub green_delay: Option<Duration>,
    /// See [`TreeTiming::amber_interval`]
    #[serde(default, with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub amber_interval: Option<Duration>,
}

impl RaceConfig {
    /// Resolves the file into runtime snapshots: preset first, overrides on top.
    #[must_use]
    pub fn resolve(&self) -> (AutoStartConfig, TreeConfig) {
        let class = self.racing_class;
        let compression = self.time_compression.unwrap_or(1);
        let o = &self.auto_start;

        let mut auto = AutoStartConfig::for_class(class);
        auto.staging_timeout = o.staging_timeout.unwrap_or(auto.staging_timeout);
        auto.min_staging_duration = o.min_staging_duration.unwrap_or(auto.min_staging_duration);
        auto.random_delay_min = o.random_delay_min.unwrap_or(auto.random_delay_min);
        auto.random_delay_max = o.random_delay_max.unwrap_or(auto.random_delay_max);
        auto.random_variation = o.random_variation.unwrap_or(auto.random_variation);
        auto.settle_delay = o.settle_delay.unwrap_or(auto.settle_delay);
        auto.guard_beam_distance = o.guard_beam_distance.unwrap_or(auto.guard_beam_distance);
        auto.max_rollout_distance = o.max_rollout_distance.unwrap_or(auto.max_rollout_distance);
        auto.enabled_for_eliminations = o
            .enabled_for_eliminations
            .unwrap_or(auto.enabled_for_eliminations);
        auto.enabled_for_time_trials = o
            .enabled_for_time_trials
            .unwrap_or(auto.enabled_for_time_trials);
        auto.courtesy_staging = o.courtesy_staging.unwrap_or(auto.courtesy_staging);
        auto.time_compression = compression;
        if let Some(kind) = self.tree.sequence_type {
            auto.tree_sequence_type = kind;
        }

        let mut tree = TreeConfig::for_class(class);
        tree.timing.green_delay = self.tree.green_delay.unwrap_or(tree.timing.green_delay);
        tree.timing.amber_interval = self
            .tree
            .amber_interval
            .unwrap_or(tree.timing.amber_interval);
        tree.timing.time_compression = compression;
        if let Some(classes) = &self.deep_stage_prohibited {
            tree.deep_stage_prohibited = classes.iter().copied().collect();
        }

        (auto, tree)
    }
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

/// Serde adapter for `Duration` as a human string.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes as e.g. `"1s 500ms"`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    /// Parses strings such as `"7s"` or `"400ms"`.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for malformed durations.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` as a human string.
pub mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `Some` as a human string and `None` as null.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::duration_str::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    /// Parses an optional human duration string.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for malformed durations.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
