//! Configuration loading and typed config structures for the Commons engine.
//!
//! The canonical configuration lives in `commons-config.yaml` at the project
//! root. It describes one treatment (the round sequence and its dynamics
//! parameters), how the engine binary drives experiment instances, and
//! logging. Every field has a default, so an empty file is a valid
//! configuration.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use commons_types::{ExperimentFamily, RoundConfiguration, RoundFlags, RoundKind};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an unusable treatment.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `commons-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommonsConfig {
    /// The treatment every experiment instance runs.
    #[serde(default)]
    pub treatment: TreatmentConfig,

    /// How the engine binary drives experiments.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CommonsConfig {
    /// Load and validate configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the whole configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.treatment.validate()?;
        if self.engine.instances == 0 {
            return Err(invalid("engine.instances must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Treatment
// ---------------------------------------------------------------------------

/// One treatment: the round sequence and its dynamics parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreatmentConfig {
    /// Human-readable treatment name.
    #[serde(default = "default_treatment_name")]
    pub name: String,

    /// Which settlement strategy runs at round boundaries.
    #[serde(default)]
    pub family: ExperimentFamily,

    /// Largest group size; 0 means unbounded.
    #[serde(default = "default_max_group_size")]
    pub max_group_size: u32,

    /// Participants the engine binary registers per experiment.
    #[serde(default = "default_participants")]
    pub participants: u32,

    /// Seed for group shuffling and cluster assignment.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Shuffle participants when groups are first formed.
    #[serde(default = "default_true")]
    pub shuffle_participants: bool,

    /// Rounds advance only on experimenter action; readiness is tracked.
    #[serde(default)]
    pub experimenter_driven: bool,

    /// Largest harvest a participant may request in one round.
    #[serde(default = "default_max_harvest_decision")]
    pub max_harvest_decision: Decimal,

    /// Resource units budgeted per participant per round for capacity.
    #[serde(default = "default_initial_resources")]
    pub initial_resources_per_participant_per_round: Decimal,

    /// Rounds used by the capacity formula; derived from the round kind
    /// when absent.
    #[serde(default)]
    pub rounds_in_treatment: Option<u32>,

    /// Treatment-wide regrowth rate; the family default when absent.
    #[serde(default)]
    pub regrowth_rate: Option<Decimal>,

    /// Treatment-wide cost of living; the family default when absent.
    #[serde(default)]
    pub cost_of_living: Option<Decimal>,

    /// Ordered round sequence. Sequence numbers are assigned on load.
    #[serde(default = "default_rounds")]
    pub rounds: Vec<RoundConfiguration>,
}

impl TreatmentConfig {
    /// Group size limit, with 0 mapped to unbounded.
    pub const fn group_size_limit(&self) -> Option<u32> {
        if self.max_group_size == 0 {
            None
        } else {
            Some(self.max_group_size)
        }
    }

    /// Check the treatment for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rounds.is_empty() {
            return Err(invalid("treatment must have at least one round"));
        }
        if self.max_harvest_decision < Decimal::ZERO {
            return Err(invalid("max_harvest_decision must not be negative"));
        }
        if self.initial_resources_per_participant_per_round < Decimal::ZERO {
            return Err(invalid(
                "initial_resources_per_participant_per_round must not be negative",
            ));
        }
        check_rate("treatment.regrowth_rate", self.regrowth_rate)?;
        check_non_negative("treatment.cost_of_living", self.cost_of_living)?;

        for (index, round) in self.rounds.iter().enumerate() {
            let position = index.saturating_add(1);
            if round.group_cluster_size == 0 {
                return Err(invalid(format!(
                    "round {position}: group_cluster_size must be at least 1"
                )));
            }
            check_rate(
                &format!("round {position}: regrowth_rate"),
                round.overrides.regrowth_rate,
            )?;
            check_non_negative(
                &format!("round {position}: cost_of_living"),
                round.overrides.cost_of_living,
            )?;
            check_non_negative(
                &format!("round {position}: initial_resource_level"),
                round.overrides.initial_resource_level,
            )?;
        }
        Ok(())
    }
}

fn check_rate(field: &str, rate: Option<Decimal>) -> Result<(), ConfigError> {
    match rate {
        Some(r) if r < Decimal::ZERO || r > Decimal::ONE => {
            Err(invalid(format!("{field} {r} outside [0, 1]")))
        }
        _ => Ok(()),
    }
}

fn check_non_negative(field: &str, value: Option<Decimal>) -> Result<(), ConfigError> {
    match value {
        Some(v) if v < Decimal::ZERO => Err(invalid(format!("{field} must not be negative"))),
        _ => Ok(()),
    }
}

impl Default for TreatmentConfig {
    fn default() -> Self {
        Self {
            name: default_treatment_name(),
            family: ExperimentFamily::default(),
            max_group_size: default_max_group_size(),
            participants: default_participants(),
            seed: default_seed(),
            shuffle_participants: default_true(),
            experimenter_driven: false,
            max_harvest_decision: default_max_harvest_decision(),
            initial_resources_per_participant_per_round: default_initial_resources(),
            rounds_in_treatment: None,
            regrowth_rate: None,
            cost_of_living: None,
            rounds: default_rounds(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// How scripted participants choose their harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarvestPolicy {
    /// Always request the same amount, capped at the allowed maximum.
    Fixed {
        /// Amount requested each round.
        amount: Decimal,
    },
    /// Request a seeded random amount up to the allowed maximum.
    #[default]
    Random,
    /// Always request the allowed maximum.
    Greedy,
}

/// How the engine binary drives experiment instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Independent experiment instances run concurrently.
    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Milliseconds to wait between rounds.
    #[serde(default)]
    pub round_pause_ms: u64,

    /// Milliseconds between timed-round checks.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Scripted harvest behavior.
    #[serde(default)]
    pub harvest_policy: HarvestPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instances: default_instances(),
            round_pause_ms: 0,
            check_interval_ms: default_check_interval_ms(),
            harvest_policy: HarvestPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is
    /// not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_treatment_name() -> String {
    "Commons".to_owned()
}

const fn default_max_group_size() -> u32 {
    5
}

const fn default_participants() -> u32 {
    10
}

const fn default_seed() -> u64 {
    42
}

const fn default_true() -> bool {
    true
}

fn default_max_harvest_decision() -> Decimal {
    Decimal::TEN
}

fn default_initial_resources() -> Decimal {
    Decimal::from(3)
}

/// Welcome, a private practice round, ten regular rounds played as one
/// repeating configuration, and a debriefing.
fn default_rounds() -> Vec<RoundConfiguration> {
    let reset = RoundFlags {
        reset_resource_level: true,
        randomize_groups: true,
        ..RoundFlags::default()
    };
    let mut practice = RoundConfiguration::new(RoundKind::PrivatePractice);
    practice.flags = reset;
    let mut regular = RoundConfiguration::new(RoundKind::Regular);
    regular.flags = reset;
    regular.repeat = 9;
    vec![
        RoundConfiguration::new(RoundKind::Welcome),
        practice,
        regular,
        RoundConfiguration::new(RoundKind::Debriefing),
    ]
}

const fn default_instances() -> u32 {
    1
}

const fn default_check_interval_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CommonsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.treatment.family, ExperimentFamily::BoundaryEffects);
        assert_eq!(config.treatment.max_group_size, 5);
        assert_eq!(config.treatment.max_harvest_decision, dec!(10));
        assert_eq!(config.treatment.rounds.len(), 4);
        assert_eq!(config.engine.instances, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = CommonsConfig::parse("{}").unwrap();
        assert_eq!(config, CommonsConfig::default());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
treatment:
  name: Forest A
  family: forestry
  max_group_size: 0
  participants: 4
  seed: 7
  experimenter_driven: true
  rounds:
    - kind: welcome
    - kind: regular
      repeat: 2
      duration_secs: 60
      session_id: day-1
      group_cluster_size: 2
      flags:
        reset_resource_level: true
        shared_resource: true
      overrides:
        regrowth_rate: 0.25
        initial_resource_level: 80

engine:
  instances: 3
  round_pause_ms: 10
  harvest_policy:
    kind: fixed
    amount: 4

logging:
  level: debug
  json: true
";
        let config = CommonsConfig::parse(yaml).unwrap();
        let treatment = &config.treatment;
        assert_eq!(treatment.name, "Forest A");
        assert_eq!(treatment.family, ExperimentFamily::Forestry);
        assert_eq!(treatment.group_size_limit(), None);
        assert!(treatment.experimenter_driven);
        assert_eq!(treatment.rounds.len(), 2);

        let regular = treatment.rounds.last().unwrap();
        assert_eq!(regular.kind, RoundKind::Regular);
        assert_eq!(regular.repeat, 2);
        assert!(regular.flags.reset_resource_level);
        assert!(regular.flags.shared_resource);
        assert!(regular.flags.initialize_data_values);
        assert_eq!(regular.overrides.regrowth_rate, Some(dec!(0.25)));
        assert_eq!(regular.overrides.initial_resource_level, Some(dec!(80)));

        assert_eq!(config.engine.instances, 3);
        assert_eq!(
            config.engine.harvest_policy,
            HarvestPolicy::Fixed { amount: dec!(4) }
        );
        assert!(config.logging.json);
    }

    #[test]
    fn rejects_empty_round_list() {
        let result = CommonsConfig::parse("treatment:\n  rounds: []\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_out_of_range_regrowth() {
        let yaml = "treatment:\n  rounds:\n    - kind: regular\n      overrides:\n        regrowth_rate: 1.5\n";
        assert!(matches!(
            CommonsConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_zero_cluster_size() {
        let yaml = "treatment:\n  rounds:\n    - kind: regular\n      group_cluster_size: 0\n";
        assert!(matches!(
            CommonsConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_negative_cost_of_living() {
        let yaml = "treatment:\n  cost_of_living: -1\n";
        assert!(matches!(
            CommonsConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn invalid_yaml_is_a_yaml_error() {
        assert!(matches!(
            CommonsConfig::parse("treatment: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
