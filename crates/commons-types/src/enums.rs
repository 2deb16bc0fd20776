//! Enumeration types for the Commons experiment engine.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Round kinds
// ---------------------------------------------------------------------------

/// The kind of step a round configuration represents in a treatment.
///
/// Only practice and regular rounds are playable: they collect harvest
/// decisions and trigger resource settlement when they end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RoundKind {
    /// Initial welcome screen.
    Welcome,
    /// Introduction shown once at the start of a treatment.
    GeneralInstructions,
    /// Instructions shown before a block of rounds.
    Instructions,
    /// Practice round played alone (groups of one).
    PrivatePractice,
    /// Practice round played with the participant's group.
    Practice,
    /// Regular, paid experiment round.
    Regular,
    /// Communication round between playable rounds.
    Chat,
    /// Comprehension quiz.
    Quiz,
    /// Questionnaire round.
    Survey,
    /// Final debriefing with earnings.
    Debriefing,
}

impl RoundKind {
    /// Whether this round collects harvest decisions.
    pub const fn is_playable(self) -> bool {
        matches!(self, Self::PrivatePractice | Self::Practice | Self::Regular)
    }

    /// Whether this is one of the practice kinds.
    pub const fn is_practice(self) -> bool {
        matches!(self, Self::PrivatePractice | Self::Practice)
    }

    /// Human-readable description, used in logs and status lines.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Welcome => "Initial welcome round",
            Self::GeneralInstructions => "General instructions round",
            Self::Instructions => "Instructions round",
            Self::PrivatePractice => "Private practice round",
            Self::Practice => "Practice round",
            Self::Regular => "Regular experiment round",
            Self::Chat => "Chat round",
            Self::Quiz => "Quiz round",
            Self::Survey => "Survey round",
            Self::Debriefing => "Debriefing round",
        }
    }
}

// ---------------------------------------------------------------------------
// Experiment status
// ---------------------------------------------------------------------------

/// Lifecycle status of an experiment.
///
/// `Inactive -> Active -> RoundInProgress`, looping between `Active` and
/// `RoundInProgress` once per round, and finally `Completed`. `Completed` is
/// terminal except through an explicit restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ExperimentStatus {
    /// Not active.
    #[default]
    Inactive,
    /// Active, no round in progress.
    Active,
    /// Round in progress; decisions are accepted.
    RoundInProgress,
    /// Completed (archived).
    Completed,
}

impl ExperimentStatus {
    /// Whether the experiment is running (active or in a round).
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::RoundInProgress)
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// The kind of owner a parameter's values attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ParameterScope {
    /// Experiment-wide configuration value.
    Experiment,
    /// Per-round configuration value.
    Round,
    /// Per-group data value.
    Group,
    /// Per-cluster data value.
    Cluster,
    /// Per-participant (membership) data value.
    Participant,
}

/// The declared type of a parameter's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ValueType {
    /// Whole number.
    Int,
    /// Exact decimal quantity.
    Decimal,
    /// Boolean flag.
    Bool,
    /// Free text.
    Text,
    /// One of a fixed set of text choices.
    Enum,
    /// Reference to another entity by UUID.
    Reference,
}

// ---------------------------------------------------------------------------
// Experiment families
// ---------------------------------------------------------------------------

/// The family of experiment, which selects the settlement strategy that runs
/// at round boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ExperimentFamily {
    /// One forest per group, stepped harvest limits, no earnings settlement.
    Forestry,
    /// Boundary-effects design: optional shared pools, storage, survival.
    #[default]
    BoundaryEffects,
}

impl ExperimentFamily {
    /// Namespace string identifying the family in logs.
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::Forestry => "forestry",
            Self::BoundaryEffects => "bound",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playable_kinds() {
        assert!(RoundKind::Regular.is_playable());
        assert!(RoundKind::Practice.is_playable());
        assert!(RoundKind::PrivatePractice.is_playable());
        assert!(!RoundKind::Chat.is_playable());
        assert!(!RoundKind::Debriefing.is_playable());
    }

    #[test]
    fn round_kind_serde_snake_case() {
        let json = serde_json::to_string(&RoundKind::PrivatePractice).ok();
        assert_eq!(json.as_deref(), Some("\"private_practice\""));
    }

    #[test]
    fn status_activity() {
        assert!(ExperimentStatus::Active.is_active());
        assert!(ExperimentStatus::RoundInProgress.is_active());
        assert!(!ExperimentStatus::Inactive.is_active());
        assert!(!ExperimentStatus::Completed.is_active());
    }
}
