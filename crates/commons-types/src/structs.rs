//! Core entity structs for the Commons experiment engine.
//!
//! Covers round configuration and materialized rounds, groups, clusters and
//! memberships, and the typed data value rows the versioned store keeps.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::{RoundKind, ValueType};
use crate::ids::{
    ClusterId, DataValueId, ExperimentId, GroupId, MembershipId, ParameterId, ParticipantId,
    RoundDataId,
};

// ---------------------------------------------------------------------------
// Round configuration
// ---------------------------------------------------------------------------

/// Boolean switches controlling what happens when a round starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RoundFlags {
    /// Refill every pool to capacity and revive every participant.
    #[serde(default)]
    pub reset_resource_level: bool,
    /// Re-form groups from a shuffled participant list.
    #[serde(default)]
    pub randomize_groups: bool,
    /// Keep groups from earlier rounds of the same session.
    #[serde(default)]
    pub preserve_existing_groups: bool,
    /// Partition the session's groups into clusters.
    #[serde(default)]
    pub create_group_clusters: bool,
    /// Seed tracked data values with their defaults.
    #[serde(default = "default_true")]
    pub initialize_data_values: bool,
    /// Whether chat is available during the round.
    #[serde(default)]
    pub chat_enabled: bool,
    /// Groups in a cluster harvest from one shared pool.
    #[serde(default)]
    pub shared_resource: bool,
    /// Participants can see the related group's pool.
    #[serde(default)]
    pub observe_other_group: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for RoundFlags {
    fn default() -> Self {
        Self {
            reset_resource_level: false,
            randomize_groups: false,
            preserve_existing_groups: false,
            create_group_clusters: false,
            initialize_data_values: true,
            chat_enabled: false,
            shared_resource: false,
            observe_other_group: false,
        }
    }
}

/// Per-round overrides of experiment-level dynamics parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RoundOverrides {
    /// Logistic regrowth rate in `[0, 1]`.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub regrowth_rate: Option<Decimal>,
    /// Amount deducted from each participant's storage per round.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub cost_of_living: Option<Decimal>,
    /// Explicit starting level, which also becomes the pool capacity.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub initial_resource_level: Option<Decimal>,
}

/// One step in a treatment's ordered round sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RoundConfiguration {
    /// 1-based position in the treatment, kept dense by the registry.
    #[serde(default)]
    pub sequence_number: u32,
    /// What kind of step this is.
    pub kind: RoundKind,
    /// Round duration in seconds; 0 means untimed.
    #[serde(default)]
    pub duration_secs: u64,
    /// Number of additional passes for a repeating round.
    #[serde(default)]
    pub repeat: u32,
    /// Session this round's groups belong to.
    #[serde(default)]
    pub session_id: String,
    /// Start-of-round switches.
    #[serde(default)]
    pub flags: RoundFlags,
    /// Number of groups per cluster when clusters are created.
    #[serde(default = "default_cluster_size")]
    pub group_cluster_size: u32,
    /// Dynamics overrides for this round.
    #[serde(default)]
    pub overrides: RoundOverrides,
}

const fn default_cluster_size() -> u32 {
    2
}

impl RoundConfiguration {
    /// A configuration of the given kind with default flags.
    pub fn new(kind: RoundKind) -> Self {
        Self {
            sequence_number: 0,
            kind,
            duration_secs: 0,
            repeat: 0,
            session_id: String::new(),
            flags: RoundFlags::default(),
            group_cluster_size: default_cluster_size(),
            overrides: RoundOverrides::default(),
        }
    }

    /// Whether this configuration is replayed more than once.
    pub const fn is_repeating(&self) -> bool {
        self.repeat > 0
    }

    /// Whether this round collects harvest decisions.
    pub const fn is_playable(&self) -> bool {
        self.kind.is_playable()
    }

    /// Whether this round runs against a clock.
    pub const fn is_timed(&self) -> bool {
        self.duration_secs > 0
    }

    /// Whether `repetition` is the first pass of this configuration.
    const fn is_first_pass(&self, repetition: u32) -> bool {
        !self.is_repeating() || repetition == 0
    }

    /// Whether data values are seeded when starting `repetition`.
    ///
    /// Later repetitions of a repeating round keep accumulated state.
    pub const fn should_initialize(&self, repetition: u32) -> bool {
        self.flags.initialize_data_values && self.is_first_pass(repetition)
    }

    /// Whether pools and participants are reset when starting `repetition`.
    pub const fn should_reset(&self, repetition: u32) -> bool {
        self.flags.reset_resource_level && self.is_first_pass(repetition)
    }

    /// Whether groups are re-formed when starting `repetition`.
    pub const fn should_randomize(&self, repetition: u32) -> bool {
        self.flags.randomize_groups && self.is_first_pass(repetition)
    }

    /// Group size limit for this round given the experiment-wide limit.
    ///
    /// Private practice rounds are always played alone.
    pub const fn effective_max_group_size(&self, experiment_max: Option<u32>) -> Option<u32> {
        match self.kind {
            RoundKind::PrivatePractice => Some(1),
            _ => experiment_max,
        }
    }
}

// ---------------------------------------------------------------------------
// Round progress
// ---------------------------------------------------------------------------

/// Position of an experiment in its treatment: configuration plus pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub struct RoundPointer {
    /// 1-based sequence number of the round configuration.
    pub sequence_number: u32,
    /// 0-based repetition index within a repeating configuration.
    pub repetition: u32,
}

impl RoundPointer {
    /// The first pass of the first round.
    pub const fn first() -> Self {
        Self {
            sequence_number: 1,
            repetition: 0,
        }
    }

    /// Pointer to the first pass of `sequence_number`.
    pub const fn at(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            repetition: 0,
        }
    }
}

impl Default for RoundPointer {
    fn default() -> Self {
        Self::first()
    }
}

impl core::fmt::Display for RoundPointer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.repetition == 0 {
            write!(f, "round {}", self.sequence_number)
        } else {
            write!(
                f,
                "round {} (repetition {})",
                self.sequence_number, self.repetition
            )
        }
    }
}

/// One materialized round instance, created lazily on first access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RoundData {
    /// Unique identifier.
    pub id: RoundDataId,
    /// Owning experiment.
    pub experiment_id: ExperimentId,
    /// Which configuration and repetition this instance materializes.
    pub pointer: RoundPointer,
    /// When the round data was created.
    pub created_at: DateTime<Utc>,
}

impl RoundData {
    /// Materialize a new round instance.
    pub fn new(experiment_id: ExperimentId, pointer: RoundPointer) -> Self {
        Self {
            id: RoundDataId::new(),
            experiment_id,
            pointer,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Groups and clusters
// ---------------------------------------------------------------------------

/// A participant's place in one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Membership {
    /// Unique identifier; owner of participant-scoped data values.
    pub id: MembershipId,
    /// The participant.
    pub participant_id: ParticipantId,
    /// The group.
    pub group_id: GroupId,
    /// 1-based position within the group.
    pub participant_number: u32,
}

/// A bounded partition of participants, scoped to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Group {
    /// Unique identifier.
    pub id: GroupId,
    /// 1-based group number within the experiment.
    pub number: u32,
    /// Maximum member count; `None` is unbounded.
    pub max_size: Option<u32>,
    /// Session the group belongs to.
    pub session_id: String,
    /// Current members in join order.
    pub members: Vec<Membership>,
}

impl Group {
    /// Create an empty group.
    pub fn new(number: u32, max_size: Option<u32>, session_id: impl Into<String>) -> Self {
        Self {
            id: GroupId::new(),
            number,
            max_size,
            session_id: session_id.into(),
            members: Vec::new(),
        }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has reached its size limit.
    pub fn is_full(&self) -> bool {
        self.max_size
            .is_some_and(|max| usize::try_from(max).is_ok_and(|max| self.members.len() >= max))
    }

    /// Whether `participant` is a member.
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.members.iter().any(|m| m.participant_id == participant)
    }

    /// Membership for `participant`, if any.
    pub fn membership_of(&self, participant: ParticipantId) -> Option<&Membership> {
        self.members.iter().find(|m| m.participant_id == participant)
    }
}

/// A set of groups harvesting from one shared pool.
///
/// Membership is immutable once created; clusters are only ever recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GroupCluster {
    /// Unique identifier.
    pub id: ClusterId,
    /// Session the cluster belongs to.
    pub session_id: String,
    /// Member groups in processing order.
    pub groups: Vec<GroupId>,
}

impl GroupCluster {
    /// Whether `group` belongs to this cluster.
    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }
}

// ---------------------------------------------------------------------------
// Data values
// ---------------------------------------------------------------------------

/// The entity a data value is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Owner {
    /// The experiment itself.
    Experiment(ExperimentId),
    /// A group's pool.
    Group(GroupId),
    /// A cluster's shared pool.
    Cluster(ClusterId),
    /// A participant in a particular group.
    Participant(MembershipId),
}

impl core::fmt::Display for Owner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Experiment(id) => write!(f, "experiment:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Cluster(id) => write!(f, "cluster:{id}"),
            Self::Participant(id) => write!(f, "participant:{id}"),
        }
    }
}

/// A typed value slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Whole number.
    Int(i64),
    /// Exact decimal quantity.
    Decimal(Decimal),
    /// Boolean flag.
    Bool(bool),
    /// Free text or an enum choice.
    Text(String),
    /// Reference to another entity.
    Reference(Uuid),
}

impl Value {
    /// The declared type this value satisfies.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Decimal(_) => ValueType::Decimal,
            Self::Bool(_) => ValueType::Bool,
            Self::Text(_) => ValueType::Text,
            Self::Reference(_) => ValueType::Reference,
        }
    }

    /// Numeric view of the value; integers widen to decimals.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Int(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// One row of the versioned data store.
///
/// Rows are never edited in place once superseded; a correction creates a
/// fresh row and deactivates the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
    /// Unique identifier for this row.
    pub id: DataValueId,
    /// What the value is attached to.
    pub owner: Owner,
    /// Round instance.
    pub round: RoundDataId,
    /// Parameter slot.
    pub parameter: ParameterId,
    /// The typed value.
    pub value: Value,
    /// Whether the owner has finalized this value.
    pub submitted: bool,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl DataValue {
    /// Create a fresh, unsubmitted row.
    pub fn new(owner: Owner, round: RoundDataId, parameter: ParameterId, value: Value) -> Self {
        Self {
            id: DataValueId::new(),
            owner,
            round,
            parameter,
            value,
            submitted: false,
            created_at: Utc::now(),
        }
    }

    /// Copy of this row with a new identity in another round.
    pub fn carried_to(&self, round: RoundDataId) -> Self {
        Self {
            id: DataValueId::new(),
            round,
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Numeric view of the value.
    pub fn decimal(&self) -> Option<Decimal> {
        self.value.as_decimal()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn repeating_round_seeds_only_first_pass() {
        let mut config = RoundConfiguration::new(RoundKind::Regular);
        config.repeat = 3;
        config.flags.reset_resource_level = true;
        config.flags.randomize_groups = true;
        assert!(config.should_initialize(0));
        assert!(!config.should_initialize(1));
        assert!(config.should_reset(0));
        assert!(!config.should_reset(2));
        assert!(config.should_randomize(0));
        assert!(!config.should_randomize(1));
    }

    #[test]
    fn private_practice_plays_alone() {
        let config = RoundConfiguration::new(RoundKind::PrivatePractice);
        assert_eq!(config.effective_max_group_size(Some(5)), Some(1));
        let regular = RoundConfiguration::new(RoundKind::Regular);
        assert_eq!(regular.effective_max_group_size(Some(5)), Some(5));
        assert_eq!(regular.effective_max_group_size(None), None);
    }

    #[test]
    fn unbounded_group_is_never_full() {
        let mut group = Group::new(1, None, "");
        for n in 1..=50 {
            group.members.push(Membership {
                id: MembershipId::new(),
                participant_id: ParticipantId::new(),
                group_id: group.id,
                participant_number: n,
            });
        }
        assert!(!group.is_full());
    }

    #[test]
    fn bounded_group_fills() {
        let mut group = Group::new(1, Some(1), "");
        assert!(!group.is_full());
        group.members.push(Membership {
            id: MembershipId::new(),
            participant_id: ParticipantId::new(),
            group_id: group.id,
            participant_number: 1,
        });
        assert!(group.is_full());
    }

    #[test]
    fn carried_row_has_new_identity() {
        let row = DataValue::new(
            Owner::Group(GroupId::new()),
            RoundDataId::new(),
            ParameterId::new(),
            Value::Decimal(dec!(42.5)),
        );
        let next = RoundDataId::new();
        let carried = row.carried_to(next);
        assert_ne!(carried.id, row.id);
        assert_eq!(carried.round, next);
        assert_eq!(carried.decimal(), Some(dec!(42.5)));
    }

    #[test]
    fn value_int_widens_to_decimal() {
        assert_eq!(Value::Int(7).as_decimal(), Some(dec!(7)));
        assert_eq!(Value::Bool(true).as_decimal(), None);
    }

    #[test]
    fn round_flags_default_initializes() {
        let flags: RoundFlags = serde_json::from_str("{}").unwrap();
        assert!(flags.initialize_data_values);
        assert!(!flags.shared_resource);
    }
}
