//! Read-only projections handed to the presentation layer.
//!
//! Nothing here is written back to the engine; these are snapshots built from
//! the active data values of the current round.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::RoundKind;
use crate::ids::{GroupId, MembershipId, ParticipantId};
use crate::structs::RoundPointer;

/// Summary of one pool as seen by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PoolStats {
    /// Group the stats describe.
    pub group_id: GroupId,
    /// Current pool level.
    #[ts(as = "String")]
    pub resource_level: Decimal,
    /// Regrowth applied at the end of the previous round.
    #[ts(as = "String")]
    pub regrowth: Decimal,
    /// Level before regrowth was added.
    #[ts(as = "String")]
    pub original_resource_level: Decimal,
    /// Mean active harvest decision across members.
    #[ts(as = "String")]
    pub average_harvest: Decimal,
    /// Mean storage across members.
    #[ts(as = "String")]
    pub average_storage: Decimal,
    /// Members still alive.
    pub number_alive: u32,
    /// Group size.
    pub group_size: u32,
    /// Whether the pool is exhausted.
    pub is_resource_empty: bool,
}

impl PoolStats {
    /// "x out of y" alive count.
    pub fn alive_summary(&self) -> String {
        format!("{} out of {}", self.number_alive, self.group_size)
    }
}

/// Everything a participant's screen needs for the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantViewModel {
    /// The participant's membership.
    pub membership_id: MembershipId,
    /// Kind of the current round.
    pub round_kind: RoundKind,
    /// Current round position.
    pub pointer: RoundPointer,
    /// Whether a round is in progress.
    pub round_in_progress: bool,
    /// Seconds left in a timed round.
    pub time_remaining_secs: Option<u64>,
    /// Regrowth rate in effect.
    #[ts(as = "String")]
    pub regrowth_rate: Decimal,
    /// Storage deducted each round.
    #[ts(as = "String")]
    pub cost_of_living: Decimal,
    /// Largest harvest currently allowed.
    #[ts(as = "String")]
    pub max_harvest_decision: Decimal,
    /// Whether the decision has been finalized.
    pub submitted: bool,
    /// The active harvest decision.
    #[ts(as = "String")]
    pub harvest_decision: Decimal,
    /// Accumulated storage.
    #[ts(as = "String")]
    pub storage: Decimal,
    /// Whether the participant is alive.
    pub alive: bool,
    /// Level of the pool this participant harvests from.
    #[ts(as = "String")]
    pub resource_level: Decimal,
    /// Stats for the participant's own group.
    pub my_group: PoolStats,
    /// Stats for the related group, when observable.
    pub other_group: Option<PoolStats>,
    /// Whether the other group can be observed this round.
    pub can_observe_other_group: bool,
    /// Whether chat is enabled this round.
    pub chat_enabled: bool,
}

/// One member's row in a group's player table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlayerData {
    /// Membership identifier.
    pub membership_id: MembershipId,
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Position within the group.
    pub participant_number: u32,
    /// Most recent active harvest decision.
    #[ts(as = "String")]
    pub last_harvest_decision: Decimal,
    /// Whether the participant is alive.
    pub alive: bool,
    /// Accumulated storage.
    #[ts(as = "String")]
    pub storage: Decimal,
}
