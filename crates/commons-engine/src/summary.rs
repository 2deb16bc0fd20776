//! Round listener that logs a per-round summary.

use tracing::info;

use commons_core::{ExperimentState, RoundEvent, RoundEventKind, RoundEventListener};

/// Logs pool levels and alive counts whenever a round ends.
#[derive(Debug)]
pub struct SummaryListener {
    instance: u32,
}

impl SummaryListener {
    /// Create a listener tagging its output with `instance`.
    pub const fn new(instance: u32) -> Self {
        Self { instance }
    }
}

impl RoundEventListener for SummaryListener {
    fn on_round_event(&mut self, event: &RoundEvent, state: &ExperimentState) {
        let report = match &event.kind {
            RoundEventKind::Started => {
                info!(
                    instance = self.instance,
                    round = %event.pointer,
                    kind = event.round_kind.description(),
                    "round started"
                );
                return;
            }
            RoundEventKind::Ended(report) => report,
        };

        for group in &report.groups {
            info!(
                instance = self.instance,
                round = %event.pointer,
                group = %group.group_id,
                harvest = %group.harvest,
                regrowth = %group.regrowth,
                level = %group.resource_level,
                adjusted = group.adjusted,
                "group pool"
            );
        }
        for cluster in &report.clusters {
            info!(
                instance = self.instance,
                round = %event.pointer,
                groups = cluster.group_harvests.len(),
                regrowth = %cluster.regrowth,
                level = %cluster.resource_level,
                "shared pool"
            );
        }
        if let Some(participants) = report.participants {
            info!(
                instance = self.instance,
                round = %event.pointer,
                alive = participants.alive,
                died = participants.died,
                participants = state.topology.memberships().count(),
                "participants settled"
            );
        }
    }
}
