//! Integration tests driving whole experiments through the public facade.
//!
//! Each test configures a treatment, registers participants, activates the
//! experiment and plays rounds the way a caller would, then checks pool
//! levels, decisions and balances through read-only queries.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use commons_core::{
    Experiment, ExperimentState, RoundEvent, RoundEventKind, RoundEventListener, SubmissionError,
    TreatmentConfig,
};
use commons_store::ValueKey;
use commons_types::{
    DataValue, ExperimentFamily, ExperimentStatus, GroupId, Membership, Owner, ParameterId,
    ParameterRegistry, ParticipantId, RoundConfiguration, RoundKind, RoundPointer,
    SimulationParameters, Value,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn regular() -> RoundConfiguration {
    RoundConfiguration::new(RoundKind::Regular)
}

fn with_reset(mut round: RoundConfiguration) -> RoundConfiguration {
    round.flags.reset_resource_level = true;
    round
}

fn treatment(max_group_size: u32, rounds: Vec<RoundConfiguration>) -> TreatmentConfig {
    TreatmentConfig {
        max_group_size,
        shuffle_participants: false,
        rounds,
        ..TreatmentConfig::default()
    }
}

fn start(config: &TreatmentConfig, participants: usize) -> Experiment {
    let mut experiment =
        Experiment::new(config, Arc::new(ParameterRegistry::standard())).unwrap();
    experiment.register_participants((0..participants).map(|_| ParticipantId::new()));
    experiment.activate().unwrap();
    experiment
}

fn params(experiment: &Experiment) -> SimulationParameters {
    experiment.state().params()
}

fn members(experiment: &Experiment, group: GroupId) -> Vec<Membership> {
    experiment
        .state()
        .topology
        .group(group)
        .unwrap()
        .members
        .clone()
}

fn first_group(experiment: &Experiment) -> GroupId {
    experiment.state().topology.groups().first().unwrap().id
}

fn decide_all(experiment: &mut Experiment, memberships: &[Membership], amounts: &[Decimal]) {
    for (membership, amount) in memberships.iter().zip(amounts) {
        experiment
            .submit_harvest_decision(membership.id, *amount, true)
            .unwrap();
    }
}

fn in_round(
    experiment: &Experiment,
    pointer: RoundPointer,
    owner: Owner,
    parameter: ParameterId,
) -> Decimal {
    let round = experiment.state().round_data(pointer).unwrap().id;
    experiment.value_in_round(owner, round, parameter)
}

fn current(experiment: &Experiment, owner: Owner, parameter: ParameterId) -> Decimal {
    experiment.state().decimal(owner, parameter)
}

#[derive(Default, Clone)]
struct Reports(Arc<Mutex<Vec<RoundEvent>>>);

impl RoundEventListener for Reports {
    fn on_round_event(&mut self, event: &RoundEvent, _state: &ExperimentState) {
        self.0.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Four participants asking 15 each from a pool of 40 are all rationed to 10.
#[test]
fn oversubscribed_pool_is_rationed_evenly() {
    let mut first = with_reset(regular());
    first.overrides.regrowth_rate = Some(Decimal::ZERO);
    first.overrides.initial_resource_level = Some(dec!(120));
    let mut second = regular();
    second.overrides.initial_resource_level = Some(dec!(120));
    let mut config = treatment(4, vec![first, second, RoundConfiguration::new(RoundKind::Debriefing)]);
    config.max_harvest_decision = dec!(20);

    let mut experiment = start(&config, 4);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), dec!(120));

    decide_all(&mut experiment, &memberships, &[dec!(20); 4]);
    experiment.advance_to_next_round().unwrap();
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), dec!(40));

    decide_all(&mut experiment, &memberships, &[dec!(15); 4]);
    experiment.advance_to_next_round().unwrap();

    let round = RoundPointer::at(2);
    assert_eq!(in_round(&experiment, round, Owner::Group(group), p.group_harvest), dec!(40));
    assert_eq!(in_round(&experiment, round, Owner::Group(group), p.group_regrowth), Decimal::ZERO);
    assert_eq!(in_round(&experiment, round, Owner::Group(group), p.resource_level), Decimal::ZERO);
    let round_id = experiment.state().round_data(round).unwrap().id;
    for membership in &memberships {
        let owner = Owner::Participant(membership.id);
        assert_eq!(in_round(&experiment, round, owner, p.harvest_decision), dec!(10));
        let key = ValueKey::new(owner, round_id, p.harvest_decision);
        let history = experiment.state().store.history(&key);
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|v| v.active).count(), 1);
        // 20 - 5 in the first round, then 10 - 5.
        assert_eq!(current(&experiment, owner, p.storage), dec!(20));
    }
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), Decimal::ZERO);
}

/// One participant harvesting 20 from a full pool of 100 at rate 0.1.
#[test]
fn single_harvest_from_full_pool_regrows() {
    let mut round = with_reset(regular());
    round.overrides.regrowth_rate = Some(dec!(0.1));
    round.overrides.initial_resource_level = Some(dec!(100));
    let mut config = treatment(1, vec![round, RoundConfiguration::new(RoundKind::Debriefing)]);
    config.max_harvest_decision = dec!(20);

    let mut experiment = start(&config, 1);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);

    decide_all(&mut experiment, &memberships, &[dec!(20)]);
    experiment.advance_to_next_round().unwrap();

    let first = RoundPointer::first();
    assert_eq!(in_round(&experiment, first, Owner::Group(group), p.group_harvest), dec!(20));
    assert_eq!(in_round(&experiment, first, Owner::Group(group), p.group_regrowth), dec!(1.6));
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), dec!(81.6));
    let member = Owner::Participant(memberships.first().unwrap().id);
    assert_eq!(current(&experiment, member, p.storage), dec!(15));
}

/// Two groups sharing one pool: the second group is rationed against what
/// the first left behind.
#[test]
fn shared_pool_is_settled_group_by_group() {
    let mut round = with_reset(regular());
    round.flags.create_group_clusters = true;
    round.flags.shared_resource = true;
    round.group_cluster_size = 2;
    round.overrides.initial_resource_level = Some(dec!(15));
    let config = treatment(3, vec![round, RoundConfiguration::new(RoundKind::Debriefing)]);

    let mut experiment = start(&config, 6);
    let p = params(&experiment);
    let cluster = experiment.state().topology.clusters().first().unwrap().clone();
    assert_eq!(cluster.groups.len(), 2);
    assert_eq!(current(&experiment, Owner::Cluster(cluster.id), p.resource_level), dec!(30));

    let first = *cluster.groups.first().unwrap();
    let second = *cluster.groups.last().unwrap();
    let first_members = members(&experiment, first);
    let second_members = members(&experiment, second);
    decide_all(&mut experiment, &first_members, &[dec!(3), dec!(3), dec!(4)]);
    decide_all(&mut experiment, &second_members, &[dec!(10); 3]);
    experiment.advance_to_next_round().unwrap();

    let round = RoundPointer::first();
    assert_eq!(in_round(&experiment, round, Owner::Group(first), p.group_harvest), dec!(10));
    assert_eq!(in_round(&experiment, round, Owner::Group(second), p.group_harvest), dec!(20));
    let rationed: Decimal = second_members
        .iter()
        .map(|m| in_round(&experiment, round, Owner::Participant(m.id), p.harvest_decision))
        .sum();
    assert!(rationed <= dec!(20));
    for m in &first_members {
        let owner = Owner::Participant(m.id);
        assert!(in_round(&experiment, round, owner, p.harvest_decision) <= dec!(4));
    }
    assert_eq!(current(&experiment, Owner::Cluster(cluster.id), p.resource_level), Decimal::ZERO);
}

/// `repeat = 3` plays four passes of the same configuration.
#[test]
fn repeating_round_walks_every_repetition() {
    let mut round = with_reset(regular());
    round.repeat = 3;
    round.overrides.initial_resource_level = Some(dec!(100));
    let config = treatment(4, vec![round, RoundConfiguration::new(RoundKind::Debriefing)]);

    let mut experiment = start(&config, 4);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);

    decide_all(&mut experiment, &memberships, &[dec!(10); 4]);
    experiment.advance_to_next_round().unwrap();
    assert_eq!(
        experiment.pointer(),
        RoundPointer { sequence_number: 1, repetition: 1 }
    );
    // Later repetitions keep the pool instead of resetting it.
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), dec!(69.6));
    assert_eq!(experiment.state().topology.groups().first().unwrap().id, group);

    experiment.advance_to_next_round().unwrap();
    assert_eq!(experiment.pointer().repetition, 2);
    experiment.advance_to_next_round().unwrap();
    assert_eq!(
        experiment.pointer(),
        RoundPointer { sequence_number: 1, repetition: 3 }
    );
    experiment.advance_to_next_round().unwrap();
    assert_eq!(experiment.pointer(), RoundPointer::at(2));
}

/// An exhausted pool stays exhausted and freezes decisions at round start.
#[test]
fn depleted_pool_freezes_decisions() {
    let mut first = with_reset(regular());
    first.overrides.initial_resource_level = Some(dec!(20));
    let mut second = regular();
    second.overrides.initial_resource_level = Some(dec!(20));
    let config = treatment(2, vec![first, second, RoundConfiguration::new(RoundKind::Debriefing)]);

    let mut experiment = start(&config, 2);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);
    decide_all(&mut experiment, &memberships, &[dec!(10); 2]);
    experiment.advance_to_next_round().unwrap();

    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), Decimal::ZERO);
    assert!(experiment.all_participants_submitted());
    assert_eq!(experiment.number_of_ready_participants(), 2);
    for m in &memberships {
        assert_eq!(current(&experiment, Owner::Participant(m.id), p.harvest_decision), Decimal::ZERO);
    }

    experiment.advance_to_next_round().unwrap();
    let round = RoundPointer::at(2);
    assert_eq!(in_round(&experiment, round, Owner::Group(group), p.group_harvest), Decimal::ZERO);
    assert_eq!(in_round(&experiment, round, Owner::Group(group), p.group_regrowth), Decimal::ZERO);
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), Decimal::ZERO);
}

/// A participant who cannot pay the cost of living dies and is frozen.
#[test]
fn starving_participant_dies() {
    let config = treatment(
        2,
        vec![with_reset(regular()), regular(), RoundConfiguration::new(RoundKind::Debriefing)],
    );
    let mut experiment = start(&config, 2);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);
    let (worker, idler) = (memberships.first().unwrap().id, memberships.last().unwrap().id);

    experiment
        .submit_harvest_decision(worker, dec!(8), true)
        .unwrap();
    experiment.advance_to_next_round().unwrap();

    assert_eq!(current(&experiment, Owner::Participant(worker), p.storage), dec!(3));
    assert_eq!(current(&experiment, Owner::Participant(idler), p.storage), Decimal::ZERO);
    assert!(!experiment.state().is_alive(idler));
    assert!(matches!(
        experiment.submit_harvest_decision(idler, dec!(1), true),
        Err(SubmissionError::ParticipantDead(_))
    ));

    let view = experiment.view_model(worker, Utc::now()).unwrap();
    assert_eq!(view.my_group.alive_summary(), "1 out of 2");
    assert!(view.alive);
    let table = experiment.player_data(group).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.iter().any(|row| row.last_harvest_decision == dec!(8)));
}

/// Duplicate active decisions loaded from outside are collapsed at round end.
#[test]
fn duplicate_decisions_are_normalized() {
    let config = treatment(2, vec![with_reset(regular()), RoundConfiguration::new(RoundKind::Debriefing)]);
    let mut experiment = start(&config, 2);
    let reports = Reports::default();
    experiment.add_listener(Box::new(reports.clone()));
    let p = params(&experiment);
    let group = first_group(&experiment);
    let membership = members(&experiment, group).first().unwrap().id;
    let round = experiment.state().current_round_id().unwrap();
    let owner = Owner::Participant(membership);

    experiment.import_values([
        (DataValue::new(owner, round, p.harvest_decision, Value::Decimal(dec!(2))), true),
        (DataValue::new(owner, round, p.harvest_decision, Value::Decimal(dec!(6))), true),
    ]);
    experiment.end_round().unwrap();

    let key = ValueKey::new(owner, round, p.harvest_decision);
    let row = experiment.state().store.get_exactly_one(&key).unwrap();
    assert_eq!(row.decimal(), Some(dec!(6)));
    let events = reports.0.lock().unwrap();
    let ended = events
        .iter()
        .find_map(|e| match &e.kind {
            RoundEventKind::Ended(report) => Some(report.clone()),
            RoundEventKind::Started => None,
        })
        .unwrap();
    // One duplicate collapsed, one missing decision filled with zero.
    assert_eq!(ended.repaired_decisions, 2);
    assert_eq!(ended.groups.first().unwrap().harvest, dec!(6));
}

// ---------------------------------------------------------------------------
// Lifecycle through the facade
// ---------------------------------------------------------------------------

#[test]
fn submissions_are_validated_at_the_boundary() {
    let config = treatment(
        2,
        vec![RoundConfiguration::new(RoundKind::Welcome), with_reset(regular())],
    );
    let mut experiment = start(&config, 2);
    let membership = members(&experiment, first_group(&experiment)).first().unwrap().id;

    assert!(matches!(
        experiment.submit_harvest_decision(membership, dec!(1), true),
        Err(SubmissionError::NotPlayable)
    ));
    experiment.advance_to_next_round().unwrap();
    assert!(matches!(
        experiment.submit_harvest_decision(membership, dec!(-1), true),
        Err(SubmissionError::OutOfRange { .. })
    ));
    assert!(matches!(
        experiment.submit_harvest_decision(membership, dec!(11), true),
        Err(SubmissionError::OutOfRange { .. })
    ));
    experiment
        .submit_harvest_decision(membership, dec!(4), false)
        .unwrap();
    assert_eq!(experiment.number_of_submitted_decisions(), 0);
    experiment
        .submit_harvest_decision(membership, dec!(5), true)
        .unwrap();
    assert_eq!(experiment.number_of_submitted_decisions(), 1);

    experiment.end_round().unwrap();
    assert!(matches!(
        experiment.submit_harvest_decision(membership, dec!(5), true),
        Err(SubmissionError::RoundNotInProgress)
    ));
}

#[test]
fn memberships_from_another_session_are_rejected() {
    let mut morning = with_reset(regular());
    morning.session_id = "morning".to_owned();
    let mut afternoon = with_reset(regular());
    afternoon.session_id = "afternoon".to_owned();
    afternoon.flags.preserve_existing_groups = true;
    let config = treatment(2, vec![morning, afternoon]);
    let mut experiment = start(&config, 2);
    let earlier = members(&experiment, first_group(&experiment)).first().unwrap().id;

    experiment.advance_to_next_round().unwrap();
    assert_eq!(experiment.state().topology.groups().len(), 2);
    assert!(matches!(
        experiment.submit_harvest_decision(earlier, dec!(1), true),
        Err(SubmissionError::UnknownParticipant(m)) if m == earlier
    ));
    assert!(matches!(
        experiment.set_participant_ready(earlier),
        Err(SubmissionError::UnknownParticipant(_))
    ));

    let later = experiment
        .state()
        .session_memberships("afternoon")
        .first()
        .unwrap()
        .id;
    experiment
        .submit_harvest_decision(later, dec!(1), true)
        .unwrap();
    assert_eq!(experiment.number_of_submitted_decisions(), 1);
}

#[test]
fn experimenter_driven_rounds_track_readiness() {
    let mut config = treatment(2, vec![with_reset(regular())]);
    config.experimenter_driven = true;
    let mut experiment = start(&config, 2);
    let memberships = members(&experiment, first_group(&experiment));

    assert_eq!(experiment.number_of_ready_participants(), 0);
    assert!(!experiment.all_participants_ready());
    for m in &memberships {
        experiment.set_participant_ready(m.id).unwrap();
    }
    assert_eq!(experiment.number_of_ready_participants(), 2);
    assert!(experiment.all_participants_ready());
}

/// Regrouping at the start of a round must give the new memberships their
/// own readiness values, even though the round's data was created while the
/// previous round was settling.
#[test]
fn readiness_follows_regrouped_memberships() {
    let mut second = with_reset(regular());
    second.flags.randomize_groups = true;
    let mut config = treatment(2, vec![with_reset(regular()), second]);
    config.experimenter_driven = true;
    let mut experiment = start(&config, 4);
    let before: Vec<_> = experiment
        .state()
        .topology
        .groups()
        .iter()
        .flat_map(|g| g.members.iter().map(|m| m.id))
        .collect();

    experiment.advance_to_next_round().unwrap();
    assert_eq!(experiment.pointer(), RoundPointer::at(2));

    let state = experiment.state();
    let session = state.current_round().unwrap().session_id.clone();
    let regrouped: Vec<_> = state
        .session_memberships(&session)
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(regrouped.len(), 4);
    assert!(regrouped.iter().all(|m| !before.contains(m)));

    let round = state.current_round_id().unwrap();
    let ready = params(&experiment).participant_ready;
    let covered = state
        .store
        .active_in_round(round, ready)
        .filter(|row| matches!(row.owner, Owner::Participant(m) if regrouped.contains(&m)))
        .filter(|row| row.value == Value::Bool(false))
        .count();
    assert_eq!(covered, 4);
    assert_eq!(experiment.number_of_ready_participants(), 0);

    for m in &regrouped {
        experiment.set_participant_ready(*m).unwrap();
    }
    assert!(experiment.all_participants_ready());
}

#[test]
fn reset_discards_groups_and_round_data() {
    let config = treatment(2, vec![with_reset(regular()), regular()]);
    let mut experiment = start(&config, 4);
    experiment.advance_to_next_round().unwrap();
    assert_eq!(experiment.pointer(), RoundPointer::at(2));

    experiment.reset();
    assert_eq!(experiment.status(), ExperimentStatus::Inactive);
    assert_eq!(experiment.pointer(), RoundPointer::first());
    assert!(experiment.state().store.is_empty());
    assert!(experiment.state().topology.groups().is_empty());
    assert_eq!(experiment.state().rounds().count(), 0);
    assert_eq!(experiment.state().topology.participants().len(), 4);
}

#[test]
fn levels_survive_non_playable_rounds() {
    let mut first = with_reset(regular());
    first.overrides.initial_resource_level = Some(dec!(100));
    let mut third = regular();
    third.overrides.initial_resource_level = Some(dec!(100));
    let config = treatment(
        1,
        vec![first, RoundConfiguration::new(RoundKind::Chat), third],
    );
    let mut experiment = start(&config, 1);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);

    decide_all(&mut experiment, &memberships, &[dec!(10)]);
    experiment.advance_to_next_round().unwrap();
    let after_first = current(&experiment, Owner::Group(group), p.resource_level);
    experiment.advance_to_next_round().unwrap();
    assert_eq!(experiment.pointer(), RoundPointer::at(3));
    assert_eq!(current(&experiment, Owner::Group(group), p.resource_level), after_first);
    assert_eq!(
        experiment.total_harvest(memberships.first().unwrap().id, "").unwrap(),
        dec!(10)
    );
}

#[test]
fn forestry_limits_harvest_by_forest_level() {
    let mut round = with_reset(regular());
    round.overrides.initial_resource_level = Some(dec!(30));
    let mut config = treatment(2, vec![round, regular()]);
    config.family = ExperimentFamily::Forestry;
    let mut experiment = start(&config, 2);
    let p = params(&experiment);
    let group = first_group(&experiment);
    let memberships = members(&experiment, group);
    let membership = memberships.first().unwrap().id;

    assert_eq!(experiment.max_harvest(membership), dec!(5));
    assert!(experiment.submit_harvest_decision(membership, dec!(6), true).is_err());
    decide_all(&mut experiment, &memberships, &[dec!(5), dec!(5)]);
    experiment.advance_to_next_round().unwrap();

    // 30 - 10 = 20, regrowth 0.1 * 20 * (1 - 20 / 30).
    let level = current(&experiment, Owner::Group(group), p.resource_level);
    assert_eq!(level, dec!(20.6666));
    assert_eq!(experiment.max_harvest(membership), dec!(4));
    let storage = ValueKey::new(
        Owner::Participant(membership),
        experiment.state().current_round_id().unwrap(),
        p.storage,
    );
    assert!(experiment.state().store.get(&storage).is_none());
}
