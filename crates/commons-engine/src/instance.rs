//! One experiment instance driven end to end.
//!
//! Each instance owns its own [`Experiment`]; nothing is shared between
//! instances. Two tasks work on it: the driver submits scripted decisions
//! and advances untimed rounds, and the checker ends timed rounds once
//! their clock runs out. The experiment sits behind a `tokio` mutex so only
//! one of them touches it at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use commons_core::{EngineConfig, Experiment, LifecycleError, TreatmentConfig};
use commons_types::{
    ExperimentId, ExperimentStatus, MembershipId, ParameterRegistry, ParticipantId, RoundPointer,
};

use crate::error::EngineError;
use crate::harvester::ScriptedHarvester;
use crate::summary::SummaryListener;

/// How an instance finished.
#[derive(Debug, Clone, Copy)]
pub struct InstanceOutcome {
    /// The experiment that ran.
    pub experiment_id: ExperimentId,
    /// Rounds the driver played.
    pub rounds_played: u32,
    /// Where the experiment stopped.
    pub final_round: RoundPointer,
    /// Participants alive at the end.
    pub alive: usize,
    /// Participants placed in groups.
    pub participants: usize,
}

/// Build, activate and drive one experiment instance to completion.
pub async fn run_instance(
    instance: u32,
    mut treatment: TreatmentConfig,
    engine: EngineConfig,
    parameters: Arc<ParameterRegistry>,
) -> Result<InstanceOutcome, EngineError> {
    treatment.seed = treatment.seed.wrapping_add(u64::from(instance));
    let mut experiment = Experiment::new(&treatment, parameters)?;
    experiment.add_listener(Box::new(SummaryListener::new(instance)));
    experiment.register_participants((0..treatment.participants).map(|_| ParticipantId::new()));
    experiment.activate()?;
    info!(
        instance,
        experiment = %experiment.id(),
        family = experiment.family().namespace(),
        seed = treatment.seed,
        "instance started"
    );

    let experiment = Arc::new(Mutex::new(experiment));
    let check_interval = Duration::from_millis(engine.check_interval_ms.max(1));
    let checker = tokio::spawn(check_timed_rounds(
        instance,
        Arc::clone(&experiment),
        check_interval,
    ));

    let rounds_played = match drive(instance, &experiment, &engine, treatment.seed).await {
        Ok(rounds) => rounds,
        Err(e) => {
            checker.abort();
            return Err(e);
        }
    };
    checker.await.map_err(|e| EngineError::Task {
        instance,
        message: format!("timed-round checker: {e}"),
    })?;

    let experiment = experiment.lock().await;
    let state = experiment.state();
    let participants = state.topology.memberships().count();
    let alive = state
        .topology
        .memberships()
        .filter(|m| state.is_alive(m.id))
        .count();
    Ok(InstanceOutcome {
        experiment_id: experiment.id(),
        rounds_played,
        final_round: experiment.pointer(),
        alive,
        participants,
    })
}

/// Play and advance rounds until the experiment is completed.
///
/// Timed rounds are left to the checker; the driver waits for it to end
/// them and then advances.
async fn drive(
    instance: u32,
    experiment: &Mutex<Experiment>,
    engine: &EngineConfig,
    seed: u64,
) -> Result<u32, EngineError> {
    let mut harvester = ScriptedHarvester::new(engine.harvest_policy, seed);
    let pause = Duration::from_millis(engine.round_pause_ms);
    let wait = Duration::from_millis(engine.check_interval_ms.max(1));
    let mut played: Option<RoundPointer> = None;
    let mut rounds_played: u32 = 0;

    loop {
        let waiting_on_clock = {
            let mut exp = experiment.lock().await;
            match exp.status() {
                ExperimentStatus::Completed => break,
                ExperimentStatus::Inactive => {
                    exp.activate()?;
                    false
                }
                ExperimentStatus::Active => {
                    advance(&mut exp)?;
                    false
                }
                ExperimentStatus::RoundInProgress => {
                    if played != Some(exp.pointer()) {
                        play_round(instance, &mut exp, &mut harvester)?;
                        played = Some(exp.pointer());
                        rounds_played = rounds_played.saturating_add(1);
                    }
                    if exp.state().current_round()?.is_timed() {
                        true
                    } else {
                        advance(&mut exp)?;
                        false
                    }
                }
            }
        };
        tokio::time::sleep(if waiting_on_clock { wait } else { pause }).await;
    }

    debug!(instance, rounds_played, "driver finished");
    Ok(rounds_played)
}

/// Move to the next round, or archive the experiment after the last one.
fn advance(experiment: &mut Experiment) -> Result<(), LifecycleError> {
    if experiment.state().registry.has_next(experiment.pointer()) {
        experiment.advance_to_next_round()
    } else {
        experiment.complete()
    }
}

/// Submit a scripted decision for every living participant who has not
/// submitted yet, then mark everyone ready.
fn play_round(
    instance: u32,
    experiment: &mut Experiment,
    harvester: &mut ScriptedHarvester,
) -> Result<(), LifecycleError> {
    let round = experiment.state().current_round()?;
    let playable = round.is_playable();
    let members: Vec<MembershipId> = experiment
        .state()
        .session_memberships(&round.session_id)
        .iter()
        .map(|m| m.id)
        .collect();

    let now = Utc::now();
    for membership in members {
        let pending = experiment
            .view_model(membership, now)
            .is_ok_and(|view| view.alive && !view.submitted);
        if playable && pending {
            let amount = harvester.choose(experiment.max_harvest(membership));
            if let Err(e) = experiment.submit_harvest_decision(membership, amount, true) {
                warn!(instance, %membership, error = %e, "scripted decision rejected");
            }
        }
        if let Err(e) = experiment.set_participant_ready(membership) {
            warn!(instance, %membership, error = %e, "could not mark participant ready");
        }
    }

    debug!(
        instance,
        round = %experiment.pointer(),
        submitted = experiment.number_of_submitted_decisions(),
        ready = experiment.number_of_ready_participants(),
        "scripted round played"
    );
    Ok(())
}

/// End timed rounds whose clock has run out, until the experiment is
/// completed.
async fn check_timed_rounds(instance: u32, experiment: Arc<Mutex<Experiment>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let mut exp = experiment.lock().await;
        if exp.status() == ExperimentStatus::Completed {
            break;
        }
        match exp.check_elapsed_time(Utc::now()) {
            Ok(true) => info!(instance, round = %exp.pointer(), "timed round ended by checker"),
            Ok(false) => {}
            Err(e) => warn!(instance, error = %e, "timed round check failed"),
        }
    }
    debug!(instance, "timed-round checker stopped");
}
