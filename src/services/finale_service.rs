//! Finale director: bonus awards, frozen standings and the paced reveal sequence.

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::{
        party::StandingView,
        sse::{FinaleStartedEvent, PartyCompletedEvent, RevealStepEvent},
    },
    error::ServiceError,
    services::{
        bonus::compute_bonus_results,
        party_service::{ensure_host, ensure_phase, load_handle},
        projection, rounds,
        scoring::calculate_final_standings,
        timers::{TimerKey, TimerRequest},
    },
    state::{
        PartyRuntime, SharedState,
        party::{BonusResult, FinaleState, RevealStep, Standing},
        state_machine::{PartyEvent, PartyPhase},
        transitions::{Staged, commit},
    },
};

/// Host override to end playback early. Only valid once no song is left to play.
pub async fn advance_to_finale(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "advance the party")?;
        ensure_phase(staged.phase(), PartyPhase::Playing, "the party is not playing")?;
        if !rounds::is_queue_exhausted(&staged.session) {
            return Err(ServiceError::InvalidState("songs are still queued".into()));
        }
        enter_finale(staged)
    })
    .await
}

/// Host skip: reveal the next step now instead of waiting for the timer.
pub async fn reveal_next(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "reveal the finale")?;
        ensure_phase(staged.phase(), PartyPhase::Finale, "the finale is not running")?;
        reveal_in(staged)
    })
    .await?;
    release_if_complete(state, &runtime);
    Ok(())
}

/// Close the party once the whole reveal sequence has been shown.
pub async fn advance_to_complete(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "complete the party")?;
        ensure_phase(staged.phase(), PartyPhase::Finale, "the finale is not running")?;
        let revealed = staged
            .session
            .finale
            .as_ref()
            .is_some_and(FinaleState::is_complete);
        if !revealed {
            return Err(ServiceError::InvalidState("the reveal is still running".into()));
        }
        finish(staged)
    })
    .await?;
    release_if_complete(state, &runtime);
    Ok(())
}

/// Timer entry point. A step already shown, or a party that moved on, makes this a no-op.
pub(crate) async fn reveal_step(
    state: &SharedState,
    runtime: &mut PartyRuntime,
    cursor: usize,
) -> Result<(), ServiceError> {
    let due = runtime.machine.phase() == PartyPhase::Finale
        && runtime
            .session
            .finale
            .as_ref()
            .is_some_and(|finale| finale.cursor == cursor);
    if !due {
        debug!(party_id = %runtime.session.id, cursor, "reveal step already shown; timer ignored");
        return Ok(());
    }
    commit(state, runtime, reveal_in).await?;
    release_if_complete(state, runtime);
    Ok(())
}

/// A finished party leaves the registry. Later reads load it from storage.
fn release_if_complete(state: &SharedState, runtime: &PartyRuntime) {
    if runtime.machine.phase() == PartyPhase::Complete {
        state.unregister(runtime.session.id, &runtime.session.join_code);
        debug!(party_id = %runtime.session.id, "completed party released");
    }
}

/// Enter the finale: award bonuses, freeze standings and start the reveal clock.
pub(crate) fn enter_finale(staged: &mut Staged<'_>) -> Result<(), ServiceError> {
    staged.transition(PartyEvent::QueueExhausted)?;
    staged.session.current_song_id = None;
    // Display sabotage holds until the finale.
    staged.session.flags.hide_scores = false;
    staged.session.flags.anonymous_voting = false;

    let bonus_results = compute_bonus_results(&staged.session, &mut staged.rng);
    staged.session.bonus_results = bonus_results;
    let standings = calculate_final_standings(&staged.session);
    let steps = reveal_plan(&staged.session.bonus_results, &standings);
    let steps_total = steps.len();

    info!(
        party_id = %staged.session.id,
        bonus_results = staged.session.bonus_results.len(),
        steps_total,
        "finale started"
    );
    staged.session.finale = Some(FinaleState {
        standings,
        steps,
        cursor: 0,
    });
    staged.notify_party("finale.started", &FinaleStartedEvent { steps_total });
    staged.schedule(TimerRequest::reveal_step(0, staged.config.finale_step_delay()));
    Ok(())
}

/// Bonus awards in reveal order, then everyone but the champions from last place up, then the
/// champions together.
fn reveal_plan(bonus_results: &[BonusResult], standings: &[Standing]) -> Vec<RevealStep> {
    let mut ordered_bonus = bonus_results.iter().collect::<Vec<_>>();
    ordered_bonus.sort_by_key(|result| result.reveal_order);

    let mut steps = ordered_bonus
        .into_iter()
        .map(|result| RevealStep::Bonus {
            result_id: result.id,
        })
        .collect::<Vec<_>>();
    steps.extend(
        standings
            .iter()
            .rev()
            .filter(|standing| standing.rank != 1)
            .map(|standing| RevealStep::Identity {
                player_id: standing.player_id,
            }),
    );
    let champions = standings
        .iter()
        .filter(|standing| standing.rank == 1)
        .map(|standing| standing.player_id)
        .collect::<Vec<_>>();
    if !champions.is_empty() {
        steps.push(RevealStep::Champion {
            player_ids: champions,
        });
    }
    steps
}

/// Show the step under the cursor, or close the party when nothing is left to show.
fn reveal_in(staged: &mut Staged<'_>) -> Result<(), ServiceError> {
    let delay = staged.config.finale_step_delay();
    let finale = staged
        .session
        .finale
        .as_ref()
        .ok_or_else(|| ServiceError::InvalidState("finale has not been prepared".into()))?;
    if finale.is_complete() {
        return finish(staged);
    }

    let cursor = finale.cursor;
    let steps_total = finale.steps.len();
    let reveal = projection::reveal_view(&staged.session, finale, &finale.steps[cursor])
        .ok_or_else(|| ServiceError::InvalidState(format!("reveal step {cursor} is dangling")))?;
    if let Some(finale) = staged.session.finale.as_mut() {
        finale.cursor = cursor + 1;
    }

    debug!(party_id = %staged.session.id, step = cursor + 1, steps_total, "reveal step");
    staged.notify_party(
        "finale.reveal",
        &RevealStepEvent {
            step: cursor + 1,
            steps_total,
            reveal,
        },
    );
    // The step after the last one closes the party.
    staged.schedule(TimerRequest::reveal_step(cursor + 1, delay));
    Ok(())
}

fn finish(staged: &mut Staged<'_>) -> Result<(), ServiceError> {
    staged.transition(PartyEvent::RevealFinished)?;
    staged.cancel(TimerKey::RevealStep);
    let standings = staged
        .session
        .finale
        .as_ref()
        .map(|finale| finale.standings.iter().map(StandingView::from).collect())
        .unwrap_or_default();
    info!(party_id = %staged.session.id, "party complete");
    staged.notify_party("party.completed", &PartyCompletedEvent { standings });
    Ok(())
}
