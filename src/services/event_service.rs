//! Mini-event orchestration: trigger checks, resolution and immunity enforcement.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        party::ActiveEventView,
        sse::{EventResolvedEvent, RevealedVoteView},
    },
    error::ServiceError,
    services::{
        mini_events::{
            self,
            catalog::{self, EventTiming},
            effects::{self, EffectOutcome, ResolveContext, SabotageKind, ScoreDelta},
        },
        party_service::{ensure_host, ensure_phase, load_handle},
        projection,
    },
    state::{
        SharedState,
        party::{ActiveEvent, Immunity},
        state_machine::PartyPhase,
        transitions::{Staged, commit},
    },
};

/// Host-driven trigger check. A fired event stays unresolved until the host resolves it.
pub async fn check_events(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
    timing: EventTiming,
) -> Result<Option<ActiveEventView>, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "check events")?;
        ensure_phase(staged.phase(), PartyPhase::Playing, "events only run while playing")?;
        let round_number = staged.session.current_round();
        Ok(trigger(staged, timing, round_number).map(|index| {
            projection::event_view(&staged.session.events[index])
        }))
    })
    .await
}

/// Host-driven resolution of a fired event.
pub async fn resolve_event(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
    event_id: Uuid,
    song_id: Option<Uuid>,
) -> Result<EventResolvedEvent, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "resolve events")?;
        ensure_phase(staged.phase(), PartyPhase::Playing, "events only run while playing")?;
        resolve_in(staged, event_id, song_id)
    })
    .await
}

/// Trigger check run by the playback loop; a fired event is resolved straight away.
pub(crate) fn run_event_check(staged: &mut Staged<'_>, timing: EventTiming, ctx: ResolveContext) {
    let Some(index) = trigger(staged, timing, ctx.round_number) else {
        return;
    };
    let event_id = staged.session.events[index].id;
    if let Err(err) = resolve_in(staged, event_id, ctx.song_id) {
        warn!(event_id = %event_id, error = %err, "automatic event resolution failed; event left pending");
    }
}

/// Draw for `timing` and record the fired event, returning its index.
fn trigger(staged: &mut Staged<'_>, timing: EventTiming, round_number: u8) -> Option<usize> {
    let frequency = staged.session.settings.event_frequency;
    let definition = mini_events::check_trigger(timing, frequency, &mut staged.rng)?;

    let event = ActiveEvent {
        id: Uuid::new_v4(),
        event_id: definition.id.to_string(),
        timing,
        triggered_at: staged.now,
        round_number,
        affected_players: Vec::new(),
        resolved: false,
        resolved_at: None,
    };
    info!(
        party_id = %staged.session.id,
        event = definition.id,
        ?timing,
        round_number,
        "mini-event triggered"
    );
    staged.notify_party("event.triggered", &projection::event_view(&event));
    staged.session.events.push(event);
    Some(staged.session.events.len() - 1)
}

/// Apply an unresolved event to the party as it stands now.
pub(crate) fn resolve_in(
    staged: &mut Staged<'_>,
    event_id: Uuid,
    song_id: Option<Uuid>,
) -> Result<EventResolvedEvent, ServiceError> {
    let index = staged
        .session
        .events
        .iter()
        .position(|event| event.id == event_id)
        .ok_or_else(|| ServiceError::NotFound(format!("event `{event_id}`")))?;
    let event = &staged.session.events[index];
    if event.resolved {
        return Err(ServiceError::InvalidState("event already resolved".into()));
    }
    let definition = catalog::find(&event.event_id).ok_or_else(|| {
        ServiceError::InvalidState(format!("unknown catalog event `{}`", event.event_id))
    })?;
    let round_number = event.round_number;

    // The board is the live session, so the ranking is recomputed here and never taken from
    // the moment the event fired.
    let ctx = ResolveContext {
        round_number,
        song_id,
    };
    let mut outcome = effects::resolve(&definition.effect, &staged.session, ctx, &mut staged.rng)?;

    let immune_player = staged
        .session
        .flags
        .immunity
        .filter(|immunity| immunity.round_number == round_number)
        .map(|immunity| immunity.player_id);
    let blocked_by_immunity = enforce_immunity(&mut outcome, immune_player);

    for delta in &outcome.deltas {
        if let Some(player) = staged.session.players.get_mut(&delta.player_id) {
            player.event_points += delta.delta;
        }
    }
    if let Some(player_id) = outcome.immunity {
        staged.session.flags.immunity = Some(Immunity {
            player_id,
            round_number,
        });
    }
    if let Some(order) = &outcome.queue_order {
        for (song_id, position) in order {
            if let Some(song) = staged.session.songs.get_mut(song_id) {
                song.queue_position = Some(*position);
            }
        }
    }
    match outcome.flag {
        Some(SabotageKind::HideScores) => staged.session.flags.hide_scores = true,
        Some(SabotageKind::AnonymousVoting) => staged.session.flags.anonymous_voting = true,
        Some(SabotageKind::ShuffleQueue) | None => {}
    }

    let event = &mut staged.session.events[index];
    event.resolved = true;
    event.resolved_at = Some(staged.now);
    event.affected_players = outcome.affected_players.clone();
    let event_view = projection::event_view(event);

    let flags = &staged.session.flags;
    let revealed_votes = outcome
        .revealed_votes
        .iter()
        .map(|revealed| RevealedVoteView {
            song_id: revealed.song_id,
            voter_id: (!flags.anonymous_voting).then_some(revealed.voter_id),
            rating: revealed.rating,
            comment: staged
                .session
                .votes
                .iter()
                .find(|vote| vote.id == revealed.vote_id)
                .and_then(|vote| vote.comment.clone()),
        })
        .collect();
    let resolved = EventResolvedEvent {
        event: event_view,
        deltas: (!flags.hide_scores).then(|| outcome.deltas.clone()),
        blocked_by_immunity,
        immune_player_id: outcome.immunity,
        revealed_votes,
        sabotage: outcome.flag,
    };

    info!(
        party_id = %staged.session.id,
        event = definition.id,
        affected = outcome.affected_players.len(),
        blocked_by_immunity,
        "mini-event resolved"
    );
    staged.notify_party("event.resolved", &resolved);
    Ok(resolved)
}

/// Drop what an active immunity protects against; returns whether anything was dropped.
///
/// A zero-sum outcome is all-or-nothing, so hitting the immune player cancels it entirely.
fn enforce_immunity(outcome: &mut EffectOutcome, immune_player: Option<Uuid>) -> bool {
    let Some(immune) = immune_player else {
        return false;
    };
    let hits = |delta: &ScoreDelta| delta.player_id == immune && delta.delta < 0.0;
    if !outcome.deltas.iter().any(hits) {
        return false;
    }
    if outcome.zero_sum {
        outcome.deltas.clear();
    } else {
        outcome.deltas.retain(|delta| !hits(delta));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sum_outcomes_are_dropped_whole() {
        let (immune, thief) = (Uuid::new_v4(), Uuid::new_v4());
        let outcome = EffectOutcome {
            deltas: vec![
                ScoreDelta {
                    player_id: immune,
                    delta: -3.0,
                },
                ScoreDelta {
                    player_id: thief,
                    delta: 3.0,
                },
            ],
            zero_sum: true,
            ..EffectOutcome::default()
        };
        let mut outcome = outcome;
        assert!(enforce_immunity(&mut outcome, Some(immune)));
        assert!(outcome.deltas.is_empty());
    }

    #[test]
    fn only_negative_deltas_on_the_immune_player_are_dropped() {
        let (immune, other) = (Uuid::new_v4(), Uuid::new_v4());
        let mut outcome = EffectOutcome {
            deltas: vec![
                ScoreDelta {
                    player_id: immune,
                    delta: -4.0,
                },
                ScoreDelta {
                    player_id: other,
                    delta: -4.0,
                },
            ],
            ..EffectOutcome::default()
        };
        assert!(enforce_immunity(&mut outcome, Some(immune)));
        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(outcome.deltas[0].player_id, other);
    }

    #[test]
    fn gains_pass_through_immunity() {
        let immune = Uuid::new_v4();
        let mut outcome = EffectOutcome {
            deltas: vec![ScoreDelta {
                player_id: immune,
                delta: 6.0,
            }],
            ..EffectOutcome::default()
        };
        assert!(!enforce_immunity(&mut outcome, Some(immune)));
        assert!(!enforce_immunity(&mut outcome, None));
        assert_eq!(outcome.deltas.len(), 1);
    }
}
