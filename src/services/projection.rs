//! Per-viewer projections of a party: snapshots, leaderboards and finale reveals.

use uuid::Uuid;

use crate::{
    dto::{
        format_system_time,
        party::{
            ActiveEventView, BonusResultView, FinaleView, IdentityView, LeaderboardEntry,
            PartySettingsView, PartySnapshot, PlayerView, RevealView, SongView, StandingView,
            UnmaskedPlayer,
        },
    },
    error::ServiceError,
    services::{
        mini_events::catalog,
        scoring::{competition_ranks, live_ranking},
    },
    state::{
        party::{
            ActiveEvent, AnonymousIdentity, BonusResult, FinaleState, PartySession, Player,
            RevealStep, Song,
        },
        state_machine::PartyPhase,
    },
};

/// Public face of an anonymous identity.
pub fn identity_view(identity: &AnonymousIdentity) -> IdentityView {
    IdentityView {
        alias: identity.alias.clone(),
        silhouette: identity.silhouette.clone(),
        color: (&identity.color).into(),
    }
}

/// How `player` looks to `viewer_id`. Real names stay hidden until the finale unmasks them.
pub fn player_view(
    session: &PartySession,
    phase: PartyPhase,
    player: &Player,
    viewer_id: Uuid,
) -> PlayerView {
    let named = phase == PartyPhase::Lobby
        || player.id == viewer_id
        || session.is_unmasked(player.id);
    PlayerView {
        id: player.id,
        name: named.then(|| player.name.clone()),
        identity: player.identity.as_ref().map(identity_view),
        is_host: player.is_host,
        connection_status: player.connection_status,
    }
}

/// Fired event with its catalog name and description.
pub fn event_view(event: &ActiveEvent) -> ActiveEventView {
    let definition = catalog::find(&event.event_id);
    ActiveEventView {
        id: event.id,
        event_id: event.event_id.clone(),
        name: definition
            .map(|definition| definition.name.to_string())
            .unwrap_or_else(|| event.event_id.clone()),
        description: definition
            .map(|definition| definition.description.to_string())
            .unwrap_or_default(),
        timing: event.timing,
        round_number: event.round_number,
        affected_players: event.affected_players.clone(),
        resolved: event.resolved,
        triggered_at: format_system_time(event.triggered_at),
    }
}

/// Bonus award with its category label.
pub fn bonus_view(result: &BonusResult) -> BonusResultView {
    BonusResultView {
        id: result.id,
        category: result.category,
        label: result.category.label().to_string(),
        winning_song_id: result.winning_song_id,
        winner_player_id: result.winner_player_id,
        points: result.points,
        reveal_order: result.reveal_order,
    }
}

/// Live scores are withheld while the `hide_scores` sabotage runs during playback.
pub fn scores_hidden(session: &PartySession, phase: PartyPhase) -> bool {
    phase == PartyPhase::Playing && session.flags.hide_scores
}

fn song_view(song: &Song, session: &PartySession, viewer_id: Uuid, scores_hidden: bool) -> SongView {
    SongView {
        id: song.id,
        title: song.title.clone(),
        artist: song.artist.clone(),
        track_ref: song.track_ref.clone(),
        round_number: song.round_number,
        queue_position: song.queue_position,
        is_yours: song.submitter_id == viewer_id,
        is_current: session.current_song_id == Some(song.id),
        completed: song.completed,
        score: if scores_hidden {
            None
        } else {
            song.score.map(Into::into)
        },
    }
}

/// Live leaderboard by alias, with competition ranking on the live scores.
pub fn leaderboard(session: &PartySession, scores_hidden: bool) -> Vec<LeaderboardEntry> {
    let ranking = live_ranking(session);
    let scores = ranking.iter().map(|(_, score)| *score).collect::<Vec<_>>();
    let ranks = competition_ranks(&scores);

    ranking
        .into_iter()
        .zip(ranks)
        .map(|((player_id, score), position)| LeaderboardEntry {
            player_id,
            alias: session
                .players
                .get(&player_id)
                .and_then(|player| player.identity.as_ref())
                .map(|identity| identity.alias.clone()),
            score: (!scores_hidden).then_some(score),
            position,
        })
        .collect()
}

fn unmasked(session: &PartySession, finale: &FinaleState, player_id: Uuid) -> Option<UnmaskedPlayer> {
    let player = session.players.get(&player_id)?;
    let standing = finale
        .standings
        .iter()
        .find(|standing| standing.player_id == player_id)?;
    Some(UnmaskedPlayer {
        player_id,
        name: player.name.clone(),
        identity: player.identity.as_ref().map(identity_view),
        rank: standing.rank,
        final_score: standing.final_score,
    })
}

/// Render one step of the reveal plan.
pub fn reveal_view(session: &PartySession, finale: &FinaleState, step: &RevealStep) -> Option<RevealView> {
    match step {
        RevealStep::Bonus { result_id } => {
            let result = session
                .bonus_results
                .iter()
                .find(|result| result.id == *result_id)?;
            let song = session.songs.get(&result.winning_song_id)?;
            Some(RevealView::Bonus {
                result: bonus_view(result),
                song_title: song.title.clone(),
                song_artist: song.artist.clone(),
            })
        }
        RevealStep::Identity { player_id } => Some(RevealView::Identity {
            player: unmasked(session, finale, *player_id)?,
        }),
        RevealStep::Champion { player_ids } => Some(RevealView::Champion {
            players: player_ids
                .iter()
                .filter_map(|player_id| unmasked(session, finale, *player_id))
                .collect(),
        }),
    }
}

fn finale_view(session: &PartySession, finale: &FinaleState) -> FinaleView {
    let revealed = finale.steps[..finale.cursor.min(finale.steps.len())]
        .iter()
        .filter_map(|step| reveal_view(session, finale, step))
        .collect();
    FinaleView {
        steps_total: finale.steps.len(),
        steps_revealed: finale.cursor,
        revealed,
        standings: finale
            .is_complete()
            .then(|| finale.standings.iter().map(StandingView::from).collect()),
    }
}

/// Phase-appropriate view of the party for one of its members.
pub fn snapshot(
    session: &PartySession,
    phase: PartyPhase,
    viewer_id: Uuid,
) -> Result<PartySnapshot, ServiceError> {
    let viewer = session
        .players
        .get(&viewer_id)
        .ok_or_else(|| ServiceError::Unauthorized("not a member of this party".into()))?;

    let scores_hidden = scores_hidden(session, phase);

    let songs = match phase {
        PartyPhase::Submitting => Some(
            session
                .songs_of(viewer_id)
                .map(|song| song_view(song, session, viewer_id, scores_hidden))
                .collect(),
        ),
        PartyPhase::Playing | PartyPhase::Finale => {
            let mut songs = session.songs.values().collect::<Vec<_>>();
            songs.sort_by_key(|song| song.queue_position);
            Some(
                songs
                    .into_iter()
                    .map(|song| song_view(song, session, viewer_id, scores_hidden))
                    .collect(),
            )
        }
        PartyPhase::Lobby | PartyPhase::Complete => None,
    };

    let leaderboard = matches!(phase, PartyPhase::Playing | PartyPhase::Finale)
        .then(|| leaderboard(session, scores_hidden));

    Ok(PartySnapshot {
        party_id: session.id,
        join_code: session.join_code.clone(),
        phase,
        settings: PartySettingsView::from(&session.settings),
        you: player_view(session, phase, viewer, viewer_id),
        power_up_points: viewer.power_up_points,
        players: session
            .players
            .values()
            .map(|player| player_view(session, phase, player, viewer_id))
            .collect(),
        current_song_id: session.current_song_id,
        songs,
        leaderboard,
        scores_hidden,
        anonymous_voting: session.flags.anonymous_voting,
        finale: session
            .finale
            .as_ref()
            .map(|finale| finale_view(session, finale)),
    })
}
