//! Party lifecycle: creation, lobby, submissions, kicks, deletion and read-side queries.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::{
        party::{
            BonusResultView, PartyCreated, PartyJoined, PartyListItem, PartySnapshot,
            PlayerScore, SongSubmitted, StandingView,
        },
        sse::{
            IdentityAssignedEvent, PartyDeletedEvent, PlayerJoinedEvent, PlayerStatusEvent,
            ServerEvent, SubmissionProgressEvent,
        },
    },
    error::ServiceError,
    services::{
        identity::assign_identities,
        projection, rounds,
        scoring::{calculate_final_standings, calculate_player_score},
        timers::{self, TimerRequest},
        vote_service,
    },
    state::{
        PartyHandle, PartyRuntime, SharedState,
        party::{ConnectionStatus, PartySession, PartySettings, Player, Song},
        state_machine::{PartyEvent, PartyPhase, PartyStateMachine},
        transitions::{Staged, commit},
    },
};

/// Number of characters in a join code.
pub const JOIN_CODE_LENGTH: usize = 6;
/// Join code characters; no 0/O, 1/I/L look-alikes.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const JOIN_CODE_ATTEMPTS: usize = 16;
const MAX_NAME_LENGTH: usize = 32;

/// A song as submitted by a player.
#[derive(Debug, Clone)]
pub struct NewSong {
    /// Song title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Reference from the music search, if any.
    pub track_ref: Option<String>,
    /// Confidence bet between 1 and 5.
    pub confidence: u8,
}

/// Create a party in the lobby with its host as first player.
pub async fn create_party(
    state: &SharedState,
    host_name: String,
    settings: PartySettings,
) -> Result<PartyCreated, ServiceError> {
    let host_name = normalize_name(&host_name)?;
    validate_settings(&settings)?;
    let store = state.require_store().await?;

    let mut rng = state.party_rng();
    let mut join_code = None;
    for _ in 0..JOIN_CODE_ATTEMPTS {
        let candidate = generate_join_code(&mut rng);
        if state.party_by_code(&candidate).is_some() {
            continue;
        }
        if store.find_party_id_by_code(candidate.clone()).await?.is_none() {
            join_code = Some(candidate);
            break;
        }
    }
    let join_code = join_code
        .ok_or_else(|| ServiceError::InvalidState("could not allocate a join code".into()))?;

    let session = PartySession::new(
        join_code,
        settings,
        host_name,
        state.config().starting_power_up_points(),
        state.clock().now(),
    );
    let mut runtime = PartyRuntime::new(PartyStateMachine::new(), session, rng);
    let created = commit(state, &mut runtime, |staged| {
        let host = staged
            .session
            .host()
            .ok_or_else(|| ServiceError::InvalidState("party has no host".into()))?;
        Ok(PartyCreated {
            party_id: staged.session.id,
            join_code: staged.session.join_code.clone(),
            host_id: host.id,
        })
    })
    .await?;

    state.register(Arc::new(PartyHandle::new(runtime)), &created.join_code);
    info!(party_id = %created.party_id, join_code = %created.join_code, "party created");
    Ok(created)
}

/// Join a party that is still in its lobby.
pub async fn join_party(
    state: &SharedState,
    join_code: &str,
    name: String,
) -> Result<PartyJoined, ServiceError> {
    let name = normalize_name(&name)?;
    let party_id = resolve_join_code(state, join_code).await?;
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_phase(staged.phase(), PartyPhase::Lobby, "the party has already started")?;
        let player_count = staged.session.active_players().count();
        if player_count >= staged.config.max_players() {
            return Err(ServiceError::InvalidState("party is full".into()));
        }
        let taken = staged
            .session
            .players
            .values()
            .any(|player| player.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(ServiceError::InvalidInput(format!("name `{name}` is already taken")));
        }

        let player = Player {
            id: Uuid::new_v4(),
            name: name.clone(),
            is_host: false,
            connection_status: ConnectionStatus::Connected,
            disconnected_at: None,
            power_up_points: staged.config.starting_power_up_points(),
            event_points: 0.0,
            identity: None,
            joined_at: staged.now,
        };
        let player_id = player.id;
        staged.session.players.insert(player_id, player);
        staged.notify_party(
            "player.joined",
            &PlayerJoinedEvent {
                player_id,
                name: name.clone(),
                player_count: player_count + 1,
            },
        );
        info!(party_id = %party_id, player_id = %player_id, "player joined");

        Ok(PartyJoined {
            party_id,
            player_id,
        })
    })
    .await
}

/// Hand out anonymous identities and open submissions.
pub async fn start_party(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "start the party")?;
        staged.transition(PartyEvent::Start)?;
        assign_identities(&mut staged.session, staged.config, &mut staged.rng)?;

        let assigned = staged
            .session
            .active_players()
            .filter_map(|player| {
                player
                    .identity
                    .as_ref()
                    .map(|identity| (player.id, projection::identity_view(identity)))
            })
            .collect::<Vec<_>>();
        for (player_id, identity) in assigned {
            staged.notify_player(
                player_id,
                "identity.assigned",
                &IdentityAssignedEvent {
                    player_id,
                    identity,
                },
            );
        }
        Ok(())
    })
    .await
}

/// Record a song for `player_id`. The submission completing the set starts playback.
pub async fn submit_song(
    state: &SharedState,
    party_id: Uuid,
    player_id: Uuid,
    song: NewSong,
) -> Result<SongSubmitted, ServiceError> {
    let title = song.title.trim().to_string();
    let artist = song.artist.trim().to_string();
    if title.is_empty() || artist.is_empty() {
        return Err(ServiceError::InvalidInput("title and artist are required".into()));
    }
    if !(1..=5).contains(&song.confidence) {
        return Err(ServiceError::InvalidInput("confidence must be between 1 and 5".into()));
    }

    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_phase(staged.phase(), PartyPhase::Submitting, "submissions are not open")?;
        ensure_active(&staged.session, player_id)?;

        let songs_per_player = staged.session.settings.songs_per_player;
        let submitted = staged.session.songs_of(player_id).count() as u8;
        if submitted >= songs_per_player {
            return Err(ServiceError::InvalidState("all songs already submitted".into()));
        }

        let round_number = submitted + 1;
        let song = Song {
            id: Uuid::new_v4(),
            submitter_id: player_id,
            title,
            artist,
            track_ref: song.track_ref.filter(|track| !track.trim().is_empty()),
            confidence: song.confidence,
            round_number,
            queue_position: None,
            score: None,
            vote_distribution: [0; 10],
            submitted_at: staged.now,
            started_at: None,
            completed: false,
        };
        let song_id = song.id;
        staged.session.songs.insert(song_id, song);
        debug!(party_id = %party_id, player_id = %player_id, round_number, "song submitted");

        notify_submission_progress(staged);
        if pending_submitters(&staged.session).is_empty() {
            vote_service::enter_playing(staged)?;
        }

        Ok(SongSubmitted {
            song_id,
            round_number,
            remaining: songs_per_player - round_number,
            phase: staged.phase(),
        })
    })
    .await
}

/// Host override to start playback once every player has submitted.
pub async fn advance_to_playing(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "advance the party")?;
        ensure_phase(staged.phase(), PartyPhase::Submitting, "submissions are not open")?;
        let pending_players = pending_submitters(&staged.session);
        if !pending_players.is_empty() {
            return Err(ServiceError::SubmissionsIncomplete { pending_players });
        }
        vote_service::enter_playing(staged)
    })
    .await
}

/// Remove a player from the game. Their session can no longer be restored.
pub async fn kick_player(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
    target_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_host(&staged.session, requester_id, "kick players")?;
        let phase = staged.phase();
        if matches!(phase, PartyPhase::Finale | PartyPhase::Complete) {
            return Err(ServiceError::InvalidState(
                "players cannot be kicked once the finale has started".into(),
            ));
        }
        let target = staged
            .session
            .players
            .get_mut(&target_id)
            .ok_or_else(|| ServiceError::NotFound(format!("player `{target_id}`")))?;
        if target.is_host {
            return Err(ServiceError::InvalidInput("the host cannot be kicked".into()));
        }
        if target.connection_status == ConnectionStatus::Kicked {
            return Err(ServiceError::InvalidState("player was already kicked".into()));
        }
        target.connection_status = ConnectionStatus::Kicked;
        target.disconnected_at = None;

        staged.notify_party(
            "player.kicked",
            &PlayerStatusEvent {
                player_id: target_id,
                status: ConnectionStatus::Kicked,
            },
        );
        info!(party_id = %party_id, player_id = %target_id, "player kicked");

        match phase {
            PartyPhase::Submitting => {
                staged
                    .session
                    .songs
                    .retain(|_, song| song.submitter_id != target_id);
                notify_submission_progress(staged);
                if pending_submitters(&staged.session).is_empty() {
                    vote_service::enter_playing(staged)?;
                }
            }
            PartyPhase::Playing => {
                if let Some(song_id) = staged.session.current_song_id {
                    if rounds::all_votes_in(&staged.session, song_id) {
                        vote_service::complete_song(staged, song_id, false)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    })
    .await?;

    state.rooms().close_player(target_id);
    Ok(())
}

/// Delete the party and everything it owns.
pub async fn delete_party(
    state: &SharedState,
    party_id: Uuid,
    requester_id: Uuid,
) -> Result<(), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;
    if runtime.closed {
        return Err(ServiceError::NotFound("party".into()));
    }
    ensure_host(&runtime.session, requester_id, "delete the party")?;

    let store = state.require_store().await?;
    match timeout(state.config().persist_timeout(), store.delete_party(party_id)).await {
        Ok(result) => {
            result?;
        }
        Err(_) => return Err(ServiceError::Timeout),
    }

    timers::cancel_all(&mut runtime);
    runtime.closed = true;
    state.unregister(party_id, &runtime.session.join_code);

    if let Ok(event) = ServerEvent::json(
        Some("party.deleted".to_string()),
        &PartyDeletedEvent { party_id },
    ) {
        state.notifier().notify_party(party_id, event);
    }
    state.rooms().close_party(party_id);
    info!(party_id = %party_id, "party deleted");
    Ok(())
}

/// Phase-appropriate view of the party for `viewer_id`.
pub async fn snapshot(
    state: &SharedState,
    party_id: Uuid,
    viewer_id: Uuid,
) -> Result<PartySnapshot, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let runtime = handle.lock().await;
    projection::snapshot(&runtime.session, runtime.machine.phase(), viewer_id)
}

/// Every stored party, oldest first.
pub async fn list_parties(state: &SharedState) -> Result<Vec<PartyListItem>, ServiceError> {
    let store = state.party_store().await.ok_or(ServiceError::Degraded)?;
    let parties = store.list_parties().await?;
    Ok(parties.into_iter().map(Into::into).collect())
}

/// Sum of the final scores of a player's songs. Refused while scores are hidden.
pub async fn player_score(
    state: &SharedState,
    party_id: Uuid,
    player_id: Uuid,
) -> Result<PlayerScore, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let runtime = handle.lock().await;
    if !runtime.session.players.contains_key(&player_id) {
        return Err(ServiceError::NotFound(format!("player `{player_id}`")));
    }
    if projection::scores_hidden(&runtime.session, runtime.machine.phase()) {
        return Err(ServiceError::InvalidState("scores are hidden".into()));
    }
    Ok(PlayerScore {
        player_id,
        score: calculate_player_score(&runtime.session, player_id),
    })
}

/// Live standings before the finale, frozen standings once the reveal has run to its end.
pub async fn standings(
    state: &SharedState,
    party_id: Uuid,
) -> Result<Vec<StandingView>, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let runtime = handle.lock().await;
    if projection::scores_hidden(&runtime.session, runtime.machine.phase()) {
        return Err(ServiceError::InvalidState("scores are hidden".into()));
    }
    let standings = match &runtime.session.finale {
        Some(finale) if finale.is_complete() => finale.standings.clone(),
        Some(_) => {
            return Err(ServiceError::InvalidState(
                "standings are revealed at the end of the finale".into(),
            ));
        }
        None => calculate_final_standings(&runtime.session),
    };
    Ok(standings.iter().map(StandingView::from).collect())
}

/// Bonus awards computed when the party entered its finale.
pub async fn bonus_results(
    state: &SharedState,
    party_id: Uuid,
) -> Result<Vec<BonusResultView>, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let runtime = handle.lock().await;
    Ok(runtime
        .session
        .bonus_results
        .iter()
        .map(projection::bonus_view)
        .collect())
}

/// Live handle of a party, loading it from storage and re-arming its timers if needed.
/// Completed parties are served from storage without joining the registry.
pub(crate) async fn load_handle(
    state: &SharedState,
    party_id: Uuid,
) -> Result<Arc<PartyHandle>, ServiceError> {
    if let Some(handle) = state.party(party_id) {
        return Ok(handle);
    }

    let store = state.party_store().await.ok_or(ServiceError::Degraded)?;
    let graph = store
        .find_party(party_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("party `{party_id}`")))?;
    let (session, phase) = graph.into_session();
    let join_code = session.join_code.clone();
    let runtime = PartyRuntime::new(PartyStateMachine::resume(phase), session, state.party_rng());
    if phase == PartyPhase::Complete {
        debug!(party_id = %party_id, "completed party read from storage");
        return Ok(Arc::new(PartyHandle::new(runtime)));
    }

    let (handle, inserted) = state.register(Arc::new(PartyHandle::new(runtime)), &join_code);
    if inserted {
        let mut runtime = handle.lock().await;
        rearm_timers(state, &mut runtime);
        info!(party_id = %party_id, phase = ?phase, "party loaded from storage");
    }
    Ok(handle)
}

fn rearm_timers(state: &SharedState, runtime: &mut PartyRuntime) {
    match runtime.machine.phase() {
        PartyPhase::Playing => {
            let Some(song) = runtime
                .session
                .current_song_id
                .and_then(|id| runtime.session.songs.get(&id))
            else {
                return;
            };
            let window = Duration::from_secs(u64::from(runtime.session.settings.play_duration_seconds))
                + state.config().vote_grace();
            let elapsed = song
                .started_at
                .and_then(|started| state.clock().now().duration_since(started).ok())
                .unwrap_or_default();
            let request = TimerRequest::song_timeout(song.id, window.saturating_sub(elapsed));
            timers::schedule(state, runtime, request);
        }
        PartyPhase::Finale => {
            if let Some(finale) = runtime.session.finale.as_ref().filter(|finale| !finale.is_complete()) {
                let request =
                    TimerRequest::reveal_step(finale.cursor, state.config().finale_step_delay());
                timers::schedule(state, runtime, request);
            }
        }
        _ => {}
    }
}

async fn resolve_join_code(state: &SharedState, join_code: &str) -> Result<Uuid, ServiceError> {
    let code = join_code.trim().to_ascii_uppercase();
    if let Some(party_id) = state.party_by_code(&code) {
        return Ok(party_id);
    }
    let store = state.party_store().await.ok_or(ServiceError::Degraded)?;
    store
        .find_party_id_by_code(code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no party with code `{code}`")))
}

fn generate_join_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..JOIN_CODE_LENGTH)
        .map(|_| char::from(JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())]))
        .collect()
}

fn normalize_name(name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "name must be between 1 and {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_settings(settings: &PartySettings) -> Result<(), ServiceError> {
    if !(1..=3).contains(&settings.songs_per_player) {
        return Err(ServiceError::InvalidInput("songs_per_player must be 1, 2 or 3".into()));
    }
    if settings.bonus_category_count > 4 {
        return Err(ServiceError::InvalidInput(
            "bonus_category_count must be at most 4".into(),
        ));
    }
    if settings.play_duration_seconds == 0 {
        return Err(ServiceError::InvalidInput(
            "play_duration_seconds must be positive".into(),
        ));
    }
    Ok(())
}

/// Active players that still owe songs.
pub(crate) fn pending_submitters(session: &PartySession) -> Vec<Uuid> {
    let expected = usize::from(session.settings.songs_per_player);
    session
        .active_players()
        .filter(|player| session.songs_of(player.id).count() < expected)
        .map(|player| player.id)
        .collect()
}

fn notify_submission_progress(staged: &mut Staged<'_>) {
    let expected = staged.session.active_players().count()
        * usize::from(staged.session.settings.songs_per_player);
    let submitted = staged.session.songs.len();
    staged.notify_party(
        "submission.progress",
        &SubmissionProgressEvent {
            submitted,
            expected,
        },
    );
}

/// Fail unless the party is in `expected`.
pub(crate) fn ensure_phase(
    phase: PartyPhase,
    expected: PartyPhase,
    message: &str,
) -> Result<(), ServiceError> {
    if phase == expected {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(message.to_string()))
    }
}

/// Fail unless `player_id` is a member that has not been kicked.
pub(crate) fn ensure_active(session: &PartySession, player_id: Uuid) -> Result<(), ServiceError> {
    match session.players.get(&player_id) {
        Some(player) if player.is_active() => Ok(()),
        Some(_) => Err(ServiceError::Unauthorized("player was kicked".into())),
        None => Err(ServiceError::Unauthorized("not a member of this party".into())),
    }
}

/// Fail unless `player_id` hosts the party.
pub(crate) fn ensure_host(
    session: &PartySession,
    player_id: Uuid,
    action: &str,
) -> Result<(), ServiceError> {
    match session.players.get(&player_id) {
        Some(player) if player.is_host => Ok(()),
        Some(_) => Err(ServiceError::NotHost(action.to_string())),
        None => Err(ServiceError::Unauthorized("not a member of this party".into())),
    }
}
