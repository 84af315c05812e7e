//! Orchestrator scenarios driven through the service layer with injected collaborators.

use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::party_store::{PartyStore, memory::MemoryPartyStore},
    error::ServiceError,
    services::{
        event_service, finale_service,
        mini_events::catalog,
        party_service::{self, NewSong},
        scoring::live_ranking,
        session_service,
        timers::TimerKey,
        vote_service::{self, NewVote},
    },
    state::{
        AppState, Clock, ManualClock, SharedState,
        party::{ActiveEvent, ConnectionStatus, PartySettings},
        sse::recording::RecordingNotifier,
        state_machine::PartyPhase,
    },
};

struct Harness {
    state: SharedState,
    clock: Arc<ManualClock>,
    store: MemoryPartyStore,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    harness_with(AppConfig::default())
}

fn harness_with(config: AppConfig) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let store = MemoryPartyStore::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::builder(config)
        .clock(clock.clone())
        .seed(7)
        .notifier(notifier.clone())
        .store(Arc::new(store.clone()))
        .build();
    Harness {
        state,
        clock,
        store,
        notifier,
    }
}

fn one_song_each() -> PartySettings {
    PartySettings {
        songs_per_player: 1,
        ..PartySettings::default()
    }
}

fn song(title: &str) -> NewSong {
    NewSong {
        title: title.to_string(),
        artist: "artist".to_string(),
        track_ref: None,
        confidence: 3,
    }
}

fn vote(song_id: Uuid, rating: u8) -> NewVote {
    NewVote {
        song_id,
        rating,
        super_vote: false,
        comment: None,
    }
}

/// Lobby with the host first in the returned ids.
async fn lobby(h: &Harness, guests: usize, settings: PartySettings) -> (Uuid, Vec<Uuid>) {
    let created = party_service::create_party(&h.state, "Host".into(), settings)
        .await
        .unwrap();
    let mut ids = vec![created.host_id];
    for index in 0..guests {
        let joined = party_service::join_party(&h.state, &created.join_code, format!("guest {index}"))
            .await
            .unwrap();
        ids.push(joined.player_id);
    }
    (created.party_id, ids)
}

/// Party in PLAYING, every player having submitted `settings.songs_per_player` songs.
async fn playing(h: &Harness, guests: usize, settings: PartySettings) -> (Uuid, Vec<Uuid>) {
    let per_player = settings.songs_per_player;
    let (party_id, ids) = lobby(h, guests, settings).await;
    party_service::start_party(&h.state, party_id, ids[0]).await.unwrap();
    for round in 0..per_player {
        for (index, id) in ids.iter().enumerate() {
            party_service::submit_song(&h.state, party_id, *id, song(&format!("song {index}-{round}")))
                .await
                .unwrap();
        }
    }
    assert_eq!(phase(h, party_id).await, PartyPhase::Playing);
    (party_id, ids)
}

async fn phase(h: &Harness, party_id: Uuid) -> PartyPhase {
    let handle = party_service::load_handle(&h.state, party_id).await.unwrap();
    let runtime = handle.lock().await;
    runtime.machine.phase()
}

/// Song currently open for votes and its submitter.
async fn current_song(h: &Harness, party_id: Uuid) -> Option<(Uuid, Uuid)> {
    let handle = h.state.party(party_id).unwrap();
    let runtime = handle.lock().await;
    let song_id = runtime.session.current_song_id?;
    Some((song_id, runtime.session.songs[&song_id].submitter_id))
}

/// Clear whatever sabotage or immunity the playback loop may have rolled so far.
async fn clear_sabotage(h: &Harness, party_id: Uuid) {
    let handle = h.state.party(party_id).unwrap();
    let mut runtime = handle.lock().await;
    runtime.session.flags = Default::default();
}

/// Record a fired catalog event in the current round, left for the host to resolve.
async fn fire_event(h: &Harness, party_id: Uuid, catalog_id: &str) -> Uuid {
    let definition = catalog::find(catalog_id).unwrap();
    let handle = h.state.party(party_id).unwrap();
    let mut runtime = handle.lock().await;
    let event = ActiveEvent {
        id: Uuid::new_v4(),
        event_id: definition.id.to_string(),
        timing: definition.timing,
        triggered_at: h.clock.now(),
        round_number: runtime.session.current_round(),
        affected_players: Vec::new(),
        resolved: false,
        resolved_at: None,
    };
    let event_id = event.id;
    runtime.session.events.push(event);
    event_id
}

async fn event_points(h: &Harness, party_id: Uuid) -> Vec<(Uuid, f64)> {
    let handle = h.state.party(party_id).unwrap();
    let runtime = handle.lock().await;
    runtime
        .session
        .players
        .values()
        .map(|player| (player.id, player.event_points))
        .collect()
}

/// Every eligible player votes on the current song.
async fn play_current_song(h: &Harness, party_id: Uuid, ids: &[Uuid]) -> Uuid {
    let (song_id, submitter) = current_song(h, party_id).await.unwrap();
    for voter in ids.iter().filter(|id| **id != submitter) {
        vote_service::cast_vote(&h.state, party_id, *voter, vote(song_id, 7))
            .await
            .unwrap();
    }
    song_id
}

#[tokio::test]
async fn guests_cannot_drive_the_lifecycle() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 2, one_song_each()).await;

    let err = party_service::start_party(&h.state, party_id, ids[1]).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotHost(_)));
    assert_eq!(phase(&h, party_id).await, PartyPhase::Lobby);
}

#[tokio::test]
async fn joining_is_closed_once_started() {
    let h = harness();
    let created = party_service::create_party(&h.state, "Host".into(), one_song_each())
        .await
        .unwrap();
    let err = party_service::join_party(&h.state, &created.join_code, "host".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)), "names are unique ignoring case");

    party_service::start_party(&h.state, created.party_id, created.host_id)
        .await
        .unwrap();
    let err = party_service::join_party(&h.state, &created.join_code.to_lowercase(), "Late".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn advance_to_playing_lists_missing_submitters() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 2, one_song_each()).await;
    party_service::start_party(&h.state, party_id, ids[0]).await.unwrap();
    party_service::submit_song(&h.state, party_id, ids[0], song("first"))
        .await
        .unwrap();

    match party_service::advance_to_playing(&h.state, party_id, ids[0]).await {
        Err(ServiceError::SubmissionsIncomplete { pending_players }) => {
            assert_eq!(pending_players, vec![ids[1], ids[2]]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn last_submission_starts_playback() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 1, one_song_each()).await;
    party_service::start_party(&h.state, party_id, ids[0]).await.unwrap();
    let first = party_service::submit_song(&h.state, party_id, ids[0], song("a"))
        .await
        .unwrap();
    assert_eq!(first.phase, PartyPhase::Submitting);
    let last = party_service::submit_song(&h.state, party_id, ids[1], song("b"))
        .await
        .unwrap();
    assert_eq!(last.phase, PartyPhase::Playing);

    assert!(current_song(&h, party_id).await.is_some());
    let names = h.notifier.names();
    assert!(names.iter().any(|name| name == "party.phase_changed"));
    assert!(names.iter().any(|name| name == "song.started"));
}

#[tokio::test]
async fn a_player_votes_once_per_song() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let (song_id, submitter) = current_song(&h, party_id).await.unwrap();
    let voter = *ids.iter().find(|id| **id != submitter).unwrap();

    let receipt = vote_service::cast_vote(&h.state, party_id, voter, vote(song_id, 8))
        .await
        .unwrap();
    assert_eq!((receipt.votes_in, receipt.votes_expected), (1, 2));
    assert!(!receipt.song_completed);

    let err = vote_service::cast_vote(&h.state, party_id, voter, vote(song_id, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let err = vote_service::cast_vote(&h.state, party_id, submitter, vote(song_id, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let handle = h.state.party(party_id).unwrap();
    let runtime = handle.lock().await;
    assert_eq!(runtime.session.votes_for(song_id).count(), 1);
}

#[tokio::test]
async fn concurrent_last_votes_complete_the_song_once() {
    let h = harness();
    let (party_id, ids) = playing(&h, 3, one_song_each()).await;
    let (song_id, submitter) = current_song(&h, party_id).await.unwrap();

    let voters = ids.iter().copied().filter(|id| *id != submitter).collect::<Vec<_>>();
    let tasks = voters
        .into_iter()
        .map(|voter| {
            let state = h.state.clone();
            tokio::spawn(async move {
                vote_service::cast_vote(&state, party_id, voter, vote(song_id, 6)).await
            })
        })
        .collect::<Vec<_>>();
    let mut completions = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().song_completed {
            completions += 1;
        }
    }

    assert_eq!(completions, 1);
    let scored = h
        .notifier
        .named("song.scored")
        .into_iter()
        .filter(|(_, payload)| payload["song_id"] == song_id.to_string())
        .count();
    assert_eq!(scored, 1);
}

#[tokio::test]
async fn kicked_players_stop_gating_votes() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let (song_id, submitter) = current_song(&h, party_id).await.unwrap();
    let others = ids.iter().copied().filter(|id| *id != submitter).collect::<Vec<_>>();
    let (voter, target) = if others[0] == ids[0] {
        (others[0], others[1])
    } else {
        (others[1], others[0])
    };

    vote_service::cast_vote(&h.state, party_id, voter, vote(song_id, 5))
        .await
        .unwrap();
    party_service::kick_player(&h.state, party_id, ids[0], target)
        .await
        .unwrap();

    let handle = h.state.party(party_id).unwrap();
    let runtime = handle.lock().await;
    assert!(runtime.session.songs[&song_id].completed);
    assert_eq!(
        runtime.session.players[&target].connection_status,
        ConnectionStatus::Kicked
    );
}

#[tokio::test]
async fn failed_save_leaves_the_party_untouched() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let (song_id, submitter) = current_song(&h, party_id).await.unwrap();
    let voter = *ids.iter().find(|id| **id != submitter).unwrap();
    let sent_before = h.notifier.names().len();

    h.store.set_available(false);
    let err = vote_service::cast_vote(&h.state, party_id, voter, vote(song_id, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable(_)));
    {
        let handle = h.state.party(party_id).unwrap();
        let runtime = handle.lock().await;
        assert_eq!(runtime.session.votes_for(song_id).count(), 0);
    }
    assert_eq!(h.notifier.names().len(), sent_before);

    h.store.set_available(true);
    vote_service::cast_vote(&h.state, party_id, voter, vote(song_id, 9))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_transition_is_rolled_back() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 1, one_song_each()).await;

    h.store.set_available(false);
    assert!(party_service::start_party(&h.state, party_id, ids[0]).await.is_err());
    h.store.set_available(true);

    assert_eq!(phase(&h, party_id).await, PartyPhase::Lobby);
    party_service::start_party(&h.state, party_id, ids[0]).await.unwrap();
    assert_eq!(phase(&h, party_id).await, PartyPhase::Submitting);
}

#[tokio::test]
async fn deleting_a_party_removes_every_row() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    play_current_song(&h, party_id, &ids).await;
    assert!(h.store.count_children(party_id).await.unwrap().total() > 0);

    let err = party_service::delete_party(&h.state, party_id, ids[1]).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotHost(_)));

    party_service::delete_party(&h.state, party_id, ids[0]).await.unwrap();
    assert_eq!(h.store.count_children(party_id).await.unwrap().total(), 0);
    assert!(h.store.find_party(party_id).await.unwrap().is_none());
    assert!(h.state.party(party_id).is_none());
    assert!(matches!(
        party_service::snapshot(&h.state, party_id, ids[0]).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(h.notifier.names().iter().any(|name| name == "party.deleted"));
}

#[tokio::test]
async fn reconnect_window_is_five_minutes() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let player = ids[1];

    session_service::disconnect(&h.state, party_id, player, None).await.unwrap();
    h.clock.advance(Duration::from_secs(299));
    let snapshot = session_service::reconnect(&h.state, party_id, player).await.unwrap();
    assert_eq!(snapshot.you.connection_status, ConnectionStatus::Connected);
    assert!(snapshot.songs.is_some());
    assert!(snapshot.leaderboard.is_some());

    session_service::disconnect(&h.state, party_id, player, None).await.unwrap();
    h.clock.advance(Duration::from_secs(301));
    assert!(matches!(
        session_service::reconnect(&h.state, party_id, player).await,
        Err(ServiceError::SessionExpired)
    ));
}

#[tokio::test]
async fn reconnect_of_a_connected_player_just_authenticates() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 1, one_song_each()).await;
    let before = h.notifier.names().len();

    let snapshot = session_service::reconnect(&h.state, party_id, ids[1]).await.unwrap();
    assert_eq!(snapshot.phase, PartyPhase::Lobby);
    assert!(snapshot.songs.is_none());
    assert_eq!(h.notifier.names().len(), before);
}

#[tokio::test]
async fn kicked_players_cannot_come_back() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 2, one_song_each()).await;
    party_service::kick_player(&h.state, party_id, ids[0], ids[2])
        .await
        .unwrap();

    assert!(matches!(
        session_service::reconnect(&h.state, party_id, ids[2]).await,
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        party_service::kick_player(&h.state, party_id, ids[0], ids[0]).await,
        Err(ServiceError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn superseded_socket_close_keeps_player_connected() {
    let h = harness();
    let (party_id, ids) = lobby(&h, 1, one_song_each()).await;

    session_service::disconnect(&h.state, party_id, ids[1], Some(Uuid::new_v4()))
        .await
        .unwrap();
    let handle = h.state.party(party_id).unwrap();
    let runtime = handle.lock().await;
    assert_eq!(
        runtime.session.players[&ids[1]].connection_status,
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn stale_song_timeout_is_ignored() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let played = play_current_song(&h, party_id, &ids).await;
    let sent_before = h.notifier.names().len();

    let handle = h.state.party(party_id).unwrap();
    let mut runtime = handle.lock().await;
    assert!(!runtime.has_timer(TimerKey::SongTimeout(played)));
    let current = runtime.session.current_song_id;

    vote_service::force_complete_song(&h.state, &mut runtime, played)
        .await
        .unwrap();
    assert_eq!(runtime.session.current_song_id, current);
    assert_eq!(h.notifier.names().len(), sent_before);
}

#[tokio::test(start_paused = true)]
async fn song_timeout_scores_with_missing_votes() {
    let h = harness();
    let (party_id, _ids) = playing(&h, 2, one_song_each()).await;
    let (song_id, _) = current_song(&h, party_id).await.unwrap();

    let window = Duration::from_secs(45) + h.state.config().vote_grace();
    tokio::time::sleep(window + Duration::from_millis(50)).await;

    let handle = h.state.party(party_id).unwrap();
    let runtime = handle.lock().await;
    let song = &runtime.session.songs[&song_id];
    assert!(song.completed);
    assert_eq!(song.score.map(|score| score.raw_average), Some(0.0));
    let timed_out = h
        .notifier
        .named("song.scored")
        .into_iter()
        .any(|(_, payload)| payload["song_id"] == song_id.to_string() && payload["timed_out"] == true);
    assert!(timed_out);
}

#[tokio::test(start_paused = true)]
async fn finale_reveals_then_completes() {
    let h = harness_with(AppConfig::default().with_finale_step_delay(Duration::from_millis(100)));
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    for _ in 0..ids.len() {
        play_current_song(&h, party_id, &ids).await;
    }
    assert_eq!(phase(&h, party_id).await, PartyPhase::Finale);

    let err = finale_service::advance_to_complete(&h.state, party_id, ids[0])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let steps_total = {
        let handle = h.state.party(party_id).unwrap();
        let runtime = handle.lock().await;
        runtime.session.finale.as_ref().unwrap().steps.len()
    };
    tokio::time::sleep(Duration::from_millis(100) * (steps_total as u32 + 2)).await;

    assert_eq!(phase(&h, party_id).await, PartyPhase::Complete);
    assert_eq!(h.notifier.named("finale.reveal").len(), steps_total);
    let completed = h.notifier.named("party.completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].1["standings"].as_array().unwrap().len(), ids.len());

    assert!(h.state.party(party_id).is_none());
    let snapshot = party_service::snapshot(&h.state, party_id, ids[1]).await.unwrap();
    assert!(snapshot.players.iter().all(|player| player.name.is_some()));
    assert_eq!(h.state.loaded_parties(), 0);
}

#[tokio::test]
async fn host_can_step_through_the_reveal() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    for _ in 0..ids.len() {
        play_current_song(&h, party_id, &ids).await;
    }

    let err = finale_service::reveal_next(&h.state, party_id, ids[1]).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotHost(_)));

    let (steps_total, join_code) = {
        let handle = h.state.party(party_id).unwrap();
        let runtime = handle.lock().await;
        let finale = runtime.session.finale.as_ref().unwrap();
        (finale.steps.len(), runtime.session.join_code.clone())
    };
    for _ in 0..steps_total {
        finale_service::reveal_next(&h.state, party_id, ids[0]).await.unwrap();
    }
    assert_eq!(phase(&h, party_id).await, PartyPhase::Finale);

    {
        // The timer armed for an earlier step is now stale.
        let handle = h.state.party(party_id).unwrap();
        let mut runtime = handle.lock().await;
        finale_service::reveal_step(&h.state, &mut runtime, 0).await.unwrap();
        assert_eq!(runtime.machine.phase(), PartyPhase::Finale);
    }

    finale_service::advance_to_complete(&h.state, party_id, ids[0])
        .await
        .unwrap();
    assert!(h.state.party(party_id).is_none());
    assert!(h.state.party_by_code(&join_code).is_none());
    assert_eq!(phase(&h, party_id).await, PartyPhase::Complete);
    let standings = party_service::standings(&h.state, party_id).await.unwrap();
    assert_eq!(standings.len(), ids.len());
    assert_eq!(standings[0].rank, 1);
    assert_eq!(h.state.loaded_parties(), 0);
}

#[tokio::test]
async fn parties_reload_from_the_store() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let played = play_current_song(&h, party_id, &ids).await;

    let fresh = AppState::builder(AppConfig::default())
        .clock(h.clock.clone())
        .seed(11)
        .store(Arc::new(h.store.clone()))
        .build();
    let snapshot = party_service::snapshot(&fresh, party_id, ids[0]).await.unwrap();
    assert_eq!(snapshot.phase, PartyPhase::Playing);
    let songs = snapshot.songs.unwrap();
    assert!(songs.iter().any(|song| song.id == played && song.completed));

    let handle = fresh.party(party_id).unwrap();
    let runtime = handle.lock().await;
    let current = runtime.session.current_song_id.unwrap();
    assert!(runtime.has_timer(TimerKey::SongTimeout(current)));
}

#[tokio::test]
async fn hidden_scores_are_withheld_from_score_queries() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    let played = play_current_song(&h, party_id, &ids).await;
    let submitter = {
        let handle = h.state.party(party_id).unwrap();
        let runtime = handle.lock().await;
        runtime.session.songs[&played].submitter_id
    };
    clear_sabotage(&h, party_id).await;
    assert!(party_service::standings(&h.state, party_id).await.is_ok());
    assert!(party_service::player_score(&h.state, party_id, submitter).await.is_ok());

    let blackout = fire_event(&h, party_id, "blackout").await;
    let resolved = event_service::resolve_event(&h.state, party_id, ids[0], blackout, None)
        .await
        .unwrap();
    assert!(resolved.deltas.is_none());

    let snapshot = party_service::snapshot(&h.state, party_id, ids[0]).await.unwrap();
    assert!(snapshot.scores_hidden);
    assert!(matches!(
        party_service::standings(&h.state, party_id).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert!(matches!(
        party_service::player_score(&h.state, party_id, submitter).await,
        Err(ServiceError::InvalidState(_))
    ));
}

#[tokio::test]
async fn standings_wait_for_the_end_of_the_reveal() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    for _ in 0..ids.len() {
        play_current_song(&h, party_id, &ids).await;
    }
    assert_eq!(phase(&h, party_id).await, PartyPhase::Finale);

    assert!(matches!(
        party_service::standings(&h.state, party_id).await,
        Err(ServiceError::InvalidState(_))
    ));
    let score = party_service::player_score(&h.state, party_id, ids[1]).await.unwrap();
    assert!(score.score > 0.0);

    let steps_total = {
        let handle = h.state.party(party_id).unwrap();
        let runtime = handle.lock().await;
        runtime.session.finale.as_ref().unwrap().steps.len()
    };
    for _ in 0..steps_total - 1 {
        finale_service::reveal_next(&h.state, party_id, ids[0]).await.unwrap();
    }
    assert!(party_service::standings(&h.state, party_id).await.is_err());

    finale_service::reveal_next(&h.state, party_id, ids[0]).await.unwrap();
    assert_eq!(phase(&h, party_id).await, PartyPhase::Finale);
    let standings = party_service::standings(&h.state, party_id).await.unwrap();
    assert_eq!(standings.len(), ids.len());
}

#[tokio::test]
async fn resolved_steal_moves_event_points_once() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    play_current_song(&h, party_id, &ids).await;
    clear_sabotage(&h, party_id).await;

    let ranking = {
        let handle = h.state.party(party_id).unwrap();
        let runtime = handle.lock().await;
        live_ranking(&runtime.session)
    };
    let (leader, leader_score) = ranking[0];
    let (last, _) = ranking[ranking.len() - 1];
    assert!(leader_score > 0.0);
    let stolen = (((leader_score * 10.0 / 100.0) * 10.0).round() / 10.0).min(leader_score);
    let before = event_points(&h, party_id).await;

    let crown_tax = fire_event(&h, party_id, "crown_tax").await;
    let resolved = event_service::resolve_event(&h.state, party_id, ids[0], crown_tax, None)
        .await
        .unwrap();
    assert!(!resolved.blocked_by_immunity);
    let deltas = resolved.deltas.unwrap();
    assert_eq!(deltas.len(), 2);
    assert_eq!((deltas[0].player_id, deltas[1].player_id), (leader, last));
    assert!((deltas[0].delta + stolen).abs() < 1e-9);
    assert!((deltas[1].delta - stolen).abs() < 1e-9);

    let after = event_points(&h, party_id).await;
    for ((player_id, was), (_, now)) in before.iter().zip(&after) {
        let expected = deltas
            .iter()
            .filter(|delta| delta.player_id == *player_id)
            .map(|delta| delta.delta)
            .sum::<f64>();
        assert!((now - was - expected).abs() < 1e-9, "player {player_id}");
    }

    let err = event_service::resolve_event(&h.state, party_id, ids[0], crown_tax, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(event_points(&h, party_id).await, after);

    let fresh = AppState::builder(AppConfig::default())
        .clock(h.clock.clone())
        .seed(3)
        .store(Arc::new(h.store.clone()))
        .build();
    let handle = party_service::load_handle(&fresh, party_id).await.unwrap();
    let runtime = handle.lock().await;
    for (player_id, points) in &after {
        assert_eq!(runtime.session.players[player_id].event_points, *points);
    }
    let event = runtime
        .session
        .events
        .iter()
        .find(|event| event.id == crown_tax)
        .unwrap();
    assert!(event.resolved);
    assert_eq!(event.affected_players, vec![leader, last]);
}

#[tokio::test]
async fn immunity_cancels_a_steal_from_the_protected_player() {
    let h = harness();
    let (party_id, ids) = playing(&h, 2, one_song_each()).await;
    clear_sabotage(&h, party_id).await;

    let safety_net = fire_event(&h, party_id, "safety_net").await;
    let granted = event_service::resolve_event(&h.state, party_id, ids[0], safety_net, None)
        .await
        .unwrap();
    let immune = granted.immune_player_id.unwrap();

    {
        // Push the protected player to the top so the crown tax targets them.
        let handle = h.state.party(party_id).unwrap();
        let mut runtime = handle.lock().await;
        runtime.session.players[&immune].event_points += 50.0;
        let ranking = live_ranking(&runtime.session);
        assert_eq!(ranking[0].0, immune);
    }
    let before = event_points(&h, party_id).await;

    let crown_tax = fire_event(&h, party_id, "crown_tax").await;
    let resolved = event_service::resolve_event(&h.state, party_id, ids[0], crown_tax, None)
        .await
        .unwrap();
    assert!(resolved.blocked_by_immunity);
    assert_eq!(resolved.deltas.map(|deltas| deltas.len()), Some(0));
    assert_eq!(event_points(&h, party_id).await, before);
    assert!(resolved.event.resolved);
}
