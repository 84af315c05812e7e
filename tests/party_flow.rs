use std::sync::Arc;

use songclash_back::{
    config::AppConfig,
    dao::party_store::{PartyStore, memory::MemoryPartyStore},
    services::{
        finale_service,
        party_service::{self, NewSong},
        vote_service::{self, NewVote},
    },
    state::{
        AppState, ManualClock, SharedState,
        party::PartySettings,
        state_machine::PartyPhase,
    },
};
use uuid::Uuid;

async fn phase(state: &SharedState, party_id: Uuid, viewer_id: Uuid) -> PartyPhase {
    party_service::snapshot(state, party_id, viewer_id)
        .await
        .expect("party is readable")
        .phase
}

#[tokio::test]
async fn a_party_runs_from_lobby_to_podium() {
    let store = MemoryPartyStore::new();
    let state = AppState::builder(AppConfig::default())
        .clock(Arc::new(ManualClock::default()))
        .seed(42)
        .store(Arc::new(store.clone()))
        .build();

    let created = party_service::create_party(&state, "Ada".into(), PartySettings::default())
        .await
        .unwrap();
    let party_id = created.party_id;
    let mut players = vec![created.host_id];
    for name in ["Bo", "Cy", "Di"] {
        let joined = party_service::join_party(&state, &created.join_code, name.into())
            .await
            .unwrap();
        players.push(joined.player_id);
    }

    party_service::start_party(&state, party_id, created.host_id)
        .await
        .unwrap();
    assert_eq!(phase(&state, party_id, created.host_id).await, PartyPhase::Submitting);

    for round in 0..2 {
        for (index, player) in players.iter().enumerate() {
            party_service::submit_song(
                &state,
                party_id,
                *player,
                NewSong {
                    title: format!("track {index}.{round}"),
                    artist: format!("band {index}"),
                    track_ref: None,
                    confidence: 1 + (index as u8 % 5),
                },
            )
            .await
            .unwrap();
        }
    }
    assert_eq!(phase(&state, party_id, created.host_id).await, PartyPhase::Playing);

    let mut played = 0;
    while phase(&state, party_id, created.host_id).await == PartyPhase::Playing {
        let (song_id, submitter) = {
            let handle = state.party(party_id).unwrap();
            let runtime = handle.lock().await;
            let song_id = runtime.session.current_song_id.expect("a song is playing");
            (song_id, runtime.session.songs[&song_id].submitter_id)
        };
        for (offset, voter) in players.iter().filter(|id| **id != submitter).enumerate() {
            vote_service::cast_vote(
                &state,
                party_id,
                *voter,
                NewVote {
                    song_id,
                    rating: 4 + offset as u8,
                    super_vote: false,
                    comment: None,
                },
            )
            .await
            .unwrap();
        }
        played += 1;
    }
    assert_eq!(played, players.len() * 2);
    assert_eq!(phase(&state, party_id, created.host_id).await, PartyPhase::Finale);

    while phase(&state, party_id, created.host_id).await == PartyPhase::Finale {
        finale_service::reveal_next(&state, party_id, created.host_id)
            .await
            .unwrap();
    }
    assert_eq!(phase(&state, party_id, created.host_id).await, PartyPhase::Complete);
    assert!(state.party(party_id).is_none());

    let standings = party_service::standings(&state, party_id).await.unwrap();
    assert_eq!(standings.len(), players.len());
    assert_eq!(standings[0].rank, 1);
    assert!(
        standings
            .windows(2)
            .all(|pair| pair[0].final_score >= pair[1].final_score)
    );

    let listed = party_service::list_parties(&state).await.unwrap();
    assert!(
        listed
            .iter()
            .any(|party| party.id == party_id && party.status == PartyPhase::Complete)
    );

    party_service::delete_party(&state, party_id, created.host_id)
        .await
        .unwrap();
    assert_eq!(store.count_children(party_id).await.unwrap().total(), 0);
}
