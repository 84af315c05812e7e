//! Round weighting, play order and vote-completion checks.

use uuid::Uuid;

use crate::state::party::PartySession;

/// Extra listening time granted before a song is force-advanced.
pub const DEFAULT_VOTE_GRACE_SECS: u64 = 10;

/// Weight multiplier for round `round` (1-based) of a party with `total_rounds` rounds.
///
/// Later rounds weigh more. Any combination outside the table falls back to `1.0`.
pub fn weight_multiplier(round: u8, total_rounds: u8) -> f64 {
    match (total_rounds, round) {
        (1, 1) => 1.5,
        (2, 1) => 1.0,
        (2, 2) => 2.0,
        (3, 1) => 1.0,
        (3, 2) => 1.5,
        (3, 3) => 2.0,
        _ => 1.0,
    }
}

/// Assign dense 1-based queue positions: by round first, then by submission order.
pub fn assign_queue_positions(session: &mut PartySession) {
    let mut order = session
        .songs
        .values()
        .enumerate()
        .map(|(index, song)| (song.round_number, index, song.id))
        .collect::<Vec<_>>();
    order.sort_by_key(|(round, index, _)| (*round, *index));

    for (position, (_, _, song_id)) in order.into_iter().enumerate() {
        if let Some(song) = session.songs.get_mut(&song_id) {
            song.queue_position = Some(position as u32 + 1);
        }
    }
}

/// Unplayed songs in queue order, excluding the song currently open for votes.
pub fn upcoming_songs(session: &PartySession) -> Vec<Uuid> {
    let mut queued = session
        .songs
        .values()
        .filter(|song| !song.completed && Some(song.id) != session.current_song_id)
        .filter_map(|song| song.queue_position.map(|position| (position, song.id)))
        .collect::<Vec<_>>();
    queued.sort_by_key(|(position, _)| *position);
    queued.into_iter().map(|(_, id)| id).collect()
}

/// Next song to open for votes, if any remains.
pub fn next_song(session: &PartySession) -> Option<Uuid> {
    upcoming_songs(session).into_iter().next()
}

/// Whether every song has been played.
pub fn is_queue_exhausted(session: &PartySession) -> bool {
    session.songs.values().all(|song| song.completed)
}

/// Whether every song of `round` has been played.
pub fn is_round_complete(session: &PartySession, round: u8) -> bool {
    session
        .songs
        .values()
        .filter(|song| song.round_number == round)
        .all(|song| song.completed)
}

/// Players expected to vote on `song_id`: every active member except the submitter.
pub fn expected_voters(session: &PartySession, song_id: Uuid) -> Vec<Uuid> {
    let Some(song) = session.songs.get(&song_id) else {
        return Vec::new();
    };
    session
        .active_players()
        .filter(|player| player.id != song.submitter_id)
        .map(|player| player.id)
        .collect()
}

/// Whether every expected voter holds a locked vote on `song_id`.
pub fn all_votes_in(session: &PartySession, song_id: Uuid) -> bool {
    expected_voters(session, song_id)
        .into_iter()
        .all(|voter_id| {
            session
                .votes_for(song_id)
                .any(|vote| vote.voter_id == voter_id)
        })
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::party::{PartySettings, Song, Vote};

    fn session_with_songs(players: usize, songs_per_player: u8) -> PartySession {
        let now = SystemTime::now();
        let settings = PartySettings {
            songs_per_player,
            ..PartySettings::default()
        };
        let mut session = PartySession::new("ABCDEF".into(), settings, "host".into(), 0, now);
        for index in 1..players {
            let mut guest = session.players[0].clone();
            guest.id = Uuid::new_v4();
            guest.is_host = false;
            guest.name = format!("guest {index}");
            session.players.insert(guest.id, guest);
        }
        let player_ids = session.players.keys().copied().collect::<Vec<_>>();
        // Players submit interleaved: each player's k-th song lands in round k.
        for round in 1..=songs_per_player {
            for player_id in player_ids.iter().rev() {
                let song = Song {
                    id: Uuid::new_v4(),
                    submitter_id: *player_id,
                    title: format!("song r{round}"),
                    artist: "artist".into(),
                    track_ref: None,
                    confidence: 3,
                    round_number: round,
                    queue_position: None,
                    score: None,
                    vote_distribution: [0; 10],
                    submitted_at: now,
                    started_at: None,
                    completed: false,
                };
                session.songs.insert(song.id, song);
            }
        }
        session
    }

    #[test]
    fn weight_table_matches_round_counts() {
        assert_eq!(weight_multiplier(1, 1), 1.5);
        assert_eq!(weight_multiplier(1, 2), 1.0);
        assert_eq!(weight_multiplier(2, 2), 2.0);
        assert_eq!(weight_multiplier(1, 3), 1.0);
        assert_eq!(weight_multiplier(2, 3), 1.5);
        assert_eq!(weight_multiplier(3, 3), 2.0);
    }

    #[test]
    fn invalid_round_combinations_default_to_one() {
        assert_eq!(weight_multiplier(0, 2), 1.0);
        assert_eq!(weight_multiplier(3, 2), 1.0);
        assert_eq!(weight_multiplier(1, 4), 1.0);
        assert_eq!(weight_multiplier(1, 0), 1.0);
    }

    #[test]
    fn queue_is_ordered_by_round_then_submission() {
        let mut session = session_with_songs(3, 2);
        assign_queue_positions(&mut session);

        let mut queue = session.songs.values().collect::<Vec<_>>();
        queue.sort_by_key(|song| song.queue_position);
        let positions = queue
            .iter()
            .map(|song| song.queue_position.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
        assert!(queue[..3].iter().all(|song| song.round_number == 1));
        assert!(queue[3..].iter().all(|song| song.round_number == 2));

        let submission_order = session.songs.keys().copied().collect::<Vec<_>>();
        assert_eq!(queue[0].id, submission_order[0]);
        assert_eq!(queue[3].id, submission_order[3]);
    }

    #[test]
    fn all_votes_in_excludes_submitter_and_kicked_players() {
        let mut session = session_with_songs(3, 1);
        assign_queue_positions(&mut session);
        let song_id = next_song(&session).unwrap();
        let submitter = session.songs[&song_id].submitter_id;
        let voters = expected_voters(&session, song_id);
        assert_eq!(voters.len(), 2);
        assert!(!voters.contains(&submitter));
        assert!(!all_votes_in(&session, song_id));

        session.votes.push(Vote {
            id: Uuid::new_v4(),
            song_id,
            voter_id: voters[0],
            rating: 7,
            is_locked: true,
            super_vote: false,
            comment: None,
            cast_at: SystemTime::now(),
        });
        assert!(!all_votes_in(&session, song_id));

        session.players[&voters[1]].connection_status =
            crate::state::party::ConnectionStatus::Kicked;
        assert!(all_votes_in(&session, song_id));
    }

    #[test]
    fn queue_exhaustion_tracks_completed_songs() {
        let mut session = session_with_songs(2, 2);
        assign_queue_positions(&mut session);
        assert!(!is_queue_exhausted(&session));
        assert!(!is_round_complete(&session, 1));

        for song in session.songs.values_mut().filter(|song| song.round_number == 1) {
            song.completed = true;
        }
        assert!(is_round_complete(&session, 1));
        assert!(!is_queue_exhausted(&session));
        assert_eq!(session.songs[&next_song(&session).unwrap()].round_number, 2);

        for song in session.songs.values_mut() {
            song.completed = true;
        }
        assert!(is_queue_exhausted(&session));
        assert_eq!(next_song(&session), None);
    }
}
