//! Probabilistic mini-events: trigger selection and the scoreboard effects resolve against.

pub mod catalog;
pub mod effects;

use rand::Rng;
use uuid::Uuid;

use self::{
    catalog::{EventDefinition, EventTiming},
    effects::{RankedPlayer, RevealedVote, ScoreBoard, SongContext},
};
use crate::{
    services::{rounds, scoring::live_ranking},
    state::party::{EventFrequency, PartySession},
};

/// Draw one sample per catalog event with `timing` and return the first that fires.
///
/// At most one event fires per check.
pub fn check_trigger<R>(
    timing: EventTiming,
    frequency: EventFrequency,
    rng: &mut R,
) -> Option<&'static EventDefinition>
where
    R: Rng + ?Sized,
{
    let modifier = frequency.modifier();
    catalog::with_timing(timing).find(|event| {
        let sample: f64 = rng.random();
        sample < event.base_probability * modifier
    })
}

impl ScoreBoard for PartySession {
    fn ranking(&self) -> Vec<RankedPlayer> {
        live_ranking(self)
            .into_iter()
            .map(|(player_id, score)| RankedPlayer { player_id, score })
            .collect()
    }

    fn song_context(&self, song_id: Uuid) -> Option<SongContext> {
        let song = self.songs.get(&song_id)?;
        let score = song.score?;
        Some(SongContext {
            song_id,
            submitter_id: song.submitter_id,
            raw_average: score.raw_average,
            final_score: score.final_score,
        })
    }

    fn round_votes(&self, round: u8) -> Vec<RevealedVote> {
        self.votes
            .iter()
            .filter(|vote| vote.is_locked)
            .filter(|vote| {
                self.songs
                    .get(&vote.song_id)
                    .is_some_and(|song| song.round_number == round)
            })
            .map(|vote| RevealedVote {
                vote_id: vote.id,
                song_id: vote.song_id,
                voter_id: vote.voter_id,
                rating: vote.rating,
            })
            .collect()
    }

    fn unplayed_queue(&self) -> Vec<(Uuid, u32)> {
        rounds::upcoming_songs(self)
            .into_iter()
            .filter_map(|id| {
                self.songs
                    .get(&id)
                    .and_then(|song| song.queue_position)
                    .map(|position| (id, position))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::services::mini_events::effects::{
        Effect, ResolveContext, StealAmount, StealSource, SwapMode, resolve,
    };
    use crate::state::party::{
        PartySettings,
        fixtures::{add_song, party_with_players, player_ids, set_score},
    };

    #[test]
    fn empirical_trigger_rate_converges() {
        // The first entry of a timing always gets the first draw, so it fires at exactly p * f.
        let first = catalog::with_timing(EventTiming::PostRound).next().unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for frequency in [EventFrequency::Rare, EventFrequency::Normal, EventFrequency::Chaos] {
            let trials = 200_000;
            let hits = (0..trials)
                .filter(|_| {
                    check_trigger(EventTiming::PostRound, frequency, &mut rng)
                        .is_some_and(|event| event.id == first.id)
                })
                .count();
            let observed = hits as f64 / trials as f64;
            let expected = first.base_probability * frequency.modifier();
            assert!(
                (observed - expected).abs() < 0.005,
                "{frequency:?}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn at_most_one_event_per_check_and_timing_respected() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..1_000 {
            if let Some(event) = check_trigger(EventTiming::MidRound, EventFrequency::Chaos, &mut rng)
            {
                assert_eq!(event.timing, EventTiming::MidRound);
            }
        }
    }

    #[test]
    fn same_seed_same_triggers() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..100)
                .map(|_| {
                    check_trigger(EventTiming::PreRound, EventFrequency::Normal, &mut rng)
                        .map(|event| event.id)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn resolution_reads_scores_at_resolve_time() {
        let mut session = party_with_players(2, PartySettings::default());
        let ids = player_ids(&session);
        let songs = ids
            .iter()
            .map(|id| add_song(&mut session, *id, 1, 3))
            .collect::<Vec<_>>();
        set_score(&mut session, songs[0], 9.0, 9.0);
        set_score(&mut session, songs[1], 6.0, 6.0);
        set_score(&mut session, songs[2], 3.0, 3.0);

        // Trigger-time leader is ids[0].
        assert_eq!(session.ranking()[0].player_id, ids[0]);

        // Scores change between trigger and resolve.
        session.players[&ids[1]].event_points = 20.0;

        let effect = Effect::StealPoints {
            from: StealSource::Leader,
            amount: StealAmount::Fixed(2.0),
        };
        let ctx = ResolveContext {
            round_number: 1,
            song_id: None,
        };
        let outcome = resolve(&effect, &session, ctx, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(outcome.affected_players, vec![ids[1], ids[2]]);

        let swap = Effect::SwapScores {
            mode: SwapMode::TopBottom,
        };
        let outcome = resolve(&swap, &session, ctx, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(outcome.deltas[0].player_id, ids[1]);
        assert_eq!(outcome.deltas[0].delta, 3.0 - 26.0);
    }

    #[test]
    fn round_votes_only_cover_the_round() {
        let mut session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        let first = add_song(&mut session, ids[0], 1, 3);
        let second = add_song(&mut session, ids[0], 2, 3);
        crate::state::party::fixtures::add_vote(&mut session, first, ids[1], 4);
        crate::state::party::fixtures::add_vote(&mut session, second, ids[1], 9);

        let votes = session.round_votes(2);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].rating, 9);
    }
}
