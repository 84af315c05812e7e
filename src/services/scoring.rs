//! Pure scoring functions: song scores, live ranking and final standings.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::{
    services::rounds::weight_multiplier,
    state::party::{PartySession, Song, SongScore, Standing, Vote},
};

/// Weight of a super vote in the song average.
pub const SUPER_VOTE_WEIGHT: f64 = 1.5;
/// Points added or removed by a confident bet.
pub const CONFIDENCE_BONUS: f64 = 2.0;
/// Scores closer than this are considered tied.
const SCORE_EPSILON: f64 = 1e-9;

/// Mean of the given ratings where super votes weigh [`SUPER_VOTE_WEIGHT`].
///
/// Without super votes this is the plain arithmetic mean. Returns `0.0` when empty.
pub fn raw_average<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> f64 {
    let (sum, weight) = votes.into_iter().fold((0.0, 0.0), |(sum, weight), vote| {
        let vote_weight = if vote.super_vote { SUPER_VOTE_WEIGHT } else { 1.0 };
        (sum + f64::from(vote.rating) * vote_weight, weight + vote_weight)
    });

    if weight == 0.0 { 0.0 } else { sum / weight }
}

/// Bonus or penalty earned by the submitter's confidence bet. Both thresholds are inclusive.
pub fn confidence_modifier(raw_average: f64, confidence: u8, betting_enabled: bool) -> f64 {
    if !betting_enabled || confidence < 4 {
        return 0.0;
    }

    if raw_average >= 7.0 {
        CONFIDENCE_BONUS
    } else if raw_average <= 4.0 {
        -CONFIDENCE_BONUS
    } else {
        0.0
    }
}

/// `raw_average * weight_multiplier + confidence_modifier`.
pub fn final_score(raw_average: f64, weight_multiplier: f64, confidence_modifier: f64) -> f64 {
    raw_average * weight_multiplier + confidence_modifier
}

/// Population variance of the ratings. `0.0` for fewer than two samples.
pub fn vote_variance(ratings: &[u8]) -> f64 {
    if ratings.len() < 2 {
        return 0.0;
    }

    let count = ratings.len() as f64;
    let mean = ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / count;
    ratings
        .iter()
        .map(|r| (f64::from(*r) - mean).powi(2))
        .sum::<f64>()
        / count
}

/// Histogram of ratings, bucket `i` counting ratings equal to `i + 1`.
pub fn vote_distribution(ratings: &[u8]) -> [u32; 10] {
    let mut buckets = [0; 10];
    for rating in ratings {
        if (1..=10).contains(rating) {
            buckets[usize::from(*rating) - 1] += 1;
        }
    }
    buckets
}

/// Ratings of the locked votes cast for `song_id`.
pub fn song_ratings(session: &PartySession, song_id: Uuid) -> Vec<u8> {
    session.votes_for(song_id).map(|vote| vote.rating).collect()
}

/// Compute the score and histogram of `song` from its locked votes.
pub fn score_song(session: &PartySession, song: &Song) -> (SongScore, [u32; 10]) {
    let raw = raw_average(session.votes_for(song.id));
    let weight = weight_multiplier(song.round_number, session.total_rounds());
    let modifier = confidence_modifier(
        raw,
        song.confidence,
        session.settings.confidence_betting_enabled,
    );
    let score = SongScore {
        raw_average: raw,
        weight_multiplier: weight,
        confidence_modifier: modifier,
        final_score: final_score(raw, weight, modifier),
    };

    (score, vote_distribution(&song_ratings(session, song.id)))
}

/// Sum of the final scores of the player's scored songs.
pub fn calculate_player_score(session: &PartySession, player_id: Uuid) -> f64 {
    total(
        session
            .songs_of(player_id)
            .filter_map(|song| song.score)
            .map(|score| score.final_score),
    )
}

/// `f64::sum` starts from `-0.0`; folding from `0.0` keeps empty totals positive.
fn total(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().fold(0.0, |sum, value| sum + value)
}

/// Active players ordered by song scores plus event points, highest first.
///
/// Ties keep join order.
pub fn live_ranking(session: &PartySession) -> Vec<(Uuid, f64)> {
    let mut ranking = session
        .active_players()
        .map(|player| {
            (
                player.id,
                calculate_player_score(session, player.id) + player.event_points,
            )
        })
        .collect::<Vec<_>>();
    ranking.sort_by(|a, b| compare_desc(a.1, b.1));
    ranking
}

/// Standard competition ranks for scores already sorted in descending order.
pub fn competition_ranks(sorted_scores: &[f64]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(sorted_scores.len());
    for (index, score) in sorted_scores.iter().enumerate() {
        let rank = match index {
            0 => 1,
            _ if (sorted_scores[index - 1] - score).abs() < SCORE_EPSILON => ranks[index - 1],
            _ => index as u32 + 1,
        };
        ranks.push(rank);
    }
    ranks
}

/// Final standings of every active player, ranked with competition ranking.
pub fn calculate_final_standings(session: &PartySession) -> Vec<Standing> {
    let mut standings = session
        .active_players()
        .map(|player| {
            let scores = session
                .songs_of(player.id)
                .filter_map(|song| song.score)
                .collect::<Vec<_>>();
            let base_score = total(scores.iter().map(SongScore::weighted_score));
            let confidence_modifiers = total(scores.iter().map(|score| score.confidence_modifier));
            let bonus_points = total(
                session
                    .bonus_results
                    .iter()
                    .filter(|result| result.winner_player_id == player.id)
                    .map(|result| f64::from(result.points)),
            );

            Standing {
                player_id: player.id,
                base_score,
                confidence_modifiers,
                bonus_points,
                event_points: player.event_points,
                final_score: base_score + confidence_modifiers + bonus_points + player.event_points,
                rank: 0,
            }
        })
        .collect::<Vec<_>>();

    standings.sort_by(|a, b| compare_desc(a.final_score, b.final_score));
    let scores = standings
        .iter()
        .map(|standing| standing.final_score)
        .collect::<Vec<_>>();
    for (standing, rank) in standings.iter_mut().zip(competition_ranks(&scores)) {
        standing.rank = rank;
    }
    standings
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::party::{
        BonusResult, PartySettings,
        fixtures::{add_song, add_vote, party_with_players, player_ids, set_score},
    };
    use crate::services::bonus::BonusCategory;

    fn votes(ratings: &[(u8, bool)]) -> Vec<Vote> {
        ratings
            .iter()
            .map(|(rating, super_vote)| Vote {
                id: Uuid::new_v4(),
                song_id: Uuid::nil(),
                voter_id: Uuid::new_v4(),
                rating: *rating,
                is_locked: true,
                super_vote: *super_vote,
                comment: None,
                cast_at: std::time::SystemTime::now(),
            })
            .collect()
    }

    #[test]
    fn raw_average_is_the_mean() {
        assert_eq!(raw_average(&votes(&[(8, false), (6, false)])), 7.0);
        assert_eq!(raw_average(&votes(&[])), 0.0);
    }

    #[test]
    fn super_votes_weigh_more() {
        // (10 * 1.5 + 4) / 2.5
        assert!((raw_average(&votes(&[(10, true), (4, false)])) - 7.6).abs() < 1e-9);
    }

    #[test]
    fn confidence_modifier_cases() {
        assert_eq!(confidence_modifier(7.0, 4, true), 2.0);
        assert_eq!(confidence_modifier(9.5, 5, true), 2.0);
        assert_eq!(confidence_modifier(4.0, 4, true), -2.0);
        assert_eq!(confidence_modifier(1.0, 5, true), -2.0);
        assert_eq!(confidence_modifier(5.5, 5, true), 0.0);
        assert_eq!(confidence_modifier(9.0, 3, true), 0.0);
        assert_eq!(confidence_modifier(9.0, 5, false), 0.0);
        assert_eq!(confidence_modifier(2.0, 4, false), 0.0);
    }

    #[test]
    fn final_score_combines_parts() {
        assert_eq!(final_score(7.0, 2.0, 2.0), 16.0);
        assert_eq!(final_score(3.0, 1.5, -2.0), 2.5);
    }

    #[test]
    fn variance_is_population_variance() {
        assert_eq!(vote_variance(&[1, 10]), 20.25);
        assert_eq!(vote_variance(&[5]), 0.0);
        assert_eq!(vote_variance(&[]), 0.0);
        assert_eq!(vote_variance(&[4, 4, 4]), 0.0);
    }

    #[test]
    fn distribution_buckets_ratings() {
        let buckets = vote_distribution(&[1, 10, 10, 5]);
        assert_eq!(buckets[0], 1);
        assert_eq!(buckets[4], 1);
        assert_eq!(buckets[9], 2);
        assert_eq!(buckets.iter().sum::<u32>(), 4);
    }

    #[test]
    fn competition_ranking_shares_and_skips() {
        assert_eq!(competition_ranks(&[20.0, 20.0, 10.0]), vec![1, 1, 3]);
        assert_eq!(competition_ranks(&[30.0, 20.0, 20.0, 20.0, 1.0]), vec![1, 2, 2, 2, 5]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn score_song_applies_round_weight_and_bet() {
        let mut session = party_with_players(2, PartySettings::default());
        let ids = player_ids(&session);
        let song_id = add_song(&mut session, ids[0], 2, 5);
        add_vote(&mut session, song_id, ids[1], 8);
        add_vote(&mut session, song_id, ids[2], 6);

        let song = session.songs[&song_id].clone();
        let (score, distribution) = score_song(&session, &song);
        assert_eq!(score.raw_average, 7.0);
        assert_eq!(score.weight_multiplier, 2.0);
        assert_eq!(score.confidence_modifier, 2.0);
        assert_eq!(score.final_score, 16.0);
        assert_eq!(distribution[7], 1);
        assert_eq!(distribution[5], 1);
    }

    #[test]
    fn standings_include_bonus_and_event_points() {
        let mut session = party_with_players(2, PartySettings::default());
        let ids = player_ids(&session);
        let a = add_song(&mut session, ids[0], 1, 3);
        let b = add_song(&mut session, ids[1], 1, 3);
        let c = add_song(&mut session, ids[2], 1, 3);
        set_score(&mut session, a, 10.0, 10.0);
        set_score(&mut session, b, 20.0, 20.0);
        set_score(&mut session, c, 5.0, 5.0);
        session.players[&ids[2]].event_points = 5.0;
        session.bonus_results.push(BonusResult {
            id: Uuid::new_v4(),
            category: BonusCategory::CrowdFavorite,
            winning_song_id: a,
            winner_player_id: ids[0],
            points: 10,
            reveal_order: 1,
        });

        let standings = calculate_final_standings(&session);
        let summary = standings
            .iter()
            .map(|standing| (standing.player_id, standing.final_score, standing.rank))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![(ids[0], 20.0, 1), (ids[1], 20.0, 1), (ids[2], 10.0, 3)]
        );
        assert_eq!(standings[0].bonus_points, 10.0);
        assert_eq!(standings[2].event_points, 5.0);
    }

    #[test]
    fn kicked_players_leave_the_ranking() {
        let mut session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        session.players[&ids[1]].connection_status =
            crate::state::party::ConnectionStatus::Kicked;
        assert_eq!(live_ranking(&session).len(), 1);
        assert_eq!(calculate_final_standings(&session).len(), 1);
    }

    #[test]
    fn empty_totals_are_positive_zero() {
        let session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        let score = calculate_player_score(&session, ids[1]);
        assert!(score == 0.0 && score.is_sign_positive());
        assert_eq!(serde_json::to_string(&score).unwrap(), "0.0");

        let standings = calculate_final_standings(&session);
        assert!(standings.iter().all(|standing| {
            standing.base_score.is_sign_positive()
                && standing.bonus_points.is_sign_positive()
                && standing.final_score.is_sign_positive()
        }));
    }
}
