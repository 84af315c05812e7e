//! Bonus categories awarded during the finale.

use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    services::scoring::{song_ratings, vote_variance},
    state::party::{BonusResult, PartySession, Song},
};

/// Points granted by every bonus award.
pub const BONUS_POINTS: u32 = 10;

/// The four bonus categories, in reveal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BonusCategory {
    /// Highest final score.
    CrowdFavorite,
    /// Most divisive song.
    CultClassic,
    /// Best song its submitter had little faith in.
    HiddenGem,
    /// Best song submitted with full confidence.
    BoldMove,
}

impl BonusCategory {
    /// Every category in catalog order.
    pub const ALL: [BonusCategory; 4] = [
        BonusCategory::CrowdFavorite,
        BonusCategory::CultClassic,
        BonusCategory::HiddenGem,
        BonusCategory::BoldMove,
    ];

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            BonusCategory::CrowdFavorite => "Crowd Favorite",
            BonusCategory::CultClassic => "Cult Classic",
            BonusCategory::HiddenGem => "Hidden Gem",
            BonusCategory::BoldMove => "Bold Move",
        }
    }
}

/// Pick `count` categories. Fewer than four yields a random subset kept in catalog order.
pub fn select_categories<R>(count: u8, rng: &mut R) -> Vec<BonusCategory>
where
    R: Rng + ?Sized,
{
    let total = BonusCategory::ALL.len();
    let count = usize::from(count).min(total);
    if count == total {
        return BonusCategory::ALL.to_vec();
    }

    let mut picked = rand::seq::index::sample(rng, total, count).into_vec();
    picked.sort_unstable();
    picked
        .into_iter()
        .map(|index| BonusCategory::ALL[index])
        .collect()
}

/// Winning song of `category`, if any song qualifies. The earliest submission wins ties.
pub fn category_winner(session: &PartySession, category: BonusCategory) -> Option<&Song> {
    let candidates = session.songs.values().filter(|song| {
        song.score.is_some()
            && session
                .players
                .get(&song.submitter_id)
                .is_some_and(|player| player.is_active())
    });

    match category {
        BonusCategory::CrowdFavorite => max_by(candidates, final_score),
        BonusCategory::CultClassic => max_by(
            candidates.filter(|song| session.votes_for(song.id).next().is_some()),
            |song| vote_variance(&song_ratings(session, song.id)),
        ),
        BonusCategory::HiddenGem => {
            max_by(candidates.filter(|song| song.confidence <= 2), final_score)
        }
        BonusCategory::BoldMove => {
            max_by(candidates.filter(|song| song.confidence == 5), final_score)
        }
    }
}

/// Build the bonus results for the selected categories, skipping those without a winner.
pub fn compute_bonus_results<R>(session: &PartySession, rng: &mut R) -> Vec<BonusResult>
where
    R: Rng + ?Sized,
{
    select_categories(session.settings.bonus_category_count, rng)
        .into_iter()
        .filter_map(|category| {
            category_winner(session, category).map(|song| (category, song.id, song.submitter_id))
        })
        .enumerate()
        .map(|(index, (category, song_id, player_id))| BonusResult {
            id: Uuid::new_v4(),
            category,
            winning_song_id: song_id,
            winner_player_id: player_id,
            points: BONUS_POINTS,
            reveal_order: index as u32 + 1,
        })
        .collect()
}

fn final_score(song: &Song) -> f64 {
    song.score.map(|score| score.final_score).unwrap_or(0.0)
}

fn max_by<'a, F>(songs: impl Iterator<Item = &'a Song>, key: F) -> Option<&'a Song>
where
    F: Fn(&Song) -> f64,
{
    let mut best: Option<(&Song, f64)> = None;
    for song in songs {
        let value = key(song);
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((song, value)),
        }
    }
    best.map(|(song, _)| song)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::state::party::{
        PartySettings,
        fixtures::{add_song, add_vote, party_with_players, player_ids, set_score},
    };

    #[test]
    fn all_categories_when_count_is_four() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_categories(4, &mut rng), BonusCategory::ALL.to_vec());
        assert!(select_categories(0, &mut rng).is_empty());
    }

    #[test]
    fn subsets_are_random_but_ordered() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let picked = select_categories(2, &mut rng);
            assert_eq!(picked.len(), 2);
            let positions = picked
                .iter()
                .map(|category| BonusCategory::ALL.iter().position(|c| c == category).unwrap())
                .collect::<Vec<_>>();
            assert!(positions[0] < positions[1]);
            seen.insert(picked);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn crowd_favorite_ties_go_to_first_submission() {
        let mut session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        let first = add_song(&mut session, ids[0], 1, 3);
        let second = add_song(&mut session, ids[1], 1, 3);
        set_score(&mut session, first, 8.0, 12.0);
        set_score(&mut session, second, 8.0, 12.0);

        let winner = category_winner(&session, BonusCategory::CrowdFavorite).unwrap();
        assert_eq!(winner.id, first);
    }

    #[test]
    fn crowd_favorite_uses_final_score() {
        let mut session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        let higher_raw = add_song(&mut session, ids[0], 1, 3);
        let higher_final = add_song(&mut session, ids[1], 1, 5);
        set_score(&mut session, higher_raw, 8.0, 8.0);
        set_score(&mut session, higher_final, 7.5, 9.5);

        let winner = category_winner(&session, BonusCategory::CrowdFavorite).unwrap();
        assert_eq!(winner.id, higher_final);
    }

    #[test]
    fn cult_classic_needs_votes() {
        let mut session = party_with_players(2, PartySettings::default());
        let ids = player_ids(&session);
        let unvoted = add_song(&mut session, ids[0], 1, 3);
        let divisive = add_song(&mut session, ids[1], 1, 3);
        let consensual = add_song(&mut session, ids[2], 1, 3);
        for song in [unvoted, divisive, consensual] {
            set_score(&mut session, song, 5.0, 5.0);
        }
        add_vote(&mut session, divisive, ids[0], 1);
        add_vote(&mut session, divisive, ids[2], 10);
        add_vote(&mut session, consensual, ids[0], 6);
        add_vote(&mut session, consensual, ids[1], 6);

        let winner = category_winner(&session, BonusCategory::CultClassic).unwrap();
        assert_eq!(winner.id, divisive);
    }

    #[test]
    fn confidence_categories_filter_songs() {
        let mut session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        let timid = add_song(&mut session, ids[0], 1, 2);
        let bold = add_song(&mut session, ids[1], 1, 5);
        set_score(&mut session, timid, 6.0, 6.0);
        set_score(&mut session, bold, 3.0, 1.0);

        assert_eq!(
            category_winner(&session, BonusCategory::HiddenGem).map(|s| s.id),
            Some(timid)
        );
        assert_eq!(
            category_winner(&session, BonusCategory::BoldMove).map(|s| s.id),
            Some(bold)
        );
    }

    #[test]
    fn categories_without_winner_are_skipped_and_order_stays_dense() {
        let mut session = party_with_players(1, PartySettings::default());
        let ids = player_ids(&session);
        let song = add_song(&mut session, ids[0], 1, 3);
        set_score(&mut session, song, 6.0, 6.0);
        add_vote(&mut session, song, ids[1], 6);

        let results = compute_bonus_results(&session, &mut StdRng::seed_from_u64(9));
        let categories = results.iter().map(|r| r.category).collect::<Vec<_>>();
        assert_eq!(
            categories,
            vec![BonusCategory::CrowdFavorite, BonusCategory::CultClassic]
        );
        assert_eq!(
            results.iter().map(|r| r.reveal_order).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(results.iter().all(|r| r.points == BONUS_POINTS));
        assert!(results.iter().all(|r| r.winner_player_id == ids[0]));
    }
}
