//! Effect families and their resolution against a live scoreboard.

use rand::{Rng, seq::SliceRandom};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Who a score multiplier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTarget {
    Winner,
    Loser,
    Random,
    All,
}

/// Who points are stolen from. The thief is always last place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StealSource {
    Leader,
    Random,
}

/// How many points a steal moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StealAmount {
    /// Absolute number of points.
    Fixed(f64),
    /// Percentage of the source's score, rounded to one decimal.
    Percentage(f64),
}

/// Which pair of players trade scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    Adjacent,
    TopBottom,
    RandomPair,
}

/// Disruptions that do not move points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SabotageKind {
    ShuffleQueue,
    HideScores,
    AnonymousVoting,
}

/// The seven effect families a catalog event can carry.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    ScoreMultiplier { target: ScoreTarget, multiplier: f64 },
    StealPoints { from: StealSource, amount: StealAmount },
    SwapScores { mode: SwapMode },
    DoubleOrNothing,
    Immunity,
    VoteReveal { count: usize },
    Sabotage { kind: SabotageKind },
}

impl Effect {
    /// Whether points only move between players.
    pub fn is_zero_sum(&self) -> bool {
        matches!(self, Effect::StealPoints { .. } | Effect::SwapScores { .. })
    }
}

/// A player and their live score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPlayer {
    /// Ranked player.
    pub player_id: Uuid,
    /// Song scores plus event points.
    pub score: f64,
}

/// Scoring facts about the song an effect is resolved against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SongContext {
    /// Played song.
    pub song_id: Uuid,
    /// Player who submitted it.
    pub submitter_id: Uuid,
    /// Weighted mean of its ratings.
    pub raw_average: f64,
    /// Score after round weight and confidence bet.
    pub final_score: f64,
}

/// A vote exposed by a reveal effect.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RevealedVote {
    /// Revealed vote.
    pub vote_id: Uuid,
    /// Song it was cast on.
    pub song_id: Uuid,
    /// Player who cast it.
    pub voter_id: Uuid,
    /// Rating given.
    pub rating: u8,
}

/// Read access to the party state an effect needs.
///
/// Implementations must compute on every call so effects always see current scores.
pub trait ScoreBoard {
    /// Active players sorted by live score, highest first. Ties keep join order.
    fn ranking(&self) -> Vec<RankedPlayer>;
    /// Scoring facts for a played song.
    fn song_context(&self, song_id: Uuid) -> Option<SongContext>;
    /// Locked votes cast on songs of `round`.
    fn round_votes(&self, round: u8) -> Vec<RevealedVote>;
    /// Unplayed songs with their queue positions, in queue order.
    fn unplayed_queue(&self) -> Vec<(Uuid, u32)>;
}

/// Where in the party an effect is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveContext {
    /// Round the event belongs to.
    pub round_number: u8,
    /// Song just played, when resolving between two songs.
    pub song_id: Option<Uuid>,
}

/// Score change for a single player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ScoreDelta {
    /// Player whose event points change.
    pub player_id: Uuid,
    /// Signed change.
    pub delta: f64,
}

/// Everything an effect changes, to be applied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectOutcome {
    /// Players the effect touched.
    pub affected_players: Vec<Uuid>,
    /// Point changes.
    pub deltas: Vec<ScoreDelta>,
    /// Deltas must be applied together or not at all.
    pub zero_sum: bool,
    /// Player granted an immunity.
    pub immunity: Option<Uuid>,
    /// Votes exposed to the party.
    pub revealed_votes: Vec<RevealedVote>,
    /// New queue positions for unplayed songs.
    pub queue_order: Option<Vec<(Uuid, u32)>>,
    /// Display flag to raise.
    pub flag: Option<SabotageKind>,
}

/// Failures raised while resolving an effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("effect requires a played song as context")]
    MissingSongContext,
    #[error("song `{0}` has not been scored yet")]
    UnscoredSong(Uuid),
}

/// Resolve `effect` against the scoreboard as it stands right now.
pub fn resolve<B, R>(
    effect: &Effect,
    board: &B,
    ctx: ResolveContext,
    rng: &mut R,
) -> Result<EffectOutcome, EffectError>
where
    B: ScoreBoard + ?Sized,
    R: Rng + ?Sized,
{
    // Scores are read from the board here, never from a copy taken when the event fired.
    let ranking = board.ranking();

    let outcome = match *effect {
        Effect::ScoreMultiplier { target, multiplier } => {
            score_multiplier(&ranking, board, ctx, target, multiplier, rng)?
        }
        Effect::StealPoints { from, amount } => steal_points(&ranking, from, amount, rng),
        Effect::SwapScores { mode } => swap_scores(&ranking, mode, rng),
        Effect::DoubleOrNothing => double_or_nothing(board, ctx)?,
        Effect::Immunity => match ranking.last() {
            Some(last) => EffectOutcome {
                affected_players: vec![last.player_id],
                immunity: Some(last.player_id),
                ..EffectOutcome::default()
            },
            None => EffectOutcome::default(),
        },
        Effect::VoteReveal { count } => vote_reveal(board, ctx.round_number, count, rng),
        Effect::Sabotage { kind } => sabotage(&ranking, board, kind, rng),
    };

    Ok(outcome)
}

fn score_multiplier<B, R>(
    ranking: &[RankedPlayer],
    board: &B,
    ctx: ResolveContext,
    target: ScoreTarget,
    multiplier: f64,
    rng: &mut R,
) -> Result<EffectOutcome, EffectError>
where
    B: ScoreBoard + ?Sized,
    R: Rng + ?Sized,
{
    let factor = multiplier - 1.0;

    if target != ScoreTarget::All {
        if let Some(song_id) = ctx.song_id {
            let song = board
                .song_context(song_id)
                .ok_or(EffectError::UnscoredSong(song_id))?;
            return Ok(single_delta(song.submitter_id, song.final_score * factor));
        }
    }

    let targets: Vec<&RankedPlayer> = match target {
        ScoreTarget::Winner => ranking.first().into_iter().collect(),
        ScoreTarget::Loser => ranking.last().into_iter().collect(),
        ScoreTarget::Random => pick(ranking, rng).into_iter().collect(),
        ScoreTarget::All => ranking.iter().collect(),
    };

    Ok(EffectOutcome {
        affected_players: targets.iter().map(|player| player.player_id).collect(),
        deltas: targets
            .iter()
            .map(|player| ScoreDelta {
                player_id: player.player_id,
                delta: player.score * factor,
            })
            .collect(),
        ..EffectOutcome::default()
    })
}

fn steal_points<R>(
    ranking: &[RankedPlayer],
    from: StealSource,
    amount: StealAmount,
    rng: &mut R,
) -> EffectOutcome
where
    R: Rng + ?Sized,
{
    let Some(thief) = ranking.last() else {
        return EffectOutcome::default();
    };
    let candidates = &ranking[..ranking.len() - 1];
    let source = match from {
        StealSource::Leader => candidates.first(),
        StealSource::Random => pick(candidates, rng),
    };
    let Some(source) = source else {
        return EffectOutcome::default();
    };

    let requested = match amount {
        StealAmount::Fixed(points) => points,
        StealAmount::Percentage(percent) => round_one_decimal(source.score * percent / 100.0),
    };
    let stolen = requested.min(source.score).max(0.0);

    EffectOutcome {
        affected_players: vec![source.player_id, thief.player_id],
        deltas: vec![
            ScoreDelta {
                player_id: source.player_id,
                delta: -stolen,
            },
            ScoreDelta {
                player_id: thief.player_id,
                delta: stolen,
            },
        ],
        zero_sum: true,
        ..EffectOutcome::default()
    }
}

fn swap_scores<R>(ranking: &[RankedPlayer], mode: SwapMode, rng: &mut R) -> EffectOutcome
where
    R: Rng + ?Sized,
{
    if ranking.len() < 2 {
        return EffectOutcome::default();
    }

    let (first, second) = match mode {
        SwapMode::TopBottom => (0, ranking.len() - 1),
        SwapMode::Adjacent => {
            let upper = rng.random_range(0..ranking.len() - 1);
            (upper, upper + 1)
        }
        SwapMode::RandomPair => {
            let picked = rand::seq::index::sample(rng, ranking.len(), 2);
            (picked.index(0), picked.index(1))
        }
    };

    let (a, b) = (ranking[first], ranking[second]);
    let delta = b.score - a.score;

    EffectOutcome {
        affected_players: vec![a.player_id, b.player_id],
        deltas: vec![
            ScoreDelta {
                player_id: a.player_id,
                delta,
            },
            ScoreDelta {
                player_id: b.player_id,
                delta: -delta,
            },
        ],
        zero_sum: true,
        ..EffectOutcome::default()
    }
}

fn double_or_nothing<B>(board: &B, ctx: ResolveContext) -> Result<EffectOutcome, EffectError>
where
    B: ScoreBoard + ?Sized,
{
    let song_id = ctx.song_id.ok_or(EffectError::MissingSongContext)?;
    let song = board
        .song_context(song_id)
        .ok_or(EffectError::UnscoredSong(song_id))?;

    let delta = if song.raw_average >= 7.0 {
        song.final_score
    } else if song.raw_average < 5.0 {
        -song.final_score
    } else {
        0.0
    };

    Ok(single_delta(song.submitter_id, delta))
}

fn vote_reveal<B, R>(board: &B, round: u8, count: usize, rng: &mut R) -> EffectOutcome
where
    B: ScoreBoard + ?Sized,
    R: Rng + ?Sized,
{
    let votes = board.round_votes(round);
    let amount = count.min(votes.len());
    let mut picked = rand::seq::index::sample(rng, votes.len(), amount).into_vec();
    picked.sort_unstable();

    let revealed = picked
        .into_iter()
        .map(|index| votes[index].clone())
        .collect::<Vec<_>>();
    let mut affected = Vec::new();
    for vote in &revealed {
        if !affected.contains(&vote.voter_id) {
            affected.push(vote.voter_id);
        }
    }

    EffectOutcome {
        affected_players: affected,
        revealed_votes: revealed,
        ..EffectOutcome::default()
    }
}

fn sabotage<B, R>(
    ranking: &[RankedPlayer],
    board: &B,
    kind: SabotageKind,
    rng: &mut R,
) -> EffectOutcome
where
    B: ScoreBoard + ?Sized,
    R: Rng + ?Sized,
{
    let affected_players = ranking.iter().map(|player| player.player_id).collect();

    match kind {
        SabotageKind::ShuffleQueue => {
            let queue = board.unplayed_queue();
            let positions = queue.iter().map(|(_, position)| *position).collect::<Vec<_>>();
            let mut songs = queue.into_iter().map(|(id, _)| id).collect::<Vec<_>>();
            songs.shuffle(rng);
            EffectOutcome {
                affected_players,
                queue_order: Some(songs.into_iter().zip(positions).collect()),
                ..EffectOutcome::default()
            }
        }
        SabotageKind::HideScores | SabotageKind::AnonymousVoting => EffectOutcome {
            affected_players,
            flag: Some(kind),
            ..EffectOutcome::default()
        },
    }
}

fn single_delta(player_id: Uuid, delta: f64) -> EffectOutcome {
    EffectOutcome {
        affected_players: vec![player_id],
        deltas: vec![ScoreDelta { player_id, delta }],
        ..EffectOutcome::default()
    }
}

fn pick<'a, R>(players: &'a [RankedPlayer], rng: &mut R) -> Option<&'a RankedPlayer>
where
    R: Rng + ?Sized,
{
    if players.is_empty() {
        None
    } else {
        players.get(rng.random_range(0..players.len()))
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
