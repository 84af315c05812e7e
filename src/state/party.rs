use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::{bonus::BonusCategory, mini_events::catalog::EventTiming};

/// How often mini-events are allowed to fire during a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventFrequency {
    /// Events fire a third as often as their base probability.
    Rare,
    /// Events fire at their base probability.
    #[default]
    Normal,
    /// Events fire twice as often as their base probability.
    Chaos,
}

impl EventFrequency {
    /// Multiplier applied to every catalog base probability.
    pub fn modifier(self) -> f64 {
        match self {
            EventFrequency::Rare => 0.33,
            EventFrequency::Normal => 1.0,
            EventFrequency::Chaos => 2.0,
        }
    }
}

/// Host-selected rules for a party.
#[derive(Debug, Clone, PartialEq)]
pub struct PartySettings {
    /// Number of songs every player submits (1 to 3), which is also the number of rounds.
    pub songs_per_player: u8,
    /// Listening window for a single song.
    pub play_duration_seconds: u32,
    /// Number of bonus categories revealed during the finale (0 to 4).
    pub bonus_category_count: u8,
    /// Whether submitter confidence adds or removes points.
    pub confidence_betting_enabled: bool,
    /// Mini-event frequency.
    pub event_frequency: EventFrequency,
}

impl Default for PartySettings {
    fn default() -> Self {
        Self {
            songs_per_player: 2,
            play_duration_seconds: 45,
            bonus_category_count: 4,
            confidence_betting_enabled: true,
            event_frequency: EventFrequency::Normal,
        }
    }
}

/// Transport-level presence of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A live connection is attached.
    Connected,
    /// The connection dropped; the player may come back within the reconnection window.
    Disconnected,
    /// Removed by the host; never restored.
    Kicked,
}

/// HSV color handed out as part of an anonymous identity.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerColor {
    /// Hue in degrees.
    pub h: f32,
    /// Saturation, from 0 to 1.
    pub s: f32,
    /// Value, from 0 to 1.
    pub v: f32,
}

/// Mask worn by a player until the finale reveals who they are.
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymousIdentity {
    /// Pseudonym shown instead of the real name.
    pub alias: String,
    /// Avatar silhouette key.
    pub silhouette: String,
    /// Avatar color.
    pub color: PlayerColor,
}

/// Player info tracked during a party.
#[derive(Debug, Clone)]
pub struct Player {
    /// Stable identifier.
    pub id: Uuid,
    /// Real display name, hidden from other players until the finale.
    pub name: String,
    /// Exactly one player per party is the host.
    pub is_host: bool,
    /// Connected, disconnected or kicked.
    pub connection_status: ConnectionStatus,
    /// Set while the player is disconnected.
    pub disconnected_at: Option<SystemTime>,
    /// Currency spent on super votes.
    pub power_up_points: u32,
    /// Net points gained or lost through mini-events.
    pub event_points: f64,
    /// Assigned when the party starts.
    pub identity: Option<AnonymousIdentity>,
    /// Join time, which also breaks ranking ties.
    pub joined_at: SystemTime,
}

impl Player {
    /// Whether the player still takes part in voting and rankings.
    pub fn is_active(&self) -> bool {
        self.connection_status != ConnectionStatus::Kicked
    }
}

/// Computed scores of a song. Present only once the song has been scored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SongScore {
    /// Weighted mean of the ratings.
    pub raw_average: f64,
    /// Multiplier of the song's round.
    pub weight_multiplier: f64,
    /// Bonus or penalty from the submitter's bet.
    pub confidence_modifier: f64,
    /// Always `raw_average * weight_multiplier + confidence_modifier`.
    pub final_score: f64,
}

impl SongScore {
    /// Weighted score before the confidence modifier.
    pub fn weighted_score(&self) -> f64 {
        self.raw_average * self.weight_multiplier
    }
}

/// A submitted song.
#[derive(Debug, Clone)]
pub struct Song {
    /// Stable identifier.
    pub id: Uuid,
    /// Player who submitted the song.
    pub submitter_id: Uuid,
    /// Song title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Reference returned by the external music search, if any.
    pub track_ref: Option<String>,
    /// Submitter's bet on the song's reception (1 to 5).
    pub confidence: u8,
    /// 1-based round the song is played in.
    pub round_number: u8,
    /// 1-based position in the play queue, assigned when playing starts.
    pub queue_position: Option<u32>,
    /// Set once the song has been scored.
    pub score: Option<SongScore>,
    /// Histogram of ratings, bucket `i` counting ratings equal to `i + 1`.
    pub vote_distribution: [u32; 10],
    /// Submission time, which orders songs within a round.
    pub submitted_at: SystemTime,
    /// When the listening window opened.
    pub started_at: Option<SystemTime>,
    /// Completion flag shared by the vote path and the timeout path.
    pub completed: bool,
}

/// A locked rating cast by a player.
#[derive(Debug, Clone)]
pub struct Vote {
    /// Stable identifier.
    pub id: Uuid,
    /// Rated song.
    pub song_id: Uuid,
    /// Player who cast the vote.
    pub voter_id: Uuid,
    /// Integer rating between 1 and 10.
    pub rating: u8,
    /// Votes are write-once.
    pub is_locked: bool,
    /// Weighs 1.5 in the song average.
    pub super_vote: bool,
    /// Optional remark, shown when the vote is revealed.
    pub comment: Option<String>,
    /// When the vote was locked in.
    pub cast_at: SystemTime,
}

/// A mini-event that fired during the party.
#[derive(Debug, Clone)]
pub struct ActiveEvent {
    /// Identifier of this occurrence.
    pub id: Uuid,
    /// Catalog identifier.
    pub event_id: String,
    /// Moment the event fired at.
    pub timing: EventTiming,
    /// When the event fired.
    pub triggered_at: SystemTime,
    /// Round the event belongs to; immunity is scoped to it.
    pub round_number: u8,
    /// Players touched by the resolved effect.
    pub affected_players: Vec<Uuid>,
    /// An event is resolved at most once.
    pub resolved: bool,
    /// When the effect was applied.
    pub resolved_at: Option<SystemTime>,
}

/// Bonus award computed when entering the finale.
#[derive(Debug, Clone)]
pub struct BonusResult {
    /// Stable identifier.
    pub id: Uuid,
    /// Awarded category.
    pub category: BonusCategory,
    /// Song that won the category.
    pub winning_song_id: Uuid,
    /// Submitter of the winning song.
    pub winner_player_id: Uuid,
    /// Points added to the winner's final score.
    pub points: u32,
    /// 1-based and dense.
    pub reveal_order: u32,
}

/// Protection from point loss, scoped to a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immunity {
    /// Protected player.
    pub player_id: Uuid,
    /// Round the protection applies to.
    pub round_number: u8,
}

/// Display switches flipped by sabotage and immunity effects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayFlags {
    /// Leaderboard scores stay hidden until the finale.
    pub hide_scores: bool,
    /// Voter identities stay hidden in vote reveals.
    pub anonymous_voting: bool,
    /// Active point-loss protection, if any.
    pub immunity: Option<Immunity>,
}

/// One line of the frozen standings.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    /// Ranked player.
    pub player_id: Uuid,
    /// Sum of the weighted song scores.
    pub base_score: f64,
    /// Sum of the confidence bets.
    pub confidence_modifiers: f64,
    /// Points from bonus categories.
    pub bonus_points: f64,
    /// Net points from mini-events.
    pub event_points: f64,
    /// Sum of every component above.
    pub final_score: f64,
    /// Standard competition rank: ties share a rank and the next rank skips.
    pub rank: u32,
}

/// A single beat of the finale reveal sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum RevealStep {
    /// Announce one bonus award.
    Bonus { result_id: Uuid },
    /// Unmask one non-champion player.
    Identity { player_id: Uuid },
    /// Unmask the rank-1 player(s).
    Champion { player_ids: Vec<Uuid> },
}

/// Finale bookkeeping: frozen standings and reveal progress.
#[derive(Debug, Clone, PartialEq)]
pub struct FinaleState {
    /// Standings frozen when the finale started.
    pub standings: Vec<Standing>,
    /// Reveal plan, in order.
    pub steps: Vec<RevealStep>,
    /// Number of steps already revealed.
    pub cursor: usize,
}

impl FinaleState {
    /// Whether every reveal step has been shown.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Whether `player_id`'s identity has been revealed so far.
    pub fn is_unmasked(&self, player_id: Uuid) -> bool {
        self.steps[..self.cursor.min(self.steps.len())]
            .iter()
            .any(|step| match step {
                RevealStep::Identity { player_id: id } => *id == player_id,
                RevealStep::Champion { player_ids } => player_ids.contains(&player_id),
                RevealStep::Bonus { .. } => false,
            })
    }
}

/// Aggregated state for a party. The phase lives in the party state machine.
#[derive(Debug, Clone)]
pub struct PartySession {
    /// Stable identifier.
    pub id: Uuid,
    /// Short code players join with.
    pub join_code: String,
    /// Rules chosen by the host.
    pub settings: PartySettings,
    /// Creation time.
    pub created_at: SystemTime,
    /// Time of the last committed change.
    pub updated_at: SystemTime,
    /// Players in join order.
    pub players: IndexMap<Uuid, Player>,
    /// Songs in submission order.
    pub songs: IndexMap<Uuid, Song>,
    /// Locked votes, in casting order.
    pub votes: Vec<Vote>,
    /// Mini-events fired so far.
    pub events: Vec<ActiveEvent>,
    /// Filled when the finale starts.
    pub bonus_results: Vec<BonusResult>,
    /// Song currently open for votes.
    pub current_song_id: Option<Uuid>,
    /// Sabotage and immunity switches.
    pub flags: DisplayFlags,
    /// Present from the finale on.
    pub finale: Option<FinaleState>,
}

impl PartySession {
    /// Build a fresh party in the lobby with its host as the only player.
    pub fn new(
        join_code: String,
        settings: PartySettings,
        host_name: String,
        starting_points: u32,
        now: SystemTime,
    ) -> Self {
        let host = Player {
            id: Uuid::new_v4(),
            name: host_name,
            is_host: true,
            connection_status: ConnectionStatus::Connected,
            disconnected_at: None,
            power_up_points: starting_points,
            event_points: 0.0,
            identity: None,
            joined_at: now,
        };
        let mut players = IndexMap::new();
        players.insert(host.id, host);

        Self {
            id: Uuid::new_v4(),
            join_code,
            settings,
            created_at: now,
            updated_at: now,
            players,
            songs: IndexMap::new(),
            votes: Vec::new(),
            events: Vec::new(),
            bonus_results: Vec::new(),
            current_song_id: None,
            flags: DisplayFlags::default(),
            finale: None,
        }
    }

    /// The party host.
    pub fn host(&self) -> Option<&Player> {
        self.players.values().find(|player| player.is_host)
    }

    /// Players that have not been kicked, in join order.
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|player| player.is_active())
    }

    /// Songs submitted by `player_id`, in submission order.
    pub fn songs_of(&self, player_id: Uuid) -> impl Iterator<Item = &Song> {
        self.songs
            .values()
            .filter(move |song| song.submitter_id == player_id)
    }

    /// Locked votes cast for `song_id`.
    pub fn votes_for(&self, song_id: Uuid) -> impl Iterator<Item = &Vote> {
        self.votes
            .iter()
            .filter(move |vote| vote.song_id == song_id && vote.is_locked)
    }

    /// Whether `voter_id` already voted on `song_id`.
    pub fn has_voted(&self, song_id: Uuid, voter_id: Uuid) -> bool {
        self.votes
            .iter()
            .any(|vote| vote.song_id == song_id && vote.voter_id == voter_id)
    }

    /// Number of rounds, equal to the songs each player submits.
    pub fn total_rounds(&self) -> u8 {
        self.settings.songs_per_player
    }

    /// Round of the current (or most recently finished) song.
    pub fn current_round(&self) -> u8 {
        let current = self
            .current_song_id
            .and_then(|id| self.songs.get(&id))
            .map(|song| song.round_number);
        current.unwrap_or_else(|| {
            self.songs
                .values()
                .filter(|song| song.completed)
                .map(|song| song.round_number)
                .max()
                .unwrap_or(1)
        })
    }

    /// Whether the reveal sequence has unmasked `player_id`.
    pub fn is_unmasked(&self, player_id: Uuid) -> bool {
        self.finale
            .as_ref()
            .map(|finale| finale.is_unmasked(player_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::time::SystemTime;

    use uuid::Uuid;

    use super::*;

    /// Lobby party with a host plus `guests` extra players.
    pub fn party_with_players(guests: usize, settings: PartySettings) -> PartySession {
        let now = SystemTime::now();
        let mut session = PartySession::new("QWERTY".into(), settings, "host".into(), 4, now);
        for index in 0..guests {
            let player = Player {
                id: Uuid::new_v4(),
                name: format!("guest-{index}"),
                is_host: false,
                connection_status: ConnectionStatus::Connected,
                disconnected_at: None,
                power_up_points: 4,
                event_points: 0.0,
                identity: None,
                joined_at: now,
            };
            session.players.insert(player.id, player);
        }
        session
    }

    /// Player ids in join order.
    pub fn player_ids(session: &PartySession) -> Vec<Uuid> {
        session.players.keys().copied().collect()
    }

    /// Append an unplayed song and return its id.
    pub fn add_song(
        session: &mut PartySession,
        submitter_id: Uuid,
        round_number: u8,
        confidence: u8,
    ) -> Uuid {
        let song = Song {
            id: Uuid::new_v4(),
            submitter_id,
            title: format!("track {}", session.songs.len() + 1),
            artist: "artist".into(),
            track_ref: None,
            confidence,
            round_number,
            queue_position: None,
            score: None,
            vote_distribution: [0; 10],
            submitted_at: SystemTime::now(),
            started_at: None,
            completed: false,
        };
        let id = song.id;
        session.songs.insert(id, song);
        id
    }

    /// Record a locked vote.
    pub fn add_vote(session: &mut PartySession, song_id: Uuid, voter_id: Uuid, rating: u8) {
        session.votes.push(Vote {
            id: Uuid::new_v4(),
            song_id,
            voter_id,
            rating,
            is_locked: true,
            super_vote: false,
            comment: None,
            cast_at: SystemTime::now(),
        });
    }

    /// Mark a song completed with the given score.
    pub fn set_score(session: &mut PartySession, song_id: Uuid, raw_average: f64, final_score: f64) {
        if let Some(song) = session.songs.get_mut(&song_id) {
            song.completed = true;
            song.score = Some(SongScore {
                raw_average,
                weight_multiplier: 1.0,
                confidence_modifier: final_score - raw_average,
                final_score,
            });
        }
    }
}
