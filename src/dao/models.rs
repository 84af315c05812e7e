use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, TimestampMilliSeconds, serde_as};
use uuid::Uuid;

use crate::{
    services::{bonus::BonusCategory, mini_events::catalog::EventTiming},
    state::{
        party::{
            ActiveEvent, AnonymousIdentity, BonusResult, ConnectionStatus, DisplayFlags,
            EventFrequency, FinaleState, Immunity, PartySession, PartySettings, Player,
            PlayerColor, RevealStep, Song, SongScore, Standing, Vote,
        },
        state_machine::PartyPhase,
    },
};

/// Party row. Children live in their own tables keyed by `party_id`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartyEntity {
    /// Stable identifier.
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    /// Uppercase join code, unique across parties.
    pub join_code: String,
    /// Lifecycle phase.
    pub status: PartyPhase,
    /// Host-selected rules.
    pub settings: SettingsEntity,
    /// Creation time.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    /// Time of the last save.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: SystemTime,
    /// Song open for votes.
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub current_song_id: Option<Uuid>,
    /// Scores hidden by sabotage.
    pub hide_scores: bool,
    /// Voter identities hidden by sabotage.
    pub anonymous_voting: bool,
    /// Player protected by an immunity, if any.
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub immunity_player_id: Option<Uuid>,
    /// Round the immunity applies to.
    pub immunity_round: Option<u8>,
    /// Present from the finale on.
    pub finale: Option<FinaleEntity>,
}

/// Party settings as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsEntity {
    pub songs_per_player: u8,
    pub play_duration_seconds: u32,
    pub bonus_category_count: u8,
    pub confidence_betting_enabled: bool,
    pub event_frequency: EventFrequency,
}

/// Frozen standings and reveal progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinaleEntity {
    /// Standings frozen when the finale started.
    pub standings: Vec<StandingEntity>,
    /// Reveal plan, in order.
    pub steps: Vec<RevealStepEntity>,
    /// Number of steps already revealed.
    pub cursor: u32,
}

/// One frozen standing.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandingEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub player_id: Uuid,
    pub base_score: f64,
    pub confidence_modifiers: f64,
    pub bonus_points: f64,
    pub event_points: f64,
    pub final_score: f64,
    pub rank: u32,
}

/// One step of the persisted reveal plan.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevealStepEntity {
    Bonus {
        #[serde_as(as = "DisplayFromStr")]
        result_id: Uuid,
    },
    Identity {
        #[serde_as(as = "DisplayFromStr")]
        player_id: Uuid,
    },
    Champion {
        #[serde_as(as = "Vec<DisplayFromStr>")]
        player_ids: Vec<Uuid>,
    },
}

/// Player row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerEntity {
    /// Stable identifier.
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    /// Owning party.
    #[serde_as(as = "DisplayFromStr")]
    pub party_id: Uuid,
    /// Join order inside the party.
    pub seat: u32,
    /// Real display name.
    pub name: String,
    pub is_host: bool,
    /// Presence, including kicks.
    pub connection_status: ConnectionStatus,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub disconnected_at: Option<SystemTime>,
    /// Points left for super votes.
    pub power_up_points: u32,
    /// Net points from mini-events.
    pub event_points: f64,
    /// Anonymous identity, once assigned.
    pub identity: Option<IdentityEntity>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub joined_at: SystemTime,
}

/// Persisted anonymous identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityEntity {
    pub alias: String,
    pub silhouette: String,
    pub color: ColorEntity,
}

/// HSV color of an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColorEntity {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

/// Song row. Score columns are set together once the song is scored.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SongEntity {
    /// Stable identifier.
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    /// Owning party.
    #[serde_as(as = "DisplayFromStr")]
    pub party_id: Uuid,
    /// Submission order inside the party.
    pub seq: u32,
    /// Submitting player.
    #[serde_as(as = "DisplayFromStr")]
    pub submitter_id: Uuid,
    pub title: String,
    pub artist: String,
    pub track_ref: Option<String>,
    pub confidence: u8,
    pub round_number: u8,
    /// Position in the play queue, once assigned.
    pub queue_position: Option<u32>,
    pub raw_average: Option<f64>,
    pub weight_multiplier: Option<f64>,
    pub confidence_modifier: Option<f64>,
    pub final_score: Option<f64>,
    /// Rating histogram.
    pub vote_distribution: [u32; 10],
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub submitted_at: SystemTime,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub started_at: Option<SystemTime>,
    /// Whether voting on the song is closed.
    pub completed: bool,
}

/// Vote row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteEntity {
    /// Stable identifier.
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    /// Owning party.
    #[serde_as(as = "DisplayFromStr")]
    pub party_id: Uuid,
    /// Rated song.
    #[serde_as(as = "DisplayFromStr")]
    pub song_id: Uuid,
    /// Voting player.
    #[serde_as(as = "DisplayFromStr")]
    pub voter_id: Uuid,
    pub rating: u8,
    pub is_locked: bool,
    pub super_vote: bool,
    pub comment: Option<String>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub cast_at: SystemTime,
}

/// Mini-event row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveEventEntity {
    /// Identifier of this occurrence.
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    /// Owning party.
    #[serde_as(as = "DisplayFromStr")]
    pub party_id: Uuid,
    /// Catalog identifier.
    pub event_id: String,
    pub timing: EventTiming,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub triggered_at: SystemTime,
    pub round_number: u8,
    /// Players touched by the resolved effect.
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub affected_players: Vec<Uuid>,
    /// Whether the effect was applied.
    pub resolved: bool,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub resolved_at: Option<SystemTime>,
}

/// Bonus award row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BonusResultEntity {
    /// Stable identifier.
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    /// Owning party.
    #[serde_as(as = "DisplayFromStr")]
    pub party_id: Uuid,
    pub category: BonusCategory,
    #[serde_as(as = "DisplayFromStr")]
    pub winning_song_id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    pub winner_player_id: Uuid,
    pub points: u32,
    /// 1-based order in the finale.
    pub reveal_order: u32,
}

/// Listing projection of a stored party.
#[derive(Debug, Clone, PartialEq)]
pub struct PartyListItemEntity {
    pub id: Uuid,
    pub join_code: String,
    pub status: PartyPhase,
    pub created_at: SystemTime,
}

impl From<&PartyEntity> for PartyListItemEntity {
    fn from(value: &PartyEntity) -> Self {
        Self {
            id: value.id,
            join_code: value.join_code.clone(),
            status: value.status,
            created_at: value.created_at,
        }
    }
}

/// Number of rows owned by a party, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildCounts {
    pub players: u64,
    pub songs: u64,
    pub votes: u64,
    pub events: u64,
    pub bonus_results: u64,
}

impl ChildCounts {
    /// Sum over every table.
    pub fn total(&self) -> u64 {
        self.players + self.songs + self.votes + self.events + self.bonus_results
    }
}

/// A party and everything it owns, saved and loaded as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PartyGraph {
    /// Party row.
    pub party: PartyEntity,
    /// Players in join order.
    pub players: Vec<PlayerEntity>,
    /// Songs in submission order.
    pub songs: Vec<SongEntity>,
    pub votes: Vec<VoteEntity>,
    pub events: Vec<ActiveEventEntity>,
    pub bonus_results: Vec<BonusResultEntity>,
}

impl PartyGraph {
    /// Flatten an in-memory session into persisted rows.
    pub fn from_session(session: &PartySession, status: PartyPhase) -> Self {
        let party_id = session.id;
        let party = PartyEntity {
            id: party_id,
            join_code: session.join_code.clone(),
            status,
            settings: SettingsEntity {
                songs_per_player: session.settings.songs_per_player,
                play_duration_seconds: session.settings.play_duration_seconds,
                bonus_category_count: session.settings.bonus_category_count,
                confidence_betting_enabled: session.settings.confidence_betting_enabled,
                event_frequency: session.settings.event_frequency,
            },
            created_at: session.created_at,
            updated_at: session.updated_at,
            current_song_id: session.current_song_id,
            hide_scores: session.flags.hide_scores,
            anonymous_voting: session.flags.anonymous_voting,
            immunity_player_id: session.flags.immunity.map(|immunity| immunity.player_id),
            immunity_round: session.flags.immunity.map(|immunity| immunity.round_number),
            finale: session.finale.as_ref().map(FinaleEntity::from),
        };

        let players = session
            .players
            .values()
            .enumerate()
            .map(|(seat, player)| PlayerEntity {
                id: player.id,
                party_id,
                seat: seat as u32,
                name: player.name.clone(),
                is_host: player.is_host,
                connection_status: player.connection_status,
                disconnected_at: player.disconnected_at,
                power_up_points: player.power_up_points,
                event_points: player.event_points,
                identity: player.identity.as_ref().map(|identity| IdentityEntity {
                    alias: identity.alias.clone(),
                    silhouette: identity.silhouette.clone(),
                    color: ColorEntity {
                        h: identity.color.h,
                        s: identity.color.s,
                        v: identity.color.v,
                    },
                }),
                joined_at: player.joined_at,
            })
            .collect();

        let songs = session
            .songs
            .values()
            .enumerate()
            .map(|(seq, song)| SongEntity {
                id: song.id,
                party_id,
                seq: seq as u32,
                submitter_id: song.submitter_id,
                title: song.title.clone(),
                artist: song.artist.clone(),
                track_ref: song.track_ref.clone(),
                confidence: song.confidence,
                round_number: song.round_number,
                queue_position: song.queue_position,
                raw_average: song.score.map(|score| score.raw_average),
                weight_multiplier: song.score.map(|score| score.weight_multiplier),
                confidence_modifier: song.score.map(|score| score.confidence_modifier),
                final_score: song.score.map(|score| score.final_score),
                vote_distribution: song.vote_distribution,
                submitted_at: song.submitted_at,
                started_at: song.started_at,
                completed: song.completed,
            })
            .collect();

        let votes = session
            .votes
            .iter()
            .map(|vote| VoteEntity {
                id: vote.id,
                party_id,
                song_id: vote.song_id,
                voter_id: vote.voter_id,
                rating: vote.rating,
                is_locked: vote.is_locked,
                super_vote: vote.super_vote,
                comment: vote.comment.clone(),
                cast_at: vote.cast_at,
            })
            .collect();

        let events = session
            .events
            .iter()
            .map(|event| ActiveEventEntity {
                id: event.id,
                party_id,
                event_id: event.event_id.clone(),
                timing: event.timing,
                triggered_at: event.triggered_at,
                round_number: event.round_number,
                affected_players: event.affected_players.clone(),
                resolved: event.resolved,
                resolved_at: event.resolved_at,
            })
            .collect();

        let bonus_results = session
            .bonus_results
            .iter()
            .map(|result| BonusResultEntity {
                id: result.id,
                party_id,
                category: result.category,
                winning_song_id: result.winning_song_id,
                winner_player_id: result.winner_player_id,
                points: result.points,
                reveal_order: result.reveal_order,
            })
            .collect();

        Self {
            party,
            players,
            songs,
            votes,
            events,
            bonus_results,
        }
    }

    /// Rebuild the in-memory session and its lifecycle phase.
    pub fn into_session(self) -> (PartySession, PartyPhase) {
        let PartyGraph {
            party,
            mut players,
            mut songs,
            votes,
            events,
            mut bonus_results,
        } = self;

        players.sort_by_key(|player| player.seat);
        songs.sort_by_key(|song| song.seq);
        bonus_results.sort_by_key(|result| result.reveal_order);

        let players = players
            .into_iter()
            .map(|player| {
                (
                    player.id,
                    Player {
                        id: player.id,
                        name: player.name,
                        is_host: player.is_host,
                        connection_status: player.connection_status,
                        disconnected_at: player.disconnected_at,
                        power_up_points: player.power_up_points,
                        event_points: player.event_points,
                        identity: player.identity.map(|identity| AnonymousIdentity {
                            alias: identity.alias,
                            silhouette: identity.silhouette,
                            color: PlayerColor {
                                h: identity.color.h,
                                s: identity.color.s,
                                v: identity.color.v,
                            },
                        }),
                        joined_at: player.joined_at,
                    },
                )
            })
            .collect::<IndexMap<_, _>>();

        let songs = songs
            .into_iter()
            .map(|song| {
                let score = match (
                    song.raw_average,
                    song.weight_multiplier,
                    song.confidence_modifier,
                    song.final_score,
                ) {
                    (Some(raw_average), Some(weight_multiplier), Some(modifier), Some(final_score)) => {
                        Some(SongScore {
                            raw_average,
                            weight_multiplier,
                            confidence_modifier: modifier,
                            final_score,
                        })
                    }
                    _ => None,
                };
                (
                    song.id,
                    Song {
                        id: song.id,
                        submitter_id: song.submitter_id,
                        title: song.title,
                        artist: song.artist,
                        track_ref: song.track_ref,
                        confidence: song.confidence,
                        round_number: song.round_number,
                        queue_position: song.queue_position,
                        score,
                        vote_distribution: song.vote_distribution,
                        submitted_at: song.submitted_at,
                        started_at: song.started_at,
                        completed: song.completed,
                    },
                )
            })
            .collect::<IndexMap<_, _>>();

        let mut votes = votes
            .into_iter()
            .map(|vote| Vote {
                id: vote.id,
                song_id: vote.song_id,
                voter_id: vote.voter_id,
                rating: vote.rating,
                is_locked: vote.is_locked,
                super_vote: vote.super_vote,
                comment: vote.comment,
                cast_at: vote.cast_at,
            })
            .collect::<Vec<_>>();
        votes.sort_by_key(|vote| vote.cast_at);

        let mut events = events
            .into_iter()
            .map(|event| ActiveEvent {
                id: event.id,
                event_id: event.event_id,
                timing: event.timing,
                triggered_at: event.triggered_at,
                round_number: event.round_number,
                affected_players: event.affected_players,
                resolved: event.resolved,
                resolved_at: event.resolved_at,
            })
            .collect::<Vec<_>>();
        events.sort_by_key(|event| event.triggered_at);

        let immunity = match (party.immunity_player_id, party.immunity_round) {
            (Some(player_id), Some(round_number)) => Some(Immunity {
                player_id,
                round_number,
            }),
            _ => None,
        };

        let session = PartySession {
            id: party.id,
            join_code: party.join_code,
            settings: PartySettings {
                songs_per_player: party.settings.songs_per_player,
                play_duration_seconds: party.settings.play_duration_seconds,
                bonus_category_count: party.settings.bonus_category_count,
                confidence_betting_enabled: party.settings.confidence_betting_enabled,
                event_frequency: party.settings.event_frequency,
            },
            created_at: party.created_at,
            updated_at: party.updated_at,
            players,
            songs,
            votes,
            events,
            bonus_results: bonus_results
                .into_iter()
                .map(|result| BonusResult {
                    id: result.id,
                    category: result.category,
                    winning_song_id: result.winning_song_id,
                    winner_player_id: result.winner_player_id,
                    points: result.points,
                    reveal_order: result.reveal_order,
                })
                .collect(),
            current_song_id: party.current_song_id,
            flags: DisplayFlags {
                hide_scores: party.hide_scores,
                anonymous_voting: party.anonymous_voting,
                immunity,
            },
            finale: party.finale.map(FinaleState::from),
        };

        (session, party.status)
    }
}

impl From<&FinaleState> for FinaleEntity {
    fn from(value: &FinaleState) -> Self {
        Self {
            standings: value
                .standings
                .iter()
                .map(|standing| StandingEntity {
                    player_id: standing.player_id,
                    base_score: standing.base_score,
                    confidence_modifiers: standing.confidence_modifiers,
                    bonus_points: standing.bonus_points,
                    event_points: standing.event_points,
                    final_score: standing.final_score,
                    rank: standing.rank,
                })
                .collect(),
            steps: value
                .steps
                .iter()
                .map(|step| match step {
                    RevealStep::Bonus { result_id } => RevealStepEntity::Bonus {
                        result_id: *result_id,
                    },
                    RevealStep::Identity { player_id } => RevealStepEntity::Identity {
                        player_id: *player_id,
                    },
                    RevealStep::Champion { player_ids } => RevealStepEntity::Champion {
                        player_ids: player_ids.clone(),
                    },
                })
                .collect(),
            cursor: value.cursor as u32,
        }
    }
}

impl From<FinaleEntity> for FinaleState {
    fn from(value: FinaleEntity) -> Self {
        Self {
            standings: value
                .standings
                .into_iter()
                .map(|standing| Standing {
                    player_id: standing.player_id,
                    base_score: standing.base_score,
                    confidence_modifiers: standing.confidence_modifiers,
                    bonus_points: standing.bonus_points,
                    event_points: standing.event_points,
                    final_score: standing.final_score,
                    rank: standing.rank,
                })
                .collect(),
            steps: value
                .steps
                .into_iter()
                .map(|step| match step {
                    RevealStepEntity::Bonus { result_id } => RevealStep::Bonus { result_id },
                    RevealStepEntity::Identity { player_id } => RevealStep::Identity { player_id },
                    RevealStepEntity::Champion { player_ids } => RevealStep::Champion { player_ids },
                })
                .collect(),
            cursor: value.cursor as usize,
        }
    }
}
