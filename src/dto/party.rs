use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::PartyListItemEntity,
    dto::{format_system_time, validation::validate_join_code},
    services::{bonus::BonusCategory, mini_events::catalog::EventTiming},
    state::{
        party::{
            ConnectionStatus, EventFrequency, PartySettings, PlayerColor, SongScore, Standing,
        },
        state_machine::PartyPhase,
    },
};

fn default_songs_per_player() -> u8 {
    PartySettings::default().songs_per_player
}

fn default_play_duration() -> u32 {
    PartySettings::default().play_duration_seconds
}

fn default_bonus_count() -> u8 {
    PartySettings::default().bonus_category_count
}

fn default_true() -> bool {
    true
}

/// Rules chosen by the host when creating a party. Every field is optional.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct PartySettingsInput {
    #[serde(default = "default_songs_per_player")]
    #[validate(range(min = 1, max = 3))]
    pub songs_per_player: u8,
    #[serde(default = "default_play_duration")]
    #[validate(range(min = 5, max = 600))]
    pub play_duration_seconds: u32,
    #[serde(default = "default_bonus_count")]
    #[validate(range(max = 4))]
    pub bonus_category_count: u8,
    #[serde(default = "default_true")]
    pub confidence_betting_enabled: bool,
    #[serde(default)]
    pub event_frequency: EventFrequency,
}

impl Default for PartySettingsInput {
    fn default() -> Self {
        PartySettings::default().into()
    }
}

impl From<PartySettings> for PartySettingsInput {
    fn from(value: PartySettings) -> Self {
        Self {
            songs_per_player: value.songs_per_player,
            play_duration_seconds: value.play_duration_seconds,
            bonus_category_count: value.bonus_category_count,
            confidence_betting_enabled: value.confidence_betting_enabled,
            event_frequency: value.event_frequency,
        }
    }
}

impl From<PartySettingsInput> for PartySettings {
    fn from(value: PartySettingsInput) -> Self {
        Self {
            songs_per_player: value.songs_per_player,
            play_duration_seconds: value.play_duration_seconds,
            bonus_category_count: value.bonus_category_count,
            confidence_betting_enabled: value.confidence_betting_enabled,
            event_frequency: value.event_frequency,
        }
    }
}

/// Payload used to open a new party.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreatePartyRequest {
    #[validate(length(min = 1, max = 32))]
    pub host_name: String,
    #[serde(default)]
    #[validate(nested)]
    pub settings: PartySettingsInput,
}

/// Identifiers handed back to the host after creation.
#[derive(Debug, Serialize, ToSchema)]
pub struct PartyCreated {
    pub party_id: Uuid,
    pub join_code: String,
    pub host_id: Uuid,
}

/// Payload used to join a party from its code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinPartyRequest {
    #[validate(custom(function = "validate_join_code"))]
    pub join_code: String,
    #[validate(length(min = 1, max = 32))]
    pub name: String,
}

/// Identifiers handed back to a player after joining.
#[derive(Debug, Serialize, ToSchema)]
pub struct PartyJoined {
    pub party_id: Uuid,
    pub player_id: Uuid,
}

/// Body of every request that only needs to know who is asking.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RequesterBody {
    pub player_id: Uuid,
}

/// Query string identifying the viewer of a read-only route.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ViewerQuery {
    pub player_id: Uuid,
}

/// A song submission.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitSongRequest {
    pub player_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 200))]
    pub artist: String,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub track_ref: Option<String>,
    #[validate(range(min = 1, max = 5))]
    pub confidence: u8,
}

/// Acknowledgement of a submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SongSubmitted {
    pub song_id: Uuid,
    pub round_number: u8,
    /// Songs the submitter still owes.
    pub remaining: u8,
    /// Phase of the party after the submission.
    pub phase: PartyPhase,
}

/// A rating for the song currently playing.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CastVoteRequest {
    pub player_id: Uuid,
    pub song_id: Uuid,
    #[validate(range(min = 1, max = 10))]
    pub rating: u8,
    #[serde(default)]
    pub super_vote: bool,
    #[serde(default)]
    #[validate(length(max = 280))]
    pub comment: Option<String>,
}

/// Acknowledgement of a vote.
#[derive(Debug, Serialize, ToSchema)]
pub struct VoteReceipt {
    pub vote_id: Uuid,
    pub votes_in: usize,
    pub votes_expected: usize,
    /// Whether this vote closed the song.
    pub song_completed: bool,
    pub power_up_points: u32,
}

/// Host request to roll for a mini-event.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckEventsRequest {
    pub player_id: Uuid,
    pub timing: EventTiming,
}

/// Host request to resolve a fired mini-event.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveEventRequest {
    pub player_id: Uuid,
    /// Played song the effect is scaled by, if any.
    #[serde(default)]
    pub song_id: Option<Uuid>,
}

/// A mini-event as seen by clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActiveEventView {
    pub id: Uuid,
    pub event_id: String,
    pub name: String,
    pub description: String,
    pub timing: EventTiming,
    pub round_number: u8,
    pub affected_players: Vec<Uuid>,
    pub resolved: bool,
    pub triggered_at: String,
}

/// Display configuration of a party.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PartySettingsView {
    pub songs_per_player: u8,
    pub play_duration_seconds: u32,
    pub bonus_category_count: u8,
    pub confidence_betting_enabled: bool,
    pub event_frequency: EventFrequency,
}

impl From<&PartySettings> for PartySettingsView {
    fn from(value: &PartySettings) -> Self {
        Self {
            songs_per_player: value.songs_per_player,
            play_duration_seconds: value.play_duration_seconds,
            bonus_category_count: value.bonus_category_count,
            confidence_betting_enabled: value.confidence_betting_enabled,
            event_frequency: value.event_frequency,
        }
    }
}

/// HSV color as exchanged with clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ColorView {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl From<&PlayerColor> for ColorView {
    fn from(value: &PlayerColor) -> Self {
        Self {
            h: value.h,
            s: value.s,
            v: value.v,
        }
    }
}

/// Anonymous mask of a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IdentityView {
    pub alias: String,
    pub silhouette: String,
    pub color: ColorView,
}

/// A player as seen by another player.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerView {
    pub id: Uuid,
    /// Real name, present for the viewer themself or once unmasked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityView>,
    pub is_host: bool,
    pub connection_status: ConnectionStatus,
}

/// Computed scores of a song.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SongScoreView {
    pub raw_average: f64,
    pub weight_multiplier: f64,
    pub confidence_modifier: f64,
    pub final_score: f64,
}

impl From<SongScore> for SongScoreView {
    fn from(value: SongScore) -> Self {
        Self {
            raw_average: value.raw_average,
            weight_multiplier: value.weight_multiplier,
            confidence_modifier: value.confidence_modifier,
            final_score: value.final_score,
        }
    }
}

/// A song as seen by a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SongView {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_ref: Option<String>,
    pub round_number: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    /// Whether the viewer submitted this song.
    pub is_yours: bool,
    pub is_current: bool,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<SongScoreView>,
}

/// One line of the live leaderboard.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaderboardEntry {
    pub player_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Withheld while scores are hidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub position: u32,
}

/// One line of the final standings.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingView {
    pub player_id: Uuid,
    pub base_score: f64,
    pub confidence_modifiers: f64,
    pub bonus_points: f64,
    pub event_points: f64,
    pub final_score: f64,
    pub rank: u32,
}

impl From<&Standing> for StandingView {
    fn from(value: &Standing) -> Self {
        Self {
            player_id: value.player_id,
            base_score: value.base_score,
            confidence_modifiers: value.confidence_modifiers,
            bonus_points: value.bonus_points,
            event_points: value.event_points,
            final_score: value.final_score,
            rank: value.rank,
        }
    }
}

/// A bonus award.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BonusResultView {
    pub id: Uuid,
    pub category: BonusCategory,
    pub label: String,
    pub winning_song_id: Uuid,
    pub winner_player_id: Uuid,
    pub points: u32,
    pub reveal_order: u32,
}

/// An unmasked player, shown during the finale.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnmaskedPlayer {
    pub player_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityView>,
    pub rank: u32,
    pub final_score: f64,
}

/// A revealed step of the finale.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevealView {
    Bonus {
        result: BonusResultView,
        song_title: String,
        song_artist: String,
    },
    Identity {
        player: UnmaskedPlayer,
    },
    Champion {
        players: Vec<UnmaskedPlayer>,
    },
}

/// Finale progress.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FinaleView {
    pub steps_total: usize,
    pub steps_revealed: usize,
    pub revealed: Vec<RevealView>,
    /// Present once the whole sequence has played.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standings: Option<Vec<StandingView>>,
}

/// Phase-appropriate view of a party for one player.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PartySnapshot {
    pub party_id: Uuid,
    pub join_code: String,
    pub phase: PartyPhase,
    pub settings: PartySettingsView,
    pub you: PlayerView,
    pub power_up_points: u32,
    pub players: Vec<PlayerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_song_id: Option<Uuid>,
    /// Present during submitting, playing and finale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<SongView>>,
    /// Present during playing and finale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaderboard: Option<Vec<LeaderboardEntry>>,
    pub scores_hidden: bool,
    pub anonymous_voting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finale: Option<FinaleView>,
}

/// Listing entry for stored parties.
#[derive(Debug, Serialize, ToSchema)]
pub struct PartyListItem {
    pub id: Uuid,
    pub join_code: String,
    pub status: PartyPhase,
    pub created_at: String,
}

impl From<PartyListItemEntity> for PartyListItem {
    fn from(value: PartyListItemEntity) -> Self {
        Self {
            id: value.id,
            join_code: value.join_code,
            status: value.status,
            created_at: format_system_time(value.created_at),
        }
    }
}

/// Total score of one player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerScore {
    pub player_id: Uuid,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;

    #[test]
    fn settings_default_when_omitted() {
        let request: CreatePartyRequest =
            serde_json::from_str(r#"{ "host_name": "Ada" }"#).unwrap();
        assert!(request.validate().is_ok());
        let settings = PartySettings::from(request.settings);
        assert_eq!(settings, PartySettings::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let request: CreatePartyRequest = serde_json::from_str(
            r#"{ "host_name": "Ada", "settings": { "songs_per_player": 4, "bonus_category_count": 5 } }"#,
        )
        .unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.errors().contains_key("settings"));
        let nested = request.settings.validate().unwrap_err();
        assert!(nested.field_errors().contains_key("songs_per_player"));
        assert!(nested.field_errors().contains_key("bonus_category_count"));
    }

    #[test]
    fn ratings_must_be_whole_numbers_in_range() {
        let vote = |rating: &str| {
            serde_json::from_str::<CastVoteRequest>(&format!(
                r#"{{ "player_id": "{}", "song_id": "{}", "rating": {rating} }}"#,
                Uuid::nil(),
                Uuid::nil()
            ))
        };
        assert!(vote("7.5").is_err());
        assert!(vote("11").unwrap().validate().is_err());
        assert!(vote("0").unwrap().validate().is_err());
        assert!(vote("10").unwrap().validate().is_ok());
    }
}
