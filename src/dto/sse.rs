use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::party::{
        ActiveEventView, IdentityView, RevealView, SongScoreView, StandingView,
    },
    services::mini_events::effects::{SabotageKind, ScoreDelta},
    state::{party::ConnectionStatus, state_machine::PartyPhase},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels and player sockets.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already serialised payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    pub party_id: Uuid,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
    pub phase: PartyPhase,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast after every lifecycle transition.
pub struct PhaseChangedEvent {
    pub party_id: Uuid,
    pub from: PartyPhase,
    pub phase: PartyPhase,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when someone joins the lobby.
pub struct PlayerJoinedEvent {
    pub player_id: Uuid,
    pub name: String,
    pub player_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player's connection status changes.
pub struct PlayerStatusEvent {
    pub player_id: Uuid,
    pub status: ConnectionStatus,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent privately to a player once identities are handed out.
pub struct IdentityAssignedEvent {
    pub player_id: Uuid,
    pub identity: IdentityView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast after each submission.
pub struct SubmissionProgressEvent {
    pub submitted: usize,
    pub expected: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a song opens for votes.
pub struct SongStartedEvent {
    pub song_id: Uuid,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_ref: Option<String>,
    pub round_number: u8,
    pub queue_position: Option<u32>,
    pub play_duration_seconds: u32,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast after each vote on the current song.
pub struct VoteProgressEvent {
    pub song_id: Uuid,
    pub votes_in: usize,
    pub votes_expected: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a song closes.
pub struct SongScoredEvent {
    pub song_id: Uuid,
    pub round_number: u8,
    /// Whether the song closed on timeout rather than on the last vote.
    pub timed_out: bool,
    /// Withheld while scores are hidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<SongScoreView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_distribution: Option<Vec<u32>>,
}

#[derive(Debug, Serialize, ToSchema)]
/// A vote exposed by a reveal effect.
pub struct RevealedVoteView {
    pub song_id: Uuid,
    /// Hidden while voting is anonymous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<Uuid>,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once a mini-event has been applied.
pub struct EventResolvedEvent {
    pub event: ActiveEventView,
    /// Withheld while scores are hidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deltas: Option<Vec<ScoreDelta>>,
    /// Whether an immunity cancelled some or all of the point changes.
    pub blocked_by_immunity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immune_player_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub revealed_votes: Vec<RevealedVoteView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sabotage: Option<SabotageKind>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the reveal sequence begins.
pub struct FinaleStartedEvent {
    pub steps_total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast for each finale beat.
pub struct RevealStepEvent {
    /// 1-based index of the step just revealed.
    pub step: usize,
    pub steps_total: usize,
    pub reveal: RevealView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the party is over.
pub struct PartyCompletedEvent {
    pub standings: Vec<StandingView>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the host deletes the party.
pub struct PartyDeletedEvent {
    pub party_id: Uuid,
}
