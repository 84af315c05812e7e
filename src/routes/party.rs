use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        party::{
            ActiveEventView, BonusResultView, CastVoteRequest, CheckEventsRequest,
            CreatePartyRequest, JoinPartyRequest, PartyCreated, PartyJoined, PartyListItem,
            PartySnapshot, PlayerScore, RequesterBody, ResolveEventRequest, SongSubmitted,
            StandingView, SubmitSongRequest, ViewerQuery, VoteReceipt,
        },
        sse::EventResolvedEvent,
    },
    error::AppError,
    services::{
        event_service, finale_service,
        party_service::{self, NewSong},
        session_service,
        vote_service::{self, NewVote},
    },
    state::SharedState,
};

/// Party lifecycle, gameplay and read-side routes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/parties", get(list_parties).post(create_party))
        .route("/parties/join", post(join_party))
        .route("/parties/{id}", get(get_snapshot).delete(delete_party))
        .route("/parties/{id}/start", post(start_party))
        .route("/parties/{id}/songs", post(submit_song))
        .route("/parties/{id}/advance/playing", post(advance_to_playing))
        .route("/parties/{id}/advance/finale", post(advance_to_finale))
        .route("/parties/{id}/votes", post(cast_vote))
        .route("/parties/{id}/events/check", post(check_events))
        .route("/parties/{id}/events/{event_id}/resolve", post(resolve_event))
        .route("/parties/{id}/finale/reveal", post(reveal_next))
        .route("/parties/{id}/complete", post(complete_party))
        .route("/parties/{id}/standings", get(standings))
        .route("/parties/{id}/bonus-results", get(bonus_results))
        .route("/parties/{id}/players/{player_id}/score", get(player_score))
        .route("/parties/{id}/players/{player_id}/kick", post(kick_player))
        .route("/parties/{id}/players/{player_id}/reconnect", post(reconnect))
}

/// Open a new party in its lobby.
#[utoipa::path(
    post,
    path = "/parties",
    tag = "parties",
    request_body = CreatePartyRequest,
    responses(
        (status = 200, description = "Party created", body = PartyCreated),
        (status = 400, description = "Invalid settings")
    )
)]
pub async fn create_party(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreatePartyRequest>>,
) -> Result<Json<PartyCreated>, AppError> {
    let created =
        party_service::create_party(&state, payload.host_name, payload.settings.into()).await?;
    Ok(Json(created))
}

/// List stored parties.
#[utoipa::path(
    get,
    path = "/parties",
    tag = "parties",
    responses((status = 200, description = "Stored parties", body = [PartyListItem]))
)]
pub async fn list_parties(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PartyListItem>>, AppError> {
    Ok(Json(party_service::list_parties(&state).await?))
}

/// Join a lobby by its code.
#[utoipa::path(
    post,
    path = "/parties/join",
    tag = "parties",
    request_body = JoinPartyRequest,
    responses(
        (status = 200, description = "Joined", body = PartyJoined),
        (status = 404, description = "Unknown join code"),
        (status = 409, description = "Party already started, full or name taken")
    )
)]
pub async fn join_party(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinPartyRequest>>,
) -> Result<Json<PartyJoined>, AppError> {
    let joined = party_service::join_party(&state, &payload.join_code, payload.name).await?;
    Ok(Json(joined))
}

/// Phase-appropriate snapshot of the party for one of its players.
#[utoipa::path(
    get,
    path = "/parties/{id}",
    tag = "parties",
    params(("id" = Uuid, Path, description = "Party identifier"), ViewerQuery),
    responses(
        (status = 200, description = "Snapshot", body = PartySnapshot),
        (status = 401, description = "Viewer is not a member")
    )
)]
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(viewer): Query<ViewerQuery>,
) -> Result<Json<PartySnapshot>, AppError> {
    Ok(Json(party_service::snapshot(&state, id, viewer.player_id).await?))
}

/// Delete the party and everything it owns. Host only.
#[utoipa::path(
    delete,
    path = "/parties/{id}",
    tag = "parties",
    params(("id" = Uuid, Path, description = "Party identifier"), ViewerQuery),
    responses(
        (status = 204, description = "Party deleted"),
        (status = 403, description = "Requester is not the host")
    )
)]
pub async fn delete_party(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(requester): Query<ViewerQuery>,
) -> Result<StatusCode, AppError> {
    party_service::delete_party(&state, id, requester.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Hand out identities and open submissions. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/start",
    tag = "lifecycle",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = RequesterBody,
    responses(
        (status = 204, description = "Submissions open"),
        (status = 409, description = "Party already started")
    )
)]
pub async fn start_party(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(requester): Json<RequesterBody>,
) -> Result<StatusCode, AppError> {
    party_service::start_party(&state, id, requester.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit one song.
#[utoipa::path(
    post,
    path = "/parties/{id}/songs",
    tag = "gameplay",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = SubmitSongRequest,
    responses(
        (status = 200, description = "Song recorded", body = SongSubmitted),
        (status = 409, description = "Submissions closed or quota reached")
    )
)]
pub async fn submit_song(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitSongRequest>>,
) -> Result<Json<SongSubmitted>, AppError> {
    let submitted = party_service::submit_song(
        &state,
        id,
        payload.player_id,
        NewSong {
            title: payload.title,
            artist: payload.artist,
            track_ref: payload.track_ref,
            confidence: payload.confidence,
        },
    )
    .await?;
    Ok(Json(submitted))
}

/// Start playback once everyone has submitted. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/advance/playing",
    tag = "lifecycle",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = RequesterBody,
    responses(
        (status = 204, description = "Playback started"),
        (status = 409, description = "Submissions incomplete")
    )
)]
pub async fn advance_to_playing(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(requester): Json<RequesterBody>,
) -> Result<StatusCode, AppError> {
    party_service::advance_to_playing(&state, id, requester.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Enter the finale once the queue is exhausted. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/advance/finale",
    tag = "lifecycle",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = RequesterBody,
    responses(
        (status = 204, description = "Finale started"),
        (status = 409, description = "Songs still queued")
    )
)]
pub async fn advance_to_finale(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(requester): Json<RequesterBody>,
) -> Result<StatusCode, AppError> {
    finale_service::advance_to_finale(&state, id, requester.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rate the song currently playing.
#[utoipa::path(
    post,
    path = "/parties/{id}/votes",
    tag = "gameplay",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = CastVoteRequest,
    responses(
        (status = 200, description = "Vote locked in", body = VoteReceipt),
        (status = 409, description = "Song not open or vote already cast")
    )
)]
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<CastVoteRequest>>,
) -> Result<Json<VoteReceipt>, AppError> {
    let receipt = vote_service::cast_vote(
        &state,
        id,
        payload.player_id,
        NewVote {
            song_id: payload.song_id,
            rating: payload.rating,
            super_vote: payload.super_vote,
            comment: payload.comment,
        },
    )
    .await?;
    Ok(Json(receipt))
}

/// Roll for a mini-event. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/events/check",
    tag = "events",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = CheckEventsRequest,
    responses((status = 200, description = "Fired event, or null when nothing fired", body = ActiveEventView))
)]
pub async fn check_events(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CheckEventsRequest>,
) -> Result<Json<Option<ActiveEventView>>, AppError> {
    let fired = event_service::check_events(&state, id, payload.player_id, payload.timing).await?;
    Ok(Json(fired))
}

/// Resolve a fired mini-event. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/events/{event_id}/resolve",
    tag = "events",
    params(
        ("id" = Uuid, Path, description = "Party identifier"),
        ("event_id" = Uuid, Path, description = "Fired event identifier")
    ),
    request_body = ResolveEventRequest,
    responses(
        (status = 200, description = "Event resolved", body = EventResolvedEvent),
        (status = 409, description = "Event already resolved")
    )
)]
pub async fn resolve_event(
    State(state): State<SharedState>,
    Path((id, event_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ResolveEventRequest>,
) -> Result<Json<EventResolvedEvent>, AppError> {
    let resolved =
        event_service::resolve_event(&state, id, payload.player_id, event_id, payload.song_id)
            .await?;
    Ok(Json(resolved))
}

/// Show the next finale step now. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/finale/reveal",
    tag = "lifecycle",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = RequesterBody,
    responses((status = 204, description = "Step revealed"))
)]
pub async fn reveal_next(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(requester): Json<RequesterBody>,
) -> Result<StatusCode, AppError> {
    finale_service::reveal_next(&state, id, requester.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Close the party after the reveal. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/complete",
    tag = "lifecycle",
    params(("id" = Uuid, Path, description = "Party identifier")),
    request_body = RequesterBody,
    responses(
        (status = 204, description = "Party complete"),
        (status = 409, description = "Reveal still running")
    )
)]
pub async fn complete_party(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(requester): Json<RequesterBody>,
) -> Result<StatusCode, AppError> {
    finale_service::advance_to_complete(&state, id, requester.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Live standings before the finale, final standings once every reveal step ran.
#[utoipa::path(
    get,
    path = "/parties/{id}/standings",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Party identifier")),
    responses(
        (status = 200, description = "Ranked standings", body = [StandingView]),
        (status = 409, description = "Scores are hidden or the finale reveal is still running")
    )
)]
pub async fn standings(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StandingView>>, AppError> {
    Ok(Json(party_service::standings(&state, id).await?))
}

/// Bonus awards of the finale.
#[utoipa::path(
    get,
    path = "/parties/{id}/bonus-results",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Party identifier")),
    responses((status = 200, description = "Bonus awards", body = [BonusResultView]))
)]
pub async fn bonus_results(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BonusResultView>>, AppError> {
    Ok(Json(party_service::bonus_results(&state, id).await?))
}

/// Song score total of one player.
#[utoipa::path(
    get,
    path = "/parties/{id}/players/{player_id}/score",
    tag = "scores",
    params(
        ("id" = Uuid, Path, description = "Party identifier"),
        ("player_id" = Uuid, Path, description = "Player identifier")
    ),
    responses(
        (status = 200, description = "Player score", body = PlayerScore),
        (status = 409, description = "Scores are hidden")
    )
)]
pub async fn player_score(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PlayerScore>, AppError> {
    Ok(Json(party_service::player_score(&state, id, player_id).await?))
}

/// Remove a player from the party. Host only.
#[utoipa::path(
    post,
    path = "/parties/{id}/players/{player_id}/kick",
    tag = "parties",
    params(
        ("id" = Uuid, Path, description = "Party identifier"),
        ("player_id" = Uuid, Path, description = "Player to kick")
    ),
    request_body = RequesterBody,
    responses(
        (status = 204, description = "Player kicked"),
        (status = 403, description = "Requester is not the host")
    )
)]
pub async fn kick_player(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
    Json(requester): Json<RequesterBody>,
) -> Result<StatusCode, AppError> {
    party_service::kick_player(&state, id, requester.player_id, player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Restore a dropped player without a socket, returning their snapshot.
#[utoipa::path(
    post,
    path = "/parties/{id}/players/{player_id}/reconnect",
    tag = "parties",
    params(
        ("id" = Uuid, Path, description = "Party identifier"),
        ("player_id" = Uuid, Path, description = "Returning player")
    ),
    responses(
        (status = 200, description = "Session restored", body = PartySnapshot),
        (status = 410, description = "Reconnect window elapsed")
    )
)]
pub async fn reconnect(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PartySnapshot>, AppError> {
    Ok(Json(session_service::reconnect(&state, id, player_id).await?))
}
