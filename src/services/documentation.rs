use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the SongClash backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::party_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::party::create_party,
        crate::routes::party::list_parties,
        crate::routes::party::join_party,
        crate::routes::party::get_snapshot,
        crate::routes::party::delete_party,
        crate::routes::party::start_party,
        crate::routes::party::submit_song,
        crate::routes::party::advance_to_playing,
        crate::routes::party::advance_to_finale,
        crate::routes::party::cast_vote,
        crate::routes::party::check_events,
        crate::routes::party::resolve_event,
        crate::routes::party::reveal_next,
        crate::routes::party::complete_party,
        crate::routes::party::standings,
        crate::routes::party::bonus_results,
        crate::routes::party::player_score,
        crate::routes::party::kick_player,
        crate::routes::party::reconnect,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::StoreStatus,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::SocketError,
            crate::dto::sse::Handshake,
            crate::dto::sse::PhaseChangedEvent,
            crate::dto::sse::PlayerJoinedEvent,
            crate::dto::sse::PlayerStatusEvent,
            crate::dto::sse::IdentityAssignedEvent,
            crate::dto::sse::SubmissionProgressEvent,
            crate::dto::sse::SongStartedEvent,
            crate::dto::sse::VoteProgressEvent,
            crate::dto::sse::SongScoredEvent,
            crate::dto::sse::EventResolvedEvent,
            crate::dto::sse::FinaleStartedEvent,
            crate::dto::sse::RevealStepEvent,
            crate::dto::sse::PartyCompletedEvent,
            crate::dto::sse::PartyDeletedEvent,
            crate::state::state_machine::PartyPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Party room event streams"),
        (name = "players", description = "Player WebSocket sessions"),
        (name = "parties", description = "Party creation, membership and snapshots"),
        (name = "lifecycle", description = "Host-driven phase changes"),
        (name = "gameplay", description = "Submissions and votes"),
        (name = "events", description = "Mini-event checks and resolutions"),
        (name = "scores", description = "Scores, standings and bonus awards"),
    )
)]
pub struct ApiDoc;
