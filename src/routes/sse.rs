use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/parties/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Party identifier")),
    responses(
        (status = 200, description = "Party room SSE stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown party")
    )
)]
/// Stream a party's room broadcasts: phase changes, songs, scores, events and the finale.
pub async fn party_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_party(&state, id).await?;
    info!(party_id = %id, "new party SSE connection");
    Ok(sse_service::to_sse_stream(receiver, handshake, id))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/parties/{id}/events", get(party_stream))
}
