use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub mod health;
pub mod party;
pub mod sse;
pub mod websocket;

/// Every route of the service, Swagger UI included, bound to `state`.
pub fn router(state: SharedState) -> Router<()> {
    let swagger: Router<SharedState> = SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into();

    Router::<SharedState>::new()
        .merge(health::router())
        .merge(party::router())
        .merge(sse::router())
        .merge(websocket::router())
        .merge(swagger)
        .with_state(state)
}
