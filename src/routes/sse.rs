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

use crate::{
    error::{AppError, ErrorBody},
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session transition stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Session not found", body = ErrorBody)
    )
)]
/// Stream the transitions of one session to a connected client.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_session(&state, id).await?;
    info!(
        session_id = %id,
        subscribers = state.sse().subscriber_count(),
        "new session SSE connection"
    );
    Ok(sse_service::to_sse_stream(id, handshake, receiver))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{id}/events", get(session_stream))
}
