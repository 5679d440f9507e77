use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::session::{
        AnswerResponse, CreateSessionRequest, JoinSessionRequest, ReadyRequest,
        SessionViewResponse, SubmitAnswerRequest,
    },
    error::{AppError, ErrorBody},
    routes::identity::{PlayerIdentity, player_from_headers},
    services::session_service,
    state::SharedState,
};

/// Routes handling the session lifecycle and in-race actions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/join", post(join_session))
        .route("/sessions/{id}/ready", post(set_ready))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/answers", post(submit_answer))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/sessions/{id}/heartbeat", post(heartbeat))
        .route("/sessions/{id}/close", post(close_session))
}

/// Open a session at a shelter; the caller becomes host.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    params(("x-player-id" = String, Header, description = "Authenticated player id")),
    responses(
        (status = 201, description = "Session created", body = SessionViewResponse),
        (status = 401, description = "Missing player identity", body = ErrorBody),
        (status = 404, description = "Unknown shelter", body = ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    PlayerIdentity(player_id): PlayerIdentity,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionViewResponse>), AppError> {
    payload.validate()?;
    let view = session_service::create_session(&state, player_id, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Snapshot of a session; the caller's current question is included when identified.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = Option<String>, Header, description = "Viewer, to include their current question")
    ),
    responses(
        (status = 200, description = "Session snapshot", body = SessionViewResponse),
        (status = 404, description = "Session not found", body = ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SessionViewResponse>, AppError> {
    let viewer = player_from_headers(&headers);
    let view = session_service::session_view(&state, id, viewer.as_deref()).await?;
    Ok(Json(view))
}

/// Join the lobby from the reported position.
#[utoipa::path(
    post,
    path = "/sessions/{id}/join",
    tag = "sessions",
    request_body = JoinSessionRequest,
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Authenticated player id")
    ),
    responses(
        (status = 200, description = "Player joined", body = SessionViewResponse),
        (status = 409, description = "Session full, duplicate join or wrong phase", body = ErrorBody),
        (status = 410, description = "Session expired", body = ErrorBody),
        (status = 422, description = "Outside the geofence", body = ErrorBody)
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
    Json(payload): Json<JoinSessionRequest>,
) -> Result<Json<SessionViewResponse>, AppError> {
    payload.validate()?;
    let view = session_service::join_session(&state, id, &player_id, payload).await?;
    Ok(Json(view))
}

/// Toggle readiness while in the lobby.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ready",
    tag = "sessions",
    request_body = ReadyRequest,
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Authenticated player id")
    ),
    responses(
        (status = 200, description = "Readiness updated", body = SessionViewResponse),
        (status = 404, description = "Unknown session or player", body = ErrorBody)
    )
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
    Json(payload): Json<ReadyRequest>,
) -> Result<Json<SessionViewResponse>, AppError> {
    let view = session_service::set_ready(&state, id, &player_id, payload.ready).await?;
    Ok(Json(view))
}

/// Start the race (host only).
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Host player id")
    ),
    responses(
        (status = 200, description = "Race started", body = SessionViewResponse),
        (status = 403, description = "Caller is not the host", body = ErrorBody),
        (status = 409, description = "Not ready to start", body = ErrorBody)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
) -> Result<Json<SessionViewResponse>, AppError> {
    let view = session_service::start_session(&state, id, &player_id).await?;
    Ok(Json(view))
}

/// Answer the caller's current question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    tag = "sessions",
    request_body = SubmitAnswerRequest,
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Authenticated player id")
    ),
    responses(
        (status = 200, description = "Answer evaluated", body = AnswerResponse),
        (status = 409, description = "Stale submission or wrong phase", body = ErrorBody),
        (status = 422, description = "Outside the geofence", body = ErrorBody)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    payload.validate()?;
    let response = session_service::submit_answer(&state, id, &player_id, payload).await?;
    Ok(Json(response))
}

/// Leave the session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/leave",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Authenticated player id")
    ),
    responses(
        (status = 200, description = "Player left", body = SessionViewResponse),
        (status = 404, description = "Unknown session or player", body = ErrorBody)
    )
)]
pub async fn leave_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
) -> Result<Json<SessionViewResponse>, AppError> {
    let view = session_service::leave_session(&state, id, &player_id).await?;
    Ok(Json(view))
}

/// Keep the caller marked as active.
#[utoipa::path(
    post,
    path = "/sessions/{id}/heartbeat",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Authenticated player id")
    ),
    responses(
        (status = 200, description = "Heartbeat recorded", body = SessionViewResponse),
        (status = 404, description = "Unknown session or player", body = ErrorBody)
    )
)]
pub async fn heartbeat(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
) -> Result<Json<SessionViewResponse>, AppError> {
    let view = session_service::heartbeat(&state, id, &player_id).await?;
    Ok(Json(view))
}

/// Stop and close the session (host only).
#[utoipa::path(
    post,
    path = "/sessions/{id}/close",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-player-id" = String, Header, description = "Host player id")
    ),
    responses(
        (status = 200, description = "Session closed", body = SessionViewResponse),
        (status = 403, description = "Caller is not the host", body = ErrorBody)
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    PlayerIdentity(player_id): PlayerIdentity,
) -> Result<Json<SessionViewResponse>, AppError> {
    let view = session_service::close_session(&state, id, &player_id).await?;
    Ok(Json(view))
}
