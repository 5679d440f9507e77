//! Inbound session actions: resolve collaborator data, apply configured defaults and hand
//! the action to the coordinator.

use time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::{AppConfig, heartbeat_staleness},
    dto::session::{
        AnswerResponse, CreateSessionRequest, JoinSessionRequest, SessionViewResponse,
        SubmitAnswerRequest,
    },
    error::ServiceError,
    state::{
        SharedState,
        sequencer::SequencerSettings,
        session::SessionConfig,
    },
};

/// Merge the request's overrides with the configured defaults.
pub fn resolve_session_config(config: &AppConfig, request: &CreateSessionRequest) -> SessionConfig {
    let ttl = request
        .ttl_minutes
        .map(|minutes| Duration::minutes(i64::from(minutes)))
        .unwrap_or_else(|| config.default_ttl());

    SessionConfig {
        max_players: request.max_players.unwrap_or(config.default_max_players),
        max_distance_km: request
            .max_distance_km
            .unwrap_or(config.default_max_distance_km),
        ttl,
        heartbeat_staleness: heartbeat_staleness(ttl),
        sequencer: SequencerSettings {
            mode: request.sequence_mode.unwrap_or(config.sequence_mode),
            questions_per_player: request
                .questions_per_player
                .unwrap_or(config.questions_per_player),
            relative_tolerance: config.relative_tolerance,
        },
    }
}

/// Open a session at the requested shelter with `host_id` as host.
pub async fn create_session(
    state: &SharedState,
    host_id: String,
    request: CreateSessionRequest,
) -> Result<SessionViewResponse, ServiceError> {
    let reference = state.reference();
    let shelter = reference
        .shelter_by_code(&request.shelter_code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("shelter `{}`", request.shelter_code)))?;
    let questions = reference
        .questions_for(&shelter.pois, &request.categories)
        .await?;
    let config = resolve_session_config(state.config(), &request);

    let question_count = questions.len();
    let view = state
        .create_session(host_id, shelter, questions, config)
        .await?;
    info!(
        session_id = %view.id,
        host_id = %view.host_id,
        shelter = %view.shelter_code,
        questions = question_count,
        "session created"
    );
    Ok(view.into())
}

/// Join a lobby.
pub async fn join_session(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
    request: JoinSessionRequest,
) -> Result<SessionViewResponse, ServiceError> {
    let display_name = request.display_name.unwrap_or_default();
    let view = state
        .join(session_id, player_id, &display_name, request.position.into())
        .await?;
    info!(session_id = %session_id, player_id, players = view.leaderboard.len(), "player joined");
    Ok(view.into())
}

/// Toggle lobby readiness.
pub async fn set_ready(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
    ready: bool,
) -> Result<SessionViewResponse, ServiceError> {
    let view = state.set_ready(session_id, player_id, ready).await?;
    debug!(session_id = %session_id, player_id, ready, "readiness updated");
    Ok(view.into())
}

/// Start the race.
pub async fn start_session(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
) -> Result<SessionViewResponse, ServiceError> {
    let view = state.start(session_id, player_id).await?;
    info!(session_id = %session_id, players = view.leaderboard.len(), "race started");
    Ok(view.into())
}

/// Submit an answer to the player's current question.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
    request: SubmitAnswerRequest,
) -> Result<AnswerResponse, ServiceError> {
    let (outcome, view) = state
        .submit_answer(
            session_id,
            player_id,
            &request.question_id,
            &request.answer,
            request.position.into(),
        )
        .await?;
    debug!(
        session_id = %session_id,
        player_id,
        question_id = %request.question_id,
        correct = outcome.correct,
        score = outcome.score,
        "answer checked"
    );
    Ok(AnswerResponse::new(&outcome, view))
}

/// Leave the session.
pub async fn leave_session(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
) -> Result<SessionViewResponse, ServiceError> {
    let view = state.leave(session_id, player_id).await?;
    info!(session_id = %session_id, player_id, "player left");
    Ok(view.into())
}

/// Record a heartbeat.
pub async fn heartbeat(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
) -> Result<SessionViewResponse, ServiceError> {
    Ok(state.heartbeat(session_id, player_id).await?.into())
}

/// Close the session on behalf of its host.
pub async fn close_session(
    state: &SharedState,
    session_id: Uuid,
    player_id: &str,
) -> Result<SessionViewResponse, ServiceError> {
    let view = state.close(session_id, player_id).await?;
    info!(session_id = %session_id, "session closed by host");
    Ok(view.into())
}

/// Snapshot of the session for `viewer`.
pub async fn session_view(
    state: &SharedState,
    session_id: Uuid,
    viewer: Option<&str>,
) -> Result<SessionViewResponse, ServiceError> {
    Ok(state.view(session_id, viewer).await?.into())
}
