use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Shelter Race Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::session_stream,
        crate::routes::sessions::create_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::join_session,
        crate::routes::sessions::set_ready,
        crate::routes::sessions::start_session,
        crate::routes::sessions::submit_answer,
        crate::routes::sessions::leave_session,
        crate::routes::sessions::heartbeat,
        crate::routes::sessions::close_session,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::PositionInput,
            crate::dto::session::ReadyRequest,
            crate::dto::session::SubmitAnswerRequest,
            crate::dto::session::SessionViewResponse,
            crate::dto::session::ShelterSummary,
            crate::dto::session::PlayerSummary,
            crate::dto::session::QuestionPrompt,
            crate::dto::session::AnswerResponse,
            crate::dto::sse::Handshake,
            crate::error::ErrorBody,
            crate::state::sequencer::QuestionCategory,
            crate::state::sequencer::ParamType,
            crate::state::sequencer::AnswerValue,
            crate::state::sequencer::SequenceMode,
            crate::state::state_machine::SessionPhase,
            crate::state::state_machine::FinishReason,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent transition streams"),
        (name = "sessions", description = "Session lifecycle and race actions"),
    )
)]
pub struct ApiDoc;
