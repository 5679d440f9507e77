use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::format_time,
    state::{
        geofence::Coordinate,
        registry::Player,
        sequencer::{AnswerValue, ParamType, QuestionCategory, SequenceMode},
        session::{AnswerOutcome, PublicQuestion, SessionView},
        state_machine::{FinishReason, SessionPhase},
    },
};

/// Payload used to open a new session at a shelter.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Code of the shelter hosting the race, matched case-insensitively.
    #[validate(length(min = 1, max = 64))]
    pub shelter_code: String,
    /// Lobby capacity; the configured default applies when omitted.
    #[serde(default)]
    #[validate(range(min = 2, max = 64))]
    pub max_players: Option<usize>,
    /// Geofence radius in kilometres.
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0, max = 50.0))]
    pub max_distance_km: Option<f64>,
    /// Session lifetime in minutes.
    #[serde(default)]
    #[validate(range(min = 1, max = 1440))]
    pub ttl_minutes: Option<u32>,
    /// Restrict questions to these categories; empty means all.
    #[serde(default)]
    pub categories: Vec<QuestionCategory>,
    /// Shared or per-player question order.
    #[serde(default)]
    pub sequence_mode: Option<SequenceMode>,
    /// Questions each player must answer.
    #[serde(default)]
    #[validate(range(min = 1, max = 50))]
    pub questions_per_player: Option<usize>,
}

/// Reported device position.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema, Validate)]
pub struct PositionInput {
    /// Degrees north, in `[-90, 90]`.
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    /// Degrees east, in `[-180, 180]`.
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

impl From<PositionInput> for Coordinate {
    fn from(value: PositionInput) -> Self {
        Coordinate::new(value.latitude, value.longitude)
    }
}

/// Request to join a lobby.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Leaderboard name; the player id is used when omitted.
    #[serde(default)]
    #[validate(length(max = 40))]
    pub display_name: Option<String>,
    /// Where the player stands; must be inside the geofence.
    #[validate(nested)]
    pub position: PositionInput,
}

/// Request to toggle lobby readiness.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReadyRequest {
    /// New readiness flag.
    pub ready: bool,
}

/// Answer to the player's current question.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    /// Question being answered; must be the player's current one.
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    /// Number for numeric questions, option label for select questions.
    pub answer: AnswerValue,
    /// Position at submission time, checked for location questions.
    #[validate(nested)]
    pub position: PositionInput,
}

/// Snapshot of a session as seen by one player.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionViewResponse {
    /// Session identifier.
    pub id: Uuid,
    /// Shelter the race is anchored to.
    pub shelter: ShelterSummary,
    /// Player who created the session.
    pub host_id: String,
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// Lobby capacity.
    pub max_players: usize,
    /// Geofence radius in kilometres.
    pub max_distance_km: f64,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Deadline after which the session is forced to finish (RFC 3339).
    pub expires_at: String,
    /// When the race started (RFC 3339).
    pub started_at: Option<String>,
    /// When the race finished (RFC 3339).
    pub ended_at: Option<String>,
    /// Why the race finished.
    pub finish_reason: Option<FinishReason>,
    /// Last transition sequence number included in this snapshot.
    pub last_seq: u64,
    /// Players ranked by score.
    pub players: Vec<PlayerSummary>,
    /// The viewer's current question while racing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<QuestionPrompt>,
}

/// Shelter identity and location.
#[derive(Debug, Serialize, ToSchema)]
pub struct ShelterSummary {
    /// Shelter code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

/// Leaderboard row.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerSummary {
    /// 1-based position on the leaderboard.
    pub rank: usize,
    /// Player identifier.
    pub id: String,
    /// Leaderboard name.
    pub display_name: String,
    /// Lobby readiness.
    pub ready: bool,
    /// Whether the player heartbeated recently enough.
    pub active: bool,
    /// Whether the player left the session.
    pub left: bool,
    /// Points earned so far.
    pub score: u32,
    /// Questions answered correctly.
    pub answered: usize,
    /// Length of the player's sequence.
    pub total: usize,
    /// When the player answered their last question (RFC 3339).
    pub finished_at: Option<String>,
}

/// Question text and input kind; never carries the answer.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionPrompt {
    /// Question identifier to echo back when answering.
    pub id: String,
    /// 0-based position in the player's sequence.
    pub index: usize,
    /// Length of the player's sequence.
    pub total: usize,
    /// What the question is about.
    pub category: QuestionCategory,
    /// Expected answer kind.
    pub param_type: ParamType,
    /// Text shown to the player.
    pub prompt: String,
    /// Choices for select questions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Points awarded for a correct answer.
    pub points: u32,
}

/// Result of an answer submission plus the refreshed snapshot.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerResponse {
    /// Whether the answer was accepted.
    pub correct: bool,
    /// Player score after the submission.
    pub score: u32,
    /// Player cursor after the submission.
    pub cursor: usize,
    /// Whether the player has now answered every question.
    pub player_finished: bool,
    /// Session snapshot taken under the same lock.
    pub session: SessionViewResponse,
}

impl From<SessionView> for SessionViewResponse {
    fn from(view: SessionView) -> Self {
        Self {
            id: view.id,
            shelter: ShelterSummary {
                code: view.shelter_code,
                name: view.shelter_name,
                latitude: view.shelter_coordinate.latitude,
                longitude: view.shelter_coordinate.longitude,
            },
            host_id: view.host_id,
            phase: view.phase,
            max_players: view.max_players,
            max_distance_km: view.max_distance_km,
            created_at: format_time(view.created_at),
            expires_at: format_time(view.expires_at),
            started_at: view.started_at.map(format_time),
            ended_at: view.ended_at.map(format_time),
            finish_reason: view.finish_reason,
            last_seq: view.last_seq,
            players: view
                .leaderboard
                .into_iter()
                .enumerate()
                .map(|(index, player)| PlayerSummary::ranked(index + 1, player))
                .collect(),
            current_question: view.current_question.map(Into::into),
        }
    }
}

impl PlayerSummary {
    fn ranked(rank: usize, player: Player) -> Self {
        Self {
            rank,
            total: player.sequence.len(),
            answered: player.cursor,
            id: player.id,
            display_name: player.display_name,
            ready: player.ready,
            active: player.active,
            left: player.left,
            score: player.score,
            finished_at: player.finished_at.map(format_time),
        }
    }
}

impl From<PublicQuestion> for QuestionPrompt {
    fn from(question: PublicQuestion) -> Self {
        Self {
            id: question.id,
            index: question.index,
            total: question.total,
            category: question.category,
            param_type: question.param_type,
            prompt: question.prompt,
            options: question.options,
            points: question.points,
        }
    }
}

impl AnswerResponse {
    /// Combine an answer outcome with the snapshot taken under the same lock.
    pub fn new(outcome: &AnswerOutcome, view: SessionView) -> Self {
        Self {
            correct: outcome.correct,
            score: outcome.score,
            cursor: outcome.cursor,
            player_finished: outcome.player_finished,
            session: view.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_ranges_are_enforced() {
        let request: CreateSessionRequest = serde_json::from_str(
            r#"{ "shelter_code": "KOTO-01", "max_players": 1, "max_distance_km": 0.0 }"#,
        )
        .unwrap();
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("max_players"));
        assert!(fields.contains_key("max_distance_km"));
    }

    #[test]
    fn minimal_create_request_is_valid() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{ "shelter_code": "KOTO-01" }"#).unwrap();
        assert!(request.validate().is_ok());
        assert!(request.categories.is_empty());
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let request: JoinSessionRequest =
            serde_json::from_str(r#"{ "position": { "latitude": 91.0, "longitude": 0.0 } }"#)
                .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn answers_accept_numbers_and_options() {
        let numeric: SubmitAnswerRequest = serde_json::from_str(
            r#"{ "question_id": "q1", "answer": 120, "position": { "latitude": 0, "longitude": 0 } }"#,
        )
        .unwrap();
        assert_eq!(numeric.answer, AnswerValue::Number(120.0));

        let select: SubmitAnswerRequest = serde_json::from_str(
            r#"{ "question_id": "q2", "answer": "B", "position": { "latitude": 0, "longitude": 0 } }"#,
        )
        .unwrap();
        assert_eq!(select.answer, AnswerValue::Text("B".into()));
    }
}
