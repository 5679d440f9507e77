use thiserror::Error;
use uuid::Uuid;

use crate::state::{
    geofence::InvalidCoordinate,
    registry::PlayerId,
    sequencer::QuestionId,
    state_machine::{InvalidTransition, SessionPhase},
};

/// Typed failures of a single session action.
///
/// Every variant is local to the action that produced it; none of them poison the session
/// or the coordinator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Session creation parameters are unusable.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    /// No live session with this id.
    #[error("session `{0}` not found")]
    SessionNotFound(Uuid),
    /// The session has been closed and accepts no further mutation.
    #[error("session `{0}` is closed")]
    SessionClosed(Uuid),
    /// The session's TTL has elapsed.
    #[error("session `{0}` has expired")]
    SessionExpired(Uuid),
    /// The lobby has no free slot.
    #[error("session is full ({max_players} players)")]
    SessionFull {
        /// Configured capacity.
        max_players: usize,
    },
    /// The reported position is outside the geofence.
    #[error("out of range: {distance_km:.3} km away, limit is {radius_km:.3} km")]
    OutOfRange {
        /// Distance from the fence centre.
        distance_km: f64,
        /// Fence radius.
        radius_km: f64,
    },
    /// The player is not a member of the session.
    #[error("player `{0}` is not part of this session")]
    UnknownPlayer(PlayerId),
    /// The player already belongs to this (or another live) session.
    #[error("player `{0}` already joined")]
    DuplicateJoin(PlayerId),
    /// Start preconditions are not met.
    #[error("not ready to start: {0}")]
    NotReadyToStart(String),
    /// Answer does not target the player's current question.
    #[error("stale submission for `{submitted}` (current: {current:?})")]
    StaleSubmission {
        /// Question the client answered.
        submitted: QuestionId,
        /// Question the player is actually on, if any.
        current: Option<QuestionId>,
    },
    /// Malformed client coordinate.
    #[error(transparent)]
    InvalidCoordinate(#[from] InvalidCoordinate),
    /// Operation not allowed in the current phase.
    #[error("`{operation}` is not allowed while {phase}")]
    InvalidPhase {
        /// Rejected operation.
        operation: &'static str,
        /// Phase the session was in.
        phase: SessionPhase,
    },
    /// Only the host may perform this action.
    #[error("player `{0}` is not the host")]
    NotHost(PlayerId),
    /// The session could not be locked within the configured bound.
    #[error("session `{0}` is busy, retry later")]
    Busy(Uuid),
}

impl From<InvalidTransition> for SessionError {
    fn from(err: InvalidTransition) -> Self {
        SessionError::InvalidPhase {
            operation: err.event.name(),
            phase: err.from,
        }
    }
}
