use serde::Serialize;
use uuid::Uuid;

use crate::{
    dto::format_time,
    state::{
        events::{SessionTransition, TransitionKind},
        state_machine::{FinishReason, SessionPhase},
    },
};

/// Wire form of one accepted transition, shared by the store and SSE clients.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    /// Session the transition belongs to.
    pub session_id: Uuid,
    /// Gap-free per-session sequence number, starting at 1.
    pub seq: u64,
    /// When the transition was applied (RFC 3339).
    pub at: String,
    /// Kind tag plus before/after data.
    #[serde(flatten)]
    pub change: TransitionChange,
}

/// Kind-tagged before/after payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TransitionChange {
    /// The session was opened.
    SessionCreated {
        /// Session host.
        host_id: String,
        /// Hosting shelter.
        shelter_code: String,
        /// Lobby capacity.
        max_players: usize,
        /// Geofence radius in kilometres.
        max_distance_km: f64,
        /// TTL deadline (RFC 3339).
        expires_at: String,
    },
    /// A player entered the lobby.
    PlayerJoined {
        /// Joining player.
        player_id: String,
        /// Leaderboard name.
        display_name: String,
        /// Players in the lobby after the join.
        player_count: usize,
    },
    /// A lobby readiness flag flipped.
    ReadyChanged {
        /// Player concerned.
        player_id: String,
        /// Previous flag.
        before: bool,
        /// New flag.
        after: bool,
    },
    /// A player left.
    PlayerLeft {
        /// Leaving player.
        player_id: String,
        /// Score kept on the leaderboard when leaving mid-race.
        #[serde(skip_serializing_if = "Option::is_none")]
        frozen_score: Option<u32>,
    },
    /// Heartbeat liveness flipped.
    LivenessChanged {
        /// Player concerned.
        player_id: String,
        /// Previous liveness.
        active_before: bool,
        /// New liveness.
        active_after: bool,
    },
    /// The lifecycle phase moved.
    PhaseChanged {
        /// Phase before the transition.
        from: SessionPhase,
        /// Phase after the transition.
        to: SessionPhase,
        /// Why the race ended, when it did.
        reason: Option<FinishReason>,
        /// Race start time (RFC 3339).
        started_at: Option<String>,
        /// Race end time (RFC 3339).
        ended_at: Option<String>,
    },
    /// A correct answer advanced a player.
    AnswerAccepted {
        /// Answering player.
        player_id: String,
        /// Question answered.
        question_id: String,
        /// Cursor before the answer.
        cursor_before: usize,
        /// Cursor after the answer.
        cursor_after: usize,
        /// Score before the answer.
        score_before: u32,
        /// Score after the answer.
        score_after: u32,
    },
    /// A player answered their last question.
    PlayerFinished {
        /// Finishing player.
        player_id: String,
        /// Final score.
        score: u32,
        /// Finish time (RFC 3339).
        finished_at: String,
    },
}

impl From<&SessionTransition> for TransitionEvent {
    fn from(transition: &SessionTransition) -> Self {
        let change = match &transition.kind {
            TransitionKind::SessionCreated {
                host_id,
                shelter_code,
                max_players,
                max_distance_km,
                expires_at,
            } => TransitionChange::SessionCreated {
                host_id: host_id.clone(),
                shelter_code: shelter_code.clone(),
                max_players: *max_players,
                max_distance_km: *max_distance_km,
                expires_at: format_time(*expires_at),
            },
            TransitionKind::PlayerJoined {
                player_id,
                display_name,
                player_count,
            } => TransitionChange::PlayerJoined {
                player_id: player_id.clone(),
                display_name: display_name.clone(),
                player_count: *player_count,
            },
            TransitionKind::ReadyChanged {
                player_id,
                before,
                after,
            } => TransitionChange::ReadyChanged {
                player_id: player_id.clone(),
                before: *before,
                after: *after,
            },
            TransitionKind::PlayerLeft {
                player_id,
                frozen_score,
            } => TransitionChange::PlayerLeft {
                player_id: player_id.clone(),
                frozen_score: *frozen_score,
            },
            TransitionKind::LivenessChanged {
                player_id,
                active_before,
                active_after,
            } => TransitionChange::LivenessChanged {
                player_id: player_id.clone(),
                active_before: *active_before,
                active_after: *active_after,
            },
            TransitionKind::PhaseChanged {
                from,
                to,
                reason,
                started_at,
                ended_at,
            } => TransitionChange::PhaseChanged {
                from: *from,
                to: *to,
                reason: *reason,
                started_at: started_at.map(format_time),
                ended_at: ended_at.map(format_time),
            },
            TransitionKind::AnswerAccepted {
                player_id,
                question_id,
                cursor_before,
                cursor_after,
                score_before,
                score_after,
            } => TransitionChange::AnswerAccepted {
                player_id: player_id.clone(),
                question_id: question_id.clone(),
                cursor_before: *cursor_before,
                cursor_after: *cursor_after,
                score_before: *score_before,
                score_after: *score_after,
            },
            TransitionKind::PlayerFinished {
                player_id,
                score,
                finished_at,
            } => TransitionChange::PlayerFinished {
                player_id: player_id.clone(),
                score: *score,
                finished_at: format_time(*finished_at),
            },
        };

        Self {
            session_id: transition.session_id,
            seq: transition.seq,
            at: format_time(transition.at),
            change,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    #[test]
    fn event_json_carries_kind_and_sequence() {
        let transition = SessionTransition {
            session_id: Uuid::nil(),
            seq: 7,
            at: OffsetDateTime::UNIX_EPOCH,
            kind: TransitionKind::ReadyChanged {
                player_id: "p1".into(),
                before: false,
                after: true,
            },
        };

        let json = serde_json::to_value(TransitionEvent::from(&transition)).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["kind"], "ready_changed");
        assert_eq!(json["at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["data"]["after"], true);
    }

    #[test]
    fn phase_change_serializes_reason_and_phases() {
        let transition = SessionTransition {
            session_id: Uuid::nil(),
            seq: 3,
            at: OffsetDateTime::UNIX_EPOCH,
            kind: TransitionKind::PhaseChanged {
                from: SessionPhase::Racing,
                to: SessionPhase::Finished,
                reason: Some(FinishReason::Expired),
                started_at: None,
                ended_at: Some(OffsetDateTime::UNIX_EPOCH),
            },
        };

        let json = serde_json::to_value(TransitionEvent::from(&transition)).unwrap();
        assert_eq!(json["data"]["from"], "racing");
        assert_eq!(json["data"]["to"], "finished");
        assert_eq!(json["data"]["reason"], "expired");
    }
}
