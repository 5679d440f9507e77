//! Outbound transition records handed to the persistence and broadcast collaborators.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::{
    registry::PlayerId,
    sequencer::QuestionId,
    state_machine::{FinishReason, SessionPhase},
};

/// One accepted state transition of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTransition {
    /// Session the transition belongs to.
    pub session_id: Uuid,
    /// Per-session sequence number, starting at 1 and increasing by exactly one.
    pub seq: u64,
    /// When the transition was accepted.
    pub at: OffsetDateTime,
    /// What changed.
    pub kind: TransitionKind,
}

/// Transition payloads, carrying the before/after values of the fields they touch.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionKind {
    /// Session allocated in the lobby.
    SessionCreated {
        host_id: PlayerId,
        shelter_code: String,
        max_players: usize,
        max_distance_km: f64,
        expires_at: OffsetDateTime,
    },
    /// A player was admitted.
    PlayerJoined {
        player_id: PlayerId,
        display_name: String,
        player_count: usize,
    },
    /// Lobby readiness toggled.
    ReadyChanged {
        player_id: PlayerId,
        before: bool,
        after: bool,
    },
    /// A player left. `frozen_score` is set when history was kept.
    PlayerLeft {
        player_id: PlayerId,
        frozen_score: Option<u32>,
    },
    /// Heartbeat liveness flipped.
    LivenessChanged {
        player_id: PlayerId,
        active_before: bool,
        active_after: bool,
    },
    /// Lifecycle phase changed.
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
        reason: Option<FinishReason>,
        started_at: Option<OffsetDateTime>,
        ended_at: Option<OffsetDateTime>,
    },
    /// A correct answer moved a player forward.
    AnswerAccepted {
        player_id: PlayerId,
        question_id: QuestionId,
        cursor_before: usize,
        cursor_after: usize,
        score_before: u32,
        score_after: u32,
    },
    /// A player exhausted their sequence.
    PlayerFinished {
        player_id: PlayerId,
        score: u32,
        finished_at: OffsetDateTime,
    },
}

impl TransitionKind {
    /// Stable wire name of the transition kind.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::SessionCreated { .. } => "session_created",
            TransitionKind::PlayerJoined { .. } => "player_joined",
            TransitionKind::ReadyChanged { .. } => "ready_changed",
            TransitionKind::PlayerLeft { .. } => "player_left",
            TransitionKind::LivenessChanged { .. } => "liveness_changed",
            TransitionKind::PhaseChanged { .. } => "phase_changed",
            TransitionKind::AnswerAccepted { .. } => "answer_accepted",
            TransitionKind::PlayerFinished { .. } => "player_finished",
        }
    }
}

/// Sequence-number allocator owned by one session.
#[derive(Debug, Clone, Default)]
pub(crate) struct TransitionLog {
    last_seq: u64,
}

impl TransitionLog {
    pub(crate) fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub(crate) fn record(
        &mut self,
        session_id: Uuid,
        at: OffsetDateTime,
        kind: TransitionKind,
    ) -> SessionTransition {
        self.last_seq += 1;
        SessionTransition {
            session_id,
            seq: self.last_seq,
            at,
            kind,
        }
    }
}
