use std::fmt;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle phases of a race session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Players gather at the shelter and mark themselves ready.
    Lobby,
    /// Players are answering their question sequences.
    Racing,
    /// Scores are final; the session is still readable.
    Finished,
    /// Terminal; no further mutation.
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::Lobby => "lobby",
            SessionPhase::Racing => "racing",
            SessionPhase::Finished => "finished",
            SessionPhase::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Why a race ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Every racing player exhausted their sequence.
    AllPlayersDone,
    /// The session TTL elapsed.
    Expired,
    /// The host stopped the race.
    HostStopped,
}

/// Events that move the lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Lobby quorum reached; the race begins.
    Start,
    /// The race is over.
    Finish(FinishReason),
    /// An expired or host-stopped lobby is wound down without racing.
    Abandon,
    /// Release the finished session.
    Close,
}

impl SessionEvent {
    /// Operation name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "start",
            SessionEvent::Finish(_) => "finish",
            SessionEvent::Abandon => "abandon",
            SessionEvent::Close => "close",
        }
    }
}

/// Error returned when an event cannot be applied in the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from}")]
pub struct InvalidTransition {
    /// Phase the machine was in.
    pub from: SessionPhase,
    /// Rejected event.
    pub event: SessionEvent,
}

/// Errors raised when applying a plan that no longer matches the machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The phase changed since the plan was made.
    #[error("phase changed since planning (expected {expected}, got {actual})")]
    PhaseMismatch {
        /// Phase when planned.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
    /// Another transition was applied since the plan was made.
    #[error("version changed since planning (expected {expected}, got {actual})")]
    VersionMismatch {
        /// Version the plan would produce.
        expected: u64,
        /// Version the machine would produce now.
        actual: u64,
    },
}

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Phase the plan starts from.
    pub from: SessionPhase,
    /// Phase the plan ends in.
    pub to: SessionPhase,
    /// Triggering event.
    pub event: SessionEvent,
    /// Version after applying.
    pub version_next: u64,
}

/// Read-only view of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase.
    pub phase: SessionPhase,
    /// Number of applied transitions.
    pub version: u64,
}

/// Explicit lifecycle state machine; timestamps are side effects of its transitions,
/// never the source of truth for the phase.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    version: u64,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Lobby,
            version: 0,
        }
    }
}

impl SessionStateMachine {
    /// Machine in the lobby phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Current phase and version.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
        }
    }

    /// Validate `event` against the transition table without mutating anything.
    pub fn plan(&self, event: SessionEvent) -> Result<Plan, InvalidTransition> {
        let to = Self::compute_transition(self.phase, event)?;
        Ok(Plan {
            from: self.phase,
            to,
            event,
            version_next: self.version + 1,
        })
    }

    /// Apply a plan produced by [`Self::plan`], returning the new phase.
    pub fn apply(&mut self, plan: Plan) -> Result<SessionPhase, ApplyError> {
        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        Ok(self.phase)
    }

    fn compute_transition(
        from: SessionPhase,
        event: SessionEvent,
    ) -> Result<SessionPhase, InvalidTransition> {
        let next = match (from, event) {
            (SessionPhase::Lobby, SessionEvent::Start) => SessionPhase::Racing,
            (SessionPhase::Lobby, SessionEvent::Abandon) => SessionPhase::Finished,
            (SessionPhase::Racing, SessionEvent::Finish(_)) => SessionPhase::Finished,
            (SessionPhase::Finished, SessionEvent::Close) => SessionPhase::Closed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan).unwrap()
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.snapshot(), Snapshot { phase: SessionPhase::Lobby, version: 0 });
    }

    #[test]
    fn full_race_walks_every_phase_in_order() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(apply(&mut sm, SessionEvent::Start), SessionPhase::Racing);
        assert_eq!(
            apply(&mut sm, SessionEvent::Finish(FinishReason::AllPlayersDone)),
            SessionPhase::Finished
        );
        assert_eq!(apply(&mut sm, SessionEvent::Close), SessionPhase::Closed);
        assert_eq!(sm.snapshot().version, 3);
    }

    #[test]
    fn abandoned_lobby_goes_to_finished() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(apply(&mut sm, SessionEvent::Abandon), SessionPhase::Finished);
    }

    #[test]
    fn skipping_or_going_back_is_rejected() {
        let mut sm = SessionStateMachine::new();
        for event in [SessionEvent::Finish(FinishReason::Expired), SessionEvent::Close] {
            let err = sm.plan(event).unwrap_err();
            assert_eq!(err, InvalidTransition { from: SessionPhase::Lobby, event });
        }

        apply(&mut sm, SessionEvent::Start);
        assert!(sm.plan(SessionEvent::Start).is_err());
        assert!(sm.plan(SessionEvent::Abandon).is_err());
        assert!(sm.plan(SessionEvent::Close).is_err());

        apply(&mut sm, SessionEvent::Finish(FinishReason::Expired));
        apply(&mut sm, SessionEvent::Close);
        for event in [
            SessionEvent::Start,
            SessionEvent::Abandon,
            SessionEvent::Finish(FinishReason::HostStopped),
            SessionEvent::Close,
        ] {
            assert!(sm.plan(event).is_err());
        }
    }

    #[test]
    fn stale_plan_is_not_applied() {
        let mut sm = SessionStateMachine::new();
        let stale = sm.plan(SessionEvent::Start).unwrap();
        apply(&mut sm, SessionEvent::Start);

        let err = sm.apply(stale).unwrap_err();
        assert_eq!(
            err,
            ApplyError::PhaseMismatch {
                expected: SessionPhase::Lobby,
                actual: SessionPhase::Racing
            }
        );
        assert_eq!(sm.phase(), SessionPhase::Racing);
    }
}
