//! Session aggregate: the single owner of one race's lobby, players, questions and lifecycle.
//!
//! Every operation validates all of its preconditions before the first mutation, so a
//! rejected action leaves the session untouched. Accepted actions return the transitions
//! they produced, numbered by the session's own sequence.

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::state::{
    error::SessionError,
    events::{SessionTransition, TransitionKind, TransitionLog},
    geofence::{self, Coordinate},
    registry::{Player, PlayerId, PlayerRegistry},
    sequencer::{
        AnswerValue, ExpectedAnswer, ParamType, Poi, Question, QuestionCategory, QuestionId,
        QuestionSequencer, SequencerSettings,
    },
    state_machine::{FinishReason, SessionEvent, SessionPhase, SessionStateMachine},
};

/// Home shelter of a session as supplied by the reference-data collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Shelter {
    /// Public shelter code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Geofence centre.
    pub coordinate: Coordinate,
    /// POIs in play, including the shelter itself.
    pub pois: Vec<Poi>,
}

/// Per-session limits, resolved from request overrides and process defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Lobby capacity, at least 2.
    pub max_players: usize,
    /// Geofence radius in kilometres, strictly positive.
    pub max_distance_km: f64,
    /// Session lifetime from creation.
    pub ttl: Duration,
    /// Heartbeat age after which a player is considered inactive.
    pub heartbeat_staleness: Duration,
    /// Sequencing options.
    pub sequencer: SequencerSettings,
}

impl SessionConfig {
    fn validate(&self) -> Result<(), SessionError> {
        if self.max_players < 2 {
            return Err(SessionError::InvalidConfig(format!(
                "max_players must be at least 2, got {}",
                self.max_players
            )));
        }
        if !self.max_distance_km.is_finite() || self.max_distance_km <= 0.0 {
            return Err(SessionError::InvalidConfig(format!(
                "max_distance_km must be positive, got {}",
                self.max_distance_km
            )));
        }
        if self.ttl <= Duration::ZERO {
            return Err(SessionError::InvalidConfig("ttl must be positive".into()));
        }
        if self.sequencer.questions_per_player == 0 {
            return Err(SessionError::InvalidConfig(
                "questions_per_player must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Question as shown to the player who must answer it; never carries ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicQuestion {
    /// Question id to echo back when answering.
    pub id: QuestionId,
    /// Zero-based position in the player's sequence.
    pub index: usize,
    /// Length of the player's sequence.
    pub total: usize,
    /// Category.
    pub category: QuestionCategory,
    /// Expected input kind.
    pub param_type: ParamType,
    /// Prompt text.
    pub prompt: String,
    /// Options for select questions.
    pub options: Vec<String>,
    /// Points on offer.
    pub points: u32,
}

/// Consistent snapshot of a session taken under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// Session identifier.
    pub id: Uuid,
    /// Code of the hosting shelter.
    pub shelter_code: String,
    /// Display name of the hosting shelter.
    pub shelter_name: String,
    /// Geofence centre.
    pub shelter_coordinate: Coordinate,
    /// Player who created the session.
    pub host_id: PlayerId,
    /// Lifecycle phase at snapshot time.
    pub phase: SessionPhase,
    /// Lobby capacity.
    pub max_players: usize,
    /// Geofence radius in kilometres.
    pub max_distance_km: f64,
    /// Creation time.
    pub created_at: OffsetDateTime,
    /// TTL deadline.
    pub expires_at: OffsetDateTime,
    /// Set when the race starts.
    pub started_at: Option<OffsetDateTime>,
    /// Set when the race finishes.
    pub ended_at: Option<OffsetDateTime>,
    /// Set together with `ended_at`.
    pub finish_reason: Option<FinishReason>,
    /// Sequence number of the latest transition.
    pub last_seq: u64,
    /// Players ranked for the leaderboard.
    pub leaderboard: Vec<Player>,
    /// The viewer's current question, when the viewer is racing.
    pub current_question: Option<PublicQuestion>,
}

/// Result of a processed answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    /// Whether the answer was correct.
    pub correct: bool,
    /// Player score after processing.
    pub score: u32,
    /// Player cursor after processing.
    pub cursor: usize,
    /// Whether the player has now answered everything.
    pub player_finished: bool,
    /// Transitions emitted (empty for incorrect answers).
    pub transitions: Vec<SessionTransition>,
}

/// One race session.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    shelter: Shelter,
    host_id: PlayerId,
    config: SessionConfig,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    started_at: Option<OffsetDateTime>,
    ended_at: Option<OffsetDateTime>,
    closed_at: Option<OffsetDateTime>,
    finish_reason: Option<FinishReason>,
    machine: SessionStateMachine,
    players: PlayerRegistry,
    sequencer: QuestionSequencer,
    log: TransitionLog,
}

impl Session {
    /// Allocate a session in the lobby. Fails with `InvalidConfig` on unusable limits.
    pub fn create(
        id: Uuid,
        host_id: PlayerId,
        shelter: Shelter,
        questions: Vec<Question>,
        config: SessionConfig,
        now: OffsetDateTime,
    ) -> Result<(Self, SessionTransition), SessionError> {
        config.validate()?;
        shelter.coordinate.validate()?;
        if host_id.trim().is_empty() {
            return Err(SessionError::InvalidConfig("host id must not be empty".into()));
        }

        let sequencer = QuestionSequencer::new(id, config.sequencer, shelter.pois.clone(), questions);
        let expires_at = now + config.ttl;

        let mut session = Self {
            id,
            shelter,
            host_id,
            config,
            created_at: now,
            expires_at,
            started_at: None,
            ended_at: None,
            closed_at: None,
            finish_reason: None,
            machine: SessionStateMachine::new(),
            players: PlayerRegistry::new(),
            sequencer,
            log: TransitionLog::default(),
        };

        let created = session.record(
            now,
            TransitionKind::SessionCreated {
                host_id: session.host_id.clone(),
                shelter_code: session.shelter.code.clone(),
                max_players: config.max_players,
                max_distance_km: config.max_distance_km,
                expires_at,
            },
        );
        Ok((session, created))
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    /// Host identity.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Expiry deadline.
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// When the session entered `finished`.
    pub fn ended_at(&self) -> Option<OffsetDateTime> {
        self.ended_at
    }

    /// When the session entered `closed`.
    pub fn closed_at(&self) -> Option<OffsetDateTime> {
        self.closed_at
    }

    /// Read access to the player table.
    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    /// Whether the TTL has elapsed at `now`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Admit a player standing within the shelter geofence.
    pub fn join(
        &mut self,
        player_id: &str,
        display_name: &str,
        coordinate: Coordinate,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        self.ensure_phase("join", SessionPhase::Lobby)?;
        coordinate.validate()?;
        if self.is_expired(now) {
            return Err(SessionError::SessionExpired(self.id));
        }
        if self.players.get(player_id).is_ok() {
            return Err(SessionError::DuplicateJoin(player_id.to_string()));
        }
        if self.players.count() >= self.config.max_players {
            return Err(SessionError::SessionFull {
                max_players: self.config.max_players,
            });
        }
        let admission = geofence::check(coordinate, self.shelter.coordinate, self.config.max_distance_km)?;
        if !admission.admitted {
            return Err(SessionError::OutOfRange {
                distance_km: admission.distance_km,
                radius_km: self.config.max_distance_km,
            });
        }

        let display_name = match display_name.trim() {
            "" => player_id.to_string(),
            name => name.to_string(),
        };
        self.players.add(Player::new(
            player_id.to_string(),
            self.id,
            display_name.clone(),
            now,
        ))?;

        Ok(vec![self.record(
            now,
            TransitionKind::PlayerJoined {
                player_id: player_id.to_string(),
                display_name,
                player_count: self.players.count(),
            },
        )])
    }

    /// Toggle lobby readiness; also counts as a heartbeat.
    pub fn set_ready(
        &mut self,
        player_id: &str,
        ready: bool,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        self.ensure_phase("set_ready", SessionPhase::Lobby)?;
        self.players.get(player_id)?;

        let mut transitions = self.touch(player_id, now)?;
        let before = self.players.set_ready(player_id, ready)?;
        if before != ready {
            transitions.push(self.record(
                now,
                TransitionKind::ReadyChanged {
                    player_id: player_id.to_string(),
                    before,
                    after: ready,
                },
            ));
        }
        Ok(transitions)
    }

    /// Start the race once every registered player is active and ready. Host only.
    pub fn start(
        &mut self,
        actor: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        self.ensure_phase("start", SessionPhase::Lobby)?;
        self.ensure_host(actor)?;
        if self.is_expired(now) {
            return Err(SessionError::SessionExpired(self.id));
        }
        if let Some(reason) = self.players.quorum_blocker() {
            return Err(SessionError::NotReadyToStart(reason));
        }
        if self.sequencer.bank_len() == 0 {
            return Err(SessionError::NotReadyToStart(
                "no questions are available for this shelter".into(),
            ));
        }

        let transition = self.transition(SessionEvent::Start, None, now)?;
        for player in self.players.list_mut() {
            player.sequence = self.sequencer.sequence_for(&player.id);
            player.cursor = 0;
        }
        Ok(vec![transition])
    }

    /// Check an answer to the player's current question.
    ///
    /// Incorrect answers are reported but change nothing; correct ones advance the cursor,
    /// add the question's points and may finish the player and then the race.
    pub fn submit_answer(
        &mut self,
        player_id: &str,
        question_id: &str,
        answer: &AnswerValue,
        coordinate: Coordinate,
        now: OffsetDateTime,
    ) -> Result<AnswerOutcome, SessionError> {
        self.ensure_phase("submit_answer", SessionPhase::Racing)?;
        coordinate.validate()?;

        let player = self.players.get(player_id)?;
        let current = player.current_question().cloned();
        if current.as_deref() != Some(question_id) {
            return Err(SessionError::StaleSubmission {
                submitted: question_id.to_string(),
                current,
            });
        }

        if let Some(target) = self.sequencer.location_target(question_id) {
            let admission = geofence::check(coordinate, target, self.config.max_distance_km)?;
            if !admission.admitted {
                return Err(SessionError::OutOfRange {
                    distance_km: admission.distance_km,
                    radius_km: self.config.max_distance_km,
                });
            }
        }

        if !self.sequencer.is_correct(question_id, answer) {
            return Ok(AnswerOutcome {
                correct: false,
                score: player.score,
                cursor: player.cursor,
                player_finished: player.is_finished(),
                transitions: Vec::new(),
            });
        }

        let points = self.sequencer.points_for(question_id);
        let mut transitions = self.touch(player_id, now)?;

        let player = self.players.get_mut(player_id)?;
        let cursor_before = player.cursor;
        let score_before = player.score;
        player.cursor += 1;
        player.score += points;
        player.answers.push(crate::state::registry::AnsweredQuestion {
            question_id: question_id.to_string(),
            correct: true,
            at: now,
        });
        let player_finished = player.cursor >= player.sequence.len();
        if player_finished {
            player.finished_at = Some(now);
        }
        let (cursor_after, score_after) = (player.cursor, player.score);

        transitions.push(self.record(
            now,
            TransitionKind::AnswerAccepted {
                player_id: player_id.to_string(),
                question_id: question_id.to_string(),
                cursor_before,
                cursor_after,
                score_before,
                score_after,
            },
        ));
        if player_finished {
            transitions.push(self.record(
                now,
                TransitionKind::PlayerFinished {
                    player_id: player_id.to_string(),
                    score: score_after,
                    finished_at: now,
                },
            ));
        }
        transitions.extend(self.finish_if_all_done(now)?);

        Ok(AnswerOutcome {
            correct: true,
            score: score_after,
            cursor: cursor_after,
            player_finished,
            transitions,
        })
    }

    /// Leave the session. Lobby members are removed; racers keep a frozen score. Nothing
    /// changes once the race has finished.
    pub fn leave(
        &mut self,
        player_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        self.ensure_not_closed()?;
        let player = self.players.get(player_id)?;
        if player.left || self.phase() == SessionPhase::Finished {
            return Ok(Vec::new());
        }

        let mut transitions = Vec::new();
        match self.phase() {
            SessionPhase::Lobby => {
                self.players.remove(player_id)?;
                transitions.push(self.record(
                    now,
                    TransitionKind::PlayerLeft {
                        player_id: player_id.to_string(),
                        frozen_score: None,
                    },
                ));
            }
            SessionPhase::Racing => {
                let score = self.players.retire(player_id)?;
                transitions.push(self.record(
                    now,
                    TransitionKind::PlayerLeft {
                        player_id: player_id.to_string(),
                        frozen_score: Some(score),
                    },
                ));
                transitions.extend(self.finish_if_all_done(now)?);
            }
            SessionPhase::Finished | SessionPhase::Closed => {}
        }
        Ok(transitions)
    }

    /// Record a heartbeat from a member. Ignored once the race has finished.
    pub fn heartbeat(
        &mut self,
        player_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        self.ensure_not_closed()?;
        if self.phase() == SessionPhase::Finished {
            self.players.get(player_id)?;
            return Ok(Vec::new());
        }
        self.touch(player_id, now)
    }

    /// Mark players with stale heartbeats inactive and re-check race completion.
    pub fn sweep_liveness(
        &mut self,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        if !matches!(self.phase(), SessionPhase::Lobby | SessionPhase::Racing) {
            return Ok(Vec::new());
        }

        let stale = self.players.mark_stale(now, self.config.heartbeat_staleness);
        let mut transitions: Vec<SessionTransition> = stale
            .into_iter()
            .map(|player_id| {
                self.record(
                    now,
                    TransitionKind::LivenessChanged {
                        player_id,
                        active_before: true,
                        active_after: false,
                    },
                )
            })
            .collect();
        if !transitions.is_empty() {
            transitions.extend(self.finish_if_all_done(now)?);
        }
        Ok(transitions)
    }

    /// Force the TTL: an expired lobby is abandoned, an expired race is finished.
    pub fn expire_if_due(
        &mut self,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        if !self.is_expired(now) {
            return Ok(Vec::new());
        }
        let transition = match self.phase() {
            SessionPhase::Lobby => {
                self.transition(SessionEvent::Abandon, Some(FinishReason::Expired), now)?
            }
            SessionPhase::Racing => self.transition(
                SessionEvent::Finish(FinishReason::Expired),
                Some(FinishReason::Expired),
                now,
            )?,
            SessionPhase::Finished | SessionPhase::Closed => return Ok(Vec::new()),
        };
        Ok(vec![transition])
    }

    /// Release a finished session. Closing a closed session is a no-op.
    pub fn close(&mut self, now: OffsetDateTime) -> Result<Vec<SessionTransition>, SessionError> {
        match self.phase() {
            SessionPhase::Closed => Ok(Vec::new()),
            _ => Ok(vec![self.transition(SessionEvent::Close, None, now)?]),
        }
    }

    /// Wind the session down from any phase on behalf of the host (or the coordinator).
    pub fn force_close(
        &mut self,
        reason: FinishReason,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        let mut transitions = Vec::new();
        match self.phase() {
            SessionPhase::Lobby => {
                transitions.push(self.transition(SessionEvent::Abandon, Some(reason), now)?)
            }
            SessionPhase::Racing => transitions.push(self.transition(
                SessionEvent::Finish(reason),
                Some(reason),
                now,
            )?),
            SessionPhase::Finished | SessionPhase::Closed => {}
        }
        transitions.extend(self.close(now)?);
        Ok(transitions)
    }

    /// Host-initiated stop and close.
    pub fn close_by_host(
        &mut self,
        actor: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        self.ensure_host(actor)?;
        self.force_close(FinishReason::HostStopped, now)
    }

    /// Snapshot for `viewer`, including their current question when racing.
    pub fn view(&self, viewer: Option<&str>) -> SessionView {
        let current_question = viewer
            .filter(|_| self.phase() == SessionPhase::Racing)
            .and_then(|id| self.players.get(id).ok())
            .and_then(|player| self.public_question(player));

        SessionView {
            id: self.id,
            shelter_code: self.shelter.code.clone(),
            shelter_name: self.shelter.name.clone(),
            shelter_coordinate: self.shelter.coordinate,
            host_id: self.host_id.clone(),
            phase: self.phase(),
            max_players: self.config.max_players,
            max_distance_km: self.config.max_distance_km,
            created_at: self.created_at,
            expires_at: self.expires_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            finish_reason: self.finish_reason,
            last_seq: self.log.last_seq(),
            leaderboard: self.players.leaderboard().into_iter().cloned().collect(),
            current_question,
        }
    }

    fn public_question(&self, player: &Player) -> Option<PublicQuestion> {
        let id = player.current_question()?;
        let question = self.sequencer.question(id)?;
        let options = match self.sequencer.answer_for(id)? {
            ExpectedAnswer::Select { options, .. } => options.clone(),
            ExpectedAnswer::Number { .. } => Vec::new(),
        };
        Some(PublicQuestion {
            id: question.id.clone(),
            index: player.cursor,
            total: player.sequence.len(),
            category: question.category,
            param_type: question.expected.param_type(),
            prompt: question.prompt.clone(),
            options,
            points: question.points,
        })
    }

    fn finish_if_all_done(
        &mut self,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        if self.phase() != SessionPhase::Racing || !self.players.all_racing_finished() {
            return Ok(Vec::new());
        }
        let transition = self.transition(
            SessionEvent::Finish(FinishReason::AllPlayersDone),
            Some(FinishReason::AllPlayersDone),
            now,
        )?;
        Ok(vec![transition])
    }

    fn touch(
        &mut self,
        player_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionTransition>, SessionError> {
        let revived = self.players.touch(player_id, now)?;
        if !revived {
            return Ok(Vec::new());
        }
        Ok(vec![self.record(
            now,
            TransitionKind::LivenessChanged {
                player_id: player_id.to_string(),
                active_before: false,
                active_after: true,
            },
        )])
    }

    fn transition(
        &mut self,
        event: SessionEvent,
        reason: Option<FinishReason>,
        now: OffsetDateTime,
    ) -> Result<SessionTransition, SessionError> {
        let plan = self.machine.plan(event)?;
        let to = self
            .machine
            .apply(plan)
            .map_err(|_| SessionError::InvalidPhase {
                operation: event.name(),
                phase: self.machine.phase(),
            })?;

        match to {
            SessionPhase::Racing => self.started_at = Some(now),
            SessionPhase::Finished => {
                self.ended_at = Some(now);
                self.finish_reason = reason;
            }
            SessionPhase::Closed => self.closed_at = Some(now),
            SessionPhase::Lobby => {}
        }

        Ok(self.record(
            now,
            TransitionKind::PhaseChanged {
                from: plan.from,
                to,
                reason,
                started_at: self.started_at,
                ended_at: self.ended_at,
            },
        ))
    }

    fn record(&mut self, at: OffsetDateTime, kind: TransitionKind) -> SessionTransition {
        self.log.record(self.id, at, kind)
    }

    fn ensure_not_closed(&self) -> Result<(), SessionError> {
        if self.phase() == SessionPhase::Closed {
            return Err(SessionError::SessionClosed(self.id));
        }
        Ok(())
    }

    fn ensure_phase(&self, operation: &'static str, expected: SessionPhase) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if self.finish_reason == Some(FinishReason::Expired) {
            return Err(SessionError::SessionExpired(self.id));
        }
        let phase = self.phase();
        if phase != expected {
            return Err(SessionError::InvalidPhase { operation, phase });
        }
        Ok(())
    }

    fn ensure_host(&self, actor: &str) -> Result<(), SessionError> {
        if actor != self.host_id {
            return Err(SessionError::NotHost(actor.to_string()));
        }
        Ok(())
    }
}
