pub mod clock;
pub mod error;
pub mod events;
pub mod geofence;
pub mod registry;
pub mod sequencer;
pub mod session;
mod sse;
pub mod state_machine;

use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use time::OffsetDateTime;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::timeout,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{reference::ReferenceData, transition_store::TransitionStore},
    services::transition_events::{self, Outbox},
};

pub use self::sse::SseHub;
use self::{
    clock::Clock,
    error::SessionError,
    events::{SessionTransition, TransitionKind},
    geofence::Coordinate,
    registry::PlayerId,
    sequencer::{AnswerValue, Question},
    session::{AnswerOutcome, Session, SessionConfig, SessionView, Shelter},
    state_machine::SessionPhase,
};

/// Coordinator handle shared by handlers and background tasks.
pub type SharedState = Arc<AppState>;

/// Broadcast channel capacity shared by every SSE subscriber.
const SSE_CAPACITY: usize = 256;

/// Counters describing one reap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Sessions forced to finish because their TTL elapsed.
    pub expired: usize,
    /// Sessions moved to `closed`.
    pub closed: usize,
    /// Closed sessions dropped after their retention window.
    pub evicted: usize,
    /// Players marked inactive by the heartbeat sweep.
    pub deactivated: usize,
    /// Sessions skipped because their lock could not be taken in time.
    pub busy: usize,
    /// Outbox transitions delivered on this pass.
    pub redelivered: usize,
    /// Outbox transitions still waiting.
    pub outbox_pending: usize,
}

/// Session coordinator: the process-wide table of live sessions.
///
/// Each session sits behind its own lock so actions on one session are serialized while
/// different sessions proceed in parallel. Map guards are never held across an `.await`.
pub struct AppState {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
    players: DashMap<PlayerId, Uuid>,
    store: Arc<dyn TransitionStore>,
    reference: Arc<dyn ReferenceData>,
    sse: SseHub,
    outbox: Arc<Outbox>,
    lock_timeout: Duration,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn TransitionStore>,
        reference: Arc<dyn ReferenceData>,
    ) -> SharedState {
        let lock_timeout = config.lock_timeout();
        Arc::new(Self {
            config,
            clock,
            sessions: DashMap::new(),
            players: DashMap::new(),
            store,
            reference,
            sse: SseHub::new(SSE_CAPACITY),
            outbox: Arc::new(Outbox::new()),
            lock_timeout,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Reference data collaborator.
    pub fn reference(&self) -> Arc<dyn ReferenceData> {
        self.reference.clone()
    }

    /// Transition store collaborator.
    pub fn store(&self) -> Arc<dyn TransitionStore> {
        self.store.clone()
    }

    /// Broadcast hub used for session event streams.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Queue of transitions awaiting redelivery.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Number of sessions held, including closed ones still in retention.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session the player is currently bound to, if any.
    pub fn player_session(&self, player_id: &str) -> Option<Uuid> {
        self.players.get(player_id).map(|entry| *entry.value())
    }

    /// Allocate a new session in the lobby.
    pub async fn create_session(
        &self,
        host_id: PlayerId,
        shelter: Shelter,
        questions: Vec<Question>,
        config: SessionConfig,
    ) -> Result<SessionView, SessionError> {
        let now = self.clock.now();
        let id = Uuid::new_v4();
        let (session, created) = Session::create(id, host_id.clone(), shelter, questions, config, now)?;
        let view = session.view(Some(&host_id));

        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        self.forward(std::slice::from_ref(&created));
        Ok(view)
    }

    /// Admit `player_id` into the lobby of session `id`.
    pub async fn join(
        &self,
        id: Uuid,
        player_id: &str,
        display_name: &str,
        coordinate: Coordinate,
    ) -> Result<SessionView, SessionError> {
        let reserved = self.reserve_player(player_id, id)?;
        let result = self
            .act(id, Some(player_id), |session, now| {
                session
                    .join(player_id, display_name, coordinate, now)
                    .map(|transitions| ((), transitions))
            })
            .await;

        if result.is_err() && reserved {
            self.players.remove_if(player_id, |_, session_id| *session_id == id);
        }
        result.map(|(_, view)| view)
    }

    /// Toggle lobby readiness.
    pub async fn set_ready(
        &self,
        id: Uuid,
        player_id: &str,
        ready: bool,
    ) -> Result<SessionView, SessionError> {
        self.act(id, Some(player_id), |session, now| {
            session
                .set_ready(player_id, ready, now)
                .map(|transitions| ((), transitions))
        })
        .await
        .map(|(_, view)| view)
    }

    /// Start the race on behalf of the host.
    pub async fn start(&self, id: Uuid, actor: &str) -> Result<SessionView, SessionError> {
        self.act(id, Some(actor), |session, now| {
            session.start(actor, now).map(|transitions| ((), transitions))
        })
        .await
        .map(|(_, view)| view)
    }

    /// Check an answer to the player's current question.
    pub async fn submit_answer(
        &self,
        id: Uuid,
        player_id: &str,
        question_id: &str,
        answer: &AnswerValue,
        coordinate: Coordinate,
    ) -> Result<(AnswerOutcome, SessionView), SessionError> {
        self.act(id, Some(player_id), |session, now| {
            let outcome = session.submit_answer(player_id, question_id, answer, coordinate, now)?;
            let transitions = outcome.transitions.clone();
            Ok((outcome, transitions))
        })
        .await
    }

    /// Leave the session.
    pub async fn leave(&self, id: Uuid, player_id: &str) -> Result<SessionView, SessionError> {
        self.act(id, Some(player_id), |session, now| {
            session.leave(player_id, now).map(|transitions| ((), transitions))
        })
        .await
        .map(|(_, view)| view)
    }

    /// Record a heartbeat.
    pub async fn heartbeat(&self, id: Uuid, player_id: &str) -> Result<SessionView, SessionError> {
        self.act(id, Some(player_id), |session, now| {
            session.heartbeat(player_id, now).map(|transitions| ((), transitions))
        })
        .await
        .map(|(_, view)| view)
    }

    /// Host-initiated close. Closing an already closed session succeeds without effect.
    pub async fn close(&self, id: Uuid, actor: &str) -> Result<SessionView, SessionError> {
        let mut session = self.lock(id).await?;
        let now = self.clock.now();
        let transitions = session.close_by_host(actor, now)?;
        self.settle(&session, &transitions);
        Ok(session.view(Some(actor)))
    }

    /// Consistent snapshot of a session, readable until it is evicted.
    pub async fn view(&self, id: Uuid, viewer: Option<&str>) -> Result<SessionView, SessionError> {
        let session = self.lock(id).await?;
        Ok(session.view(viewer))
    }

    /// One reaper pass: enforce TTLs, sweep heartbeats, close and evict after retention,
    /// then retry outbox deliveries if their backoff has elapsed.
    pub async fn reap(&self, now: OffsetDateTime) -> ReapReport {
        let mut report = ReapReport::default();
        let retention = self.config.retention();
        let handles: Vec<(Uuid, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut evict = Vec::new();
        for (id, handle) in handles {
            let Ok(mut session) = timeout(self.lock_timeout, handle.lock_owned()).await else {
                warn!(session_id = %id, "session busy; skipping this reap pass");
                report.busy += 1;
                continue;
            };

            match reap_session(&mut *session, now, retention, &mut report) {
                Ok(transitions) => self.settle(&session, &transitions),
                Err(err) => warn!(session_id = %id, error = %err, "reap failed; retrying next pass"),
            }

            let retained_until = session.closed_at().map(|closed| closed + retention);
            if retained_until.is_some_and(|until| until <= now) {
                evict.push(id);
            }
        }

        for id in evict {
            if self.sessions.remove(&id).is_some() {
                debug!(session_id = %id, "evicted closed session");
                report.evicted += 1;
            }
        }

        let retry_base = time::Duration::try_from(self.config.reaper_interval())
            .unwrap_or(time::Duration::MINUTE);
        let (redelivered, pending) = self
            .outbox
            .retry_due(self.store.as_ref(), now, retry_base)
            .await;
        report.redelivered = redelivered;
        report.outbox_pending = pending;
        report
    }

    /// Lock a session and run a mutating action under that lock.
    ///
    /// Overdue sessions are expired first, so a late action observes the expiry. Actions on
    /// closed sessions are rejected as unknown.
    async fn act<T, F>(
        &self,
        id: Uuid,
        viewer: Option<&str>,
        action: F,
    ) -> Result<(T, SessionView), SessionError>
    where
        F: FnOnce(&mut Session, OffsetDateTime) -> Result<(T, Vec<SessionTransition>), SessionError>,
    {
        let mut session = self.lock(id).await?;
        if session.phase() == SessionPhase::Closed {
            return Err(SessionError::SessionNotFound(id));
        }

        let now = self.clock.now();
        let mut transitions = session.expire_if_due(now)?;
        let result = action(&mut *session, now);
        match result {
            Ok((value, produced)) => {
                transitions.extend(produced);
                self.settle(&session, &transitions);
                Ok((value, session.view(viewer)))
            }
            Err(err) => {
                self.settle(&session, &transitions);
                Err(err)
            }
        }
    }

    async fn lock(&self, id: Uuid) -> Result<OwnedMutexGuard<Session>, SessionError> {
        let handle = self
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::SessionNotFound(id))?;
        timeout(self.lock_timeout, handle.lock_owned())
            .await
            .map_err(|_| SessionError::Busy(id))
    }

    /// Bind `player_id` to session `id`. Returns `true` when this call created the binding.
    fn reserve_player(&self, player_id: &str, id: Uuid) -> Result<bool, SessionError> {
        match self.players.entry(player_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current == id {
                    return Ok(false);
                }
                if self.sessions.contains_key(&current) {
                    return Err(SessionError::DuplicateJoin(player_id.to_string()));
                }
                entry.insert(id);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
                Ok(true)
            }
        }
    }

    /// Update the player index for `transitions`, then hand them to the forwarders.
    fn settle(&self, session: &Session, transitions: &[SessionTransition]) {
        let id = session.id();
        for transition in transitions {
            match &transition.kind {
                TransitionKind::PlayerLeft { player_id, .. } => {
                    self.players.remove_if(player_id, |_, bound| *bound == id);
                }
                TransitionKind::PhaseChanged {
                    to: SessionPhase::Finished | SessionPhase::Closed,
                    ..
                } => {
                    for player in session.players().list() {
                        self.players.remove_if(&player.id, |_, bound| *bound == id);
                    }
                }
                _ => {}
            }
        }
        self.forward(transitions);
    }

    fn forward(&self, transitions: &[SessionTransition]) {
        transition_events::forward(&self.sse, self.store.clone(), self.outbox.clone(), transitions);
    }
}

fn reap_session(
    session: &mut Session,
    now: OffsetDateTime,
    retention: time::Duration,
    report: &mut ReapReport,
) -> Result<Vec<SessionTransition>, SessionError> {
    let mut transitions = Vec::new();
    match session.phase() {
        SessionPhase::Lobby | SessionPhase::Racing if session.is_expired(now) => {
            transitions.extend(session.expire_if_due(now)?);
            transitions.extend(session.close(now)?);
            report.expired += 1;
            report.closed += 1;
        }
        SessionPhase::Lobby | SessionPhase::Racing => {
            let swept = session.sweep_liveness(now)?;
            report.deactivated += swept
                .iter()
                .filter(|transition| matches!(transition.kind, TransitionKind::LivenessChanged { .. }))
                .count();
            transitions.extend(swept);
        }
        SessionPhase::Finished => {
            if session.ended_at().is_some_and(|ended| ended + retention <= now) {
                transitions.extend(session.close(now)?);
                report.closed += 1;
            }
        }
        SessionPhase::Closed => {}
    }
    Ok(transitions)
}
