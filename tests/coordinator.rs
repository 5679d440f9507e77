use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::{BoxFuture, join_all};
use time::{Duration, OffsetDateTime};

use shelter_race_back::{
    config::AppConfig,
    dao::{
        models::TransitionEntity,
        reference::{JsonReferenceData, ReferenceData},
        storage::{StorageError, StorageResult},
        transition_store::{MemoryTransitionStore, TransitionStore},
    },
    state::{
        AppState, SharedState,
        clock::ManualClock,
        error::SessionError,
        geofence::Coordinate,
        sequencer::{AnswerValue, SequenceMode, SequencerSettings},
        session::{SessionConfig, Shelter},
        state_machine::{FinishReason, SessionPhase},
    },
};

const REFERENCE: &str = r#"{
    "shelters": [{
        "code": "KOTO-01",
        "name": "Koto Ward Shelter",
        "latitude": 35.67,
        "longitude": 139.81,
        "facts": { "capacity": 350 },
        "pois": [{
            "id": "school-1",
            "kind": "school",
            "latitude": 35.672,
            "longitude": 139.812,
            "facts": { "capacity": 120 }
        }]
    }]
}"#;

fn start() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::days(20_000)
}

/// Store that fails every write while `offline` is set.
#[derive(Default)]
struct SwitchableStore {
    offline: AtomicBool,
    inner: MemoryTransitionStore,
}

impl TransitionStore for SwitchableStore {
    fn record(&self, transition: TransitionEntity) -> BoxFuture<'static, StorageResult<()>> {
        if self.offline.load(Ordering::SeqCst) {
            return Box::pin(async {
                Err(StorageError::unavailable(
                    "store offline".into(),
                    std::io::Error::other("offline"),
                ))
            });
        }
        self.inner.record(transition)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct Harness {
    state: SharedState,
    clock: Arc<ManualClock>,
    store: Arc<SwitchableStore>,
    reference: JsonReferenceData,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(SwitchableStore::default());
    let reference = JsonReferenceData::from_json(REFERENCE).unwrap();
    let state = AppState::new(
        AppConfig::default(),
        clock.clone(),
        store.clone(),
        Arc::new(reference.clone()),
    );
    Harness {
        state,
        clock,
        store,
        reference,
    }
}

fn session_config(max_players: usize) -> SessionConfig {
    SessionConfig {
        max_players,
        max_distance_km: 1.0,
        ttl: Duration::minutes(30),
        heartbeat_staleness: Duration::minutes(3),
        sequencer: SequencerSettings {
            mode: SequenceMode::Shared,
            questions_per_player: 2,
            relative_tolerance: 0.0,
        },
    }
}

fn near_shelter() -> Coordinate {
    Coordinate::new(35.671, 139.81)
}

impl Harness {
    async fn shelter(&self) -> Shelter {
        self.reference.shelter_by_code("koto-01").await.unwrap().unwrap()
    }

    async fn create(&self, host: &str, max_players: usize) -> uuid::Uuid {
        let shelter = self.shelter().await;
        let questions = self.reference.questions_for(&shelter.pois, &[]).await.unwrap();
        let view = self
            .state
            .create_session(host.into(), shelter, questions, session_config(max_players))
            .await
            .unwrap();
        view.id
    }

    async fn settle_writes(&self, expected: usize) {
        for _ in 0..200 {
            if self.store.inner.len().await >= expected {
                return;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn race_finishes_once_every_player_is_done() {
    let h = harness();
    let id = h.create("host", 4).await;

    for player in ["host", "guest"] {
        h.state.join(id, player, player, near_shelter()).await.unwrap();
        h.state.set_ready(id, player, true).await.unwrap();
    }
    let started = h.state.start(id, "host").await.unwrap();
    assert_eq!(started.phase, SessionPhase::Racing);

    let answers: HashMap<&str, f64> =
        HashMap::from([("KOTO-01:capacity", 350.0), ("school-1:capacity", 120.0)]);
    let mut last_view = started;
    for player in ["host", "guest"] {
        for _ in 0..2 {
            let view = h.state.view(id, Some(player)).await.unwrap();
            let question = view.current_question.expect("racing player has a question");
            let expected = answers[question.id.as_str()];
            let (outcome, view) = h
                .state
                .submit_answer(id, player, &question.id, &AnswerValue::Number(expected), near_shelter())
                .await
                .unwrap();
            assert!(outcome.correct);
            last_view = view;
        }
    }

    assert_eq!(last_view.phase, SessionPhase::Finished);
    assert_eq!(last_view.finish_reason, Some(FinishReason::AllPlayersDone));
    assert!(last_view.leaderboard.iter().all(|player| player.score == 2));
    assert_eq!(h.state.player_session("host"), None);

    let expected_seq = last_view.last_seq as usize;
    h.settle_writes(expected_seq).await;
    let log = h.store.inner.session_log(id).await;
    let seqs: Vec<u64> = log.iter().map(|entity| entity.seq).collect();
    assert_eq!(seqs, (1..=last_view.last_seq).collect::<Vec<_>>());
    assert_eq!(log[0].kind, "session_created");
}

#[tokio::test]
async fn concurrent_joins_never_exceed_capacity() {
    let h = harness();
    let id = h.create("host", 4).await;

    let joins = (0..10).map(|index| {
        let state = h.state.clone();
        async move {
            let player = format!("player-{index}");
            state.join(id, &player, "", near_shelter()).await
        }
    });
    let results = join_all(joins).await;

    let admitted = results.iter().filter(|result| result.is_ok()).count();
    let full = results
        .iter()
        .filter(|result| matches!(result, Err(SessionError::SessionFull { max_players: 4 })))
        .count();
    assert_eq!(admitted, 4);
    assert_eq!(full, 6);

    let view = h.state.view(id, None).await.unwrap();
    assert_eq!(view.leaderboard.len(), 4);
    assert_eq!(view.last_seq, 5);
}

#[tokio::test]
async fn player_cannot_join_two_live_sessions() {
    let h = harness();
    let first = h.create("host-a", 4).await;
    let second = h.create("host-b", 4).await;

    h.state.join(first, "alice", "Alice", near_shelter()).await.unwrap();
    let err = h
        .state
        .join(second, "alice", "Alice", near_shelter())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateJoin(player) if player == "alice"));
    assert_eq!(h.state.player_session("alice"), Some(first));

    h.state.leave(first, "alice").await.unwrap();
    h.state.join(second, "alice", "Alice", near_shelter()).await.unwrap();
    assert_eq!(h.state.player_session("alice"), Some(second));
}

#[tokio::test]
async fn rejected_join_releases_the_player() {
    let h = harness();
    let id = h.create("host", 4).await;

    let far = Coordinate::new(35.70, 139.81);
    let err = h.state.join(id, "alice", "Alice", far).await.unwrap_err();
    assert!(matches!(err, SessionError::OutOfRange { .. }));
    assert_eq!(h.state.player_session("alice"), None);
}

#[tokio::test]
async fn reaper_expires_closes_then_evicts() {
    let h = harness();
    let id = h.create("host", 4).await;
    h.state.join(id, "alice", "Alice", near_shelter()).await.unwrap();

    h.clock.advance(Duration::minutes(31));
    let report = h.state.reap(h.state.now()).await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(report.evicted, 0);

    let view = h.state.view(id, None).await.unwrap();
    assert_eq!(view.phase, SessionPhase::Closed);
    assert_eq!(view.finish_reason, Some(FinishReason::Expired));
    assert_eq!(h.state.player_session("alice"), None);

    let err = h.state.heartbeat(id, "alice").await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(found) if found == id));

    h.clock.advance(Duration::seconds(300));
    let report = h.state.reap(h.state.now()).await;
    assert_eq!(report.evicted, 1);
    assert_eq!(h.state.session_count(), 0);
    assert!(matches!(
        h.state.view(id, None).await,
        Err(SessionError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn late_action_observes_expiry() {
    let h = harness();
    let id = h.create("host", 4).await;

    h.clock.advance(Duration::minutes(31));
    let err = h
        .state
        .join(id, "alice", "Alice", near_shelter())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionExpired(found) if found == id));

    let view = h.state.view(id, None).await.unwrap();
    assert_eq!(view.phase, SessionPhase::Finished);
    assert_eq!(view.finish_reason, Some(FinishReason::Expired));
}

#[tokio::test]
async fn failed_writes_are_redelivered_by_the_reaper() {
    let h = harness();
    h.store.offline.store(true, Ordering::SeqCst);
    let id = h.create("host", 4).await;
    h.state.join(id, "alice", "Alice", near_shelter()).await.unwrap();

    for _ in 0..200 {
        if h.state.outbox().len().await == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.state.outbox().len().await, 2);
    assert!(h.store.inner.is_empty().await);

    let report = h.state.reap(h.state.now()).await;
    assert_eq!(report.redelivered, 0);
    assert_eq!(report.outbox_pending, 2);

    h.store.offline.store(false, Ordering::SeqCst);
    let report = h.state.reap(h.state.now()).await;
    assert_eq!(report.redelivered, 0, "redelivery waits out its backoff");
    assert_eq!(report.outbox_pending, 2);

    h.clock.advance(Duration::seconds(15));
    let report = h.state.reap(h.state.now()).await;
    assert_eq!(report.redelivered, 2);
    assert_eq!(report.outbox_pending, 0);

    let seqs: Vec<u64> = h
        .store
        .inner
        .session_log(id)
        .await
        .iter()
        .map(|entity| entity.seq)
        .collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[tokio::test]
async fn failing_store_does_not_delay_expiry() {
    let h = harness();
    h.store.offline.store(true, Ordering::SeqCst);
    let id = h.create("host", 4).await;
    h.state.join(id, "alice", "Alice", near_shelter()).await.unwrap();
    for _ in 0..200 {
        if h.state.outbox().len().await == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }

    for _ in 0..5 {
        let report = h.state.reap(h.state.now()).await;
        assert_eq!(report.expired, 0);
        assert!(report.outbox_pending >= 2);
        h.clock.advance(Duration::seconds(15));
    }

    h.clock.advance(Duration::minutes(30));
    let report = h.state.reap(h.state.now()).await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(report.redelivered, 0);

    let view = h.state.view(id, None).await.unwrap();
    assert_eq!(view.phase, SessionPhase::Closed);
    assert_eq!(view.finish_reason, Some(FinishReason::Expired));
}

#[tokio::test]
async fn host_close_is_idempotent_and_blocks_further_actions() {
    let h = harness();
    let id = h.create("host", 4).await;
    h.state.join(id, "alice", "Alice", near_shelter()).await.unwrap();

    let err = h.state.close(id, "alice").await.unwrap_err();
    assert!(matches!(err, SessionError::NotHost(_)));

    let closed = h.state.close(id, "host").await.unwrap();
    assert_eq!(closed.phase, SessionPhase::Closed);
    assert_eq!(closed.finish_reason, Some(FinishReason::HostStopped));
    let again = h.state.close(id, "host").await.unwrap();
    assert_eq!(again.last_seq, closed.last_seq);

    let err = h.state.set_ready(id, "alice", true).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));
    assert_eq!(h.state.player_session("alice"), None);
}
