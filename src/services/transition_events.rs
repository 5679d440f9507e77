use std::{collections::VecDeque, sync::Arc};

use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    dao::{models::TransitionEntity, storage::StorageError, transition_store::TransitionStore},
    dto::{sse::ServerEvent, transition::TransitionEvent},
    state::{SseHub, events::SessionTransition},
};

/// Upper bound on the wait between two redelivery attempts.
const MAX_RETRY_DELAY: Duration = Duration::seconds(60);

/// When the next redelivery may run and how long the last wait was.
#[derive(Debug, Default)]
struct RetrySchedule {
    delay: Duration,
    next_at: Option<OffsetDateTime>,
}

/// Transitions whose persistence failed, waiting for the next reap pass.
#[derive(Default)]
pub struct Outbox {
    queue: Mutex<VecDeque<TransitionEntity>>,
    schedule: Mutex<RetrySchedule>,
}

impl Outbox {
    /// Empty outbox with no pending backoff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transition for redelivery.
    pub async fn push(&self, entity: TransitionEntity) {
        self.queue.lock().await.push_back(entity);
    }

    /// Number of transitions waiting for redelivery.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Whether nothing is waiting.
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Try to deliver every queued transition once. Returns `(delivered, still_pending)`.
    pub async fn retry(&self, store: &dyn TransitionStore) -> (usize, usize) {
        let batch: Vec<TransitionEntity> = self.queue.lock().await.drain(..).collect();
        if batch.is_empty() {
            return (0, 0);
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for entity in batch {
            match store.record(entity.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(
                        session_id = %entity.session_id,
                        seq = entity.seq,
                        error = %err,
                        "transition redelivery failed"
                    );
                    failed.push(entity);
                }
            }
        }

        let mut queue = self.queue.lock().await;
        for entity in failed.into_iter().rev() {
            queue.push_front(entity);
        }
        (delivered, queue.len())
    }

    /// Retry unless an earlier failed attempt scheduled the next one after `now`.
    ///
    /// A pass that delivers nothing while transitions remain doubles the wait, starting at
    /// `base` and capped at one minute; any progress resets it. Skipped passes report
    /// `(0, pending)`.
    pub async fn retry_due(
        &self,
        store: &dyn TransitionStore,
        now: OffsetDateTime,
        base: Duration,
    ) -> (usize, usize) {
        let mut schedule = self.schedule.lock().await;
        if schedule.next_at.is_some_and(|at| at > now) {
            return (0, self.len().await);
        }

        let (delivered, pending) = self.retry(store).await;
        if pending > 0 && delivered == 0 {
            schedule.delay = (schedule.delay * 2_i32)
                .max(base)
                .min(MAX_RETRY_DELAY.max(base));
            schedule.next_at = Some(now + schedule.delay);
            warn!(
                pending,
                retry_in_secs = schedule.delay.whole_seconds(),
                "transition store still failing; backing off redelivery"
            );
        } else {
            *schedule = RetrySchedule::default();
        }
        (delivered, pending)
    }
}

/// Serialise a transition into its durable record.
pub fn to_entity(transition: &SessionTransition) -> Result<TransitionEntity, StorageError> {
    let event = TransitionEvent::from(transition);
    let payload = serde_json::to_value(&event).map_err(|err| StorageError::Encoding {
        session_id: transition.session_id,
        seq: transition.seq,
        message: err.to_string(),
    })?;
    Ok(TransitionEntity {
        session_id: transition.session_id,
        seq: transition.seq,
        kind: transition.kind.name().to_string(),
        at: event.at,
        payload,
    })
}

/// Broadcast transitions to SSE subscribers in order, then persist them in the background.
///
/// Persistence failures land in the outbox; they never fail the action that produced them.
pub fn forward(
    hub: &SseHub,
    store: Arc<dyn TransitionStore>,
    outbox: Arc<Outbox>,
    transitions: &[SessionTransition],
) {
    if transitions.is_empty() {
        return;
    }

    let mut entities = Vec::with_capacity(transitions.len());
    for transition in transitions {
        let event = TransitionEvent::from(transition);
        match ServerEvent::json(
            Some(transition.session_id),
            Some(transition.kind.name().to_string()),
            &event,
        ) {
            Ok(server_event) => hub.broadcast(server_event),
            Err(err) => warn!(
                session_id = %transition.session_id,
                seq = transition.seq,
                error = %err,
                "failed to serialise transition for SSE"
            ),
        }

        match to_entity(transition) {
            Ok(entity) => entities.push(entity),
            Err(err) => warn!(error = %err, "dropping transition that cannot be encoded"),
        }
    }

    tokio::spawn(async move {
        for entity in entities {
            if let Err(err) = store.record(entity.clone()).await {
                warn!(
                    session_id = %entity.session_id,
                    seq = entity.seq,
                    error = %err,
                    "failed to persist transition; queued for retry"
                );
                outbox.push(entity).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::{
        dao::{storage::StorageResult, transition_store::MemoryTransitionStore},
        state::events::TransitionKind,
    };

    /// Fails the first `failures` calls, then delegates to memory.
    struct FlakyStore {
        failures: AtomicUsize,
        inner: MemoryTransitionStore,
    }

    impl TransitionStore for FlakyStore {
        fn record(&self, transition: TransitionEntity) -> BoxFuture<'static, StorageResult<()>> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Box::pin(async {
                    Err(StorageError::unavailable(
                        "offline".into(),
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

    fn transition(seq: u64) -> SessionTransition {
        SessionTransition {
            session_id: Uuid::nil(),
            seq,
            at: OffsetDateTime::UNIX_EPOCH,
            kind: TransitionKind::PlayerLeft {
                player_id: "p".into(),
                frozen_score: None,
            },
        }
    }

    #[test]
    fn entity_keeps_kind_and_sequence() {
        let entity = to_entity(&transition(4)).unwrap();
        assert_eq!(entity.kind, "player_left");
        assert_eq!(entity.seq, 4);
        assert_eq!(entity.payload["kind"], "player_left");
    }

    #[tokio::test]
    async fn retry_keeps_failures_queued_in_order() {
        let store = FlakyStore {
            failures: AtomicUsize::new(1),
            inner: MemoryTransitionStore::new(),
        };
        let outbox = Outbox::new();
        outbox.push(to_entity(&transition(1)).unwrap()).await;
        outbox.push(to_entity(&transition(2)).unwrap()).await;

        assert_eq!(outbox.retry(&store).await, (1, 1));
        assert_eq!(outbox.retry(&store).await, (1, 0));
        let seqs: Vec<u64> = store
            .inner
            .session_log(Uuid::nil())
            .await
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn failed_redelivery_waits_with_doubling_delay() {
        let store = FlakyStore {
            failures: AtomicUsize::new(3),
            inner: MemoryTransitionStore::new(),
        };
        let outbox = Outbox::new();
        outbox.push(to_entity(&transition(1)).unwrap()).await;
        let base = Duration::seconds(15);
        let t0 = OffsetDateTime::UNIX_EPOCH;

        assert_eq!(outbox.retry_due(&store, t0, base).await, (0, 1));
        // Within the first wait nothing is attempted.
        assert_eq!(outbox.retry_due(&store, t0 + Duration::seconds(10), base).await, (0, 1));
        assert_eq!(store.failures.load(Ordering::SeqCst), 2);

        let t1 = t0 + Duration::seconds(15);
        assert_eq!(outbox.retry_due(&store, t1, base).await, (0, 1));
        // Second failure doubles the wait to 30s.
        assert_eq!(outbox.retry_due(&store, t1 + Duration::seconds(20), base).await, (0, 1));
        assert_eq!(store.failures.load(Ordering::SeqCst), 1);

        let t2 = t1 + Duration::seconds(30);
        assert_eq!(outbox.retry_due(&store, t2, base).await, (0, 1));
        let t3 = t2 + Duration::seconds(60);
        assert_eq!(outbox.retry_due(&store, t3, base).await, (1, 0));

        // Progress reset the schedule, so the next pass retries straight away.
        outbox.push(to_entity(&transition(2)).unwrap()).await;
        assert_eq!(outbox.retry_due(&store, t3, base).await, (1, 0));
    }
}
