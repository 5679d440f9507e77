use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report coordinator load and whether the transition store answers.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let live_sessions = state.session_count();
    let outbox_pending = state.outbox().len().await;

    match state.store().health_check().await {
        Ok(()) if outbox_pending == 0 => HealthResponse::ok(live_sessions, outbox_pending),
        Ok(()) => {
            warn!(outbox_pending, "transition store reachable but retries are pending");
            HealthResponse::degraded(live_sessions, outbox_pending)
        }
        Err(err) => {
            warn!(error = %err, "transition store health check failed");
            HealthResponse::degraded(live_sessions, outbox_pending)
        }
    }
}
