use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Sessions currently held by the coordinator.
    pub live_sessions: usize,
    /// Transitions waiting for a storage retry.
    pub outbox_pending: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(live_sessions: usize, outbox_pending: usize) -> Self {
        Self {
            status: "ok".to_string(),
            live_sessions,
            outbox_pending,
        }
    }

    /// Create a health response indicating the transition store is failing.
    pub fn degraded(live_sessions: usize, outbox_pending: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            live_sessions,
            outbox_pending,
        }
    }
}
