use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// Session the event belongs to; `None` for process-wide notices.
    pub session_id: Option<Uuid>,
    /// SSE event name, e.g. the transition kind.
    pub event: Option<String>,
    /// Serialised JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(session_id: Option<Uuid>, event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            session_id,
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Whether a stream subscribed to `session_id` should forward this event.
    pub fn is_for(&self, session_id: Uuid) -> bool {
        self.session_id.is_none_or(|id| id == session_id)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Session the stream is bound to.
    pub session_id: Uuid,
    /// Last transition sequence number at subscription time.
    pub last_seq: u64,
    /// Human-readable message confirming the subscription.
    pub message: String,
}
