/// OpenAPI document generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Background TTL reaper and heartbeat sweep.
pub mod reaper;
/// Inbound session actions.
pub mod session_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Forwarding of session transitions to the store and SSE subscribers.
pub mod transition_events;
