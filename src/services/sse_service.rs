use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    state::SharedState,
};

/// Subscribe to the events of one session, returning the receiver and the handshake event.
///
/// The subscription is taken before the snapshot so no transition after `last_seq` is missed.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, ServerEvent), ServiceError> {
    let receiver = state.sse().subscribe();
    let view = state.view(session_id, None).await?;
    let handshake = ServerEvent::json(
        Some(session_id),
        Some("handshake".to_string()),
        &Handshake {
            session_id,
            last_seq: view.last_seq,
            message: "session stream connected".into(),
        },
    )
    .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    Ok((receiver, handshake))
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a broadcast receiver into an SSE response for `session_id`, forwarding only that
/// session's events and cleaning up once the client disconnects.
pub fn to_sse_stream(
    session_id: Uuid,
    handshake: ServerEvent,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if tx.send(Ok(to_event(handshake))).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) if payload.is_for(session_id) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Clients resync from the snapshot's last_seq.
                            debug!(session_id = %session_id, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(session_id = %session_id, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
