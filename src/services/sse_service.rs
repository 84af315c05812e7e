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
    services::party_service::load_handle,
    state::SharedState,
};

/// Subscribe to a party room. The returned handshake is the first event the client sees.
pub async fn subscribe_party(
    state: &SharedState,
    party_id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, ServerEvent), ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let phase = {
        let runtime = handle.lock().await;
        if runtime.closed {
            return Err(ServiceError::NotFound(format!("party `{party_id}`")));
        }
        runtime.machine.phase()
    };

    let receiver = state.rooms().subscribe(party_id);
    let handshake = ServerEvent::json(
        Some("handshake".to_string()),
        &Handshake {
            party_id,
            message: "subscribed to party events".to_string(),
            degraded: state.is_degraded().await,
            phase,
        },
    )
    .map_err(|err| ServiceError::InvalidState(format!("failed to encode handshake: {err}")))?;
    Ok((receiver, handshake))
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a party room subscription into an SSE response, starting with `handshake`.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    handshake: ServerEvent,
    party_id: Uuid,
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
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        // The room closes when the party is deleted.
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(party_id = %party_id, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }
        info!(party_id = %party_id, "party SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
