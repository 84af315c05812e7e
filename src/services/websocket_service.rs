use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{PlayerInboundMessage, SocketError},
    error::ServiceError,
    services::{
        session_service,
        vote_service::{self, NewVote},
    },
    state::{PlayerConnection, SharedState},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while serving an identified player socket.
#[derive(Debug, Error)]
enum SocketFailure {
    /// Writer channel closed; the connection is gone.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Serialize)]
struct Frame<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Who is behind an identified socket.
#[derive(Debug, Clone, Copy)]
struct Seat {
    party_id: Uuid,
    player_id: Uuid,
    connection_id: Uuid,
}

/// Serve one player socket: identify, restore the session, then relay votes until it closes.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Ok(PlayerInboundMessage::Identify {
        party_id,
        player_id,
    }) = PlayerInboundMessage::from_json_str(&initial_message)
    else {
        warn!("first message was not a valid identification");
        let _ = send_error(&outbound_tx, "the first message must identify the player");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let snapshot = match session_service::reconnect(&state, party_id, player_id).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            info!(party_id = %party_id, player_id = %player_id, error = %err, "socket session refused");
            let _ = send_error(&outbound_tx, &err.to_string());
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let seat = Seat {
        party_id,
        player_id,
        connection_id: Uuid::new_v4(),
    };
    state.rooms().attach(
        player_id,
        PlayerConnection {
            connection_id: seat.connection_id,
            party_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(party_id = %party_id, player_id = %player_id, "player socket attached");

    if send_frame(&outbound_tx, "session.snapshot", &snapshot).is_ok() {
        serve(&state, seat, &mut receiver, &outbound_tx).await;
    }

    if let Err(err) =
        session_service::disconnect(&state, party_id, player_id, Some(seat.connection_id)).await
    {
        warn!(party_id = %party_id, player_id = %player_id, error = %err, "failed to record disconnect");
    }
    finalize(writer_task, outbound_tx).await;
}

async fn serve(
    state: &SharedState,
    seat: Seat,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(player_id = %seat.player_id, payload = %text, "received player message");
                let result = match PlayerInboundMessage::from_json_str(&text) {
                    Ok(message) => handle_message(state, seat, message, outbound_tx).await,
                    Err(err) => send_error(outbound_tx, &err.to_string()),
                };
                match result {
                    Ok(()) => {}
                    Err(SocketFailure::ConnectionClosed) => break,
                    Err(SocketFailure::Service(err)) => {
                        if send_error(outbound_tx, &err.to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(player_id = %seat.player_id, "player socket closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(player_id = %seat.player_id, error = %err, "websocket error");
                break;
            }
        }
    }
}

async fn handle_message(
    state: &SharedState,
    seat: Seat,
    message: PlayerInboundMessage,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), SocketFailure> {
    match message {
        PlayerInboundMessage::Vote {
            song_id,
            rating,
            super_vote,
            comment,
        } => {
            let receipt = vote_service::cast_vote(
                state,
                seat.party_id,
                seat.player_id,
                NewVote {
                    song_id,
                    rating,
                    super_vote,
                    comment,
                },
            )
            .await?;
            send_frame(outbound_tx, "vote.receipt", &receipt)
        }
        PlayerInboundMessage::Identify { .. } => {
            warn!(player_id = %seat.player_id, "ignoring duplicate identification message");
            Ok(())
        }
        PlayerInboundMessage::Unknown => send_error(outbound_tx, "unsupported message type"),
    }
}

fn send_frame<T: Serialize>(
    tx: &mpsc::UnboundedSender<Message>,
    event: &str,
    data: &T,
) -> Result<(), SocketFailure> {
    let payload = match serde_json::to_string(&Frame { event, data }) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(event, error = %err, "failed to serialize socket frame");
            return Ok(());
        }
    };
    tx.send(Message::Text(payload.into()))
        .map_err(|_| SocketFailure::ConnectionClosed)
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, message: &str) -> Result<(), SocketFailure> {
    send_frame(
        tx,
        "error",
        &SocketError {
            message: message.to_string(),
        },
    )
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
