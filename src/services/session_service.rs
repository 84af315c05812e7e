//! Session continuity: disconnect bookkeeping and the reconnection window.

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::{party::PartySnapshot, sse::PlayerStatusEvent},
    error::ServiceError,
    services::{party_service::load_handle, projection},
    state::{SharedState, party::ConnectionStatus, transitions::commit},
};

/// Transport for `player_id` went away.
///
/// `connection_id` names the socket that closed; if the player already attached a newer one the
/// call is ignored. Unknown, kicked or already disconnected players are left as they are.
pub async fn disconnect(
    state: &SharedState,
    party_id: Uuid,
    player_id: Uuid,
    connection_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    if connection_id.is_some() && !state.rooms().detach(player_id, connection_id) {
        debug!(player_id = %player_id, "socket was superseded; keeping player connected");
        return Ok(());
    }
    if connection_id.is_none() {
        state.rooms().detach(player_id, None);
    }

    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;
    let connected = runtime
        .session
        .players
        .get(&player_id)
        .is_some_and(|player| player.connection_status == ConnectionStatus::Connected);
    if !connected {
        return Ok(());
    }

    commit(state, &mut runtime, |staged| {
        let now = staged.now;
        if let Some(player) = staged.session.players.get_mut(&player_id) {
            player.connection_status = ConnectionStatus::Disconnected;
            player.disconnected_at = Some(now);
        }
        staged.notify_party(
            "player.disconnected",
            &PlayerStatusEvent {
                player_id,
                status: ConnectionStatus::Disconnected,
            },
        );
        Ok(())
    })
    .await?;

    info!(party_id = %party_id, player_id = %player_id, "player disconnected");
    Ok(())
}

/// Restore `player_id` and hand back a view of the party as it is now.
///
/// A connected player is simply authenticated again. A disconnected player must come back within
/// the reconnect window, otherwise the session has expired and they have to join again.
pub async fn reconnect(
    state: &SharedState,
    party_id: Uuid,
    player_id: Uuid,
) -> Result<PartySnapshot, ServiceError> {
    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    let status = runtime
        .session
        .players
        .get(&player_id)
        .map(|player| player.connection_status)
        .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}`")))?;
    match status {
        ConnectionStatus::Kicked => {
            return Err(ServiceError::Unauthorized("player was kicked".into()));
        }
        ConnectionStatus::Connected => {
            return projection::snapshot(&runtime.session, runtime.machine.phase(), player_id);
        }
        ConnectionStatus::Disconnected => {}
    }

    let window = state.config().reconnect_window();
    let snapshot = commit(state, &mut runtime, |staged| {
        let now = staged.now;
        let player = staged
            .session
            .players
            .get_mut(&player_id)
            .ok_or_else(|| ServiceError::NotFound(format!("player `{player_id}`")))?;
        let elapsed = player
            .disconnected_at
            .and_then(|at| now.duration_since(at).ok())
            .unwrap_or_default();
        if elapsed > window {
            return Err(ServiceError::SessionExpired);
        }
        player.connection_status = ConnectionStatus::Connected;
        player.disconnected_at = None;

        staged.notify_party(
            "player.reconnected",
            &PlayerStatusEvent {
                player_id,
                status: ConnectionStatus::Connected,
            },
        );
        projection::snapshot(&staged.session, staged.phase(), player_id)
    })
    .await;

    match &snapshot {
        Ok(_) => info!(party_id = %party_id, player_id = %player_id, "player reconnected"),
        Err(ServiceError::SessionExpired) => {
            info!(party_id = %party_id, player_id = %player_id, "reconnect window elapsed")
        }
        Err(_) => {}
    }
    snapshot
}
