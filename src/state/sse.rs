use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::value::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Outbound fan-out used by the orchestrator. Delivery is fire-and-forget.
pub trait Notifier: Send + Sync {
    /// Deliver `event` to everyone following the party.
    fn notify_party(&self, party_id: Uuid, event: ServerEvent);
    /// Deliver `event` to a single player.
    fn notify_player(&self, player_id: Uuid, event: ServerEvent);
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[derive(Clone)]
/// Handle used to push messages to a connected player socket.
pub struct PlayerConnection {
    /// Distinguishes a socket from the ones that replaced it.
    pub connection_id: Uuid,
    /// Party the socket belongs to.
    pub party_id: Uuid,
    /// Writer task inbox.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// JSON frame written to player sockets.
#[derive(Serialize)]
struct SocketEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
    data: Value,
}

/// Party rooms: one SSE hub per party plus the live player sockets.
pub struct Rooms {
    hubs: DashMap<Uuid, SseHub>,
    players: DashMap<Uuid, PlayerConnection>,
    capacity: usize,
}

impl Rooms {
    /// Empty rooms; each party hub buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            players: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to a party's broadcast stream, opening the room if needed.
    pub fn subscribe(&self, party_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.hubs
            .entry(party_id)
            .or_insert_with(|| SseHub::new(self.capacity))
            .subscribe()
    }

    /// Register the socket of `player_id`, replacing any previous one.
    pub fn attach(&self, player_id: Uuid, connection: PlayerConnection) {
        if let Some(previous) = self.players.insert(player_id, connection) {
            let _ = previous.tx.send(Message::Close(None));
        }
    }

    /// Forget the socket of `player_id` if it is still `connection_id`.
    ///
    /// Returns whether a socket was removed. `None` removes whatever socket is attached.
    pub fn detach(&self, player_id: Uuid, connection_id: Option<Uuid>) -> bool {
        self.players
            .remove_if(&player_id, |_, current| {
                connection_id.is_none_or(|id| current.connection_id == id)
            })
            .is_some()
    }

    /// Close and forget the socket of `player_id`.
    pub fn close_player(&self, player_id: Uuid) {
        if let Some((_, connection)) = self.players.remove(&player_id) {
            let _ = connection.tx.send(Message::Close(None));
        }
    }

    /// Whether `player_id` has a live socket.
    pub fn is_attached(&self, player_id: Uuid) -> bool {
        self.players.contains_key(&player_id)
    }

    /// Close every socket of the party and drop its hub.
    pub fn close_party(&self, party_id: Uuid) {
        self.players.retain(|_, connection| {
            if connection.party_id == party_id {
                let _ = connection.tx.send(Message::Close(None));
                false
            } else {
                true
            }
        });
        self.hubs.remove(&party_id);
    }

    fn send_to_socket(&self, player_id: Uuid, connection: &PlayerConnection, event: &ServerEvent) {
        let data = match serde_json::from_str::<Value>(&event.data) {
            Ok(data) => data,
            Err(_) => Value::String(event.data.clone()),
        };
        let envelope = SocketEnvelope {
            event: event.event.as_deref(),
            data,
        };
        match serde_json::to_string(&envelope) {
            Ok(text) => {
                if connection.tx.send(Message::Text(text.into())).is_err() {
                    debug!(player_id = %player_id, "socket writer closed; dropping message");
                }
            }
            Err(err) => warn!(player_id = %player_id, error = %err, "failed to serialize socket frame"),
        }
    }
}

impl Notifier for Rooms {
    fn notify_party(&self, party_id: Uuid, event: ServerEvent) {
        for entry in self.players.iter() {
            if entry.party_id == party_id {
                self.send_to_socket(*entry.key(), entry.value(), &event);
            }
        }
        if let Some(hub) = self.hubs.get(&party_id) {
            hub.broadcast(event);
        }
    }

    fn notify_player(&self, player_id: Uuid, event: ServerEvent) {
        if let Some(connection) = self.players.get(&player_id) {
            self.send_to_socket(player_id, connection.value(), &event);
        }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::{Mutex, PoisonError};

    use uuid::Uuid;

    use super::Notifier;
    use crate::dto::sse::ServerEvent;

    /// Who a recorded event was sent to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Audience {
        Party(Uuid),
        Player(Uuid),
    }

    /// Notifier that keeps every event for later inspection.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(Audience, ServerEvent)>>,
    }

    impl RecordingNotifier {
        /// Names of every event sent so far, in order.
        pub fn names(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter_map(|(_, event)| event.event.clone())
                .collect()
        }

        /// Events named `name`, with their audience and decoded payload.
        pub fn named(&self, name: &str) -> Vec<(Audience, serde_json::Value)> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(_, event)| event.event.as_deref() == Some(name))
                .map(|(audience, event)| {
                    (
                        *audience,
                        serde_json::from_str(&event.data).unwrap_or_default(),
                    )
                })
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify_party(&self, party_id: Uuid, event: ServerEvent) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((Audience::Party(party_id), event));
        }

        fn notify_player(&self, player_id: Uuid, event: ServerEvent) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((Audience::Player(player_id), event));
        }
    }
}
