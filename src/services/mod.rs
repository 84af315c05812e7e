/// Bonus category selection and winners.
pub mod bonus;
/// OpenAPI documentation generation.
pub mod documentation;
/// Mini-event trigger checks and resolution.
pub mod event_service;
/// Finale reveal director.
pub mod finale_service;
/// Health check service.
pub mod health_service;
/// Anonymous identity assignment.
pub mod identity;
/// Mini-event catalog and effects.
pub mod mini_events;
/// Party lifecycle and read-side queries.
pub mod party_service;
/// Per-viewer projections of a party.
pub mod projection;
/// Round weights and the song queue.
pub mod rounds;
/// Scoring and tie-break engine.
pub mod scoring;
/// Disconnect and reconnect handling.
pub mod session_service;
/// Party room SSE streams.
pub mod sse_service;
/// Party store connection supervisor.
pub mod storage_supervisor;
/// Fire-once party timers.
pub mod timers;
/// Vote casting and the playback loop.
pub mod vote_service;
/// Player WebSocket sessions.
pub mod websocket_service;

#[cfg(test)]
mod tests;
