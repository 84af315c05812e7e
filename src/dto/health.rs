use serde::Serialize;
use utoipa::ToSchema;

/// Whether parties can currently be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Ok,
    /// No store is installed; every write is refused.
    Degraded,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the party store is reachable.
    pub status: StoreStatus,
    /// Parties currently loaded in this process.
    pub loaded_parties: usize,
}
