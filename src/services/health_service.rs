use tracing::warn;

use crate::{
    dto::health::{HealthResponse, StoreStatus},
    state::SharedState,
};

/// Ping the party store and report whether parties can be saved.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.party_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "party store health check failed");
            }
        }
        None => warn!("no party store installed (degraded mode)"),
    }

    let status = if state.is_degraded().await {
        StoreStatus::Degraded
    } else {
        StoreStatus::Ok
    };
    HealthResponse {
        status,
        loaded_parties: state.loaded_parties(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::party_store::memory::MemoryPartyStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_without_a_store() {
        let state = AppState::new(AppConfig::default());
        let health = health_status(&state).await;
        assert_eq!(health.status, StoreStatus::Degraded);
        assert_eq!(health.loaded_parties, 0);
    }

    #[tokio::test]
    async fn reports_ok_with_a_store() {
        let state = AppState::builder(AppConfig::default())
            .store(Arc::new(MemoryPartyStore::new()))
            .build();
        assert_eq!(health_status(&state).await.status, StoreStatus::Ok);
    }
}
