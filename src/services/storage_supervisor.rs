use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{party_store::PartyStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a party store connected, holding the app in degraded mode while it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn PartyStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_party_store(store.clone()).await;
                info!("party store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded().await {
                                info!("party store healthy again; leaving degraded mode");
                                state.update_degraded(false).await;
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(_) => {
                            let mut attempt = 0;
                            let mut reconnect_delay = INITIAL_DELAY;
                            let mut reconnected = false;

                            while attempt < MAX_RECONNECT_ATTEMPTS {
                                match store.try_reconnect().await {
                                    Ok(()) => {
                                        info!("party store reconnected after failed health check");
                                        reconnected = true;
                                        break;
                                    }
                                    Err(reconnect_err) => {
                                        if attempt == 0 {
                                            warn!(
                                                attempt, error = %reconnect_err,
                                                "party store reconnect failed; entering degraded mode"
                                            );
                                            state.update_degraded(true).await;
                                        } else {
                                            warn!(attempt, error = %reconnect_err, "party store reconnect attempt failed");
                                        };
                                        attempt += 1;
                                        sleep(reconnect_delay).await;
                                        reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                                    }
                                }
                            }

                            if reconnected {
                                state.update_degraded(false).await;
                                sleep(HEALTH_POLL_INTERVAL).await;
                            } else {
                                warn!("party store unreachable; dropping it until a fresh connection succeeds");
                                state.clear_party_store().await;
                                break;
                            }
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "party store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::{config::AppConfig, dao::party_store::memory::MemoryPartyStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn leaves_degraded_mode_once_a_store_connects() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded().await);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StorageError::unavailable(
                        "first connect fails".into(),
                        io::Error::other("refused"),
                    ))
                } else {
                    Ok(Arc::new(MemoryPartyStore::new()) as Arc<dyn PartyStore>)
                }
            }
        }));

        sleep(INITIAL_DELAY + Duration::from_millis(10)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        assert!(!state.is_degraded().await);
        assert!(state.party_store().await.is_some());
        supervisor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_health_checks_drop_the_store() {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(MemoryPartyStore::new());
        let handle = store.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let store = handle.clone();
            async move { Ok(store as Arc<dyn PartyStore>) }
        }));

        sleep(Duration::from_millis(1)).await;
        assert!(!state.is_degraded().await);

        store.set_available(false);
        sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(10)).await;
        assert!(state.is_degraded().await);

        store.set_available(true);
        sleep(MAX_DELAY * 4).await;
        assert!(!state.is_degraded().await);
        supervisor.abort();
    }
}
